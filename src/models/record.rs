//! Represents the persisted metadata of one stored file.

use serde::{Deserialize, Serialize};

/// A single ledger entry, keyed by stored identifier in the ledger document.
///
/// The ledger is the only place the user-facing name and the password hash
/// live. Size and modification time always come from disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    /// Filename as supplied by the uploader. Not unique across records.
    pub original_name: String,

    /// Argon2 PHC string, `None` when the file is unprotected.
    #[serde(default)]
    pub password_hash: Option<String>,
}

impl StoredRecord {
    pub fn new(original_name: impl Into<String>, password_hash: Option<String>) -> Self {
        Self {
            original_name: original_name.into(),
            password_hash,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Shape of a ledger value as found on disk.
///
/// Older ledgers stored the bare original name as the value. Both shapes are
/// accepted on read and collapsed into [`StoredRecord`] immediately.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum LedgerEntry {
    Legacy(String),
    Record(StoredRecord),
}

impl From<LedgerEntry> for StoredRecord {
    fn from(entry: LedgerEntry) -> Self {
        match entry {
            LedgerEntry::Legacy(original_name) => StoredRecord::new(original_name, None),
            LedgerEntry::Record(record) => record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_string_entry_becomes_unprotected_record() {
        let entry: LedgerEntry = serde_json::from_str(r#""report.xlsx""#).unwrap();
        let record = StoredRecord::from(entry);
        assert_eq!(record.original_name, "report.xlsx");
        assert!(!record.is_protected());
    }

    #[test]
    fn structured_entry_keeps_hash() {
        let entry: LedgerEntry =
            serde_json::from_str(r#"{"original_name":"a.txt","password_hash":"$argon2id$x"}"#)
                .unwrap();
        let record = StoredRecord::from(entry);
        assert_eq!(record.original_name, "a.txt");
        assert_eq!(record.password_hash.as_deref(), Some("$argon2id$x"));
    }

    #[test]
    fn missing_hash_field_defaults_to_none() {
        let entry: LedgerEntry = serde_json::from_str(r#"{"original_name":"a.txt"}"#).unwrap();
        assert!(!StoredRecord::from(entry).is_protected());
    }

    #[test]
    fn record_serializes_null_hash() {
        let json = serde_json::to_value(StoredRecord::new("a.txt", None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "original_name": "a.txt", "password_hash": null })
        );
    }
}
