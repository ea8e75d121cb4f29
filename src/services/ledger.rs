//! Metadata ledger: the JSON document mapping stored identifiers to records.
//!
//! One ledger lives at `<root>/metadata.json` per store root. Reads fail soft
//! (a missing or unreadable document is an empty ledger, a bad entry is
//! skipped); writes go through a temporary file and a rename so readers never
//! see half a document.

use crate::{
    models::record::{LedgerEntry, StoredRecord},
    services::file_store::{StoreError, StoreResult},
};
use indexmap::IndexMap;
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// File name of the ledger document inside a store root.
pub const LEDGER_FILE_NAME: &str = "metadata.json";

/// Ledger contents in document order (insertion order of stored files).
pub type LedgerMap = IndexMap<String, StoredRecord>;

#[derive(Clone, Debug)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Ledger for the store rooted at `root`. Touches nothing on disk.
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(LEDGER_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole ledger.
    ///
    /// Never fails: an absent document yields an empty map. A document that
    /// is not a JSON object is moved aside to `metadata.json.corrupt-<uuid>`
    /// so the next save cannot overwrite it, and yields an empty map. Single
    /// entries that do not parse are skipped with a warning while the rest
    /// load. Legacy string values are normalized to [`StoredRecord`] here and
    /// nowhere else.
    pub async fn load(&self) -> LedgerMap {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return LedgerMap::new(),
            Err(err) => {
                warn!("could not read ledger {}: {}", self.path.display(), err);
                return LedgerMap::new();
            }
        };

        let values = match serde_json::from_slice::<IndexMap<String, Value>>(&raw) {
            Ok(values) => values,
            Err(err) => {
                warn!(
                    "ledger {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    err
                );
                self.quarantine().await;
                return LedgerMap::new();
            }
        };

        let mut entries = LedgerMap::with_capacity(values.len());
        for (stored_id, value) in values {
            match serde_json::from_value::<LedgerEntry>(value) {
                Ok(entry) => {
                    entries.insert(stored_id, StoredRecord::from(entry));
                }
                Err(err) => warn!(
                    "skipping unreadable entry `{}` in ledger {}: {}",
                    stored_id,
                    self.path.display(),
                    err
                ),
            }
        }
        entries
    }

    /// Whether the ledger document can be read and parsed as a whole.
    /// An absent document counts as readable.
    pub async fn check_readable(&self) -> StoreResult<()> {
        match fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<IndexMap<String, Value>>(&raw)
                .map(|_| ())
                .map_err(StoreError::Ledger),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Move an unparseable document out of the way, keeping its bytes.
    async fn quarantine(&self) {
        let target = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            LEDGER_FILE_NAME,
            Uuid::new_v4()
        ));
        match fs::rename(&self.path, &target).await {
            Ok(_) => warn!("moved corrupt ledger to {}", target.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "could not move corrupt ledger {} aside: {}",
                self.path.display(),
                err
            ),
        }
    }

    /// Replace the ledger document with `entries`.
    pub async fn save(&self, entries: &LedgerMap) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(entries).map_err(StoreError::Ledger)?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = parent.join(format!(".ledger-{}.tmp", Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&json).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        debug!(
            "persisted ledger {} ({} entries)",
            self.path.display(),
            entries.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_document_loads_empty() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::new(temp.path());
        assert!(ledger.load().await.is_empty());
    }

    fn root_names(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn corrupt_document_loads_empty_and_is_kept_aside() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LEDGER_FILE_NAME), b"{ not json").unwrap();
        let ledger = Ledger::new(temp.path());
        assert!(ledger.check_readable().await.is_err());
        assert!(ledger.load().await.is_empty());

        ledger.save(&LedgerMap::new()).await.unwrap();
        let names = root_names(temp.path());
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], LEDGER_FILE_NAME);
        assert!(names[1].starts_with("metadata.json.corrupt-"));
        assert_eq!(
            std::fs::read(temp.path().join(&names[1])).unwrap(),
            b"{ not json"
        );
    }

    #[tokio::test]
    async fn bad_entry_is_skipped_and_valid_entries_survive() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(LEDGER_FILE_NAME),
            r#"{
                "keep.txt": { "original_name": "keep.txt", "password_hash": "$argon2id$x" },
                "broken": 42,
                "old.csv": "old.csv"
            }"#,
        )
        .unwrap();
        let ledger = Ledger::new(temp.path());
        assert!(ledger.check_readable().await.is_ok());

        let mut entries = ledger.load().await;
        let keys: Vec<&str> = entries.keys().map(String::as_str).collect();
        assert_eq!(keys, ["keep.txt", "old.csv"]);
        assert!(entries["keep.txt"].is_protected());

        entries.insert("new.txt".into(), StoredRecord::new("new.txt", None));
        ledger.save(&entries).await.unwrap();
        let reloaded = ledger.load().await;
        assert_eq!(reloaded.len(), 3);
        assert!(reloaded["keep.txt"].is_protected());
    }

    #[tokio::test]
    async fn wrong_top_level_shape_loads_empty() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(LEDGER_FILE_NAME), b"[1, 2, 3]").unwrap();
        assert!(Ledger::new(temp.path()).load().await.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_keeps_insertion_order() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::new(temp.path());

        let mut entries = LedgerMap::new();
        entries.insert("z.txt".into(), StoredRecord::new("last", None));
        entries.insert("a.txt".into(), StoredRecord::new("first", Some("hash".into())));
        ledger.save(&entries).await.unwrap();

        let loaded = ledger.load().await;
        let keys: Vec<&str> = loaded.keys().map(String::as_str).collect();
        assert_eq!(keys, ["z.txt", "a.txt"]);
        assert_eq!(loaded["a.txt"].password_hash.as_deref(), Some("hash"));
    }

    #[tokio::test]
    async fn save_leaves_no_temporary_files() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::new(temp.path());
        ledger.save(&LedgerMap::new()).await.unwrap();
        assert_eq!(root_names(temp.path()), [LEDGER_FILE_NAME]);
    }

    #[tokio::test]
    async fn mixed_legacy_and_structured_entries_normalize() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(LEDGER_FILE_NAME),
            r#"{
                "old.txt": "報告.txt",
                "new.pdf": { "original_name": "plan.pdf", "password_hash": null }
            }"#,
        )
        .unwrap();

        let loaded = Ledger::new(temp.path()).load().await;
        assert_eq!(loaded["old.txt"], StoredRecord::new("報告.txt", None));
        assert_eq!(loaded["new.pdf"], StoredRecord::new("plan.pdf", None));
    }
}
