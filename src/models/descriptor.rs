//! Read-model describing a stored file as the caller sees it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// A stored file combined with its live filesystem attributes.
///
/// Never persisted. Built fresh from the ledger record and `fs::metadata`
/// whenever a listing or lookup is answered.
#[derive(Serialize, Clone, Debug)]
pub struct FileDescriptor {
    /// User-facing filename from the ledger.
    pub original_name: String,

    /// Opaque on-disk name, also the public handle for download/delete.
    pub stored_id: String,

    /// Byte size on disk.
    pub size_in_bytes: u64,

    /// `size_in_bytes` rendered with a binary unit, e.g. `1.5 KB`.
    pub human_size: String,

    /// Whether a password hash is set for this file.
    pub is_protected: bool,

    /// Last modification time reported by the filesystem.
    pub modified: DateTime<Utc>,

    /// Full path inside the store root. Internal only.
    #[serde(skip)]
    pub path: PathBuf,
}

impl FileDescriptor {
    pub fn new(
        original_name: impl Into<String>,
        stored_id: impl Into<String>,
        path: PathBuf,
        size_in_bytes: u64,
        modified: DateTime<Utc>,
        is_protected: bool,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            stored_id: stored_id.into(),
            size_in_bytes,
            human_size: human_size(size_in_bytes),
            is_protected,
            modified,
            path,
        }
    }
}

/// Format a byte count with 1024-based units and at most two decimals.
///
/// Plain bytes are printed without decimals; larger units always keep at
/// least one (`1.0 KB`, `1.5 MB`, `2.25 GB`). Anything past TB stays in TB.
pub fn human_size(bytes: u64) -> String {
    let mut unit = 0;
    let mut divisor: u64 = 1;
    while unit + 1 < SIZE_UNITS.len() && bytes / divisor >= 1024 {
        divisor *= 1024;
        unit += 1;
    }

    if unit == 0 {
        return format!("{} B", bytes);
    }

    let value = bytes as f64 / divisor as f64;
    let mut rendered = format!("{:.2}", value);
    while rendered.ends_with('0') && !rendered.ends_with(".0") {
        rendered.pop();
    }
    format!("{} {}", rendered, SIZE_UNITS[unit])
}
