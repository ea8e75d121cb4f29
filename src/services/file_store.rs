//! src/services/file_store.rs
//!
//! FileStore: save, list, look up, verify and delete files kept under one
//! root directory. Payloads live at `<root>/<stored_id>`; the user-facing
//! name and optional password hash live in the root's ledger document.
//!
//! Two stores run side by side (web uploads and automated-upload staging).
//! They share nothing; each serializes its own ledger read-modify-write
//! sequences behind a process-local mutex. Several processes writing the same
//! root are not supported.

use crate::{
    models::{descriptor::FileDescriptor, record::StoredRecord},
    services::{
        credentials::{CredentialPolicy, hash_password},
        ledger::{LEDGER_FILE_NAME, Ledger},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use serde::Serialize;
use std::{
    cmp::Ordering,
    fmt, io,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("ledger document error: {0}")]
    Ledger(#[source] serde_json::Error),
    #[error("credential error: {0}")]
    Credential(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Attribute a listing is ordered by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Original name, case-insensitive.
    #[default]
    Name,
    Size,
    /// Filesystem modification time.
    Date,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortKey {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "date" => Ok(Self::Date),
            other => Err(StoreError::InvalidInput(format!("unknown sort key `{}`", other))),
        }
    }
}

impl FromStr for SortOrder {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(StoreError::InvalidInput(format!("unknown sort order `{}`", other))),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Size => "size",
            Self::Date => "date",
        })
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        })
    }
}

/// A directory of uploaded files plus the ledger describing them.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
    ledger: Ledger,
    credentials: CredentialPolicy,
    /// Guards ledger load → mutate → save within this process.
    ledger_lock: Arc<Mutex<()>>,
}

const MAX_STORED_ID_LEN: usize = 255;
const UUID_LEN: usize = 36;

/// Prefixes of the temporary files written by uploads and ledger saves.
const TEMP_PREFIXES: [&str; 2] = [".upload-", ".ledger-"];

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, credentials: CredentialPolicy) -> StoreResult<Self> {
        let root = root.into();
        if !fs::try_exists(&root).await? {
            fs::create_dir_all(&root).await?;
            info!("created store directory {}", root.display());
        }
        let ledger = Ledger::new(&root);
        debug!("store at {} uses ledger {}", root.display(), ledger.path().display());
        sweep_temporaries(&root).await?;
        Ok(Self {
            ledger,
            root,
            credentials,
            ledger_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the ledger document parses. Used by readiness checks; normal
    /// reads fail soft instead.
    pub async fn check_ledger(&self) -> StoreResult<()> {
        self.ledger.check_readable().await
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Reject identifiers that could escape the root or hit the ledger file.
    fn ensure_stored_id_safe(&self, stored_id: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidInput(format!("invalid stored id `{}`", stored_id));
        if stored_id.is_empty() || stored_id.len() > MAX_STORED_ID_LEN {
            return Err(invalid());
        }
        if stored_id == "." || stored_id.contains("..") || stored_id == LEDGER_FILE_NAME {
            return Err(invalid());
        }
        if stored_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(invalid());
        }
        Ok(())
    }

    fn stored_path(&self, stored_id: &str) -> PathBuf {
        self.root.join(stored_id)
    }

    /// Generate a fresh stored id, keeping the extension of `original_name`.
    ///
    /// The extension may hold letters, digits, `-` and `_` in any script.
    /// Anything else (separators, control characters, spaces) drops it so the
    /// id stays a safe single path component.
    fn new_stored_id(original_name: &str) -> String {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| {
                !ext.is_empty()
                    && UUID_LEN + 1 + ext.len() <= MAX_STORED_ID_LEN
                    && ext.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            });
        match extension {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        }
    }

    /// Build a descriptor from the record and the file's current metadata.
    ///
    /// Returns `Ok(None)` when the file is not on disk.
    async fn describe(
        &self,
        stored_id: &str,
        record: &StoredRecord,
    ) -> io::Result<Option<FileDescriptor>> {
        let path = self.stored_path(stored_id);
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(FileDescriptor::new(
            record.original_name.clone(),
            stored_id,
            path,
            meta.len(),
            modified,
            record.is_protected(),
        )))
    }

    /// Stream an upload into the store and record it in the ledger.
    ///
    /// - Hashes `password` first when it is non-empty.
    /// - Streams bytes into a temporary file, fsyncs, renames into place.
    /// - Inserts the ledger record and persists the ledger.
    ///
    /// A failed write leaves neither a file nor a ledger entry; a failed
    /// ledger write removes the file again.
    pub async fn save<S>(
        &self,
        stream: S,
        original_name: &str,
        password: Option<&str>,
    ) -> StoreResult<FileDescriptor>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        if original_name.is_empty() {
            return Err(StoreError::InvalidInput("no filename provided".into()));
        }

        let password_hash = match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                let password = password.to_string();
                let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
                    .await
                    .map_err(|err| StoreError::Credential(err.to_string()))??;
                Some(hashed)
            }
            None => None,
        };

        let stored_id = Self::new_stored_id(original_name);
        let file_path = self.stored_path(&stored_id);
        let tmp_path = self.root.join(format!(".upload-{}.tmp", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let record = StoredRecord::new(original_name, password_hash);
        {
            let _guard = self.ledger_lock.lock().await;
            let mut entries = self.ledger.load().await;
            entries.insert(stored_id.clone(), record.clone());
            if let Err(err) = self.ledger.save(&entries).await {
                let _ = fs::remove_file(&file_path).await;
                return Err(err);
            }
        }

        info!(
            "saved `{}` as {} ({} bytes{}) in {}",
            original_name,
            stored_id,
            size_bytes,
            if record.is_protected() { ", protected" } else { "" },
            self.root.display()
        );

        let descriptor = self.describe(&stored_id, &record).await?;
        descriptor.ok_or_else(|| StoreError::NotFound(stored_id))
    }

    /// Save an upload that is already in memory.
    pub async fn save_bytes(
        &self,
        data: Bytes,
        original_name: &str,
        password: Option<&str>,
    ) -> StoreResult<FileDescriptor> {
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(data) });
        self.save(stream, original_name, password).await
    }

    /// List every file that is still on disk, sorted.
    ///
    /// Ledger entries whose file has vanished are pruned and the ledger is
    /// persisted again. Entries whose metadata cannot be read for another
    /// reason are left out of this listing but kept in the ledger.
    pub async fn list(&self, sort_by: SortKey, order: SortOrder) -> StoreResult<Vec<FileDescriptor>> {
        let mut files = {
            let _guard = self.ledger_lock.lock().await;
            let mut entries = self.ledger.load().await;

            let mut files = Vec::with_capacity(entries.len());
            let mut missing = Vec::new();
            for (stored_id, record) in &entries {
                match self.describe(stored_id, record).await {
                    Ok(Some(descriptor)) => files.push(descriptor),
                    Ok(None) => missing.push(stored_id.clone()),
                    Err(err) => warn!("skipping {} in listing: {}", stored_id, err),
                }
            }

            if !missing.is_empty() {
                for stored_id in &missing {
                    entries.shift_remove(stored_id);
                }
                warn!(
                    "pruned {} ledger entries without a file in {}: {:?}",
                    missing.len(),
                    self.root.display(),
                    missing
                );
                if let Err(err) = self.ledger.save(&entries).await {
                    warn!("could not persist pruned ledger: {}", err);
                }
            }
            files
        };

        files.sort_by(|a, b| {
            let ordering = match sort_by {
                SortKey::Name => compare_names(&a.original_name, &b.original_name),
                SortKey::Size => a.size_in_bytes.cmp(&b.size_in_bytes),
                SortKey::Date => a.modified.cmp(&b.modified),
            };
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        Ok(files)
    }

    /// Original name recorded for `stored_id`. Ledger only, no disk access.
    pub async fn resolve_name(&self, stored_id: &str) -> Option<String> {
        self.ledger
            .load()
            .await
            .shift_remove(stored_id)
            .map(|record| record.original_name)
    }

    /// Check `supplied` against the file's credential or the operator override.
    ///
    /// Unknown ids answer `false`. An absent or empty password answers `true`
    /// only for unprotected files.
    pub async fn verify_credential(&self, stored_id: &str, supplied: Option<&str>) -> bool {
        let Some(record) = self.ledger.load().await.shift_remove(stored_id) else {
            return false;
        };
        let Some(stored_hash) = record.password_hash else {
            return true;
        };

        let policy = self.credentials.clone();
        let supplied = supplied.map(str::to_string);
        match tokio::task::spawn_blocking(move || {
            policy.permits(Some(&stored_hash), supplied.as_deref())
        })
        .await
        {
            Ok(permitted) => permitted,
            Err(err) => {
                error!("credential check for {} aborted: {}", stored_id, err);
                false
            }
        }
    }

    /// Whether a caller without a password would be turned away.
    pub async fn is_locked(&self, stored_id: &str) -> bool {
        !self.verify_credential(stored_id, None).await
    }

    /// Descriptor for a file that must exist in the ledger and on disk.
    pub async fn locate(&self, stored_id: &str) -> StoreResult<FileDescriptor> {
        self.ensure_stored_id_safe(stored_id)?;
        let record = self
            .ledger
            .load()
            .await
            .shift_remove(stored_id)
            .ok_or_else(|| StoreError::NotFound(stored_id.to_string()))?;
        self.describe(stored_id, &record)
            .await?
            .ok_or_else(|| StoreError::NotFound(stored_id.to_string()))
    }

    /// Descriptor plus an open handle ready for streaming out.
    pub async fn get_file_reader(&self, stored_id: &str) -> StoreResult<(FileDescriptor, File)> {
        let descriptor = self.locate(stored_id).await?;
        let file = File::open(&descriptor.path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(stored_id.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok((descriptor, file))
    }

    /// Remove a file and its ledger entry.
    ///
    /// The ledger entry goes first. If the file then cannot be removed, the
    /// entry is put back at its old position and the I/O error is returned,
    /// so a file never outlives its record. A record whose file was already
    /// gone still yields its original name. Unknown ids yield `None`.
    pub async fn delete(&self, stored_id: &str) -> StoreResult<Option<String>> {
        self.ensure_stored_id_safe(stored_id)?;
        let _guard = self.ledger_lock.lock().await;

        let mut entries = self.ledger.load().await;
        let Some((index, key, record)) = entries.shift_remove_full(stored_id) else {
            debug!("delete of unknown id {} in {}", stored_id, self.root.display());
            return Ok(None);
        };
        self.ledger.save(&entries).await?;

        let file_path = self.stored_path(stored_id);
        match fs::remove_file(&file_path).await {
            Ok(_) => info!(
                "deleted `{}` ({}) from {}",
                record.original_name,
                stored_id,
                self.root.display()
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "removed record for `{}` ({}); file was already gone",
                    record.original_name, stored_id
                );
            }
            Err(err) => {
                warn!(
                    "could not remove {}: {}; restoring ledger entry",
                    file_path.display(),
                    err
                );
                let original_name = record.original_name.clone();
                entries.shift_insert(index, key, record);
                if let Err(save_err) = self.ledger.save(&entries).await {
                    error!(
                        "failed to restore ledger entry for `{}` ({}): {}",
                        original_name, stored_id, save_err
                    );
                }
                return Err(StoreError::Io(err));
            }
        }

        Ok(Some(record.original_name))
    }
}

/// Remove upload and ledger temp files left behind by an interrupted process.
async fn sweep_temporaries(root: &Path) -> io::Result<()> {
    let mut dir = fs::read_dir(root).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let is_temporary =
            name.ends_with(".tmp") && TEMP_PREFIXES.iter().any(|prefix| name.starts_with(prefix));
        if !is_temporary || !entry.file_type().await?.is_file() {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(_) => info!("removed stale temporary file {}", entry.path().display()),
            Err(err) => warn!("could not remove stale {}: {}", entry.path().display(), err),
        }
    }
    Ok(())
}

/// Case-insensitive name ordering used by listings.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
