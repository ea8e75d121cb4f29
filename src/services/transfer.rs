//! Transfer pipeline: move staged files out to the maintenance folder.
//!
//! A staged file keeps its opaque stored id until it crosses this boundary,
//! where it takes its original name again. The automated-upload workflow is
//! save → transfer → delete staging entry. When the transfer fails the file
//! and its ledger entry stay in staging for manual recovery.

use crate::{
    models::descriptor::FileDescriptor,
    services::file_store::{FileStore, StoreResult},
};
use bytes::Bytes;
use chrono::Local;
use clap::ValueEnum;
use futures::Stream;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// What to do when the destination already holds a file with the same name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CollisionPolicy {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Fail the transfer and keep the file staged.
    Reject,
    /// Append a `_YYYYmmdd_HHMMSS` timestamp before the extension.
    Rename,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("`{0}` cannot be used as a destination file name")]
    InvalidDestinationName(String),
    #[error("destination `{}` already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("transfer to `{}` failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of the automated-upload workflow once the file was staged.
#[derive(Debug)]
pub enum TransferOutcome {
    /// The file reached the destination and staging is clean.
    Transferred {
        descriptor: FileDescriptor,
        destination: PathBuf,
    },
    /// The move failed; the file and its ledger entry remain in staging.
    Staged {
        descriptor: FileDescriptor,
        error: TransferError,
    },
}

/// The final path component of an uploaded name, if it has a usable one.
///
/// Clients may send either separator, so both are stripped.
fn destination_file_name(original_name: &str) -> Result<&str, TransferError> {
    let name = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(TransferError::InvalidDestinationName(
            original_name.to_string(),
        ));
    }
    Ok(name)
}

fn timestamped_name(name: &str, stamp: &str, attempt: u32) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let suffix = if attempt == 0 {
        stamp.to_string()
    } else {
        format!("{}_{}", stamp, attempt)
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext),
        None => format!("{}_{}", stem, suffix),
    }
}

async fn exists(path: &Path) -> Result<bool, TransferError> {
    fs::try_exists(path)
        .await
        .map_err(|err| TransferError::io(path, err))
}

async fn resolve_target(
    destination_dir: &Path,
    name: &str,
    collision: CollisionPolicy,
) -> Result<PathBuf, TransferError> {
    let target = destination_dir.join(name);
    match collision {
        CollisionPolicy::Overwrite => Ok(target),
        CollisionPolicy::Reject => {
            if exists(&target).await? {
                Err(TransferError::DestinationExists(target))
            } else {
                Ok(target)
            }
        }
        CollisionPolicy::Rename => {
            if !exists(&target).await? {
                return Ok(target);
            }
            let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
            let mut attempt = 0;
            loop {
                let candidate = destination_dir.join(timestamped_name(name, &stamp, attempt));
                if !exists(&candidate).await? {
                    return Ok(candidate);
                }
                attempt += 1;
            }
        }
    }
}

/// Rename `from` to `to`, copying across filesystems when rename cannot.
///
/// On the copy path the source is removed only after the copy completed; if
/// removing it fails the copy is taken back so the file exists in one place.
async fn move_file(from: &Path, to: &Path) -> Result<(), TransferError> {
    match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            debug!(
                "{} and {} are on different devices, copying",
                from.display(),
                to.display()
            );
        }
        Err(err) => return Err(TransferError::io(to, err)),
    }

    if let Err(err) = fs::copy(from, to).await {
        let _ = fs::remove_file(to).await;
        return Err(TransferError::io(to, err));
    }
    if let Err(err) = fs::remove_file(from).await {
        let _ = fs::remove_file(to).await;
        return Err(TransferError::io(from, err));
    }
    Ok(())
}

/// Move the file behind `descriptor` to `<destination_dir>/<original name>`.
///
/// Creates `destination_dir` when missing. Does not touch the ledger; clearing
/// the staging entry is the caller's next step.
pub async fn transfer(
    descriptor: &FileDescriptor,
    destination_dir: &Path,
    collision: CollisionPolicy,
) -> Result<PathBuf, TransferError> {
    let name = destination_file_name(&descriptor.original_name)?;

    fs::create_dir_all(destination_dir)
        .await
        .map_err(|err| TransferError::io(destination_dir, err))?;

    let target = resolve_target(destination_dir, name, collision).await?;
    move_file(&descriptor.path, &target).await?;

    info!(
        "transferred `{}` ({}) to {}",
        descriptor.original_name,
        descriptor.stored_id,
        target.display()
    );
    Ok(target)
}

/// Staging store bound to its destination folder.
#[derive(Clone, Debug)]
pub struct TransferPipeline {
    staging: FileStore,
    destination: PathBuf,
    collision: CollisionPolicy,
}

impl TransferPipeline {
    pub fn new(staging: FileStore, destination: impl Into<PathBuf>, collision: CollisionPolicy) -> Self {
        Self {
            staging,
            destination: destination.into(),
            collision,
        }
    }

    pub fn staging(&self) -> &FileStore {
        &self.staging
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub async fn transfer(&self, descriptor: &FileDescriptor) -> Result<PathBuf, TransferError> {
        transfer(descriptor, &self.destination, self.collision).await
    }

    /// Run the automated-upload workflow for one incoming file.
    ///
    /// Errors from the initial save propagate. Once the file is staged the
    /// call always succeeds and the outcome says where the file ended up.
    pub async fn stage_and_transfer<S>(
        &self,
        stream: S,
        original_name: &str,
    ) -> StoreResult<TransferOutcome>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let descriptor = self.staging.save(stream, original_name, None).await?;

        match self.transfer(&descriptor).await {
            Ok(destination) => {
                if let Err(err) = self.staging.delete(&descriptor.stored_id).await {
                    warn!(
                        "transferred {} but could not clear its staging entry: {}",
                        descriptor.stored_id, err
                    );
                }
                Ok(TransferOutcome::Transferred {
                    descriptor,
                    destination,
                })
            }
            Err(error) => {
                warn!(
                    "`{}` stays staged as {}: {}",
                    descriptor.original_name, descriptor.stored_id, error
                );
                Ok(TransferOutcome::Staged { descriptor, error })
            }
        }
    }
}
