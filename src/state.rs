//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        credentials::CredentialPolicy,
        file_store::{FileStore, StoreResult},
        transfer::TransferPipeline,
    },
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    /// Store behind the web upload/download/delete pages.
    pub uploads: FileStore,

    /// Staging store and destination for automated uploads.
    pub pipeline: TransferPipeline,

    /// Expected `X-API-Key`; `None` rejects every automated upload.
    pub api_key: Option<Arc<str>>,

    /// Lowercase extensions the automated upload accepts; empty accepts all.
    pub allowed_extensions: Arc<[String]>,
}

impl AppState {
    pub fn new(
        uploads: FileStore,
        pipeline: TransferPipeline,
        api_key: Option<String>,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            uploads,
            pipeline,
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
            allowed_extensions: allowed_extensions.into(),
        }
    }

    /// Open both store roots described by `cfg`.
    ///
    /// The operator override only applies to the web store; staged files are
    /// never password protected.
    pub async fn from_config(cfg: &AppConfig) -> StoreResult<Self> {
        let credentials = CredentialPolicy::new(cfg.admin_password.clone());
        let uploads = FileStore::open(&cfg.upload_dir, credentials).await?;
        let staging = FileStore::open(&cfg.staging_dir, CredentialPolicy::default()).await?;
        let pipeline = TransferPipeline::new(staging, &cfg.destination_dir, cfg.collision);
        Ok(Self::new(
            uploads,
            pipeline,
            cfg.api_key.clone(),
            cfg.allowed_extensions.clone(),
        ))
    }

    /// Whether `supplied` matches the configured API key.
    pub fn api_key_matches(&self, supplied: Option<&str>) -> bool {
        match (self.api_key.as_deref(), supplied) {
            (Some(expected), Some(supplied)) => expected == supplied,
            _ => false,
        }
    }

    /// Whether the automated upload accepts a file named `file_name`.
    pub fn extension_allowed(&self, file_name: &str) -> bool {
        extension_allowed(&self.allowed_extensions, file_name)
    }
}

/// Text after the last `.` of `file_name`, compared case-insensitively.
/// A name without a dot only passes an empty allow-list.
fn extension_allowed(allowed: &[String], file_name: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match file_name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            allowed.iter().any(|candidate| *candidate == ext)
        }
        None => false,
    }
}
