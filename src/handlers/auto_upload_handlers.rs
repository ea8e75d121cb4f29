//! Automated uploads from the SAP export script.
//!
//! Authenticated by a static `X-API-Key` and limited to the configured
//! extensions. Each accepted file is staged, moved to the
//! maintenance folder under its original name, and removed from staging.
//! When the move fails the file stays staged and the response says so.

use crate::{errors::AppError, services::transfer::TransferOutcome, state::AppState};
use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io;
use tracing::{info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize)]
pub struct AutoUploadResponse {
    pub message: String,
    pub original_name: String,
    /// Where the file landed, when the transfer completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Staging id kept for manual recovery, when the transfer failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_as: Option<String>,
}

/// `POST /api/sap_upload`: multipart with a single `file` part.
pub async fn auto_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let supplied = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if !state.api_key_matches(supplied) {
        warn!("rejected automated upload with missing or invalid API key");
        return Err(AppError::unauthorized("Unauthorized: Invalid API Key"));
    }

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        if original_name.is_empty() {
            return Err(AppError::bad_request("No file selected."));
        }
        if !state.extension_allowed(&original_name) {
            warn!("rejected automated upload `{}`: file type not allowed", original_name);
            return Err(AppError::bad_request("File type not allowed"));
        }

        let stream = field.map_err(io::Error::other);
        let outcome = state
            .pipeline
            .stage_and_transfer(stream, &original_name)
            .await?;

        return Ok(match outcome {
            TransferOutcome::Transferred {
                descriptor,
                destination,
            } => {
                info!(
                    "automated upload `{}` delivered to {}",
                    descriptor.original_name,
                    destination.display()
                );
                let body = AutoUploadResponse {
                    message: format!(
                        "`{}` uploaded and moved to the maintenance folder",
                        descriptor.original_name
                    ),
                    original_name: descriptor.original_name,
                    destination: Some(destination.display().to_string()),
                    staged_as: None,
                };
                (StatusCode::OK, Json(body)).into_response()
            }
            TransferOutcome::Staged { descriptor, error } => {
                let body = AutoUploadResponse {
                    message: format!(
                        "`{}` was uploaded but moving it to the maintenance folder failed: {}",
                        descriptor.original_name, error
                    ),
                    original_name: descriptor.original_name,
                    destination: None,
                    staged_as: Some(descriptor.stored_id),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        });
    }

    Err(AppError::bad_request("No file part in the request."))
}
