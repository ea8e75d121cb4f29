//! HTTP handlers for the web file exchange: list, upload, download, delete
//! and lock checks against the uploads store.

use crate::{
    errors::AppError,
    models::descriptor::FileDescriptor,
    services::file_store::{FileStore, SortKey, SortOrder},
    state::AppState,
};
use axum::{
    Form, Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// Query params accepted by the listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilesQuery {
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileDescriptor>,
    pub current_sort: SortKey,
    pub current_order: SortOrder,
}

/// Form body carrying an optional password attempt.
#[derive(Debug, Default, Deserialize)]
pub struct PasswordForm {
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailedUpload {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub uploaded: Vec<FileDescriptor>,
    pub failed: Vec<FailedUpload>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub original_name: String,
    /// `false` when only the record was left and the file was already gone.
    pub file_was_present: bool,
}

#[derive(Debug, Serialize)]
pub struct LockStatus {
    pub is_locked: bool,
}

/// `GET /`: list uploads. Unknown `sort`/`order` values fall back to name/asc.
pub async fn list_files(
    State(state): State<AppState>,
    Query(q): Query<ListFilesQuery>,
) -> Result<Json<ListFilesResponse>, AppError> {
    let sort_by: SortKey = q
        .sort
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();
    let order: SortOrder = q
        .order
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let files = state.uploads.list(sort_by, order).await?;
    Ok(Json(ListFilesResponse {
        files,
        current_sort: sort_by,
        current_order: order,
    }))
}

/// `POST /upload`: multipart with repeated `files` parts and an optional
/// `protection_password` applied to every file in the request.
///
/// File parts are buffered because the password part may come after them.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut pending: Vec<(String, Bytes)> = Vec::new();
    let mut password: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                if !filename.is_empty() {
                    pending.push((filename, data));
                }
            }
            "protection_password" => {
                password = Some(field.text().await?);
            }
            _ => {}
        }
    }

    if pending.is_empty() {
        return Err(AppError::bad_request("no files selected"));
    }

    let mut summary = UploadSummary {
        uploaded: Vec::with_capacity(pending.len()),
        failed: Vec::new(),
    };
    for (filename, data) in pending {
        match state
            .uploads
            .save_bytes(data, &filename, password.as_deref())
            .await
        {
            Ok(descriptor) => summary.uploaded.push(descriptor),
            Err(err) => {
                warn!("upload of `{}` failed: {}", filename, err);
                summary.failed.push(FailedUpload {
                    filename,
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        "web upload: {} succeeded, {} failed",
        summary.uploaded.len(),
        summary.failed.len()
    );
    let status = if summary.uploaded.is_empty() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(summary)).into_response())
}

/// `GET /download/{stored_id}`: only unprotected files download without a password.
pub async fn download_file(
    State(state): State<AppState>,
    Path(stored_id): Path<String>,
) -> Result<Response, AppError> {
    ensure_known(&state.uploads, &stored_id).await?;
    if state.uploads.is_locked(&stored_id).await {
        return Err(AppError::forbidden("this file is password protected"));
    }
    stream_file(&state.uploads, &stored_id).await
}

/// `POST /download/{stored_id}`: download with a password attempt.
pub async fn download_file_with_password(
    State(state): State<AppState>,
    Path(stored_id): Path<String>,
    Form(form): Form<PasswordForm>,
) -> Result<Response, AppError> {
    ensure_known(&state.uploads, &stored_id).await?;
    if !state
        .uploads
        .verify_credential(&stored_id, form.password.as_deref())
        .await
    {
        return Err(AppError::forbidden("wrong password"));
    }
    stream_file(&state.uploads, &stored_id).await
}

/// `POST /delete/{stored_id}`: delete after checking the password.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(stored_id): Path<String>,
    Form(form): Form<PasswordForm>,
) -> Result<Json<DeleteResponse>, AppError> {
    ensure_known(&state.uploads, &stored_id).await?;
    if !state
        .uploads
        .verify_credential(&stored_id, form.password.as_deref())
        .await
    {
        return Err(AppError::forbidden("wrong password"));
    }

    let file_was_present = state.uploads.locate(&stored_id).await.is_ok();
    let original_name = state
        .uploads
        .delete(&stored_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("file `{}` not found", stored_id)))?;

    let message = if file_was_present {
        format!("`{}` deleted", original_name)
    } else {
        format!("record for `{}` removed; the file was already gone", original_name)
    };
    Ok(Json(DeleteResponse {
        message,
        original_name,
        file_was_present,
    }))
}

/// `GET /check_lock/{stored_id}`: whether a password is needed.
///
/// Unknown ids report as locked.
pub async fn check_lock(
    State(state): State<AppState>,
    Path(stored_id): Path<String>,
) -> Json<LockStatus> {
    Json(LockStatus {
        is_locked: state.uploads.is_locked(&stored_id).await,
    })
}

async fn ensure_known(store: &FileStore, stored_id: &str) -> Result<(), AppError> {
    match store.resolve_name(stored_id).await {
        Some(_) => Ok(()),
        None => Err(AppError::not_found(format!(
            "file metadata not found for `{}`",
            stored_id
        ))),
    }
}

async fn stream_file(store: &FileStore, stored_id: &str) -> Result<Response, AppError> {
    let (descriptor, file) = store.get_file_reader(stored_id).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(descriptor.size_in_bytes),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&descriptor.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(original_name.len() * 3);
    for byte in original_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_encodes_non_ascii_names() {
        let value = content_disposition("報告 v2.xlsx");
        assert_eq!(
            value,
            "attachment; filename=\"__ v2.xlsx\"; filename*=UTF-8''%E5%A0%B1%E5%91%8A%20v2.xlsx"
        );
    }

    #[test]
    fn disposition_escapes_quotes_in_fallback() {
        let value = content_disposition("a\"b.txt");
        assert!(value.starts_with("attachment; filename=\"a_b.txt\""));
        assert!(value.ends_with("a%22b.txt"));
    }
}
