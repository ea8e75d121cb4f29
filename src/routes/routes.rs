//! Defines routes for the web file exchange and the automated-upload API.
//!
//! ## Structure
//! - **Web endpoints** (uploads store)
//!   - `GET  /`                      : list files (`?sort=name|size|date&order=asc|desc`)
//!   - `POST /upload`                : multipart upload, optional protection password
//!   - `GET  /download/{stored_id}`  : download an unprotected file
//!   - `POST /download/{stored_id}`  : download with a password
//!   - `POST /delete/{stored_id}`    : delete with a password
//!   - `GET  /check_lock/{stored_id}`: whether a password is required
//!
//! - **Automated upload** (staging store)
//!   - `POST /api/sap_upload`: API-key authenticated upload + transfer

use crate::{
    handlers::{
        auto_upload_handlers::auto_upload,
        file_handlers::{
            check_lock, delete_file, download_file, download_file_with_password, list_files,
            upload_files,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers. Upload
/// bodies are capped at `max_upload_bytes`.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Web routes
        .route("/", get(list_files))
        .route("/upload", post(upload_files))
        .route(
            "/download/{stored_id}",
            get(download_file).post(download_file_with_password),
        )
        .route("/delete/{stored_id}", post(delete_file))
        .route("/check_lock/{stored_id}", get(check_lock))
        // Automated upload
        .route("/api/sap_upload", post(auto_upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
