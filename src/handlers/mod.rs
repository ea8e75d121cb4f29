//! HTTP handlers. They translate requests into store calls and store results
//! into JSON or file responses; no storage logic lives here.

pub mod auto_upload_handlers;
pub mod file_handlers;
pub mod health_handlers;
