//! Data models for the file exchange service.
//!
//! `record` holds what the ledger persists per stored file; `descriptor` is
//! the read-model rebuilt from ledger + disk on every listing or lookup.

pub mod descriptor;
pub mod record;
