//! Storage core: the ledger, credentials, the file store and the transfer
//! pipeline built on top of it.

pub mod credentials;
pub mod file_store;
pub mod ledger;
pub mod transfer;
