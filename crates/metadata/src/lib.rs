//! Control-plane store for the Hopper upload service.
//!
//! Holds the explicit upload-session records and anti-forgery form tokens.
//! The filesystem stays authoritative for bytes actually on disk; rows here
//! exist for serialization, observability, and expiry.

pub mod error;
pub mod models;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{SessionStore, SqliteStore};

use hopper_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a session store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn SessionStore>> {
    let store = SqliteStore::new(&config.path).await?;
    Ok(Arc::new(store) as Arc<dyn SessionStore>)
}
