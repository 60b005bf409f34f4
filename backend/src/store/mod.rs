//! Persistence for API keys, usage records and the model catalog.

mod sqlite;

pub use sqlite::Store;

use crate::models::api_key::ApiKey;
use crate::models::usage::UsageRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Sink for metered exchanges. The proxy only needs this much of the store.
pub trait UsageRecorder: Send + Sync {
    fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;
}

/// Credential lookup by token digest.
pub trait KeyLookup: Send + Sync {
    fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;
}
