use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::residency::ResidencyClass;

/// Snapshot of a model installed on the backend, taken at startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Advisory on-disk size reported by the backend.
    pub size_bytes: Option<u64>,
    pub residency: ResidencyClass,
    pub last_seen: DateTime<Utc>,
}
