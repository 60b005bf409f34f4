use chrono::{DateTime, Utc};
use serde::Serialize;

/// An issued API key. The plaintext token is never stored, only its digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            created_at: Utc::now(),
        }
    }
}
