//! Bearer-token authentication.
//!
//! Tokens resolve to either the master identity (configured, administrative
//! only) or a user identity backed by an issued API key.

pub mod keys;

use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::error::GatewayError;
use crate::store::{KeyLookup, StoreError};

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Master,
    User {
        key_id: String,
        name: String,
        email: String,
    },
}

impl Identity {
    pub fn is_master(&self) -> bool {
        matches!(self, Identity::Master)
    }

    /// Key id usage is attributed to. `None` for the master identity.
    pub fn key_id(&self) -> Option<&str> {
        match self {
            Identity::Master => None,
            Identity::User { key_id, .. } => Some(key_id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Unknown API key")]
    UnknownKey,
    #[error("Key lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match &e {
            AuthError::Lookup(inner) => {
                tracing::error!(error = %inner, "Key lookup failed, denying request");
            }
            _ => tracing::debug!(reason = %e, "Authentication failed"),
        }
        GatewayError::Unauthorized
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

/// Maps bearer tokens to identities.
pub struct ApiKeyResolver {
    master_hash: String,
    keys: Arc<dyn KeyLookup>,
}

impl ApiKeyResolver {
    pub fn new(master_key: &str, keys: Arc<dyn KeyLookup>) -> Self {
        Self {
            master_hash: keys::hash_token(master_key),
            keys,
        }
    }

    /// Resolve a token. Lookup failures deny access.
    pub fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let hash = keys::hash_token(token);
        if hash == self.master_hash {
            return Ok(Identity::Master);
        }

        let key = self
            .keys
            .find_api_key_by_hash(&hash)?
            .ok_or(AuthError::UnknownKey)?;

        Ok(Identity::User {
            key_id: key.id,
            name: key.name,
            email: key.email,
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        self.resolve(token)
    }
}
