//! API key generation and hashing.

use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_PREFIX: &str = "gk-";
const TOKEN_BYTES: usize = 32;

/// Generate a new unguessable API token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

/// SHA-256 hex digest of a token, the only form in which keys are stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
