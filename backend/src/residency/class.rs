//! Residency classification.
//!
//! A model is either pinned (kept loaded for the life of the process) or
//! transient (loaded on demand, evicted by the next transient request).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ModelsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidencyClass {
    Pinned,
    Transient,
}

impl ResidencyClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pinned" => Some(Self::Pinned),
            "transient" => Some(Self::Transient),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pinned => "pinned",
            Self::Transient => "transient",
        }
    }
}

impl fmt::Display for ResidencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static classification derived from the pinned allow-list.
#[derive(Debug, Clone, Default)]
pub struct ResidencyPolicy {
    pinned: Vec<String>,
}

impl ResidencyPolicy {
    pub fn new(pinned: Vec<String>) -> Self {
        Self { pinned }
    }

    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(config.pinned.clone())
    }

    /// Exact-match classification; unknown names are transient.
    pub fn classify(&self, model: &str) -> ResidencyClass {
        if self.is_pinned(model) {
            ResidencyClass::Pinned
        } else {
            ResidencyClass::Transient
        }
    }

    pub fn is_pinned(&self, model: &str) -> bool {
        self.pinned.iter().any(|p| p == model)
    }

    /// Pinned models in configured order.
    pub fn pinned(&self) -> &[String] {
        &self.pinned
    }

    /// Resident models that must go before `target` can be served.
    pub fn eviction_candidates<'a>(&self, target: &str, resident: &'a [String]) -> Vec<&'a str> {
        resident
            .iter()
            .map(String::as_str)
            .filter(|m| *m != target && !self.is_pinned(m))
            .collect()
    }
}
