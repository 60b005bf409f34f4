//! Residency manager.
//!
//! Keeps at most one transient model resident on the backend next to the
//! pinned set. Every decision re-queries the backend's resident list; nothing
//! about residency is cached locally.
//!
//! Without `serialize_transitions`, two concurrent requests for different
//! transient models can both observe the same resident set and both evict.
//! The backend's own load path is the final serialization point in that case.

mod class;

pub use class::{ResidencyClass, ResidencyPolicy};

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use gatekeeper_common::KeepAlive;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::upstream::{Upstream, UpstreamError};

/// What an eviction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub failed: Vec<String>,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.failed.is_empty()
    }
}

/// Result of an explicit preload.
#[derive(Debug)]
pub struct PreloadOutcome {
    pub class: ResidencyClass,
    pub evictions: EvictionReport,
    pub load: Result<(), UpstreamError>,
}

pub struct ResidencyManager {
    upstream: Arc<dyn Upstream>,
    policy: ResidencyPolicy,
    preload_keep_alive: Duration,
    transitions: Option<Mutex<()>>,
}

impl ResidencyManager {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        policy: ResidencyPolicy,
        preload_keep_alive: Duration,
        serialize_transitions: bool,
    ) -> Self {
        Self {
            upstream,
            policy,
            preload_keep_alive,
            transitions: serialize_transitions.then(|| Mutex::new(())),
        }
    }

    pub fn policy(&self) -> &ResidencyPolicy {
        &self.policy
    }

    /// Evict every resident transient model other than `target`.
    ///
    /// Best-effort: listing or unload failures are logged and the call still
    /// returns. The target itself is loaded by the forwarded request.
    pub async fn ensure_room(&self, target: &str) -> EvictionReport {
        if self.policy.is_pinned(target) {
            tracing::debug!(model = %target, "Pinned model requested, no eviction needed");
            return EvictionReport::default();
        }

        let _guard = self.lock_transitions().await;
        self.evict_for(target).await
    }

    /// Make room for `target` and load it ahead of the first request.
    pub async fn preload(&self, target: &str) -> PreloadOutcome {
        let class = self.policy.classify(target);
        let _guard = self.lock_transitions().await;

        let (evictions, keep_alive) = match class {
            ResidencyClass::Pinned => (EvictionReport::default(), KeepAlive::Indefinite),
            ResidencyClass::Transient => (
                self.evict_for(target).await,
                KeepAlive::For(self.preload_keep_alive),
            ),
        };

        let load = self.upstream.set_keep_alive(target, keep_alive).await;
        match &load {
            Ok(()) => tracing::info!(model = %target, class = %class, "Model preloaded"),
            Err(e) => tracing::warn!(model = %target, error = %e, "Preload failed"),
        }

        PreloadOutcome {
            class,
            evictions,
            load,
        }
    }

    /// Load every pinned model with an indefinite keep-alive.
    ///
    /// Returns how many were accepted by the backend.
    pub async fn pin_all(&self) -> usize {
        let mut pinned = 0;
        for model in self.policy.pinned() {
            match self.upstream.set_keep_alive(model, KeepAlive::Indefinite).await {
                Ok(()) => {
                    tracing::info!(model = %model, "Pinned model loaded");
                    pinned += 1;
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Failed to pin model");
                }
            }
        }
        pinned
    }

    async fn evict_for(&self, target: &str) -> EvictionReport {
        let resident = match self.upstream.list_resident().await {
            Ok(resident) => resident,
            Err(e) => {
                tracing::warn!(model = %target, error = %e, "Could not list resident models, skipping eviction");
                return EvictionReport::default();
            }
        };

        let candidates = self.policy.eviction_candidates(target, &resident);
        if candidates.is_empty() {
            return EvictionReport::default();
        }

        let results = join_all(candidates.into_iter().map(|model| async move {
            let result = self.upstream.set_keep_alive(model, KeepAlive::Unload).await;
            (model, result)
        }))
        .await;

        let mut report = EvictionReport::default();
        for (model, result) in results {
            match result {
                Ok(()) => {
                    tracing::info!(evicted = %model, target = %target, "Evicted transient model");
                    report.evicted.push(model.to_string());
                }
                Err(e) => {
                    tracing::warn!(model = %model, target = %target, error = %e, "Eviction failed");
                    report.failed.push(model.to_string());
                }
            }
        }
        report
    }

    async fn lock_transitions(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.transitions {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}
