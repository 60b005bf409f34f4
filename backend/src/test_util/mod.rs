//! Test doubles shared by unit and integration tests.

pub mod mock_ollama;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use gatekeeper_common::KeepAlive;

use crate::config::{
    AuthConfig, Config, DashboardConfig, DatabaseConfig, LoggingConfig, ModelsConfig,
    OllamaConfig, ProxyConfig, ServerConfig,
};
use crate::models::usage::UsageRecord;
use crate::store::{Store, StoreError, UsageRecorder};
use crate::upstream::{
    AvailableModel, ForwardRequest, Upstream, UpstreamError, UpstreamResponse,
};
use crate::proxy::extract_model;
use crate::AppState;

pub const TEST_MASTER_KEY: &str = "test-master-key";
pub const TEST_PINNED_MODEL: &str = "llama3.2:3b";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        ollama: OllamaConfig::default(),
        auth: AuthConfig {
            master_key: TEST_MASTER_KEY.to_string(),
        },
        models: ModelsConfig {
            pinned: vec![TEST_PINNED_MODEL.to_string()],
            serialize_transitions: false,
        },
        proxy: ProxyConfig::default(),
        database: DatabaseConfig {
            url: ":memory:".to_string(),
        },
        dashboard: DashboardConfig::default(),
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
    .validate()
    .expect("test config is valid")
}

/// State over an in-memory store and the given backend.
pub fn test_state_with(config: Config, upstream: Arc<dyn Upstream>) -> Arc<AppState> {
    let store = Arc::new(Store::new(&config.database.url).expect("in-memory store"));
    Arc::new(AppState::new(config, store, upstream))
}

pub fn test_state(upstream: Arc<dyn Upstream>) -> Arc<AppState> {
    test_state_with(test_config(), upstream)
}

/// A backend call as seen by `FakeUpstream`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCall {
    ListResident,
    ListAvailable,
    KeepAlive(String, KeepAlive),
    Forward {
        method: Method,
        path: String,
        model: Option<String>,
    },
}

#[derive(Debug)]
struct FakeState {
    resident: Vec<String>,
    available: Vec<AvailableModel>,
    calls: Vec<UpstreamCall>,
    failing_unloads: Vec<String>,
    unreachable: bool,
    forward_status: StatusCode,
    forward_body: Vec<&'static str>,
    forwarded_headers: HeaderMap,
}

/// In-memory backend that records every call.
///
/// Keep-alive directives mutate the resident list the way Ollama would:
/// `Unload` removes the model, anything else loads it. A forwarded request
/// naming a model loads it too.
#[derive(Debug)]
pub struct FakeUpstream {
    state: Mutex<FakeState>,
}

impl FakeUpstream {
    pub fn with_resident(models: &[&str]) -> Self {
        Self {
            state: Mutex::new(FakeState {
                resident: models.iter().map(|m| m.to_string()).collect(),
                available: Vec::new(),
                calls: Vec::new(),
                failing_unloads: Vec::new(),
                unreachable: false,
                forward_status: StatusCode::OK,
                forward_body: vec!["{\"done\":true,\"prompt_eval_count\":1,\"eval_count\":1}\n"],
                forwarded_headers: HeaderMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake upstream lock")
    }

    pub fn calls(&self) -> Vec<UpstreamCall> {
        self.lock().calls.clone()
    }

    pub fn resident(&self) -> Vec<String> {
        self.lock().resident.clone()
    }

    /// Models passed to an unload directive, in call order.
    pub fn unloads(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                UpstreamCall::KeepAlive(model, KeepAlive::Unload) => Some(model.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail_unload(&self, model: &str) {
        self.lock().failing_unloads.push(model.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn set_available(&self, models: Vec<AvailableModel>) {
        self.lock().available = models;
    }

    pub fn set_forward_status(&self, status: StatusCode) {
        self.lock().forward_status = status;
    }

    /// Chunks the forwarded response body is split into.
    pub fn set_forward_body(&self, chunks: &[&'static str]) {
        self.lock().forward_body = chunks.to_vec();
    }

    /// Headers of the last forwarded request.
    pub fn forwarded_headers(&self) -> HeaderMap {
        self.lock().forwarded_headers.clone()
    }

    fn unreachable() -> UpstreamError {
        UpstreamError::Unreachable("connection refused".to_string())
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn list_resident(&self) -> Result<Vec<String>, UpstreamError> {
        let mut state = self.lock();
        state.calls.push(UpstreamCall::ListResident);
        if state.unreachable {
            return Err(Self::unreachable());
        }
        Ok(state.resident.clone())
    }

    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), UpstreamError> {
        let mut state = self.lock();
        state
            .calls
            .push(UpstreamCall::KeepAlive(model.to_string(), keep_alive));
        if state.unreachable {
            return Err(Self::unreachable());
        }

        match keep_alive {
            KeepAlive::Unload => {
                if state.failing_unloads.iter().any(|m| m == model) {
                    return Err(UpstreamError::Rejected {
                        status: 500,
                        body: "unload failed".to_string(),
                    });
                }
                state.resident.retain(|m| m != model);
            }
            _ => {
                if !state.resident.iter().any(|m| m == model) {
                    state.resident.push(model.to_string());
                }
            }
        }
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<AvailableModel>, UpstreamError> {
        let mut state = self.lock();
        state.calls.push(UpstreamCall::ListAvailable);
        if state.unreachable {
            return Err(Self::unreachable());
        }
        Ok(state.available.clone())
    }

    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut state = self.lock();
        let model = extract_model(&request.body);
        state.calls.push(UpstreamCall::Forward {
            method: request.method.clone(),
            path: request.path_and_query.clone(),
            model: model.clone(),
        });
        if state.unreachable {
            return Err(Self::unreachable());
        }

        state.forwarded_headers = request.headers;
        if let Some(model) = model {
            if !state.resident.contains(&model) {
                state.resident.push(model);
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        );
        let chunks: Vec<Result<Bytes, UpstreamError>> = state
            .forward_body
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();

        Ok(UpstreamResponse {
            status: state.forward_status,
            headers,
            body: stream::iter(chunks).boxed(),
        })
    }
}

/// Usage sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    records: Mutex<Vec<UsageRecord>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingRecorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A recorder whose writes take `delay`, like a slow disk.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().expect("recorder lock").clone()
    }

    /// Records once at least `count` have landed, or whatever is there after 2s.
    ///
    /// Usage writes happen on the blocking pool, after the body is done.
    pub async fn wait_for_records(&self, count: usize) -> Vec<UsageRecord> {
        for _ in 0..400 {
            let records = self.records();
            if records.len() >= count {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.records()
    }
}

impl UsageRecorder for RecordingRecorder {
    fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(StoreError::Database("disk I/O error".to_string()));
        }
        self.records.lock().expect("recorder lock").push(record.clone());
        Ok(())
    }
}
