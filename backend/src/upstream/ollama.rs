//! reqwest-backed `Upstream` implementation for Ollama.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gatekeeper_common::{GenerateRequest, KeepAlive, PsResponse, TagsResponse};
use reqwest::{redirect, Client};

use super::{AvailableModel, ForwardRequest, Upstream, UpstreamError, UpstreamResponse};
use crate::config::OllamaConfig;

/// Client for the Ollama HTTP API.
pub struct OllamaClient {
    http_client: Client,
    base_url: String,
    control_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, UpstreamError> {
        // Upstream 3xx responses are relayed to the caller, never followed.
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            control_timeout: config.control_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Upstream for OllamaClient {
    async fn list_resident(&self) -> Result<Vec<String>, UpstreamError> {
        let response = self
            .http_client
            .get(self.url("/api/ps"))
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Unexpected status from /api/ps, assuming nothing resident");
            return Ok(vec![]);
        }

        match response.json::<PsResponse>().await {
            Ok(ps) => Ok(ps.models.into_iter().map(|m| m.name).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable /api/ps reply, assuming nothing resident");
                Ok(vec![])
            }
        }
    }

    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), UpstreamError> {
        let request = GenerateRequest::residency(model, keep_alive);

        let response = self
            .http_client
            .post(self.url("/api/generate"))
            .json(&request)
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected { status, body });
        }

        tracing::debug!(model = %model, keep_alive = ?keep_alive, "Keep-alive directive accepted");
        Ok(())
    }

    async fn list_available(&self) -> Result<Vec<AvailableModel>, UpstreamError> {
        let response = self
            .http_client
            .get(self.url("/api/tags"))
            .timeout(self.control_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected { status, body });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| AvailableModel {
                name: m.name,
                size_bytes: m.size,
            })
            .collect())
    }

    async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url(&request.path_and_query);

        tracing::debug!(method = %request.method, url = %url, "Forwarding request");

        let response = self
            .http_client
            .request(request.method, &url)
            .headers(request.headers)
            .body(request.body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpstreamError::Stream(e.to_string())))
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method, StatusCode};
    use bytes::Bytes;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OllamaClient {
        let config = OllamaConfig {
            base_url: format!("{}/", server.uri()),
            ..OllamaConfig::default()
        };
        OllamaClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_base_url_normalization() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        assert_eq!(client.base_url, server.uri());
    }

    #[tokio::test]
    async fn test_list_resident_parses_ps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [
                    {"name": "llama3.2:3b", "model": "llama3.2:3b", "size": 1},
                    {"name": "llama3:8b", "model": "llama3:8b", "size": 2}
                ]
            })))
            .mount(&server)
            .await;

        let resident = client_for(&server).list_resident().await.unwrap();
        assert_eq!(resident, vec!["llama3.2:3b".to_string(), "llama3:8b".to_string()]);
    }

    #[tokio::test]
    async fn test_list_resident_anomaly_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ps"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let resident = client_for(&server).list_resident().await.unwrap();
        assert!(resident.is_empty());
    }

    #[tokio::test]
    async fn test_list_resident_unreachable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            connect_timeout_secs: 1,
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        let err = client.list_resident().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_set_keep_alive_unload_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_json(json!({
                "model": "llama3:8b",
                "prompt": "",
                "stream": false,
                "keep_alive": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .set_keep_alive("llama3:8b", KeepAlive::Unload)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_keep_alive_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .set_keep_alive("missing", KeepAlive::Indefinite)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_list_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3:8b", "size": 4661224676u64, "modified_at": "2024-05-01T00:00:00Z"}]
            })))
            .mount(&server)
            .await;

        let models = client_for(&server).list_available().await.unwrap();
        assert_eq!(
            models,
            vec![AvailableModel {
                name: "llama3:8b".to_string(),
                size_bytes: Some(4661224676),
            }]
        );
    }

    #[tokio::test]
    async fn test_forward_passes_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(query_param("verbose", "1"))
            .respond_with(
                ResponseTemplate::new(418)
                    .insert_header("x-upstream", "yes")
                    .set_body_string("line one\nline two\n"),
            )
            .mount(&server)
            .await;

        let response = client_for(&server)
            .forward(ForwardRequest {
                method: Method::POST,
                path_and_query: "/api/chat?verbose=1".to_string(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{}"),
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers.get("x-upstream").unwrap(), "yes");

        let chunks: Vec<Bytes> = response
            .body
            .map(|c| c.unwrap())
            .collect()
            .await;
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn test_forward_relays_redirect_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/api/chat"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("followed"))
            .expect(0)
            .mount(&server)
            .await;

        let response = client_for(&server)
            .forward(ForwardRequest {
                method: Method::POST,
                path_and_query: "/api/chat/".to_string(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{\"model\":\"llama3:8b\"}"),
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers.get("location").unwrap(), "/api/chat");
    }
}
