use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gatekeeper_backend::auth::keys;
use gatekeeper_backend::test_util::mock_ollama::{chat_stream, ps_body, tags_body};
use gatekeeper_backend::test_util::{test_config, test_state_with, TEST_MASTER_KEY, TEST_PINNED_MODEL};
use gatekeeper_backend::upstream::OllamaClient;
use gatekeeper_backend::{build_app, AppState, Config};

fn config_for(server: &MockServer) -> Config {
    let mut config = test_config();
    config.ollama.base_url = server.uri();
    config
}

fn create_app(config: Config) -> (Arc<AppState>, Router) {
    let upstream = Arc::new(OllamaClient::new(&config.ollama).unwrap());
    let state = test_state_with(config, upstream);
    (state.clone(), build_app(state))
}

fn issue_user_key(state: &AppState, name: &str) -> String {
    let token = keys::generate_token();
    state
        .store
        .create_api_key(name, &format!("{}@example.com", name.to_lowercase()), &keys::hash_token(&token))
        .unwrap();
    token
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn as_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn stats(app: &Router) -> Value {
    let (status, body) = send_request(app, Method::GET, "/admin/stats", Some(TEST_MASTER_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    as_json(&body)
}

/// Stats once `requests` usage records exist. Usage is written after the body ends.
async fn stats_after(app: &Router, requests: u64) -> Value {
    for _ in 0..400 {
        let stats = stats(app).await;
        if stats["total_requests"].as_u64().unwrap_or(0) >= requests {
            return stats;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    stats(app).await
}

fn chat_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": "Why is the sky blue?" }],
        "stream": true
    })
}

/// Fail the test if the backend sees any request at all.
async fn forbid_backend_calls(server: &MockServer) {
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_health_needs_no_credential() {
    let server = MockServer::start().await;
    forbid_backend_calls(&server).await;
    let (_, app) = create_app(config_for(&server));

    let (status, body) = send_request(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let json = as_json(&body);
    assert_eq!(json["status"], "online");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_missing_or_unknown_credential_is_rejected_before_backend() {
    let server = MockServer::start().await;
    forbid_backend_calls(&server).await;
    let (_, app) = create_app(config_for(&server));

    let (status, body) =
        send_request(&app, Method::POST, "/api/chat", None, Some(chat_body("qwen2:7b"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(as_json(&body)["error"]["message"], "Invalid or missing API key");

    let (status, unknown) = send_request(
        &app,
        Method::POST,
        "/api/chat",
        Some("gk-0000000000000000000000000000000000000000000000000000000000000000"),
        Some(chat_body("qwen2:7b")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown, body);
}

#[tokio::test]
async fn test_master_key_cannot_run_inference() {
    let server = MockServer::start().await;
    forbid_backend_calls(&server).await;
    let (_, app) = create_app(config_for(&server));

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/chat",
        Some(TEST_MASTER_KEY),
        Some(chat_body(TEST_PINNED_MODEL)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(as_json(&body)["error"]["type"], "forbidden");
}

#[tokio::test]
async fn test_issued_keys_are_distinct_and_usable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags_body(&[("qwen2:7b", 4_431_400_262)])))
        .expect(2)
        .mount(&server)
        .await;
    let (_, app) = create_app(config_for(&server));

    let mut tokens = Vec::new();
    for _ in 0..2 {
        let (status, body) = send_request(
            &app,
            Method::POST,
            "/admin/keys",
            Some(TEST_MASTER_KEY),
            Some(json!({ "name": "Alice", "email": "a@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let json = as_json(&body);
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["email"], "a@x.com");
        let token = json["token"].as_str().unwrap().to_string();
        assert_eq!(token.len(), 3 + 64);
        tokens.push(token);
    }
    assert_ne!(tokens[0], tokens[1]);

    for token in &tokens {
        let (status, body) = send_request(&app, Method::GET, "/api/tags", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(as_json(&body)["models"][0]["name"], "qwen2:7b");
    }
}

#[tokio::test]
async fn test_user_key_cannot_reach_admin_routes() {
    let server = MockServer::start().await;
    forbid_backend_calls(&server).await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Bob");

    for (method, uri) in [
        (Method::GET, "/admin/stats"),
        (Method::POST, "/admin/keys"),
        (Method::POST, "/admin/preload"),
        (Method::GET, "/api/available_models"),
    ] {
        let (status, _) = send_request(&app, method, uri, Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn test_pinned_model_streams_byte_exact_and_records_usage() {
    let server = MockServer::start().await;
    let stream = chat_stream(TEST_PINNED_MODEL, &["The", " sky", " scatters", " blue"], 26, 290);
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream.clone(), "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ps_body(&[TEST_PINNED_MODEL])))
        .expect(0)
        .mount(&server)
        .await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Alice");

    let (status, body) = send_request(
        &app,
        Method::POST,
        "/api/chat",
        Some(&token),
        Some(chat_body(TEST_PINNED_MODEL)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, stream.as_bytes());

    let stats = stats_after(&app, 1).await;
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["tokens_prompt"], 26);
    assert_eq!(stats["tokens_eval"], 290);
    assert_eq!(stats["recent"][0]["model"], TEST_PINNED_MODEL);
    assert_eq!(stats["per_key"][0]["name"], "Alice");
}

#[tokio::test]
async fn test_transient_request_unloads_previous_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ps_body(&[TEST_PINNED_MODEL, "llama3:8b"])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "llama3:8b", "keep_alive": 0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": TEST_PINNED_MODEL })))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(chat_stream("qwen2:7b", &["Hi"], 5, 1), "application/x-ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Carol");

    let (status, _) =
        send_request(&app, Method::POST, "/api/chat", Some(&token), Some(chat_body("qwen2:7b"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_dropped_response_still_records_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                chat_stream(TEST_PINNED_MODEL, &["a", "b", "c"], 10, 3),
                "application/x-ndjson",
            ),
        )
        .mount(&server)
        .await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Dave");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/chat")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(chat_body(TEST_PINNED_MODEL).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    let stats = stats_after(&app, 1).await;
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["tokens_eval"], 0);
}

#[tokio::test]
async fn test_unreachable_backend_returns_generic_error() {
    let mut config = test_config();
    config.ollama.base_url = "http://127.0.0.1:1".to_string();
    config.ollama.connect_timeout_secs = 1;
    let (state, app) = create_app(config);
    let token = issue_user_key(&state, "Erin");

    let (status, body) =
        send_request(&app, Method::POST, "/api/chat", Some(&token), Some(chat_body("qwen2:7b"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json = as_json(&body);
    assert_eq!(json["error"]["message"], "Inference backend unavailable");
    assert!(!String::from_utf8_lossy(&body).contains("127.0.0.1"));

    assert_eq!(stats(&app).await["total_requests"], 0);
}

#[tokio::test]
async fn test_mount_prefix_is_stripped_and_query_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/show"))
        .and(query_param("verbose", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "license": "MIT" })))
        .expect(1)
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.proxy.mount = "/ollama".to_string();
    let (state, app) = create_app(config.validate().unwrap());
    let token = issue_user_key(&state, "Frank");

    let (status, body) =
        send_request(&app, Method::GET, "/ollama/api/show?verbose=true", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["license"], "MIT");

    let (status, _) = send_request(&app, Method::GET, "/api/show", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upstream_error_status_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": "model 'nope' not found" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ps_body(&[])))
        .mount(&server)
        .await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Gina");

    let (status, body) =
        send_request(&app, Method::POST, "/api/chat", Some(&token), Some(chat_body("nope"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(as_json(&body)["error"], "model 'nope' not found");
}

#[tokio::test]
async fn test_failed_eviction_leaves_outcome_to_forward() {
    let server = MockServer::start().await;
    let stream = chat_stream("qwen2:7b", &["Rayleigh", " scattering"], 14, 52);
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ps_body(&[TEST_PINNED_MODEL, "llama3:8b"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "llama3:8b", "keep_alive": 0 })))
        .respond_with(ResponseTemplate::new(500).set_body_string("unload failed"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream.clone(), "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;
    let (state, app) = create_app(config_for(&server));
    let token = issue_user_key(&state, "Hana");

    let (status, body) =
        send_request(&app, Method::POST, "/api/chat", Some(&token), Some(chat_body("qwen2:7b"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, stream.as_bytes());

    let stats = stats_after(&app, 1).await;
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["tokens_prompt"], 14);
    assert_eq!(stats["tokens_eval"], 52);
}

#[tokio::test]
async fn test_unanswerable_residency_listing_leaves_outcome_to_forward() {
    let server = MockServer::start().await;
    let stream = chat_stream("qwen2:7b", &["Hi"], 3, 1);
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(stream.clone(), "application/x-ndjson"))
        .expect(1)
        .mount(&server)
        .await;
    let mut config = config_for(&server);
    config.ollama.control_timeout_secs = 1;
    let (state, app) = create_app(config);
    let token = issue_user_key(&state, "Ivan");

    let (status, body) =
        send_request(&app, Method::POST, "/api/chat", Some(&token), Some(chat_body("qwen2:7b"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, stream.as_bytes());

    let stats = stats_after(&app, 1).await;
    assert_eq!(stats["total_requests"], 1);
    assert_eq!(stats["tokens_eval"], 1);
}
