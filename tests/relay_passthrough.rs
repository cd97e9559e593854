use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use ssetap::api::router;
use ssetap::config::{AppConfig, FeaturesConfig, ServerConfig, UpstreamConfig};
use ssetap::state::AppState;

const UPSTREAM_SSE: &str = concat!(
    ": keep-alive\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

async fn spawn(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, server)
}

async fn json_body(response: reqwest::Response) -> Value {
    let bytes = response.bytes().await.expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn build_state(base_url: String, base_path: &str) -> Arc<AppState> {
    let config = AppConfig {
        server: ServerConfig {
            base_path: base_path.to_string(),
            ..ServerConfig::default()
        },
        upstream: UpstreamConfig {
            base_url,
            api_key: Some("upstream-secret".to_string()),
            path: "/chat/completions".to_string(),
            proxy: None,
        },
        features: FeaturesConfig::default(),
    };
    Arc::new(AppState::new(config).expect("state"))
}

fn mock_upstream() -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(|headers: HeaderMap| async move {
            let authorized = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                == Some("Bearer upstream-secret");
            if !authorized {
                return Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"error":{"message":"bad upstream key"}}"#))
                    .expect("build 401");
            }
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from(UPSTREAM_SSE))
                .expect("build sse response")
        }),
    )
}

#[tokio::test]
async fn test_relay_forwards_sse_bytes_verbatim() {
    let (upstream_addr, upstream) = spawn(mock_upstream()).await;
    let state = build_state(format!("http://{upstream_addr}/v1"), "");
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay_addr}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body(json!({"model": "gpt-4o-mini", "stream": true, "messages": []}).to_string())
        .send()
        .await
        .expect("relay request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/event-stream")
    );
    let body = response.text().await.expect("relay body");
    assert_eq!(body, UPSTREAM_SSE);

    relay.abort();
    upstream.abort();
}

#[tokio::test]
async fn test_relay_maps_upstream_error_status() {
    let (upstream_addr, upstream) = spawn(mock_upstream()).await;
    let config = AppConfig {
        server: ServerConfig::default(),
        upstream: UpstreamConfig {
            base_url: format!("http://{upstream_addr}/v1"),
            api_key: None,
            path: "/chat/completions".to_string(),
            proxy: None,
        },
        features: FeaturesConfig::default(),
    };
    let state = Arc::new(AppState::new(config).expect("state"));
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay_addr}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body(json!({"model": "gpt-4o-mini", "stream": true}).to_string())
        .send()
        .await
        .expect("relay request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let payload = json_body(response).await;
    let message = payload["error"]["message"].as_str().expect("message");
    assert!(message.contains("bad upstream key"));
    assert_eq!(payload["error"]["status"], 401);

    relay.abort();
    upstream.abort();
}

#[tokio::test]
async fn test_relay_unreachable_upstream_is_bad_gateway() {
    // Bind and drop to get a port nothing listens on.
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind")
        .local_addr()
        .expect("addr");
    let state = build_state(format!("http://{closed}/v1"), "");
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay_addr}/v1/chat/completions"))
        .body("{}")
        .send()
        .await
        .expect("relay request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

    relay.abort();
}

#[tokio::test]
async fn test_health_under_base_path() {
    let state = build_state("http://127.0.0.1:9/v1".to_string(), "/relay");
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::get(format!("http://{relay_addr}/relay/health"))
        .await
        .expect("health request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["upstream"], "http://127.0.0.1:9/v1/chat/completions");

    let missing = reqwest::get(format!("http://{relay_addr}/health"))
        .await
        .expect("unprefixed request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    relay.abort();
}

#[tokio::test]
async fn test_base_path_without_leading_slash_is_normalized() {
    let state = build_state("http://127.0.0.1:9/v1".to_string(), "relay/");
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::get(format!("http://{relay_addr}/relay/health"))
        .await
        .expect("health request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    relay.abort();
}

#[tokio::test]
async fn test_json_upstream_answer_is_relayed_untouched() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async { Json(json!({"choices": [{"message": {"content": "pong"}}]})) }),
    );
    let (upstream_addr, upstream) = spawn(app).await;
    let state = build_state(format!("http://{upstream_addr}/v1"), "");
    let (relay_addr, relay) = spawn(router(state)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay_addr}/v1/chat/completions"))
        .body("{}")
        .send()
        .await
        .expect("relay request");
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("application/json")
    );
    let payload = json_body(response).await;
    assert_eq!(payload["choices"][0]["message"]["content"], "pong");

    relay.abort();
    upstream.abort();
}
