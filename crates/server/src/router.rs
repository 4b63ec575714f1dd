//! HTTP handlers for the JSON-RPC surface.
//!
//! `POST /` is the pipeline entry point. Once the transport delivers a body,
//! the answer is always `200 OK` with a JSON-RPC envelope; parse failures,
//! validation failures, and upstream failures all surface as error envelopes,
//! never as HTTP errors. The only non-200 responses come from tower layers
//! (body-size cap, concurrency shed) below this handler.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jussi_core::{
    proxy::{ProxyError, RequestProcessor},
    types::RequestContext,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Header carrying the request correlation id, inbound and outbound.
pub const X_JUSSI_REQUEST_ID: &str = "x-jussi-request-id";

/// Response header naming the cache key served on a single-request hit.
pub const X_JUSSI_CACHE_HIT: &str = "x-jussi-cache-hit";

/// Shared server state.
pub struct AppState {
    pub processor: Arc<RequestProcessor>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Handles `POST /` for single and batched JSON-RPC calls.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = RequestContext::new(
        header_str(&headers, X_JUSSI_REQUEST_ID),
        header_str(&headers, "x-amzn-trace-id"),
        header_str(&headers, "traceparent"),
    );

    let (payload, cache_hit) = match serde_json::from_slice::<Value>(&body) {
        Ok(parsed) => {
            let outcome = state.processor.process(&ctx, &parsed).await;
            (outcome.body, outcome.cache_hit)
        }
        Err(e) => {
            debug!(error = %e, "unparseable request body");
            (ProxyError::Parse(e.to_string()).to_response(&Value::Null, &ctx), None)
        }
    };

    let mut response = (StatusCode::OK, Json(payload)).into_response();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&ctx.jussi_request_id) {
        response_headers.insert(X_JUSSI_REQUEST_ID, value);
    }
    if let Some(key) = cache_hit {
        if let Ok(value) = HeaderValue::from_str(&key) {
            response_headers.insert(X_JUSSI_CACHE_HIT, value);
        }
    }
    response
}

/// Handles `GET /health`: liveness plus the current irreversibility
/// watermark.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "last_irreversible_block_num": state.processor.tracker().last_irreversible(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::Request,
        routing::{get, post},
        Router,
    };
    use jussi_core::{
        cache::{CacheGroup, MemoryCache},
        config::UpstreamDefinition,
        proxy::ProcessorConfig,
        upstream::{HttpClient, Router as UpstreamRouter},
    };
    use serde_json::json;
    use tower::ServiceExt;

    async fn test_app(upstream_url: &str) -> Router {
        let upstreams = vec![UpstreamDefinition {
            name: "steemd".to_owned(),
            translate_to_appbase: false,
            urls: vec![("steemd".to_owned(), upstream_url.to_owned())],
            ttls: vec![("steemd".to_owned(), -1)],
            timeouts: vec![],
        }];
        let router = Arc::new(UpstreamRouter::from_config(&upstreams).unwrap());
        let processor = Arc::new(RequestProcessor::new(
            router,
            Arc::new(CacheGroup::local_only(MemoryCache::default())),
            Arc::new(HttpClient::new().unwrap()),
            Arc::new(jussi_core::cache::BlockTracker::new()),
            ProcessorConfig::default(),
        ));
        let state = Arc::new(AppState { processor });

        Router::new()
            .route("/", post(handle_rpc))
            .route("/health", get(handle_health))
            .with_state(state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn malformed_body_yields_parse_error_with_200() {
        let app = test_app("https://unused.example.com").await;

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_JUSSI_REQUEST_ID));

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(-32700));
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn echoes_client_request_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","result":1,"id":1000000}"#)
            .create_async()
            .await;
        let app = test_app(&server.url()).await;

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .header(X_JUSSI_REQUEST_ID, "client-chosen-id")
            .body(Body::from(
                r#"{"jsonrpc":"2.0","method":"get_block","params":[1],"id":9}"#,
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(X_JUSSI_REQUEST_ID).unwrap().to_str().unwrap(),
            "client-chosen-id"
        );

        let body = body_json(response).await;
        assert_eq!(body["id"], json!(9));
        assert_eq!(body["result"], json!(1));
    }

    #[tokio::test]
    async fn invalid_envelope_yields_invalid_request() {
        let app = test_app("https://unused.example.com").await;

        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"jsonrpc":"2.0","method":"m","bogus":1}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(-32600));
        assert!(body["error"]["data"]["jussi_request_id"].is_string());
    }

    #[tokio::test]
    async fn health_reports_watermark() {
        let app = test_app("https://unused.example.com").await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("OK"));
        assert_eq!(body["last_irreversible_block_num"], json!(0));
        assert!(body["timestamp"].is_string());
    }
}
