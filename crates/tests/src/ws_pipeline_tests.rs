//! Pipeline tests for the WebSocket dispatch path.
//!
//! A local tokio-tungstenite server stands in for a `ws://` upstream; it
//! answers every text frame with a canned JSON-RPC response keyed off the
//! request's upstream id, which is exactly what a steemd WS endpoint does.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use jussi_core::{
    cache::{BlockTracker, CacheGroup, MemoryCache},
    config::UpstreamDefinition,
    proxy::{ProcessorConfig, RequestProcessor},
    types::RequestContext,
    upstream::{HttpClient, Router},
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// Serves each incoming text frame with `{"result": {...}, "id": <request id>}`.
async fn rpc_ws_server() -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if !message.is_text() {
                        continue;
                    }
                    let request: Value =
                        serde_json::from_str(message.to_text().unwrap()).unwrap_or(Value::Null);
                    let response = json!({
                        "jsonrpc": "2.0",
                        "result": {"served_method": request["method"]},
                        "id": request["id"],
                    });
                    if ws.send(response.to_string().into()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    (format!("ws://{addr}"), handle)
}

fn build_processor(ws_url: &str, ttl: i64) -> RequestProcessor {
    let upstreams = vec![UpstreamDefinition {
        name: "steemd".to_owned(),
        translate_to_appbase: false,
        urls: vec![("steemd".to_owned(), ws_url.to_owned())],
        ttls: vec![("steemd".to_owned(), ttl)],
        timeouts: vec![("steemd".to_owned(), 5)],
    }];
    let router = Arc::new(Router::from_config(&upstreams).unwrap());
    RequestProcessor::new(
        router,
        Arc::new(CacheGroup::local_only(MemoryCache::default())),
        Arc::new(HttpClient::new().unwrap()),
        Arc::new(BlockTracker::new()),
        ProcessorConfig::default(),
    )
}

fn ctx() -> RequestContext {
    RequestContext::new(Some("ws-test-id"), None, None)
}

#[tokio::test]
async fn single_request_round_trips_over_websocket() {
    let (url, server) = rpc_ws_server().await;
    let processor = build_processor(&url, -1);

    let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": 3});
    let outcome = processor.process(&ctx(), &request).await;

    assert_eq!(outcome.body["id"], json!(3));
    assert_eq!(outcome.body["result"]["served_method"], json!("get_block"));

    server.abort();
}

#[tokio::test]
async fn batch_fans_out_over_websocket_sessions() {
    let (url, server) = rpc_ws_server().await;
    let processor = build_processor(&url, -1);

    let batch = json!([
        {"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": "a"},
        {"jsonrpc": "2.0", "method": "get_accounts", "params": [["alice"]], "id": "b"},
        {"jsonrpc": "2.0", "method": "get_block_header", "params": [2], "id": "c"},
    ]);
    let outcome = processor.process(&ctx(), &batch).await;

    let members = outcome.body.as_array().unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0]["id"], json!("a"));
    assert_eq!(members[0]["result"]["served_method"], json!("get_block"));
    assert_eq!(members[1]["id"], json!("b"));
    assert_eq!(members[1]["result"]["served_method"], json!("get_accounts"));
    assert_eq!(members[2]["id"], json!("c"));
    assert_eq!(members[2]["result"]["served_method"], json!("get_block_header"));

    server.abort();
}

#[tokio::test]
async fn websocket_responses_are_cached_like_http_ones() {
    let (url, server) = rpc_ws_server().await;
    let processor = build_processor(&url, 30);

    let request = json!({"jsonrpc": "2.0", "method": "get_accounts", "params": [["bob"]], "id": 1});
    let outcome = processor.process(&ctx(), &request).await;
    assert!(outcome.cache_hit.is_none());

    // Kill the upstream entirely: the second request must still answer.
    server.abort();

    let request = json!({"jsonrpc": "2.0", "method": "get_accounts", "params": [["bob"]], "id": 2});
    let outcome = processor.process(&ctx(), &request).await;
    assert_eq!(outcome.body["id"], json!(2));
    assert!(outcome.cache_hit.is_some());
}

#[tokio::test]
async fn dead_websocket_upstream_maps_to_upstream_error() {
    let processor = build_processor("ws://127.0.0.1:1", -1);

    let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": 9});
    let outcome = processor.process(&ctx(), &request).await;

    assert_eq!(outcome.body["id"], json!(9));
    assert_eq!(outcome.body["error"]["code"], json!(1100));
    assert_eq!(outcome.body["error"]["data"]["jussi_request_id"], json!("ws-test-id"));
}
