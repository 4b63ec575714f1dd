//! End-to-end pipeline tests over a mock HTTP upstream.
//!
//! Each test builds a processor against a `mockito` server, drives it with
//! raw request bodies, and asserts on the returned envelopes: canonical
//! routing, id rewriting, cache behaviour (including the irreversibility
//! rule), batch ordering, and limit enforcement.

use std::sync::Arc;

use jussi_core::{
    cache::{BlockTracker, CacheGroup, MemoryCache},
    config::UpstreamDefinition,
    proxy::{ProcessorConfig, RequestProcessor},
    types::RequestContext,
    upstream::{HttpClient, Router},
    validators::Limits,
};
use serde_json::{json, Value};

fn upstream_def(
    name: &str,
    urls: &[(&str, &str)],
    ttls: &[(&str, i64)],
) -> UpstreamDefinition {
    UpstreamDefinition {
        name: name.to_owned(),
        translate_to_appbase: false,
        urls: urls.iter().map(|(p, u)| ((*p).to_owned(), (*u).to_owned())).collect(),
        ttls: ttls.iter().map(|(p, t)| ((*p).to_owned(), *t)).collect(),
        timeouts: vec![("steemd".to_owned(), 5)],
    }
}

fn build_processor(upstreams: Vec<UpstreamDefinition>, limits: Limits) -> RequestProcessor {
    let router = Arc::new(Router::from_config(&upstreams).unwrap());
    RequestProcessor::new(
        router,
        Arc::new(CacheGroup::local_only(MemoryCache::default())),
        Arc::new(HttpClient::new().unwrap()),
        Arc::new(BlockTracker::new()),
        ProcessorConfig { batch_size_limit: 5, limits, ..ProcessorConfig::default() },
    )
}

fn ctx() -> RequestContext {
    RequestContext::new(Some("test-request-id"), None, None)
}

/// An upstream response body with the given result and upstream-side id.
fn upstream_body(result: Value, id: i64) -> String {
    json!({"jsonrpc": "2.0", "result": result, "id": id}).to_string()
}

#[tokio::test]
async fn bare_method_routes_to_steemd_and_rewrites_ids() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        // The upstream sees the rewritten id, not the client's.
        .match_body(mockito::Matcher::PartialJson(json!({
            "jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": 1_000_000
        })))
        .match_header("x-jussi-request-id", "test-request-id")
        .with_body(upstream_body(json!({"block_id": "000003e8aabb"}), 1_000_000))
        .create_async()
        .await;

    let processor =
        build_processor(vec![upstream_def("steemd", &[("steemd", &server.url())], &[])], Limits::default());

    let body = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": 1});
    let outcome = processor.process(&ctx(), &body).await;

    assert_eq!(outcome.body["id"], json!(1));
    assert_eq!(outcome.body["result"]["block_id"], json!("000003e8aabb"));
    assert!(outcome.cache_hit.is_none());
    mock.assert_async().await;
}

#[tokio::test]
async fn second_request_is_served_from_cache_with_new_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_body(upstream_body(json!({"name": "alice"}), 1_000_000))
        .expect(1)
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", &server.url())], &[("steemd", 30)])],
        Limits::default(),
    );

    let first = json!({"jsonrpc": "2.0", "method": "get_accounts", "params": [["alice"]], "id": 1});
    let outcome = processor.process(&ctx(), &first).await;
    assert_eq!(outcome.body["id"], json!(1));
    assert!(outcome.cache_hit.is_none());

    let second = json!({"jsonrpc": "2.0", "method": "get_accounts", "params": [["alice"]], "id": "two"});
    let outcome = processor.process(&ctx(), &second).await;
    assert_eq!(outcome.body["id"], json!("two"));
    assert_eq!(outcome.body["result"]["name"], json!("alice"));
    assert_eq!(
        outcome.cache_hit.as_deref(),
        Some(r#"steemd.database_api.get_accounts.params=[["alice"]]"#)
    );

    // Only one upstream call for the two requests.
    mock.assert_async().await;
}

#[tokio::test]
async fn irreversible_block_is_cached_forever_under_ttl_minus_two() {
    let mut server = mockito::Server::new_async().await;
    let properties = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({
            "method": "get_dynamic_global_properties"
        })))
        .with_body(upstream_body(json!({"last_irreversible_block_num": 1000}), 1_000_000))
        .expect(1)
        .create_async()
        .await;
    let block = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({"method": "get_block"})))
        // Block 1000: hex 000003e8, at the watermark, so irreversible.
        .with_body(upstream_body(json!({"block_id": "000003e8001122"}), 1_000_000))
        .expect(1)
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def(
            "steemd",
            &[("steemd", &server.url())],
            &[("steemd", -1), ("steemd.database_api.get_block", -2)],
        )],
        Limits::default(),
    );

    // Prime the watermark from an ordinary (uncached) response.
    let properties_request = json!({
        "jsonrpc": "2.0", "method": "get_dynamic_global_properties", "id": 1
    });
    processor.process(&ctx(), &properties_request).await;
    assert_eq!(processor.tracker().last_irreversible(), 1000);

    // First get_block goes upstream and is cached without expiry.
    let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": 2});
    let outcome = processor.process(&ctx(), &request).await;
    assert_eq!(outcome.body["id"], json!(2));
    assert!(outcome.cache_hit.is_none());

    // The identical request is served from cache, with the caller's new id.
    let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": 77});
    let outcome = processor.process(&ctx(), &request).await;
    assert_eq!(outcome.body["id"], json!(77));
    assert_eq!(outcome.body["result"]["block_id"], json!("000003e8001122"));
    assert!(outcome.cache_hit.is_some());

    properties.assert_async().await;
    block.assert_async().await;
}

#[tokio::test]
async fn reversible_block_is_not_cached_under_ttl_minus_two() {
    let mut server = mockito::Server::new_async().await;
    let properties = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({
            "method": "get_dynamic_global_properties"
        })))
        .with_body(upstream_body(json!({"last_irreversible_block_num": 999}), 1_000_000))
        .expect(1)
        .create_async()
        .await;
    let block = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({"method": "get_block"})))
        .with_body(upstream_body(json!({"block_id": "000003e8001122"}), 1_000_000))
        .expect(2)
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def(
            "steemd",
            &[("steemd", &server.url())],
            &[("steemd", -1), ("steemd.database_api.get_block", -2)],
        )],
        Limits::default(),
    );

    let properties_request = json!({
        "jsonrpc": "2.0", "method": "get_dynamic_global_properties", "id": 1
    });
    processor.process(&ctx(), &properties_request).await;

    // Block 1000 is past the watermark (999): both calls go upstream.
    for id in [2, 3] {
        let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": id});
        let outcome = processor.process(&ctx(), &request).await;
        assert_eq!(outcome.body["id"], json!(id));
        assert!(outcome.cache_hit.is_none());
    }

    properties.assert_async().await;
    block.assert_async().await;
}

#[tokio::test]
async fn mismatched_get_block_response_is_not_cached() {
    let mut server = mockito::Server::new_async().await;
    let block = server
        .mock("POST", "/")
        // Upstream answers with block 1001 for a request naming block 1000.
        .with_body(upstream_body(json!({"block_id": "000003e9001122"}), 1_000_000))
        .expect(2)
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", &server.url())], &[("steemd", 30)])],
        Limits::default(),
    );

    for id in [1, 2] {
        let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1000], "id": id});
        let outcome = processor.process(&ctx(), &request).await;
        assert!(outcome.cache_hit.is_none());
    }
    block.assert_async().await;
}

#[tokio::test]
async fn batch_preserves_order_and_isolates_failures() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({"params": [1]})))
        .with_body(upstream_body(json!({"echo": 1}), 1_000_000))
        .expect(1)
        .create_async()
        .await;
    let third = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::PartialJson(json!({"params": [3]})))
        .with_body(upstream_body(json!({"echo": 3}), 1_000_002))
        .expect(1)
        .create_async()
        .await;

    // Member 2 routes to a namespace whose URL refuses connections.
    let processor = build_processor(
        vec![
            upstream_def("steemd", &[("steemd", &server.url())], &[("steemd", -1)]),
            upstream_def("broken", &[("broken", "http://127.0.0.1:1")], &[("broken", -1)]),
        ],
        Limits::default(),
    );

    let batch = json!([
        {"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": 10},
        {"jsonrpc": "2.0", "method": "broken.get_thing", "params": [2], "id": 20},
        {"jsonrpc": "2.0", "method": "get_block", "params": [3], "id": 30},
    ]);
    let outcome = processor.process(&ctx(), &batch).await;

    let members = outcome.body.as_array().unwrap();
    assert_eq!(members.len(), 3);

    assert_eq!(members[0]["id"], json!(10));
    assert_eq!(members[0]["result"]["echo"], json!(1));

    assert_eq!(members[1]["id"], json!(20));
    assert_eq!(members[1]["error"]["code"], json!(1100));
    assert_eq!(members[1]["error"]["data"]["jussi_request_id"], json!("test-request-id"));

    assert_eq!(members[2]["id"], json!(30));
    assert_eq!(members[2]["result"]["echo"], json!(3));

    first.assert_async().await;
    third.assert_async().await;
}

#[tokio::test]
async fn batch_members_are_validated_independently() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_body(upstream_body(json!(1), 1_000_001))
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", &server.url())], &[("steemd", -1)])],
        Limits::default(),
    );

    let batch = json!([
        {"jsonrpc": "1.0", "method": "get_block", "params": [1], "id": 1},
        {"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": 2},
    ]);
    let outcome = processor.process(&ctx(), &batch).await;

    let members = outcome.body.as_array().unwrap();
    assert_eq!(members[0]["error"]["code"], json!(-32600));
    assert_eq!(members[1]["result"], json!(1));
}

#[tokio::test]
async fn empty_batch_and_oversized_batch_are_rejected() {
    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", "https://unused.example.com")], &[])],
        Limits::default(),
    );

    let outcome = processor.process(&ctx(), &json!([])).await;
    assert_eq!(outcome.body["error"]["code"], json!(-32600));

    let member = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": 1});
    let batch = Value::Array(vec![member; 6]);
    let outcome = processor.process(&ctx(), &batch).await;
    assert_eq!(outcome.body["error"]["code"], json!(1600));
    assert_eq!(outcome.body["error"]["data"]["size"], json!(6));
    assert_eq!(outcome.body["error"]["data"]["limit"], json!(5));
}

#[tokio::test]
async fn unconfigured_namespace_yields_invalid_namespace() {
    // Only steemd is configured; appbase has no fallback target.
    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", "https://unused.example.com")], &[])],
        Limits::default(),
    );

    let request = json!({
        "jsonrpc": "2.0", "method": "condenser_api.get_block", "params": [1], "id": 4
    });
    let outcome = processor.process(&ctx(), &request).await;

    assert_eq!(outcome.body["id"], json!(4));
    assert_eq!(outcome.body["error"]["code"], json!(1200));
    assert_eq!(outcome.body["error"]["data"]["namespace"], json!("appbase"));
}

#[tokio::test]
async fn oversized_custom_json_is_rejected_with_length_data() {
    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", "https://unused.example.com")], &[])],
        Limits::default(),
    );

    let oversized = "x".repeat(9000);
    let request = json!({
        "jsonrpc": "2.0",
        "method": "broadcast_transaction",
        "params": [{"operations": [
            ["custom_json", {"id": "follow", "json": oversized, "required_posting_auths": ["alice"]}],
        ]}],
        "id": 6,
    });
    let outcome = processor.process(&ctx(), &request).await;

    assert_eq!(outcome.body["id"], json!(6));
    assert_eq!(outcome.body["error"]["code"], json!(1800));
    assert_eq!(outcome.body["error"]["data"]["length"], json!(9000));
    assert_eq!(outcome.body["error"]["data"]["max_length"], json!(8192));
}

#[tokio::test]
async fn blacklisted_account_is_rejected() {
    let mut limits = Limits::default();
    limits.accounts_blacklist.insert("mallory".to_owned());
    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", "https://unused.example.com")], &[])],
        limits,
    );

    let request = json!({
        "jsonrpc": "2.0",
        "method": "broadcast_transaction_synchronous",
        "params": [{"operations": [
            ["custom_json", {"id": "follow", "json": "{}", "required_posting_auths": ["mallory"]}],
        ]}],
        "id": 7,
    });
    let outcome = processor.process(&ctx(), &request).await;

    assert_eq!(outcome.body["error"]["code"], json!(1700));
}

#[tokio::test]
async fn upstream_error_envelopes_are_returned_with_enriched_data() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32003, "message": "block not found"},
                "id": 1_000_000,
            })
            .to_string(),
        )
        .create_async()
        .await;

    let processor = build_processor(
        vec![upstream_def("steemd", &[("steemd", &server.url())], &[("steemd", 30)])],
        Limits::default(),
    );

    let request = json!({"jsonrpc": "2.0", "method": "get_block", "params": [1], "id": 5});
    let outcome = processor.process(&ctx(), &request).await;

    // The upstream envelope comes back semantically intact...
    assert_eq!(outcome.body["id"], json!(5));
    assert_eq!(outcome.body["error"]["code"], json!(-32003));
    assert_eq!(outcome.body["error"]["message"], json!("block not found"));
    // ...with correlation ids merged into its data.
    assert_eq!(outcome.body["error"]["data"]["jussi_request_id"], json!("test-request-id"));
    assert!(outcome.body["error"]["data"]["trace_id"].is_string());
}
