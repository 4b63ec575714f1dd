use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use jussi_core::{
    cache::{Cache, BlockTracker, CacheGroup, MemoryCache, RedisCache},
    config::{AppConfig, UpstreamsDocument},
    proxy::{ProcessorConfig, RequestProcessor},
    upstream::{HttpClient, HttpClientConfig, RetryPolicy, Router as UpstreamRouter},
};
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod router;

use router::AppState;

/// Bound on the post-signal drain of in-flight work.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,jussi_core={0},jussi_server={0}", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "pretty" {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Builds the cache group, tolerating an unreachable remote tier.
async fn build_cache(config: &AppConfig) -> CacheGroup {
    let local = MemoryCache::new(config.cache.memory_max_entries);
    let remote: Option<Arc<dyn Cache>> = match &config.cache.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                warn!(url = url.as_str(), error = %e, "remote cache unavailable, continuing without it");
                None
            }
        },
        None => None,
    };
    CacheGroup::new(local, remote)
}

fn build_processor(
    config: &AppConfig,
    document: &UpstreamsDocument,
    cache: CacheGroup,
) -> Result<RequestProcessor> {
    let upstream_router = UpstreamRouter::from_config(&document.upstreams)
        .context("upstream configuration rejected")?;
    info!(
        namespaces = ?upstream_router.namespaces(),
        steemd_urls = upstream_router.steemd_urls().len(),
        "routing tables built"
    );

    let http = HttpClient::with_config(
        HttpClientConfig { default_timeout: config.default_timeout(), ..Default::default() },
        RetryPolicy::default(),
    )
    .context("http client init failed")?;

    let processor_config = ProcessorConfig {
        batch_size_limit: config.server.batch_size_limit,
        limits: document.limits.to_limits(),
        ws_retry: RetryPolicy::default(),
        ws_pool: config.websocket.to_pool_config(),
        default_timeout: config.default_timeout(),
    };

    Ok(RequestProcessor::new(
        Arc::new(upstream_router),
        Arc::new(cache),
        Arc::new(http),
        Arc::new(BlockTracker::new()),
        processor_config,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("configuration load failed")?;
    init_logging(&config);
    info!(upstreams_file = config.upstreams_file.as_str(), "starting jussi");

    let document = UpstreamsDocument::from_file(&config.upstreams_file)
        .context("upstreams document load failed")?;

    let cache = build_cache(&config).await;
    let processor = Arc::new(build_processor(&config, &document, cache)?);
    let state = Arc::new(AppState { processor: Arc::clone(&processor) });

    let app = Router::new()
        .route("/", post(router::handle_rpc))
        .route("/health", get(router::handle_health))
        .with_state(state)
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_payload_bytes))
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind failed")?;
    info!(address = %addr, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    // In-flight requests have drained (or the listener failed); close WS
    // pools and both cache tiers under a bounded grace.
    if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, processor.shutdown())
        .await
        .is_err()
    {
        warn!("shutdown grace period elapsed before cleanup finished");
    }
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
}
