//! Unigraph API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Question answering over the startup knowledge graph
//! - Entity catalog lookups and reloads
//! - Rate limiting
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use unigraph_common::{
    cache::Cache,
    config::{AppConfig, ObservabilityConfig},
    graph::create_store,
    llm::create_generator,
    metrics::{self, LATENCY_BUCKETS, METRICS_PREFIX, STORE_BUCKETS, GENERATION_BUCKETS},
    QueryEngine,
};

use middleware::rate_limit::{rate_limit_middleware, RateLimitState};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<QueryEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);

    info!("Starting Unigraph API Gateway v{}", unigraph_common::VERSION);

    if config.observability.metrics_port != 0 {
        init_metrics(config.observability.metrics_port)?;
    }

    let store = create_store(&config.graph)?;
    let generator = create_generator(&config.llm)?;
    info!(store = store.name(), model = generator.model_name(), "Backends configured");

    let cache = if config.cache.enabled {
        match Cache::new(config.cache.clone()).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Row cache unavailable, continuing without it");
                None
            }
        }
    } else {
        None
    };

    info!("Loading entity catalog...");
    let engine = QueryEngine::with_cache(store, generator, cache, &config)
        .await
        .context("Failed to build query engine")?;

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        engine: Arc::new(engine),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Install the Prometheus recorder with its own scrape listener
fn init_metrics(port: u16) -> anyhow::Result<()> {
    let bucketed = |name: &str| Matcher::Full(format!("{}_{}", METRICS_PREFIX, name));

    PrometheusBuilder::new()
        .set_buckets_for_metric(bucketed("request_duration_seconds"), LATENCY_BUCKETS)?
        .set_buckets_for_metric(bucketed("question_duration_seconds"), LATENCY_BUCKETS)?
        .set_buckets_for_metric(bucketed("store_duration_seconds"), STORE_BUCKETS)?
        .set_buckets_for_metric(bucketed("generation_duration_seconds"), GENERATION_BUCKETS)?
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!(port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let limiter = RateLimitState::new(&state.config.rate_limit);
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    // Question endpoints share the global rate limit
    let query_routes = Router::new()
        .route("/ask", post(handlers::ask::ask))
        .route("/ask/stream", post(handlers::ask::ask_stream))
        .route_layer(from_fn_with_state(limiter, rate_limit_middleware));

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Catalog endpoints
        .route("/catalog/resolve", get(handlers::catalog::resolve))
        .route("/catalog/reload", post(handlers::catalog::reload))
        // Graph statistics
        .route("/stats", get(handlers::stats::stats))
        .merge(query_routes)
        .route_layer(from_fn(middleware::metrics::track_metrics));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use unigraph_common::graph::InMemoryGraph;
    use unigraph_common::llm::MockGenerator;

    const FIXTURE: &str = include_str!("../../common/fixtures/sample_graph.json");

    async fn app_with_cache(config: AppConfig, cache: Option<Arc<Cache>>) -> Router {
        let store = Arc::new(InMemoryGraph::from_json(FIXTURE).unwrap());
        let engine = QueryEngine::with_cache(store, Arc::new(MockGenerator::echo()), cache, &config)
            .await
            .unwrap();
        create_router(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
        })
    }

    async fn app_with(config: AppConfig) -> Router {
        app_with_cache(config, None).await
    }

    async fn app() -> Router {
        app_with(AppConfig::default()).await
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().await.oneshot(get("/v1/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_catalog() {
        let response = app().await.oneshot(get("/v1/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["catalog"]["entries"], 40);
        assert_eq!(body["checks"]["cache"]["status"], "disabled");
    }

    #[tokio::test]
    #[ignore = "needs a Redis server on localhost:6379"]
    async fn test_ready_pings_configured_cache() {
        let config = AppConfig::default();
        let cache = Cache::new(config.cache.clone()).await.unwrap();
        let app = app_with_cache(config, Some(Arc::new(cache))).await;

        let response = app.oneshot(get("/v1/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["cache"]["status"], "up");
        assert!(body["checks"]["cache"]["latency_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_ask_returns_grounded_answer() {
        let response = app()
            .await
            .oneshot(post_json("/v1/ask", json!({ "question": "Compare CRED and PhonePe" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["mode"], "generated");
        assert_eq!(body["template"], "compare_companies");
        assert_eq!(body["facts"].as_array().unwrap().len(), 2);
        assert!(body.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_ask_can_include_trace_and_skip_facts() {
        let request = json!({
            "question": "Which companies has Tiger Global invested in?",
            "options": { "include_facts": false, "include_trace": true }
        });
        let response = app().await.oneshot(post_json("/v1/ask", request)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body.get("facts").is_none());
        assert_eq!(body["trace"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let response = app()
            .await
            .oneshot(post_json("/v1/ask", json!({ "question": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ambiguous_question_lists_candidates() {
        let response = app()
            .await
            .oneshot(post_json("/v1/ask", json!({ "question": "Which companies has Sequoia invested in?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unresolved_question() {
        let response = app()
            .await
            .oneshot(post_json("/v1/ask", json!({ "question": "What is the weather like?" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stream_emits_named_events() {
        let response = app()
            .await
            .oneshot(post_json("/v1/ask/stream", json!({ "question": "Compare CRED and PhonePe" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let query = text.find("event: query").unwrap();
        let facts = text.find("event: facts").unwrap();
        let done = text.find("event: done").unwrap();
        assert!(query < facts && facts < done);
    }

    #[tokio::test]
    async fn test_resolve_mention_with_kind_filter() {
        let response = app()
            .await
            .oneshot(get("/v1/catalog/resolve?mention=bengaluru&kinds=location"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["candidates"][0]["name"], "Bangalore");
        assert_eq!(body["candidates"][0]["kind"], "location");
    }

    #[tokio::test]
    async fn test_resolve_rejects_unknown_kind() {
        let response = app()
            .await
            .oneshot(get("/v1/catalog/resolve?mention=bengaluru&kinds=planet"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reload_and_stats() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(post_json("/v1/catalog/reload", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["entries"], 40);

        let response = app.oneshot(get("/v1/stats")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["graph"]["companies"], 14);
        assert_eq!(body["catalog"]["investor"], 5);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_burst() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        let app = app_with(config).await;
        let question = json!({ "question": "Compare CRED and PhonePe" });

        let first = app.clone().oneshot(post_json("/v1/ask", question.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(post_json("/v1/ask", question)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
