//! HTTP server entry point and Axum router setup.
//!
//! Loads configuration and the risk model, opens the prediction store,
//! starts the batch scheduler, and serves the prediction API until a
//! shutdown signal arrives.

mod dto;
mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::{get, post};
use axum::Router;
use cardio_config::ServiceConfig;
use cardio_core::ValidationRules;
use cardio_engine::{BatchScheduler, PredictionEngine};
use cardio_llm::LlmAdvisor;
use cardio_model::RiskModel;
use cardio_store::SqliteStore;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state accessible from all handlers.
pub struct ServerState {
    pub engine: Arc<PredictionEngine>,
    /// Window scanned by `/batch-predict`.
    pub lookback: chrono::Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = ServiceConfig::load().context("invalid configuration")?;
    let state = Arc::new(init_server_state(&config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.scheduler.enabled {
        let scheduler = BatchScheduler::new(
            state.engine.clone(),
            config.scheduler.poll_interval(),
            state.lookback,
        );
        Some(tokio::spawn(scheduler.run(shutdown_rx)))
    } else {
        info!("Batch scheduler disabled");
        None
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Starting server on {}", config.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!("Batch scheduler task failed: {}", e);
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Builds the application router.
pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let logged_routes = Router::new()
        .route("/predict", post(handlers::predict::predict))
        .route("/predict/subject/{subject_id}", post(handlers::predict::predict_subject))
        .route("/batch-predict", get(handlers::batch::batch_predict))
        .route("/observations", post(handlers::observation::create))
        .route("/predictions", get(handlers::prediction::list))
        .route("/predictions/{id}/advisory", post(handlers::prediction::advisory))
        .layer(trace_layer);

    Router::new()
        .merge(logged_routes)
        .route("/health", get(handlers::health))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

/// Loads the model, opens the store and wires the prediction engine.
///
/// A model that cannot be loaded aborts startup.
fn init_server_state(config: &ServiceConfig) -> Result<ServerState> {
    let model = RiskModel::load(&config.model_path).context("failed to load risk model")?;

    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path))?;
    if config.seed_demo_data {
        let seeded = store.seed_examples().context("failed to seed demo observations")?;
        info!("Seeded {} demo observations", seeded);
    }

    let mut engine = PredictionEngine::new(Arc::new(model), Arc::new(store))
        .with_rules(ValidationRules {
            enforce_pressure_order: config.enforce_pressure_order,
        })
        .with_policy(config.persistence_policy);

    match config.advisory.model.as_deref() {
        Some(model) => {
            info!("Advisory generation enabled with {}", model);
            engine = engine.with_advisor(Arc::new(LlmAdvisor::new(
                model,
                config.advisory.api_base.as_deref(),
            )));
        }
        None => info!("Advisory generation disabled"),
    }
    info!("Persistence policy: {}", config.persistence_policy);

    let lookback = i64::try_from(config.scheduler.lookback_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .context("lookback window out of range")?;

    Ok(ServerState {
        engine: Arc::new(engine),
        lookback,
    })
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, draining");
}
