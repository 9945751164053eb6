pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use common::notify::BroadcastNotifier;
use common::storage::{Catalog, MemoryStore};
use mq::QueueConfig;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable as ScalarServable};
use worker::{Sandbox, WorkerContext, WorkerPool};

use crate::config::{AppConfig, CorsConfig};
use crate::intake::SubmissionIntake;
use crate::state::AppState;

/// Buffered verdict events per subscriber before it starts lagging.
const NOTIFIER_CAPACITY: usize = 1024;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CodeArena Judge API",
        version = "1.0.0",
        description = "Submission intake and verdict retrieval for the CodeArena judge"
    ),
    tags(
        (name = "Submissions", description = "Submitting, polling and cancelling solutions"),
        (name = "Health", description = "Liveness and readiness probes"),
    ),
)]
struct ApiDoc;

/// Build the application router.
pub fn build_router(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.config.server.cors);
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api", routes::api_routes())
        .split_for_parts();

    router
        .with_state(state)
        .merge(Scalar::with_url("/scalar", api))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allow_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(cors.max_age))
}

/// The wired-up judge: HTTP state plus the worker pool behind it.
pub struct App {
    pub state: AppState,
    pub pool: WorkerPool,
}

impl App {
    /// Wire intake, queue, worker pool and notifier around `store`.
    /// Must be called inside a tokio runtime.
    pub fn build(config: AppConfig, store: Arc<MemoryStore>, sandbox: Arc<dyn Sandbox>) -> Self {
        let notifier = Arc::new(BroadcastNotifier::new(NOTIFIER_CAPACITY));
        let (queue, receiver) = mq::bounded(QueueConfig::new(
            config.judge.queue_capacity,
            Duration::from_millis(config.judge.enqueue_timeout_ms),
        ));

        let intake = SubmissionIntake::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            queue,
            &config.judge,
        );

        let ctx = WorkerContext::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            sandbox,
            config.worker_settings(),
        );
        let pool = WorkerPool::start(ctx, receiver);

        let state = AppState {
            intake: Arc::new(intake),
            submissions: store,
            notifier,
            config: Arc::new(config),
            started_at: Instant::now(),
        };
        Self { state, pool }
    }

    /// Load the catalog and select the sandbox backend from `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let store = match &config.catalog.path {
            Some(path) => {
                let catalog = Catalog::load(path)
                    .with_context(|| format!("Failed to load catalog {}", path.display()))?;
                info!(
                    users = catalog.users.len(),
                    problems = catalog.problems.len(),
                    "Catalog loaded"
                );
                MemoryStore::from_catalog(catalog)
            }
            None => {
                info!("No catalog configured, starting with empty stores");
                MemoryStore::new()
            }
        };

        let sandbox =
            worker::from_config(&config.sandbox).context("Failed to initialize sandbox")?;
        Ok(Self::build(config, Arc::new(store), sandbox))
    }
}
