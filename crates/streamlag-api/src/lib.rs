//! streamlag-api: HTTP surface for the trigger registry.
//!
//! The orchestration layer polls these endpoints on its own cadence; every
//! metrics request runs exactly one poll of the named trigger.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/triggers` | Trigger names and last status |
//! | GET | `/api/v1/triggers/{name}/metrics` | Poll once, return metric and verdict |
//! | GET | `/api/v1/triggers/{name}/active` | Poll once, return `{active}` |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;
pub mod prometheus;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;

use streamlag_core::ReplicaBounds;
use streamlag_scaler::TriggerRegistry;

pub use prometheus::render_prometheus;

/// Default bound on a single poll served over HTTP.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: TriggerRegistry,
    /// A poll that runs longer is abandoned and answered with 504.
    pub poll_timeout: Duration,
    /// Replica bounds per trigger name, for projected replica counts.
    pub replicas: Arc<HashMap<String, ReplicaBounds>>,
}

impl ApiState {
    pub fn new(registry: TriggerRegistry) -> Self {
        Self {
            registry,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            replicas: Arc::new(HashMap::new()),
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_replicas(mut self, replicas: HashMap<String, ReplicaBounds>) -> Self {
        self.replicas = Arc::new(replicas);
        self
    }
}

/// Build the complete router (REST + health + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/triggers", get(handlers::list_triggers))
        .route("/triggers/{name}/metrics", get(handlers::trigger_metrics))
        .route("/triggers/{name}/active", get(handlers::trigger_active))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state.clone()))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
