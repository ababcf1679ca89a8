//! Named triggers, each behind its own lock.
//!
//! A poll holds only its trigger's mutex, so polls of one trigger are
//! serialized while different triggers run concurrently. Triggers share
//! no mutable state.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use streamlag_core::{
    LagMeasurement, MeasureMode, ScalerError, ScalingVerdict, StreamTarget, ThresholdConfig,
};
use streamlag_sentinel::TopologyResolver;

use crate::connection::PrimaryConnector;
use crate::health::HealthStatus;
use crate::scaler::{PollOutcome, StreamLagScaler};

/// Point-in-time view of a trigger, for status endpoints and metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSnapshot {
    pub name: String,
    pub metric_name: String,
    pub target: StreamTarget,
    pub mode: MeasureMode,
    pub thresholds: ThresholdConfig,
    pub connection: String,
    pub primary: Option<String>,
    pub health: HealthStatus,
    pub consecutive_failures: u32,
    pub invalidations: u64,
    pub polls: u64,
    pub last_lag: Option<LagMeasurement>,
    pub last_verdict: Option<ScalingVerdict>,
    pub last_error: Option<String>,
}

/// Object-safe view of a scaler.
#[async_trait]
pub trait Trigger: Send {
    fn metric_name(&self) -> &str;

    async fn poll(&mut self) -> Result<PollOutcome, ScalerError>;

    fn snapshot(&self) -> TriggerSnapshot;

    fn close(&mut self);
}

#[async_trait]
impl<R, C> Trigger for StreamLagScaler<R, C>
where
    R: TopologyResolver + 'static,
    C: PrimaryConnector + 'static,
{
    fn metric_name(&self) -> &str {
        StreamLagScaler::metric_name(self)
    }

    async fn poll(&mut self) -> Result<PollOutcome, ScalerError> {
        StreamLagScaler::poll(self).await
    }

    fn snapshot(&self) -> TriggerSnapshot {
        StreamLagScaler::snapshot(self)
    }

    fn close(&mut self) {
        StreamLagScaler::close(self)
    }
}

pub type SharedTrigger = Arc<Mutex<Box<dyn Trigger>>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("trigger `{0}` is already registered")]
    Duplicate(String),

    #[error("metric name `{metric}` of trigger `{name}` is already used by `{existing}`")]
    DuplicateMetric {
        name: String,
        metric: String,
        existing: String,
    },
}

/// Triggers by name. Cloning shares the underlying triggers.
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    triggers: BTreeMap<String, SharedTrigger>,
    metrics: BTreeMap<String, String>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        trigger: impl Trigger + 'static,
    ) -> Result<SharedTrigger, RegistryError> {
        let name = name.into();
        if self.triggers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        let metric = trigger.metric_name().to_string();
        if let Some(existing) = self.metrics.get(&metric) {
            return Err(RegistryError::DuplicateMetric {
                name,
                metric,
                existing: existing.clone(),
            });
        }

        info!(trigger = %name, %metric, "trigger registered");
        let boxed: Box<dyn Trigger> = Box::new(trigger);
        let shared: SharedTrigger = Arc::new(Mutex::new(boxed));
        self.metrics.insert(metric, name.clone());
        self.triggers.insert(name, shared.clone());
        Ok(shared)
    }

    pub fn get(&self, name: &str) -> Option<SharedTrigger> {
        self.triggers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.triggers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Snapshot every trigger, in name order. Waits for in-flight polls.
    pub async fn snapshots(&self) -> Vec<TriggerSnapshot> {
        let mut out = Vec::with_capacity(self.triggers.len());
        for (name, trigger) in &self.triggers {
            let mut snapshot = trigger.lock().await.snapshot();
            snapshot.name = name.clone();
            out.push(snapshot);
        }
        out
    }

    /// Close every trigger's connection.
    pub async fn shutdown(&self) {
        for (name, trigger) in &self.triggers {
            trigger.lock().await.close();
            info!(trigger = %name, "trigger closed");
        }
    }
}
