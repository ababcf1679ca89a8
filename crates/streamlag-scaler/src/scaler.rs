//! Per-trigger poll entry point.
//!
//! One [`StreamLagScaler`] per trigger instance. It owns its connection
//! manager, so two scalers never share a cached primary. Polls on the same
//! scaler take `&mut self` and therefore cannot overlap.

use tracing::{debug, error, warn};

use streamlag_core::{
    ConfigError, LagMeasurement, ScalerConfig, ScalerError, ScalingVerdict, TriggerMetadata,
    evaluate,
};
use streamlag_sentinel::{RedisSentinelProbe, SentinelResolver, TopologyResolver};

use crate::connection::{PrimaryConnector, RedisConnector};
use crate::health::{HealthStatus, HealthTracker, PollResult};
use crate::lifecycle::{ConnectionManager, ConnectionState};
use crate::registry::TriggerSnapshot;

/// Result of a poll that did not hit a configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Fresh measurement.
    Measured {
        lag: LagMeasurement,
        verdict: ScalingVerdict,
    },
    /// Transient failure. `verdict` is the last good one, or inactive if
    /// there never was one.
    Degraded {
        verdict: ScalingVerdict,
        error: ScalerError,
    },
}

impl PollOutcome {
    pub fn verdict(&self) -> ScalingVerdict {
        match self {
            PollOutcome::Measured { verdict, .. } | PollOutcome::Degraded { verdict, .. } => {
                *verdict
            }
        }
    }

    /// True when the verdict was not measured by this poll.
    pub fn is_stale(&self) -> bool {
        matches!(self, PollOutcome::Degraded { .. })
    }

    pub fn lag(&self) -> Option<LagMeasurement> {
        match self {
            PollOutcome::Measured { lag, .. } => Some(*lag),
            PollOutcome::Degraded { .. } => None,
        }
    }
}

/// Records a transient failure unless the poll reaches
/// [`PendingPoll::complete`].
struct PendingPoll<'a> {
    health: &'a mut HealthTracker,
    last_error: &'a mut Option<String>,
    metric: &'a str,
    armed: bool,
}

impl PendingPoll<'_> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingPoll<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let status = self.health.record(PollResult::TransientFailure);
        *self.last_error = Some("poll abandoned before completion".to_string());
        warn!(metric = %self.metric, health = %status, "poll abandoned");
    }
}

/// Scaler for one (sentinel set, primary, stream, group) trigger.
pub struct StreamLagScaler<R, C: PrimaryConnector> {
    config: ScalerConfig,
    metric_name: String,
    connections: ConnectionManager<R, C>,
    health: HealthTracker,
    last_verdict: Option<ScalingVerdict>,
    last_lag: Option<LagMeasurement>,
    last_error: Option<String>,
    polls: u64,
}

/// The production scaler: real sentinels, real data nodes.
pub type SentinelStreamScaler = StreamLagScaler<SentinelResolver<RedisSentinelProbe>, RedisConnector>;

impl SentinelStreamScaler {
    pub fn from_config(config: ScalerConfig) -> Self {
        let probe = RedisSentinelProbe::new(config.sentinel_credentials.clone(), config.timeouts);
        let resolver = SentinelResolver::new(
            config.endpoints.clone(),
            config.primary_name.clone(),
            probe,
        );
        let connector = RedisConnector::from_config(&config);
        Self::new(config, resolver, connector)
    }

    /// Validate trigger metadata and build a scaler. No network I/O.
    pub fn from_metadata(meta: &TriggerMetadata) -> Result<Self, ConfigError> {
        Ok(Self::from_config(ScalerConfig::from_metadata(meta)?))
    }
}

impl<R, C> StreamLagScaler<R, C>
where
    R: TopologyResolver,
    C: PrimaryConnector,
{
    pub fn new(config: ScalerConfig, resolver: R, connector: C) -> Self {
        let connections = ConnectionManager::new(resolver, connector, config.timeouts);
        Self {
            metric_name: config.metric_name(),
            health: HealthTracker::new(config.failure_threshold),
            config,
            connections,
            last_verdict: None,
            last_lag: None,
            last_error: None,
            polls: 0,
        }
    }

    /// Resolve if needed, read the lag, and evaluate it.
    ///
    /// Transient failures come back as `Ok(PollOutcome::Degraded)`; only
    /// configuration problems (missing stream or group) are `Err`.
    ///
    /// A poll dropped before it completes (the caller timed it out) counts
    /// as a transient failure.
    pub async fn poll(&mut self) -> Result<PollOutcome, ScalerError> {
        self.polls += 1;
        let pending = PendingPoll {
            health: &mut self.health,
            last_error: &mut self.last_error,
            metric: &self.metric_name,
            armed: true,
        };
        let result = self
            .connections
            .read_lag(&self.config.target, self.config.mode)
            .await;
        pending.complete();

        match result {
            Ok(lag) => {
                let verdict = evaluate(lag, &self.config.thresholds);
                self.health.record(PollResult::Success);
                self.last_verdict = Some(verdict);
                self.last_lag = Some(lag);
                self.last_error = None;
                debug!(
                    metric = %self.metric_name,
                    %lag,
                    active = verdict.active,
                    "poll measured"
                );
                Ok(PollOutcome::Measured { lag, verdict })
            }
            Err(e) if e.is_retryable() => {
                let status = self.health.record(PollResult::TransientFailure);
                self.last_error = Some(e.to_string());
                warn!(
                    metric = %self.metric_name,
                    error = %e,
                    health = %status,
                    "metric unavailable this poll"
                );
                Ok(PollOutcome::Degraded {
                    verdict: self.last_verdict.unwrap_or_default(),
                    error: e,
                })
            }
            Err(e) => {
                self.health.record(PollResult::ConfigurationFailure);
                // A verdict for a target that does not exist would be wrong.
                self.last_verdict = None;
                self.last_lag = None;
                self.last_error = Some(e.to_string());
                error!(metric = %self.metric_name, error = %e, "trigger misconfigured");
                Err(e)
            }
        }
    }

    /// Active according to the last verdict; false before the first
    /// successful poll.
    pub fn is_active(&self) -> bool {
        self.last_verdict.is_some_and(|v| v.active)
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn config(&self) -> &ScalerConfig {
        &self.config
    }

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    /// Release any held connection.
    pub fn close(&mut self) {
        self.connections.shutdown();
    }

    pub fn snapshot(&self) -> TriggerSnapshot {
        TriggerSnapshot {
            name: self.metric_name.clone(),
            metric_name: self.metric_name.clone(),
            target: self.config.target.clone(),
            mode: self.config.mode,
            thresholds: self.config.thresholds,
            connection: self.connections.state().to_string(),
            primary: self.connections.primary().map(ToString::to_string),
            health: self.health.status(),
            consecutive_failures: self.health.consecutive_failures(),
            invalidations: self.connections.invalidations(),
            polls: self.polls,
            last_lag: self.last_lag,
            last_verdict: self.last_verdict,
            last_error: self.last_error.clone(),
        }
    }
}
