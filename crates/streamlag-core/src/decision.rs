//! Scaling decision engine.
//!
//! Turns a lag measurement into a [`ScalingVerdict`]. Pure: no hidden
//! state, no clock, no randomness.

use crate::types::{LagMeasurement, ReplicaBounds, ScalingVerdict, ThresholdConfig};

/// Evaluate a lag measurement against the trigger thresholds.
///
/// The trigger is active only when the lag is strictly greater than the
/// activation floor. The metric is the lag itself; it is clamped only
/// where it would not fit the orchestration layer's signed 64-bit value.
pub fn evaluate(lag: LagMeasurement, config: &ThresholdConfig) -> ScalingVerdict {
    let lag = lag.get();
    ScalingVerdict {
        active: lag > config.activation_lag_count,
        metric_value: i64::try_from(lag).unwrap_or(i64::MAX),
    }
}

/// Replica count the orchestration layer would derive from a verdict.
///
/// Inactive verdicts go to `bounds.min` (scale-to-zero when min is 0).
/// Active verdicts get `ceil(metric / target)`, clamped to
/// `[max(min, 1), max]`. Reporting only; nothing in the engine depends on
/// it.
pub fn project_replicas(verdict: &ScalingVerdict, target: u64, bounds: ReplicaBounds) -> u32 {
    if !verdict.active {
        return bounds.min;
    }

    let target = target.max(1);
    let metric = u64::try_from(verdict.metric_value).unwrap_or(0);
    let desired = metric.div_ceil(target);
    let desired = u32::try_from(desired).unwrap_or(u32::MAX);

    let floor = bounds.min.max(1);
    desired.max(floor).min(bounds.max.max(floor))
}
