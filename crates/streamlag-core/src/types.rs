//! Domain types shared across the streamlag crates.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A `host:port` pair for a sentinel or a data node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = ConfigError;

    /// Parse `host:port` or `[v6-host]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidAddress(s.to_string());

        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Address::new(host, port))
    }
}

/// Ordered, non-empty list of sentinel endpoints.
///
/// Immutable after construction and cheap to clone; resolvers walk it in
/// order. Never used for data operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelEndpointSet {
    endpoints: Arc<[Address]>,
}

impl SentinelEndpointSet {
    pub fn new(endpoints: Vec<Address>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(Self {
            endpoints: endpoints.into(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.endpoints
    }
}

impl<'a> IntoIterator for &'a SentinelEndpointSet {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Logical name of the monitored primary group (the sentinel "master name").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryName(String);

impl PrimaryName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrimaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The (stream, consumer group) pair a trigger measures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTarget {
    pub stream: String,
    pub consumer_group: String,
}

impl StreamTarget {
    pub fn new(stream: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            consumer_group: consumer_group.into(),
        }
    }
}

/// What the lag reader counts for a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MeasureMode {
    /// Entries not yet acknowledged by the group: never delivered plus
    /// delivered-but-pending.
    #[default]
    Lag,
    /// Delivered-but-unacknowledged entries only.
    PendingEntries,
    /// Total stream length, regardless of the group.
    StreamLength,
}

impl MeasureMode {
    pub const ALL: [MeasureMode; 3] = [
        MeasureMode::Lag,
        MeasureMode::PendingEntries,
        MeasureMode::StreamLength,
    ];

    /// Metadata key carrying the per-replica target for this mode.
    pub fn target_key(&self) -> &'static str {
        match self {
            MeasureMode::Lag => "lagCount",
            MeasureMode::PendingEntries => "pendingEntriesCount",
            MeasureMode::StreamLength => "streamLength",
        }
    }

    /// Metadata key carrying the activation floor for this mode.
    pub fn activation_key(&self) -> &'static str {
        match self {
            MeasureMode::Lag => "activationLagCount",
            MeasureMode::PendingEntries => "activationPendingEntriesCount",
            MeasureMode::StreamLength => "activationStreamLength",
        }
    }
}

impl fmt::Display for MeasureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target_key())
    }
}

/// Count of entries measured in a single poll. Never cached across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct LagMeasurement(u64);

impl LagMeasurement {
    pub const ZERO: LagMeasurement = LagMeasurement(0);

    pub fn new(count: u64) -> Self {
        Self(count)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LagMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scale thresholds for a trigger.
///
/// `lag_count` sizes the scale-out curve (the orchestration layer divides
/// the metric by it). `activation_lag_count` is the floor the lag must
/// exceed before the trigger is active at all. Any ordering between the
/// two is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub lag_count: u64,
    pub activation_lag_count: u64,
}

impl ThresholdConfig {
    pub fn new(lag_count: u64, activation_lag_count: u64) -> Self {
        Self {
            lag_count,
            activation_lag_count,
        }
    }
}

/// The only value that crosses into the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingVerdict {
    pub active: bool,
    pub metric_value: i64,
}

/// Replica bounds of the scale target, used only for projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaBounds {
    pub min: u32,
    pub max: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_host_and_port() {
        let addr: Address = "redis-sentinel.ns:26379".parse().unwrap();
        assert_eq!(addr, Address::new("redis-sentinel.ns", 26379));
        assert_eq!(addr.to_string(), "redis-sentinel.ns:26379");
    }

    #[test]
    fn address_parses_bracketed_ipv6() {
        let addr: Address = "[::1]:26379".parse().unwrap();
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "[::1]:26379");
    }

    #[test]
    fn address_rejects_missing_or_bad_port() {
        assert!("redis".parse::<Address>().is_err());
        assert!("redis:".parse::<Address>().is_err());
        assert!("redis:70000".parse::<Address>().is_err());
        assert!(":6379".parse::<Address>().is_err());
    }

    #[test]
    fn endpoint_set_rejects_empty() {
        assert!(matches!(
            SentinelEndpointSet::new(vec![]),
            Err(ConfigError::NoEndpoints)
        ));
    }

    #[test]
    fn endpoint_set_keeps_order() {
        let set = SentinelEndpointSet::new(vec![
            Address::new("b", 1),
            Address::new("a", 2),
        ])
        .unwrap();
        let hosts: Vec<_> = set.iter().map(|a| a.host.as_str()).collect();
        assert_eq!(hosts, vec!["b", "a"]);
    }

    #[test]
    fn mode_keys() {
        assert_eq!(MeasureMode::Lag.target_key(), "lagCount");
        assert_eq!(MeasureMode::Lag.activation_key(), "activationLagCount");
        assert_eq!(
            MeasureMode::PendingEntries.activation_key(),
            "activationPendingEntriesCount"
        );
    }

    #[test]
    fn verdict_serializes_camel_case() {
        let v = ScalingVerdict {
            active: true,
            metric_value: 11,
        };
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"active":true,"metricValue":11}"#);
    }
}
