//! Trigger metadata parsing.
//!
//! A trigger arrives as three string maps, the same shape the
//! orchestration layer hands to every scaler:
//!
//! - `metadata`: the trigger's own keys (`hosts`, `stream`, `lagCount`, ...)
//! - `resolved_env`: the scale target's environment, for `...FromEnv` keys
//! - `auth_params`: credentials resolved from a secret reference
//!
//! [`ScalerConfig::from_metadata`] validates all of it up front so that a
//! bad trigger fails before the first poll.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{
    Address, MeasureMode, PrimaryName, SentinelEndpointSet, StreamTarget, ThresholdConfig,
};

/// Per-replica target used when no mode key is given.
pub const DEFAULT_TARGET: u64 = 5;

/// Consecutive transient failures before a trigger reports unhealthy.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Raw trigger input.
#[derive(Debug, Clone, Default)]
pub struct TriggerMetadata {
    /// Position of the trigger on its scaled object; feeds the metric name.
    pub trigger_index: usize,
    pub metadata: HashMap<String, String>,
    pub resolved_env: HashMap<String, String>,
    pub auth_params: HashMap<String, String>,
}

impl TriggerMetadata {
    pub fn new(trigger_index: usize) -> Self {
        Self {
            trigger_index,
            ..Self::default()
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_env(mut self, var: &str, value: &str) -> Self {
        self.resolved_env.insert(var.to_string(), value.to_string());
        self
    }

    pub fn with_auth(mut self, key: &str, value: &str) -> Self {
        self.auth_params.insert(key.to_string(), value.to_string());
        self
    }

    /// Look up `key`, falling back to `{key}FromEnv` indirection.
    ///
    /// Blank values count as absent.
    pub fn value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        if let Some(v) = self.metadata.get(key).map(|v| v.trim())
            && !v.is_empty()
        {
            return Ok(Some(v.to_string()));
        }

        let env_key = format!("{key}FromEnv");
        let Some(var) = self.metadata.get(&env_key).map(|v| v.trim()) else {
            return Ok(None);
        };
        if var.is_empty() {
            return Ok(None);
        }
        match self.resolved_env.get(var).map(|v| v.trim()) {
            Some(v) if !v.is_empty() => Ok(Some(v.to_string())),
            _ => Err(ConfigError::MissingEnv {
                key: env_key,
                var: var.to_string(),
            }),
        }
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.value(key)?
            .ok_or_else(|| ConfigError::MissingField(key.to_string()))
    }

    fn is_set(&self, key: &str) -> bool {
        self.metadata.contains_key(key) || self.metadata.contains_key(&format!("{key}FromEnv"))
    }

    fn auth(&self, key: &str) -> Option<String> {
        self.auth_params
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }
}

/// A credential that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Username and password passed opaquely to the connection layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<Secret>,
}

impl Credentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            username,
            password: password.map(Secret::new),
        }
    }
}

/// Bounds applied to every sentinel and data-node call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus handshake (AUTH/SELECT).
    pub connect: Duration,
    /// A single request/response round trip.
    pub response: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response: Duration::from_secs(5),
        }
    }
}

/// Validated configuration for one trigger instance.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub trigger_index: usize,
    pub endpoints: SentinelEndpointSet,
    pub primary_name: PrimaryName,
    pub target: StreamTarget,
    pub mode: MeasureMode,
    pub thresholds: ThresholdConfig,
    pub database_index: i64,
    pub timeouts: Timeouts,
    pub failure_threshold: u32,
    /// Credentials for the data nodes.
    pub credentials: Credentials,
    /// Credentials for the sentinels.
    pub sentinel_credentials: Credentials,
}

impl ScalerConfig {
    /// Parse and validate a trigger.
    pub fn from_metadata(meta: &TriggerMetadata) -> Result<Self, ConfigError> {
        let endpoints = parse_endpoints(meta)?;
        let primary_name = PrimaryName::new(meta.required("sentinelMaster")?);
        let target = StreamTarget::new(meta.required("stream")?, meta.required("consumerGroup")?);
        let mode = parse_mode(meta)?;

        let lag_count = match meta.value(mode.target_key())? {
            Some(v) => parse_integer(mode.target_key(), &v, 1)? as u64,
            None => DEFAULT_TARGET,
        };
        let activation_lag_count = match meta.value(mode.activation_key())? {
            Some(v) => parse_integer(mode.activation_key(), &v, 0)? as u64,
            None => 0,
        };

        let database_index = match meta.value("databaseIndex")? {
            Some(v) => parse_integer("databaseIndex", &v, 0)?,
            None => 0,
        };

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            connect: parse_duration_key(meta, "connectTimeout")?.unwrap_or(defaults.connect),
            response: parse_duration_key(meta, "responseTimeout")?.unwrap_or(defaults.response),
        };

        let failure_threshold = match meta.value("failureThreshold")? {
            Some(v) => u32::try_from(parse_integer("failureThreshold", &v, 1)?).map_err(|_| {
                ConfigError::InvalidInteger {
                    key: "failureThreshold".to_string(),
                    value: v.clone(),
                }
            })?,
            None => DEFAULT_FAILURE_THRESHOLD,
        };

        Ok(ScalerConfig {
            trigger_index: meta.trigger_index,
            endpoints,
            primary_name,
            target,
            mode,
            thresholds: ThresholdConfig::new(lag_count, activation_lag_count),
            database_index,
            timeouts,
            failure_threshold,
            credentials: Credentials::new(meta.auth("username"), meta.auth("password")),
            sentinel_credentials: Credentials::new(
                meta.auth("sentinelUsername"),
                meta.auth("sentinelPassword"),
            ),
        })
    }

    /// External metric name, unique per trigger position.
    pub fn metric_name(&self) -> String {
        format!(
            "s{}-redis-sentinel-streams-{}",
            self.trigger_index,
            normalize_metric_segment(&self.target.stream)
        )
    }
}

/// Sentinel endpoints from `addresses`, or from `hosts` + `ports`.
fn parse_endpoints(meta: &TriggerMetadata) -> Result<SentinelEndpointSet, ConfigError> {
    if let Some(addresses) = meta.value("addresses")? {
        let endpoints = split_list(&addresses)
            .map(str::parse::<Address>)
            .collect::<Result<Vec<_>, _>>()?;
        return SentinelEndpointSet::new(endpoints);
    }

    let hosts = meta
        .value("hosts")?
        .ok_or_else(|| ConfigError::MissingField("addresses or hosts".to_string()))?;
    let ports = meta.required("ports")?;

    let hosts: Vec<&str> = split_list(&hosts).collect();
    let ports: Vec<&str> = split_list(&ports).collect();
    if hosts.len() != ports.len() {
        return Err(ConfigError::MismatchedHostsPorts {
            hosts: hosts.len(),
            ports: ports.len(),
        });
    }

    let endpoints = hosts
        .iter()
        .zip(&ports)
        .map(|(host, port)| {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidAddress(format!("{host}:{port}")))?;
            Ok(Address::new(*host, port))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    SentinelEndpointSet::new(endpoints)
}

/// Pick the measure mode from whichever target key is present.
fn parse_mode(meta: &TriggerMetadata) -> Result<MeasureMode, ConfigError> {
    let present: Vec<MeasureMode> = MeasureMode::ALL
        .into_iter()
        .filter(|m| meta.is_set(m.target_key()))
        .collect();

    match present.as_slice() {
        [] => Ok(MeasureMode::Lag),
        [mode] => Ok(*mode),
        many => Err(ConfigError::ConflictingModes(
            many.iter().map(|m| m.target_key().to_string()).collect(),
        )),
    }
}

fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}

fn parse_integer(key: &str, value: &str, min: i64) -> Result<i64, ConfigError> {
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::InvalidInteger {
            key: key.to_string(),
            value: value.to_string(),
        })?;
    if parsed < min {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: parsed,
            min,
        });
    }
    Ok(parsed)
}

fn parse_duration_key(meta: &TriggerMetadata, key: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = meta.value(key)? else {
        return Ok(None);
    };
    match parse_duration(&raw) {
        Some(d) if !d.is_zero() => Ok(Some(d)),
        _ => Err(ConfigError::InvalidDuration {
            key: key.to_string(),
            value: raw,
        }),
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Lowercase, with anything outside `[a-z0-9-]` replaced by `-`.
fn normalize_metric_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TriggerMetadata {
        TriggerMetadata::new(0)
            .with("hosts", "sentinel-0.redis, sentinel-1.redis")
            .with("ports", "26379,26380")
            .with("stream", "my-stream")
            .with("consumerGroup", "consumer-group-1")
            .with("sentinelMaster", "mymaster")
    }

    #[test]
    fn parses_reference_trigger() {
        let meta = TriggerMetadata::new(0)
            .with("hostsFromEnv", "REDIS_HOSTS")
            .with("portsFromEnv", "REDIS_PORTS")
            .with("stream", "my-stream")
            .with("consumerGroup", "consumer-group-1")
            .with("sentinelMaster", "mymaster")
            .with("lagCount", "12")
            .with("activationLagCount", "10")
            .with_env("REDIS_HOSTS", "redis-headless.redis-ns")
            .with_env("REDIS_PORTS", "26379")
            .with_auth("password", "admin")
            .with_auth("sentinelPassword", "admin");

        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(
            cfg.endpoints.as_slice(),
            &[Address::new("redis-headless.redis-ns", 26379)]
        );
        assert_eq!(cfg.primary_name.as_str(), "mymaster");
        assert_eq!(cfg.target, StreamTarget::new("my-stream", "consumer-group-1"));
        assert_eq!(cfg.mode, MeasureMode::Lag);
        assert_eq!(cfg.thresholds, ThresholdConfig::new(12, 10));
        assert_eq!(
            cfg.credentials.password.as_ref().map(Secret::expose),
            Some("admin")
        );
        assert_eq!(
            cfg.sentinel_credentials.password.as_ref().map(Secret::expose),
            Some("admin")
        );
        assert_eq!(cfg.metric_name(), "s0-redis-sentinel-streams-my-stream");
    }

    #[test]
    fn hosts_and_ports_zip_in_order() {
        let cfg = ScalerConfig::from_metadata(&base()).unwrap();
        assert_eq!(
            cfg.endpoints.as_slice(),
            &[
                Address::new("sentinel-0.redis", 26379),
                Address::new("sentinel-1.redis", 26380),
            ]
        );
    }

    #[test]
    fn addresses_take_precedence() {
        let meta = base().with("addresses", "a:1, b:2");
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(
            cfg.endpoints.as_slice(),
            &[Address::new("a", 1), Address::new("b", 2)]
        );
    }

    #[test]
    fn mismatched_hosts_and_ports() {
        let meta = base().with("ports", "26379");
        assert_eq!(
            ScalerConfig::from_metadata(&meta).unwrap_err(),
            ConfigError::MismatchedHostsPorts { hosts: 2, ports: 1 }
        );
    }

    #[test]
    fn missing_required_fields() {
        for key in ["stream", "consumerGroup", "sentinelMaster", "ports"] {
            let mut meta = base();
            meta.metadata.remove(key);
            assert_eq!(
                ScalerConfig::from_metadata(&meta).unwrap_err(),
                ConfigError::MissingField(key.to_string()),
                "removing {key}"
            );
        }
    }

    #[test]
    fn blank_required_field_is_missing() {
        let meta = base().with("stream", "   ");
        assert_eq!(
            ScalerConfig::from_metadata(&meta).unwrap_err(),
            ConfigError::MissingField("stream".to_string())
        );
    }

    #[test]
    fn missing_endpoints() {
        let mut meta = base();
        meta.metadata.remove("hosts");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn unset_env_reference_fails() {
        let mut meta = base();
        meta.metadata.remove("hosts");
        let meta = meta.with("hostsFromEnv", "NOPE");
        assert_eq!(
            ScalerConfig::from_metadata(&meta).unwrap_err(),
            ConfigError::MissingEnv {
                key: "hostsFromEnv".to_string(),
                var: "NOPE".to_string(),
            }
        );
    }

    #[test]
    fn defaults_apply() {
        let cfg = ScalerConfig::from_metadata(&base()).unwrap();
        assert_eq!(cfg.mode, MeasureMode::Lag);
        assert_eq!(cfg.thresholds, ThresholdConfig::new(DEFAULT_TARGET, 0));
        assert_eq!(cfg.database_index, 0);
        assert_eq!(cfg.timeouts, Timeouts::default());
        assert_eq!(cfg.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(cfg.credentials, Credentials::default());
    }

    #[test]
    fn lag_count_must_be_positive() {
        let meta = base().with("lagCount", "0");
        assert_eq!(
            ScalerConfig::from_metadata(&meta).unwrap_err(),
            ConfigError::OutOfRange {
                key: "lagCount".to_string(),
                value: 0,
                min: 1,
            }
        );
    }

    #[test]
    fn activation_must_be_non_negative_integer() {
        let meta = base().with("activationLagCount", "-1");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::OutOfRange { .. })
        ));

        let meta = base().with("activationLagCount", "ten");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn pending_entries_mode() {
        let meta = base()
            .with("pendingEntriesCount", "20")
            .with("activationPendingEntriesCount", "3");
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(cfg.mode, MeasureMode::PendingEntries);
        assert_eq!(cfg.thresholds, ThresholdConfig::new(20, 3));
    }

    #[test]
    fn stream_length_mode_ignores_lag_activation() {
        let meta = base()
            .with("streamLength", "100")
            .with("activationLagCount", "50");
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(cfg.mode, MeasureMode::StreamLength);
        assert_eq!(cfg.thresholds, ThresholdConfig::new(100, 0));
    }

    #[test]
    fn conflicting_modes_rejected() {
        let meta = base().with("lagCount", "10").with("streamLength", "100");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::ConflictingModes(_))
        ));
    }

    #[test]
    fn timeouts_and_threshold_override() {
        let meta = base()
            .with("connectTimeout", "750ms")
            .with("responseTimeout", "2s")
            .with("failureThreshold", "5")
            .with("databaseIndex", "3");
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(cfg.timeouts.connect, Duration::from_millis(750));
        assert_eq!(cfg.timeouts.response, Duration::from_secs(2));
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.database_index, 3);
    }

    #[test]
    fn zero_timeout_rejected() {
        let meta = base().with("connectTimeout", "0s");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn overflowing_timeout_rejected() {
        let meta = base().with("connectTimeout", "400000000000000000m");
        assert!(matches!(
            ScalerConfig::from_metadata(&meta),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let meta = base()
            .with_auth("username", "app")
            .with_auth("password", "hunter2");
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
        assert_eq!(cfg.credentials.username.as_deref(), Some("app"));
    }

    #[test]
    fn metric_name_is_normalized() {
        let meta = base().with("stream", "Orders.Stream_v2");
        let mut meta = meta;
        meta.trigger_index = 3;
        let cfg = ScalerConfig::from_metadata(&meta).unwrap();
        assert_eq!(cfg.metric_name(), "s3-redis-sentinel-streams-orders-stream-v2");
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("400000000000000000m"), None);
    }
}
