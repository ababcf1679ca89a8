//! Error taxonomy for the scaler.
//!
//! Transient failures (`ResolutionError`, `ReadError::ConnectionFailure`,
//! `ReadError::Protocol`, timeouts) are absorbed by the scaler and retried
//! on the next poll. Configuration problems (`ConfigError`,
//! `ReadError::TargetNotFound`) propagate so the trigger can be marked
//! unhealthy.

use std::time::Duration;

use thiserror::Error;

/// Malformed or missing trigger metadata. Raised at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required metadata key `{0}`")]
    MissingField(String),

    #[error("metadata key `{0}` must not be empty")]
    EmptyField(String),

    #[error("metadata key `{key}` references environment variable `{var}`, which is not set")]
    MissingEnv { key: String, var: String },

    #[error("metadata key `{key}`: `{value}` is not a valid integer")]
    InvalidInteger { key: String, value: String },

    #[error("metadata key `{key}` must be >= {min}, got {value}")]
    OutOfRange { key: String, value: i64, min: i64 },

    #[error("metadata key `{key}`: `{value}` is not a valid duration")]
    InvalidDuration { key: String, value: String },

    #[error("invalid address `{0}` (expected host:port)")]
    InvalidAddress(String),

    #[error("hosts and ports must have the same length (got {hosts} hosts, {ports} ports)")]
    MismatchedHostsPorts { hosts: usize, ports: usize },

    #[error("at most one of {} may be set", .0.join(", "))]
    ConflictingModes(Vec<String>),

    #[error("no sentinel endpoints configured")]
    NoEndpoints,
}

/// The sentinel set could not produce a primary address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("all {attempts} sentinel(s) unreachable for primary `{primary}`: {last_error}")]
    AllUnreachable {
        primary: String,
        attempts: usize,
        last_error: String,
    },

    #[error("no reachable sentinel knows primary `{primary}` ({answered} answered)")]
    UnknownPrimary { primary: String, answered: usize },
}

/// Reading the lag from the primary failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// I/O failure, dropped connection, or a node in a failover
    /// transition. Retryable; forces re-resolution.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// The stream or consumer group does not exist. Retrying will not
    /// help.
    #[error("{}", describe_missing(.stream, .group.as_deref()))]
    TargetNotFound {
        stream: String,
        group: Option<String>,
    },

    /// The node answered with something we cannot interpret. Treated as
    /// a connection failure: we may be talking to the wrong node.
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

fn describe_missing(stream: &str, group: Option<&str>) -> String {
    match group {
        Some(group) => format!("consumer group `{group}` not found on stream `{stream}`"),
        None => format!("stream `{stream}` not found"),
    }
}

impl ReadError {
    pub fn is_target_not_found(&self) -> bool {
        matches!(self, ReadError::TargetNotFound { .. })
    }

    /// Whether the connection that produced this error must be discarded.
    pub fn invalidates_connection(&self) -> bool {
        !self.is_target_not_found()
    }
}

/// Anything a poll can fail with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScalerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl ScalerError {
    /// Transient: absorb, report "metric unavailable", retry next poll.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScalerError::Config(_) => false,
            ScalerError::Resolution(_) | ScalerError::Timeout { .. } => true,
            ScalerError::Read(e) => !e.is_target_not_found(),
        }
    }

    /// Needs an operator: retrying will not fix it.
    pub fn is_configuration(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_not_found_messages() {
        let stream_missing = ReadError::TargetNotFound {
            stream: "orders".into(),
            group: None,
        };
        assert_eq!(stream_missing.to_string(), "stream `orders` not found");

        let group_missing = ReadError::TargetNotFound {
            stream: "orders".into(),
            group: Some("workers".into()),
        };
        assert_eq!(
            group_missing.to_string(),
            "consumer group `workers` not found on stream `orders`"
        );
    }

    #[test]
    fn classification() {
        let transient: ScalerError = ReadError::ConnectionFailure("reset".into()).into();
        assert!(transient.is_retryable());

        let protocol: ScalerError = ReadError::Protocol("garbage".into()).into();
        assert!(protocol.is_retryable());

        let resolution: ScalerError = ResolutionError::UnknownPrimary {
            primary: "mymaster".into(),
            answered: 2,
        }
        .into();
        assert!(resolution.is_retryable());

        let missing: ScalerError = ReadError::TargetNotFound {
            stream: "s".into(),
            group: Some("g".into()),
        }
        .into();
        assert!(missing.is_configuration());

        let config: ScalerError = ConfigError::NoEndpoints.into();
        assert!(config.is_configuration());
    }

    #[test]
    fn conflicting_modes_lists_keys() {
        let err = ConfigError::ConflictingModes(vec!["lagCount".into(), "streamLength".into()]);
        assert_eq!(
            err.to_string(),
            "at most one of lagCount, streamLength may be set"
        );
    }
}
