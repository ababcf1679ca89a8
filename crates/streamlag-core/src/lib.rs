//! streamlag-core: shared types for the sentinel stream-lag scaler.
//!
//! Holds everything that does not touch the network: the domain types
//! that flow between the resolver, the lag reader and the scaler, the
//! trigger metadata parser, the error taxonomy, and the scaling
//! decision engine.
//!
//! # Decision
//!
//! ```text
//! lag          = unacknowledged entries for (stream, group)
//! active       = lag > activationLagCount
//! metric_value = lag (clamped to i64::MAX)
//! ```
//!
//! Dividing the metric by `lagCount` to size the replica set is the
//! orchestration layer's job; [`project_replicas`] mirrors that math for
//! reporting only.

pub mod config;
pub mod decision;
pub mod error;
pub mod types;

pub use config::{Credentials, ScalerConfig, Secret, Timeouts, TriggerMetadata};
pub use decision::{evaluate, project_replicas};
pub use error::{ConfigError, ReadError, ResolutionError, ScalerError};
pub use types::*;
