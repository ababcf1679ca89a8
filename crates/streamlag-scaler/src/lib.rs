//! streamlag-scaler: per-trigger lag polling.
//!
//! Wires the topology resolver, the lag reader and the decision engine
//! into one poll entry point per trigger instance.
//!
//! # Architecture
//!
//! ```text
//! StreamLagScaler::poll()
//!   ├── ConnectionManager::read_lag()
//!   │     ├── Disconnected/Resolving → TopologyResolver::resolve_primary()
//!   │     │                          → PrimaryConnector::connect() → ROLE check
//!   │     ├── Connected → reader::read_lag(conn, target, mode)
//!   │     └── I/O failure → drop connection, back to Resolving
//!   ├── decision::evaluate(lag, thresholds)
//!   └── HealthTracker::record()
//! ```
//!
//! There are no background tasks or timers here. Whoever owns the scaler
//! decides the polling cadence, and a failed poll is retried simply by
//! polling again.

pub mod connection;
pub mod health;
pub mod lifecycle;
pub mod reader;
pub mod registry;
pub mod scaler;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use connection::{
    GroupInfo, PrimaryConnection, PrimaryConnector, RedisConnector, RedisPrimaryConnection, Role,
    StreamInfo,
};
pub use health::{HealthStatus, HealthTracker, PollResult};
pub use lifecycle::{ConnectionManager, ConnectionState};
pub use reader::read_lag;
pub use registry::{RegistryError, SharedTrigger, Trigger, TriggerRegistry, TriggerSnapshot};
pub use scaler::{PollOutcome, SentinelStreamScaler, StreamLagScaler};
