//! streamlag-sentinel: primary discovery through a sentinel set.
//!
//! The resolver asks each sentinel, in configured order, for the current
//! address of a named primary and stops at the first answer. It caches
//! nothing; the connection lifecycle manager owns the resolved address
//! and calls back in only when its connection fails.
//!
//! # Architecture
//!
//! ```text
//! TopologyResolver (trait, one discovery method)
//!   └── SentinelResolver<P: SentinelProbe>
//!         ├── walks SentinelEndpointSet in order
//!         └── P::primary_addr(sentinel, name)
//!               └── RedisSentinelProbe: SENTINEL get-master-addr-by-name
//! ```
//!
//! Probes are swappable so tests can stand in a fake sentinel responder.

pub mod probe;
pub mod resolver;

pub use probe::{ProbeError, RedisSentinelProbe, SentinelProbe, connection_info};
pub use resolver::{SentinelResolver, TopologyResolver};
