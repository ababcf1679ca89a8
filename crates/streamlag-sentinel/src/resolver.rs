//! Topology resolver.
//!
//! [`SentinelResolver`] walks the sentinel set in order and returns the
//! first primary address any sentinel reports. It holds no cache and has
//! no side effects on the sentinels, so it is safe to call as often as the
//! lifecycle manager needs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use streamlag_core::{Address, PrimaryName, ResolutionError, SentinelEndpointSet};

use crate::probe::SentinelProbe;

/// Finds the current primary. Queried fresh on every reconnect.
#[async_trait]
pub trait TopologyResolver: Send + Sync {
    async fn resolve_primary(&self) -> Result<Address, ResolutionError>;
}

#[async_trait]
impl<T: TopologyResolver + ?Sized> TopologyResolver for Arc<T> {
    async fn resolve_primary(&self) -> Result<Address, ResolutionError> {
        (**self).resolve_primary().await
    }
}

/// Resolver backed by an ordered sentinel set.
#[derive(Debug, Clone)]
pub struct SentinelResolver<P> {
    endpoints: SentinelEndpointSet,
    primary: PrimaryName,
    probe: P,
}

impl<P: SentinelProbe> SentinelResolver<P> {
    pub fn new(endpoints: SentinelEndpointSet, primary: PrimaryName, probe: P) -> Self {
        Self {
            endpoints,
            primary,
            probe,
        }
    }
}

#[async_trait]
impl<P: SentinelProbe> TopologyResolver for SentinelResolver<P> {
    async fn resolve_primary(&self) -> Result<Address, ResolutionError> {
        let mut answered = 0usize;
        let mut last_error = None;

        for sentinel in &self.endpoints {
            match self.probe.primary_addr(sentinel, &self.primary).await {
                Ok(Some(addr)) => {
                    debug!(%sentinel, primary = %self.primary, %addr, "primary resolved");
                    return Ok(addr);
                }
                Ok(None) => {
                    answered += 1;
                    debug!(%sentinel, primary = %self.primary, "sentinel does not know primary");
                }
                Err(e) => {
                    debug!(%sentinel, error = %e, "sentinel probe failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let err = if answered > 0 {
            ResolutionError::UnknownPrimary {
                primary: self.primary.to_string(),
                answered,
            }
        } else {
            ResolutionError::AllUnreachable {
                primary: self.primary.to_string(),
                attempts: self.endpoints.len(),
                last_error: last_error.unwrap_or_default(),
            }
        };
        warn!(primary = %self.primary, error = %err, "primary resolution failed");
        Err(err)
    }
}
