//! Connection lifecycle to the resolved primary.
//!
//! ```text
//! Disconnected ──poll──▶ Resolving ──resolve+connect+ROLE──▶ Connected
//!      ▲                   ▲    │ failure: stay, report          │
//!      │                   │    └────────────────────────────────┤
//!      │                   └──────── I/O error / timeout ────────┘
//!      └──────────────────────────── shutdown() ─────────────────
//! ```
//!
//! The manager never schedules retries; each `read_lag` call is one
//! attempt. While a read is in flight the connection is moved out of the
//! manager, so a poll that is dropped part-way (cancelled by its caller)
//! releases the connection and leaves the manager in `Resolving`.

use std::fmt;
use std::mem;

use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use streamlag_core::{
    Address, LagMeasurement, MeasureMode, ReadError, ScalerError, StreamTarget, Timeouts,
};
use streamlag_sentinel::TopologyResolver;

use crate::connection::{PrimaryConnection, PrimaryConnector, Role};
use crate::reader;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Resolving,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// The one trusted primary: address, live connection, and when it was
/// last known good. Replaced wholesale on failover.
struct ResolvedPrimary<T> {
    address: Address,
    conn: T,
    validated_at: Instant,
}

enum Slot<T> {
    Disconnected,
    Resolving,
    Connected(ResolvedPrimary<T>),
}

/// Counts the connection as invalidated if the read is dropped before
/// [`InFlightRead::finish`]. The connection itself is owned by the dropped
/// future and goes with it.
struct InFlightRead<'a> {
    invalidations: &'a mut u64,
    address: Option<Address>,
}

impl InFlightRead<'_> {
    fn finish(mut self) {
        self.address = None;
    }
}

impl Drop for InFlightRead<'_> {
    fn drop(&mut self) {
        if let Some(address) = self.address.take() {
            *self.invalidations += 1;
            warn!(
                primary = %address,
                invalidations = *self.invalidations,
                "read abandoned, primary connection dropped"
            );
        }
    }
}

/// Owns the connection to the current primary for one trigger.
pub struct ConnectionManager<R, C: PrimaryConnector> {
    resolver: R,
    connector: C,
    timeouts: Timeouts,
    slot: Slot<C::Connection>,
    invalidations: u64,
}

impl<R, C> ConnectionManager<R, C>
where
    R: TopologyResolver,
    C: PrimaryConnector,
{
    pub fn new(resolver: R, connector: C, timeouts: Timeouts) -> Self {
        Self {
            resolver,
            connector,
            timeouts,
            slot: Slot::Disconnected,
            invalidations: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.slot {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Resolving => ConnectionState::Resolving,
            Slot::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Address of the primary currently trusted, if connected.
    pub fn primary(&self) -> Option<&Address> {
        match &self.slot {
            Slot::Connected(p) => Some(&p.address),
            _ => None,
        }
    }

    /// When the current connection last completed a read (or its role
    /// check).
    pub fn last_validated(&self) -> Option<Instant> {
        match &self.slot {
            Slot::Connected(p) => Some(p.validated_at),
            _ => None,
        }
    }

    /// How many times a live connection has been discarded.
    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }

    /// Read the lag of `target`, connecting first if needed.
    pub async fn read_lag(
        &mut self,
        target: &StreamTarget,
        mode: MeasureMode,
    ) -> Result<LagMeasurement, ScalerError> {
        let mut primary = match mem::replace(&mut self.slot, Slot::Resolving) {
            Slot::Connected(primary) => primary,
            Slot::Disconnected | Slot::Resolving => self.establish().await?,
        };

        let after = self.timeouts.response;
        let in_flight = InFlightRead {
            invalidations: &mut self.invalidations,
            address: Some(primary.address.clone()),
        };
        let read = timeout(after, reader::read_lag(&mut primary.conn, target, mode)).await;
        in_flight.finish();

        match read {
            Ok(Ok(lag)) => {
                primary.validated_at = Instant::now();
                self.slot = Slot::Connected(primary);
                Ok(lag)
            }
            Ok(Err(e)) if !e.invalidates_connection() => {
                self.slot = Slot::Connected(primary);
                Err(e.into())
            }
            Ok(Err(e)) => {
                self.invalidate(primary, &e.to_string());
                Err(e.into())
            }
            Err(_) => {
                self.invalidate(primary, "read timed out");
                Err(ScalerError::Timeout {
                    operation: "lag read",
                    after,
                })
            }
        }
    }

    /// Release the connection. The next read starts from scratch.
    pub fn shutdown(&mut self) {
        if let Slot::Connected(primary) = mem::replace(&mut self.slot, Slot::Disconnected) {
            info!(primary = %primary.address, "closing primary connection");
        }
    }

    async fn establish(&mut self) -> Result<ResolvedPrimary<C::Connection>, ScalerError> {
        let address = self.resolver.resolve_primary().await?;

        let connect = self.timeouts.connect;
        let mut conn = timeout(connect, self.connector.connect(&address))
            .await
            .map_err(|_| ScalerError::Timeout {
                operation: "primary connect",
                after: connect,
            })??;

        let response = self.timeouts.response;
        let role = timeout(response, conn.role())
            .await
            .map_err(|_| ScalerError::Timeout {
                operation: "role check",
                after: response,
            })??;

        if role != Role::Primary {
            warn!(%address, %role, "resolved node is not a primary");
            return Err(ReadError::ConnectionFailure(format!(
                "{address} reports role {role}, expected master"
            ))
            .into());
        }

        info!(primary = %address, "connected to primary");
        Ok(ResolvedPrimary {
            address,
            conn,
            validated_at: Instant::now(),
        })
    }

    fn invalidate(&mut self, primary: ResolvedPrimary<C::Connection>, reason: &str) {
        self.invalidations += 1;
        warn!(
            primary = %primary.address,
            reason,
            invalidations = self.invalidations,
            "dropping primary connection, will re-resolve"
        );
        drop(primary);
        self.slot = Slot::Resolving;
        debug!(state = %self.state(), "connection invalidated");
    }
}
