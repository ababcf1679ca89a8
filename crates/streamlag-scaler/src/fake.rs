//! In-memory sentinel deployment for tests.
//!
//! [`FakeTopology`] models a sentinel set, a primary that can fail over,
//! and the streams/groups on it. It hands out a [`FakeSentinelProbe`]
//! (plugged into the real [`SentinelResolver`]) and a [`FakeConnector`],
//! so everything above the wire is exercised unchanged.
//!
//! Failure knobs: sentinels down, unknown primary, stale sentinels that
//! still report a demoted node, failing reads, hanging reads, and servers
//! too old to report group lag. Open connections are counted so tests can
//! assert that nothing leaks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use streamlag_core::{
    Address, PrimaryName, ReadError, ScalerConfig, SentinelEndpointSet, TriggerMetadata,
};
use streamlag_sentinel::{ProbeError, SentinelProbe, SentinelResolver};

use crate::connection::{GroupInfo, PrimaryConnection, PrimaryConnector, Role, StreamInfo};
use crate::scaler::StreamLagScaler;

/// Primary name the fake sentinels monitor.
pub const PRIMARY_NAME: &str = "mymaster";

#[derive(Debug, Default)]
struct FakeGroup {
    entries_read: u64,
    pending: u64,
}

#[derive(Debug, Default)]
struct FakeStream {
    length: u64,
    entries_added: u64,
    groups: HashMap<String, FakeGroup>,
}

#[derive(Debug)]
struct State {
    sentinels: Vec<Address>,
    primary: Address,
    /// What the sentinels answer; lags `primary` when sentinels are stale.
    reported: Address,
    epoch: u64,
    streams: HashMap<String, FakeStream>,
    sentinels_down: bool,
    unknown_primary: bool,
    stale_sentinels: bool,
    legacy_server: bool,
    hang_reads: bool,
    fail_reads: u32,
    resolutions: usize,
    connects: usize,
}

/// Shared handle to the fake deployment.
#[derive(Debug, Clone)]
pub struct FakeTopology {
    state: Arc<Mutex<State>>,
    live: Arc<AtomicUsize>,
}

impl FakeTopology {
    pub fn new(primary: Address) -> Self {
        let state = State {
            sentinels: (0..3)
                .map(|i| Address::new(format!("sentinel-{i}"), 26379))
                .collect(),
            reported: primary.clone(),
            primary,
            epoch: 0,
            streams: HashMap::new(),
            sentinels_down: false,
            unknown_primary: false,
            stale_sentinels: false,
            legacy_server: false,
            hang_reads: false,
            fail_reads: 0,
            resolutions: 0,
            connects: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sentinels(&self) -> Vec<Address> {
        self.lock().sentinels.clone()
    }

    /// Trigger metadata pointing at this deployment.
    pub fn metadata(&self, trigger_index: usize, stream: &str, group: &str) -> TriggerMetadata {
        let sentinels = self
            .sentinels()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        TriggerMetadata::new(trigger_index)
            .with("addresses", &sentinels)
            .with("sentinelMaster", PRIMARY_NAME)
            .with("stream", stream)
            .with("consumerGroup", group)
    }

    pub fn probe(&self) -> FakeSentinelProbe {
        FakeSentinelProbe {
            topology: self.clone(),
        }
    }

    /// Resolver over the fake sentinels for [`PRIMARY_NAME`].
    pub fn resolver(&self) -> SentinelResolver<FakeSentinelProbe> {
        let endpoints = SentinelEndpointSet::new(self.sentinels())
            .unwrap_or_else(|_| unreachable!("fake topology always has sentinels"));
        SentinelResolver::new(endpoints, PrimaryName::new(PRIMARY_NAME), self.probe())
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            topology: self.clone(),
        }
    }

    /// A scaler wired to this deployment.
    pub fn scaler(
        &self,
        config: ScalerConfig,
    ) -> StreamLagScaler<SentinelResolver<FakeSentinelProbe>, FakeConnector> {
        let resolver = SentinelResolver::new(
            config.endpoints.clone(),
            config.primary_name.clone(),
            self.probe(),
        );
        StreamLagScaler::new(config, resolver, self.connector())
    }

    // ── Data ─────────────────────────────────────────────────────────

    /// `XGROUP CREATE <stream> <group> $ MKSTREAM`.
    pub fn create_group(&self, stream: &str, group: &str) {
        let mut state = self.lock();
        let s = state.streams.entry(stream.to_string()).or_default();
        let entries_read = s.entries_added;
        s.groups.insert(
            group.to_string(),
            FakeGroup {
                entries_read,
                pending: 0,
            },
        );
    }

    /// `XADD` `n` entries, creating the stream if needed.
    pub fn append(&self, stream: &str, n: u64) {
        let mut state = self.lock();
        let s = state.streams.entry(stream.to_string()).or_default();
        s.length += n;
        s.entries_added += n;
    }

    /// Deliver up to `n` undelivered entries to a consumer of `group`.
    pub fn deliver(&self, stream: &str, group: &str, n: u64) {
        let mut state = self.lock();
        if let Some(s) = state.streams.get_mut(stream) {
            let added = s.entries_added;
            if let Some(g) = s.groups.get_mut(group) {
                let k = n.min(added - g.entries_read);
                g.entries_read += k;
                g.pending += k;
            }
        }
    }

    /// `XACK` up to `n` pending entries of `group`.
    pub fn ack(&self, stream: &str, group: &str, n: u64) {
        let mut state = self.lock();
        if let Some(g) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            g.pending -= n.min(g.pending);
        }
    }

    pub fn delete_stream(&self, stream: &str) {
        self.lock().streams.remove(stream);
    }

    // ── Topology ─────────────────────────────────────────────────────

    /// Promote `new_primary`. Connections to the old primary start failing.
    pub fn failover(&self, new_primary: Address) {
        let mut state = self.lock();
        state.primary = new_primary.clone();
        state.epoch += 1;
        if !state.stale_sentinels {
            state.reported = new_primary;
        }
    }

    pub fn set_sentinels_down(&self, down: bool) {
        self.lock().sentinels_down = down;
    }

    pub fn set_unknown_primary(&self, unknown: bool) {
        self.lock().unknown_primary = unknown;
    }

    /// Keep answering with the pre-failover primary. Turning it off
    /// catches the sentinels up.
    pub fn set_stale_sentinels(&self, stale: bool) {
        let mut state = self.lock();
        state.stale_sentinels = stale;
        if !stale {
            state.reported = state.primary.clone();
        }
    }

    /// Omit `lag`, `entries-read` and `entries-added` from replies.
    pub fn set_legacy_server(&self, legacy: bool) {
        self.lock().legacy_server = legacy;
    }

    /// Make every command on open connections block forever.
    pub fn set_hang_reads(&self, hang: bool) {
        self.lock().hang_reads = hang;
    }

    /// Fail the next `n` stream commands with a connection reset.
    pub fn fail_reads(&self, n: u32) {
        self.lock().fail_reads = n;
    }

    // ── Observations ─────────────────────────────────────────────────

    /// Sentinel answers that named a primary.
    pub fn resolutions(&self) -> usize {
        self.lock().resolutions
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Connections currently open.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Sentinel probe answering from [`FakeTopology`].
#[derive(Debug, Clone)]
pub struct FakeSentinelProbe {
    topology: FakeTopology,
}

#[async_trait]
impl SentinelProbe for FakeSentinelProbe {
    async fn primary_addr(
        &self,
        sentinel: &Address,
        primary: &PrimaryName,
    ) -> Result<Option<Address>, ProbeError> {
        let mut state = self.topology.lock();
        if state.sentinels_down || !state.sentinels.contains(sentinel) {
            return Err(ProbeError::Connect {
                sentinel: sentinel.clone(),
                reason: "connection refused".to_string(),
            });
        }
        if state.unknown_primary || primary.as_str() != PRIMARY_NAME {
            return Ok(None);
        }
        state.resolutions += 1;
        Ok(Some(state.reported.clone()))
    }
}

/// Connector opening [`FakeConnection`]s.
#[derive(Debug, Clone)]
pub struct FakeConnector {
    topology: FakeTopology,
}

#[async_trait]
impl PrimaryConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, address: &Address) -> Result<FakeConnection, ReadError> {
        let epoch = {
            let mut state = self.topology.lock();
            state.connects += 1;
            state.epoch
        };
        self.topology.live.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            topology: self.topology.clone(),
            address: address.clone(),
            epoch,
        })
    }
}

/// One open connection. Tied to the failover epoch it was opened in.
#[derive(Debug)]
pub struct FakeConnection {
    topology: FakeTopology,
    address: Address,
    epoch: u64,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.topology.live.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Gate {
    Open,
    Hang,
}

impl FakeConnection {
    /// Checks shared with every command. `counts` marks stream commands,
    /// which consume injected failures.
    fn gate(&self, counts: bool) -> Result<Gate, ReadError> {
        let mut state = self.topology.lock();
        if state.hang_reads {
            return Ok(Gate::Hang);
        }
        if state.epoch != self.epoch && self.address != state.primary {
            return Err(ReadError::ConnectionFailure(format!(
                "{}: connection reset by peer",
                self.address
            )));
        }
        if counts && state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(ReadError::ConnectionFailure(format!(
                "{}: broken pipe",
                self.address
            )));
        }
        Ok(Gate::Open)
    }

    async fn enter(&self, counts: bool) -> Result<(), ReadError> {
        match self.gate(counts)? {
            Gate::Open => Ok(()),
            Gate::Hang => std::future::pending().await,
        }
    }
}

fn missing(stream: &str) -> ReadError {
    ReadError::TargetNotFound {
        stream: stream.to_string(),
        group: None,
    }
}

#[async_trait]
impl PrimaryConnection for FakeConnection {
    async fn role(&mut self) -> Result<Role, ReadError> {
        self.enter(false).await?;
        let state = self.topology.lock();
        Ok(if self.address == state.primary {
            Role::Primary
        } else {
            Role::Replica
        })
    }

    async fn groups(&mut self, stream: &str) -> Result<Vec<GroupInfo>, ReadError> {
        self.enter(true).await?;
        let state = self.topology.lock();
        let s = state.streams.get(stream).ok_or_else(|| missing(stream))?;
        let legacy = state.legacy_server;

        let mut groups: Vec<GroupInfo> = s
            .groups
            .iter()
            .map(|(name, g)| GroupInfo {
                name: name.clone(),
                consumers: 1,
                pending: g.pending,
                last_delivered_id: format!("0-{}", g.entries_read),
                entries_read: (!legacy).then_some(g.entries_read),
                lag: (!legacy).then(|| s.entries_added - g.entries_read),
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn stream_info(&mut self, stream: &str) -> Result<StreamInfo, ReadError> {
        self.enter(true).await?;
        let state = self.topology.lock();
        let s = state.streams.get(stream).ok_or_else(|| missing(stream))?;
        Ok(StreamInfo {
            length: s.length,
            entries_added: (!state.legacy_server).then_some(s.entries_added),
        })
    }

    async fn stream_len(&mut self, stream: &str) -> Result<u64, ReadError> {
        self.enter(true).await?;
        let state = self.topology.lock();
        Ok(state.streams.get(stream).map(|s| s.length).unwrap_or(0))
    }
}
