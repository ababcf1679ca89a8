//! Connections to the resolved primary.
//!
//! [`PrimaryConnection`] is the read-only query surface the lag reader
//! needs; [`PrimaryConnector`] opens one against an address. The redis
//! implementations below issue:
//!
//! ```text
//! ROLE                  → role of the node we landed on
//! XINFO GROUPS <stream> → per-group pending / entries-read / lag
//! XINFO STREAM <stream> → length / entries-added
//! XLEN <stream>         → length (0 for a missing key)
//! ```
//!
//! Replies are accepted in both RESP2 (flat key/value arrays) and RESP3
//! (maps) shapes. Nothing here writes, acknowledges, or claims entries.

use std::fmt;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisError, Value};

use streamlag_core::{Address, Credentials, ReadError, ScalerConfig};
use streamlag_sentinel::connection_info;

/// One consumer group as reported by `XINFO GROUPS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    /// Delivered but not yet acknowledged.
    pub pending: u64,
    pub last_delivered_id: String,
    /// Logical read counter; absent on older servers or when unknown.
    pub entries_read: Option<u64>,
    /// Entries not yet delivered to the group; absent when the server
    /// cannot compute it.
    pub lag: Option<u64>,
}

/// Stream counters from `XINFO STREAM`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub length: u64,
    /// Total entries ever appended; absent on older servers.
    pub entries_added: Option<u64>,
}

/// Replication role of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
    /// Anything else, e.g. `sentinel`.
    Unknown(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("master"),
            Role::Replica => f.write_str("slave"),
            Role::Unknown(other) => f.write_str(other),
        }
    }
}

/// Read-only queries against the primary.
#[async_trait]
pub trait PrimaryConnection: Send {
    async fn role(&mut self) -> Result<Role, ReadError>;

    /// All consumer groups on `stream`. A missing stream is
    /// `ReadError::TargetNotFound`.
    async fn groups(&mut self, stream: &str) -> Result<Vec<GroupInfo>, ReadError>;

    /// Counters for `stream`. A missing stream is `ReadError::TargetNotFound`.
    async fn stream_info(&mut self, stream: &str) -> Result<StreamInfo, ReadError>;

    /// Length of `stream`; 0 when it does not exist.
    async fn stream_len(&mut self, stream: &str) -> Result<u64, ReadError>;
}

/// Opens connections to a resolved primary.
#[async_trait]
pub trait PrimaryConnector: Send + Sync {
    type Connection: PrimaryConnection + 'static;

    async fn connect(&self, address: &Address) -> Result<Self::Connection, ReadError>;
}

// ── Redis implementation ─────────────────────────────────────────────

/// Connector for real data nodes.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    credentials: Credentials,
    database_index: i64,
}

impl RedisConnector {
    pub fn new(credentials: Credentials, database_index: i64) -> Self {
        Self {
            credentials,
            database_index,
        }
    }

    pub fn from_config(config: &ScalerConfig) -> Self {
        Self::new(config.credentials.clone(), config.database_index)
    }
}

#[async_trait]
impl PrimaryConnector for RedisConnector {
    type Connection = RedisPrimaryConnection;

    async fn connect(&self, address: &Address) -> Result<RedisPrimaryConnection, ReadError> {
        let info = connection_info(address, &self.credentials, self.database_index);
        let client = redis::Client::open(info)
            .map_err(|e| ReadError::ConnectionFailure(format!("{address}: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| ReadError::ConnectionFailure(format!("{address}: {e}")))?;

        Ok(RedisPrimaryConnection {
            address: address.clone(),
            conn,
        })
    }
}

/// A multiplexed connection to one data node. Dropping it closes the
/// socket.
pub struct RedisPrimaryConnection {
    address: Address,
    conn: MultiplexedConnection,
}

impl fmt::Debug for RedisPrimaryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPrimaryConnection")
            .field("address", &self.address)
            .finish()
    }
}

impl RedisPrimaryConnection {
    async fn query(&mut self, cmd: &redis::Cmd, stream: Option<&str>) -> Result<Value, ReadError> {
        let reply: Value = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(|e| classify_redis_error(&e, stream))?;
        Ok(reply)
    }
}

#[async_trait]
impl PrimaryConnection for RedisPrimaryConnection {
    async fn role(&mut self) -> Result<Role, ReadError> {
        let reply = self.query(&redis::cmd("ROLE"), None).await?;
        parse_role(&reply)
    }

    async fn groups(&mut self, stream: &str) -> Result<Vec<GroupInfo>, ReadError> {
        let mut cmd = redis::cmd("XINFO");
        cmd.arg("GROUPS").arg(stream);
        let reply = self.query(&cmd, Some(stream)).await?;
        parse_groups(&reply)
    }

    async fn stream_info(&mut self, stream: &str) -> Result<StreamInfo, ReadError> {
        let mut cmd = redis::cmd("XINFO");
        cmd.arg("STREAM").arg(stream);
        let reply = self.query(&cmd, Some(stream)).await?;
        parse_stream_info(&reply)
    }

    async fn stream_len(&mut self, stream: &str) -> Result<u64, ReadError> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(stream);
        let reply = self.query(&cmd, Some(stream)).await?;
        count(&reply).ok_or_else(|| ReadError::Protocol(format!("XLEN returned {reply:?}")))
    }
}

/// Map a client error onto the read error taxonomy.
///
/// Transport failures and replies that mean "this node is mid-failover"
/// are connection failures. `no such key` on a stream command means the
/// stream is missing.
pub fn classify_redis_error(err: &RedisError, stream: Option<&str>) -> ReadError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        return ReadError::ConnectionFailure(err.to_string());
    }

    match err.kind() {
        ErrorKind::ReadOnly
        | ErrorKind::BusyLoadingError
        | ErrorKind::MasterDown
        | ErrorKind::TryAgain
        | ErrorKind::AuthenticationFailed => ReadError::ConnectionFailure(err.to_string()),
        ErrorKind::ResponseError if err.to_string().to_ascii_lowercase().contains("no such key") => {
            match stream {
                Some(stream) => ReadError::TargetNotFound {
                    stream: stream.to_string(),
                    group: None,
                },
                None => ReadError::Protocol(err.to_string()),
            }
        }
        _ => ReadError::Protocol(err.to_string()),
    }
}

// ── Reply parsing ────────────────────────────────────────────────────

fn text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Okay => Some("OK".to_string()),
        _ => None,
    }
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::BulkString(_) | Value::SimpleString(_) => text(value)?.trim().parse().ok(),
        _ => None,
    }
}

/// Key/value pairs from either a RESP3 map or a flat RESP2 array.
fn fields(value: &Value) -> Result<Vec<(String, &Value)>, ReadError> {
    let key = |k: &Value| {
        text(k).ok_or_else(|| ReadError::Protocol(format!("non-string field name {k:?}")))
    };

    match value {
        Value::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| -> Result<_, ReadError> { Ok((key(k)?, v)) })
            .collect(),
        Value::Array(items) if items.len() % 2 == 0 => items
            .chunks_exact(2)
            .map(|pair| -> Result<_, ReadError> { Ok((key(&pair[0])?, &pair[1])) })
            .collect(),
        other => Err(ReadError::Protocol(format!(
            "expected a field map, got {other:?}"
        ))),
    }
}

pub fn parse_groups(reply: &Value) -> Result<Vec<GroupInfo>, ReadError> {
    let Value::Array(entries) = reply else {
        return Err(ReadError::Protocol(format!(
            "XINFO GROUPS returned {reply:?}"
        )));
    };
    entries.iter().map(parse_group).collect()
}

fn parse_group(entry: &Value) -> Result<GroupInfo, ReadError> {
    let mut info = GroupInfo::default();
    for (key, value) in fields(entry)? {
        match key.as_str() {
            "name" => info.name = text(value).unwrap_or_default(),
            "consumers" => info.consumers = count(value).unwrap_or(0),
            "pending" => info.pending = count(value).unwrap_or(0),
            "last-delivered-id" => info.last_delivered_id = text(value).unwrap_or_default(),
            "entries-read" => info.entries_read = count(value),
            "lag" => info.lag = count(value),
            _ => {}
        }
    }

    if info.name.is_empty() {
        return Err(ReadError::Protocol("consumer group entry without a name".to_string()));
    }
    Ok(info)
}

pub fn parse_stream_info(reply: &Value) -> Result<StreamInfo, ReadError> {
    let mut length = None;
    let mut entries_added = None;
    for (key, value) in fields(reply)? {
        match key.as_str() {
            "length" => length = count(value),
            "entries-added" => entries_added = count(value),
            _ => {}
        }
    }

    let length =
        length.ok_or_else(|| ReadError::Protocol("XINFO STREAM reply without length".to_string()))?;
    Ok(StreamInfo {
        length,
        entries_added,
    })
}

pub fn parse_role(reply: &Value) -> Result<Role, ReadError> {
    let role = match reply {
        Value::Array(items) => items.first().and_then(text),
        _ => None,
    }
    .ok_or_else(|| ReadError::Protocol(format!("ROLE returned {reply:?}")))?;

    Ok(match role.as_str() {
        "master" => Role::Primary,
        "slave" | "replica" => Role::Replica,
        _ => Role::Unknown(role),
    })
}
