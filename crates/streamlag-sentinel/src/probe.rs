//! Sentinel probes.
//!
//! A probe asks one sentinel who the primary for a name is. The
//! redis-backed probe opens a short-lived connection per query: resolution
//! only happens on the first poll and after a connection failure, so there
//! is nothing worth keeping open between calls.
//!
//! # Query
//!
//! ```text
//! Client → Sentinel:
//!   SENTINEL get-master-addr-by-name <name>
//!
//! Sentinel → Client:
//!   *2\r\n$<n>\r\n<host>\r\n$<n>\r\n<port>\r\n   (known name)
//!   *-1\r\n or _\r\n                             (unknown name)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Value};
use thiserror::Error;
use tracing::debug;

use streamlag_core::{Address, Credentials, PrimaryName, Timeouts};

/// Failure to get an answer out of a single sentinel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connect to sentinel {sentinel}: {reason}")]
    Connect { sentinel: Address, reason: String },

    #[error("sentinel {sentinel} did not answer within {after:?}")]
    Timeout { sentinel: Address, after: Duration },

    #[error("sentinel {sentinel} rejected query: {reason}")]
    Command { sentinel: Address, reason: String },

    #[error("sentinel {sentinel} sent an unexpected reply: {reason}")]
    Reply { sentinel: Address, reason: String },
}

/// Asks a single sentinel for the primary address of `primary`.
///
/// `Ok(None)` means the sentinel answered but does not monitor that name.
#[async_trait]
pub trait SentinelProbe: Send + Sync {
    async fn primary_addr(
        &self,
        sentinel: &Address,
        primary: &PrimaryName,
    ) -> Result<Option<Address>, ProbeError>;
}

/// Build redis connection parameters for a node.
pub fn connection_info(address: &Address, credentials: &Credentials, db: i64) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(address.host.clone(), address.port),
        redis: RedisConnectionInfo {
            db,
            username: credentials.username.clone(),
            password: credentials
                .password
                .as_ref()
                .map(|p| p.expose().to_string()),
            ..Default::default()
        },
    }
}

/// Probe that speaks to real sentinels over TCP.
#[derive(Debug, Clone)]
pub struct RedisSentinelProbe {
    credentials: Credentials,
    timeouts: Timeouts,
}

impl RedisSentinelProbe {
    pub fn new(credentials: Credentials, timeouts: Timeouts) -> Self {
        Self {
            credentials,
            timeouts,
        }
    }
}

#[async_trait]
impl SentinelProbe for RedisSentinelProbe {
    async fn primary_addr(
        &self,
        sentinel: &Address,
        primary: &PrimaryName,
    ) -> Result<Option<Address>, ProbeError> {
        let client = redis::Client::open(connection_info(sentinel, &self.credentials, 0))
            .map_err(|e| ProbeError::Connect {
                sentinel: sentinel.clone(),
                reason: e.to_string(),
            })?;

        let mut conn = tokio::time::timeout(
            self.timeouts.connect,
            client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| ProbeError::Timeout {
            sentinel: sentinel.clone(),
            after: self.timeouts.connect,
        })?
        .map_err(|e| ProbeError::Connect {
            sentinel: sentinel.clone(),
            reason: e.to_string(),
        })?;

        let mut query = redis::cmd("SENTINEL");
        query.arg("get-master-addr-by-name").arg(primary.as_str());

        let reply: Value = tokio::time::timeout(self.timeouts.response, query.query_async(&mut conn))
            .await
            .map_err(|_| ProbeError::Timeout {
                sentinel: sentinel.clone(),
                after: self.timeouts.response,
            })?
            .map_err(|e| ProbeError::Command {
                sentinel: sentinel.clone(),
                reason: e.to_string(),
            })?;

        let addr = parse_primary_reply(sentinel, &reply)?;
        debug!(%sentinel, %primary, primary_addr = ?addr, "sentinel answered");
        Ok(addr)
    }
}

/// Decode a `get-master-addr-by-name` reply.
pub fn parse_primary_reply(sentinel: &Address, reply: &Value) -> Result<Option<Address>, ProbeError> {
    if matches!(reply, Value::Nil) {
        return Ok(None);
    }

    let (host, port): (String, u16) =
        redis::from_redis_value(reply).map_err(|e| ProbeError::Reply {
            sentinel: sentinel.clone(),
            reason: e.to_string(),
        })?;

    if host.is_empty() {
        return Err(ProbeError::Reply {
            sentinel: sentinel.clone(),
            reason: "empty host".to_string(),
        });
    }

    Ok(Some(Address::new(host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel() -> Address {
        Address::new("sentinel-0", 26379)
    }

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_host_port_pair() {
        let reply = Value::Array(vec![bulk("10.0.0.7"), bulk("6379")]);
        let addr = parse_primary_reply(&sentinel(), &reply).unwrap();
        assert_eq!(addr, Some(Address::new("10.0.0.7", 6379)));
    }

    #[test]
    fn nil_means_unknown_primary() {
        assert_eq!(parse_primary_reply(&sentinel(), &Value::Nil).unwrap(), None);
    }

    #[test]
    fn rejects_malformed_port() {
        let reply = Value::Array(vec![bulk("10.0.0.7"), bulk("not-a-port")]);
        assert!(matches!(
            parse_primary_reply(&sentinel(), &reply),
            Err(ProbeError::Reply { .. })
        ));
    }

    #[test]
    fn rejects_wrong_arity() {
        let reply = Value::Array(vec![bulk("10.0.0.7")]);
        assert!(parse_primary_reply(&sentinel(), &reply).is_err());
    }

    #[test]
    fn rejects_empty_host() {
        let reply = Value::Array(vec![bulk(""), bulk("6379")]);
        assert!(parse_primary_reply(&sentinel(), &reply).is_err());
    }

    #[test]
    fn connection_info_carries_credentials() {
        let creds = Credentials::new(Some("app".into()), Some("secret".into()));
        let info = connection_info(&Address::new("redis-0", 6379), &creds, 2);
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.username.as_deref(), Some("app"));
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
        assert!(matches!(
            info.addr,
            ConnectionAddr::Tcp(ref host, 6379) if host == "redis-0"
        ));
    }

    #[tokio::test]
    async fn unreachable_sentinel_is_an_error() {
        let probe = RedisSentinelProbe::new(
            Credentials::default(),
            Timeouts {
                connect: Duration::from_millis(500),
                response: Duration::from_millis(500),
            },
        );
        // Port 1 on loopback refuses connections.
        let result = probe
            .primary_addr(&Address::new("127.0.0.1", 1), &PrimaryName::new("mymaster"))
            .await;
        assert!(matches!(
            result,
            Err(ProbeError::Connect { .. } | ProbeError::Timeout { .. })
        ));
    }
}
