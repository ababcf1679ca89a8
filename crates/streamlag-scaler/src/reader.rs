//! Lag reader.
//!
//! Turns stream/group counters into a single [`LagMeasurement`]. Read-only:
//! nothing here acknowledges, claims, or consumes entries.

use tracing::debug;

use streamlag_core::{LagMeasurement, MeasureMode, ReadError, StreamTarget};

use crate::connection::{GroupInfo, PrimaryConnection};

/// Read the lag of `target` over an established connection.
///
/// | mode             | value                                        |
/// |------------------|----------------------------------------------|
/// | `Lag`            | undelivered + pending for the group          |
/// | `PendingEntries` | pending for the group                        |
/// | `StreamLength`   | `XLEN`, 0 for a missing stream               |
///
/// "Undelivered" is the server's `lag` field when present, otherwise
/// `entries-added - entries-read`, otherwise the stream length.
pub async fn read_lag<C>(
    conn: &mut C,
    target: &StreamTarget,
    mode: MeasureMode,
) -> Result<LagMeasurement, ReadError>
where
    C: PrimaryConnection + ?Sized,
{
    if mode == MeasureMode::StreamLength {
        let length = conn.stream_len(&target.stream).await?;
        debug!(stream = %target.stream, length, "stream length read");
        return Ok(LagMeasurement::new(length));
    }

    let groups = conn.groups(&target.stream).await?;
    let group = find_group(groups, target)?;

    let lag = match mode {
        MeasureMode::PendingEntries => group.pending,
        _ => undelivered(conn, target, &group)
            .await?
            .saturating_add(group.pending),
    };

    debug!(
        stream = %target.stream,
        group = %target.consumer_group,
        %mode,
        pending = group.pending,
        lag,
        "lag read"
    );
    Ok(LagMeasurement::new(lag))
}

fn find_group(groups: Vec<GroupInfo>, target: &StreamTarget) -> Result<GroupInfo, ReadError> {
    groups
        .into_iter()
        .find(|g| g.name == target.consumer_group)
        .ok_or_else(|| ReadError::TargetNotFound {
            stream: target.stream.clone(),
            group: Some(target.consumer_group.clone()),
        })
}

async fn undelivered<C>(
    conn: &mut C,
    target: &StreamTarget,
    group: &GroupInfo,
) -> Result<u64, ReadError>
where
    C: PrimaryConnection + ?Sized,
{
    if let Some(lag) = group.lag {
        return Ok(lag);
    }

    let info = conn.stream_info(&target.stream).await?;
    match (info.entries_added, group.entries_read) {
        (Some(added), Some(read)) => Ok(added.saturating_sub(read)),
        // Server cannot tell us how far the group got; the whole stream
        // is an upper bound.
        _ => Ok(info.length),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Role, StreamInfo};
    use async_trait::async_trait;

    /// Canned counters for one stream.
    #[derive(Default)]
    struct Canned {
        groups: Option<Vec<GroupInfo>>,
        info: StreamInfo,
        info_calls: usize,
    }

    #[async_trait]
    impl PrimaryConnection for Canned {
        async fn role(&mut self) -> Result<Role, ReadError> {
            Ok(Role::Primary)
        }

        async fn groups(&mut self, stream: &str) -> Result<Vec<GroupInfo>, ReadError> {
            self.groups.clone().ok_or_else(|| ReadError::TargetNotFound {
                stream: stream.to_string(),
                group: None,
            })
        }

        async fn stream_info(&mut self, stream: &str) -> Result<StreamInfo, ReadError> {
            self.info_calls += 1;
            match self.groups {
                Some(_) => Ok(self.info),
                None => Err(ReadError::TargetNotFound {
                    stream: stream.to_string(),
                    group: None,
                }),
            }
        }

        async fn stream_len(&mut self, _stream: &str) -> Result<u64, ReadError> {
            Ok(self.groups.as_ref().map(|_| self.info.length).unwrap_or(0))
        }
    }

    fn group(name: &str, pending: u64, entries_read: Option<u64>, lag: Option<u64>) -> GroupInfo {
        GroupInfo {
            name: name.to_string(),
            pending,
            entries_read,
            lag,
            ..GroupInfo::default()
        }
    }

    fn target() -> StreamTarget {
        StreamTarget::new("my-stream", "consumer-group-1")
    }

    #[tokio::test]
    async fn lag_counts_undelivered_and_pending() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 3, Some(7), Some(4))]),
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag.get(), 7);
        assert_eq!(conn.info_calls, 0);
    }

    #[tokio::test]
    async fn lag_falls_back_to_counters() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 2, Some(90), None)]),
            info: StreamInfo {
                length: 40,
                entries_added: Some(100),
            },
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag.get(), 12);
    }

    #[tokio::test]
    async fn lag_falls_back_to_length_on_legacy_servers() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 1, None, None)]),
            info: StreamInfo {
                length: 30,
                entries_added: None,
            },
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag.get(), 31);
    }

    #[tokio::test]
    async fn fully_consumed_group_has_zero_lag() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 0, Some(50), Some(0))]),
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag, LagMeasurement::ZERO);
    }

    #[tokio::test]
    async fn pending_mode_ignores_undelivered() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 5, Some(0), Some(1000))]),
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::PendingEntries)
            .await
            .unwrap();
        assert_eq!(lag.get(), 5);
    }

    #[tokio::test]
    async fn stream_length_mode_skips_groups() {
        let mut conn = Canned {
            groups: Some(vec![]),
            info: StreamInfo {
                length: 111,
                entries_added: None,
            },
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::StreamLength)
            .await
            .unwrap();
        assert_eq!(lag.get(), 111);
    }

    #[tokio::test]
    async fn missing_stream_in_length_mode_is_zero() {
        let mut conn = Canned::default();
        let lag = read_lag(&mut conn, &target(), MeasureMode::StreamLength)
            .await
            .unwrap();
        assert_eq!(lag, LagMeasurement::ZERO);
    }

    #[tokio::test]
    async fn missing_group_is_target_not_found() {
        let mut conn = Canned {
            groups: Some(vec![group("someone-else", 0, None, None)]),
            ..Canned::default()
        };
        let err = read_lag(&mut conn, &target(), MeasureMode::Lag)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReadError::TargetNotFound {
                stream: "my-stream".into(),
                group: Some("consumer-group-1".into()),
            }
        );
    }

    #[tokio::test]
    async fn missing_stream_is_target_not_found() {
        let mut conn = Canned::default();
        let err = read_lag(&mut conn, &target(), MeasureMode::PendingEntries)
            .await
            .unwrap_err();
        assert!(err.is_target_not_found());
    }

    #[tokio::test]
    async fn counters_saturate() {
        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", u64::MAX, None, Some(10))]),
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag.get(), u64::MAX);

        let mut conn = Canned {
            groups: Some(vec![group("consumer-group-1", 0, Some(10), None)]),
            info: StreamInfo {
                length: 0,
                entries_added: Some(5),
            },
            ..Canned::default()
        };
        let lag = read_lag(&mut conn, &target(), MeasureMode::Lag).await.unwrap();
        assert_eq!(lag.get(), 0);
    }
}
