// Timestamp → offset resolution for ListOffsets
//
// One resolution routine, two encoders. v0 clients get the offset wrapped in
// a single-element list; v1+ clients get a (timestamp, offset) pair. Both
// encoders consume the same `ResolvedOffset`.

use kafka_protocol::messages::list_offsets_response::ListOffsetsPartitionResponse;
use tracing::warn;

use super::backend::{LogHandle, LogPosition};
use super::constants::{
    DEFAULT_TIMESTAMP, EARLIEST_TIMESTAMP, ERROR_LEADER_NOT_AVAILABLE, ERROR_NONE,
    ERROR_UNKNOWN_SERVER_ERROR, LATEST_TIMESTAMP, UNKNOWN_OFFSET, UNKNOWN_TIMESTAMP,
};

/// Outcome of resolving one partition's timestamp query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedOffset {
    /// Kafka offset of the resolved position
    Offset(i64),
    /// Nothing could be resolved; answered as a server error
    Unavailable,
    /// The partition's log could not be attached
    LeaderNotAvailable,
}

/// Resolve `timestamp` (a sentinel or an explicit time) against `log`
pub async fn resolve(log: &dyn LogHandle, timestamp: i64) -> ResolvedOffset {
    match timestamp {
        LATEST_TIMESTAMP => match log.last_confirmed_position().await {
            // An empty log reports entry 0 of its current segment
            Ok(last) if last.entry_id < 0 => {
                ResolvedOffset::Offset(LogPosition::new(last.segment_id, 0).to_offset())
            }
            Ok(last) => ResolvedOffset::Offset(last.to_offset()),
            Err(e) => {
                warn!(error = %e, "failed to read last confirmed position");
                ResolvedOffset::Unavailable
            }
        },
        EARLIEST_TIMESTAMP => match log.first_valid_position().await {
            Ok(Some(first)) => ResolvedOffset::Offset(first.to_offset()),
            Ok(None) => ResolvedOffset::Offset(0),
            Err(e) => {
                warn!(error = %e, "failed to find first valid position");
                ResolvedOffset::Unavailable
            }
        },
        explicit => {
            match log.find_by_timestamp(explicit).await {
                Ok(Some(position)) => return ResolvedOffset::Offset(position.to_offset()),
                Ok(None) => {}
                Err(e) => {
                    warn!(timestamp = explicit, error = %e, "timestamp search failed");
                    return ResolvedOffset::Unavailable;
                }
            }
            // No entry at or after the timestamp
            match log.first_valid_position().await {
                Ok(Some(first)) => ResolvedOffset::Offset(first.to_offset()),
                Ok(None) => ResolvedOffset::Unavailable,
                Err(e) => {
                    warn!(error = %e, "failed to find first valid position");
                    ResolvedOffset::Unavailable
                }
            }
        }
    }
}

/// v0 encoding: `old_style_offsets` holds the offset, or nothing on error
pub fn legacy_partition_response(
    partition_index: i32,
    resolved: ResolvedOffset,
) -> ListOffsetsPartitionResponse {
    let mut response = ListOffsetsPartitionResponse::default();
    response.partition_index = partition_index;
    match resolved {
        ResolvedOffset::Offset(offset) => {
            response.error_code = ERROR_NONE;
            response.old_style_offsets = vec![offset];
        }
        ResolvedOffset::Unavailable => {
            response.error_code = ERROR_UNKNOWN_SERVER_ERROR;
            response.old_style_offsets = Vec::new();
        }
        ResolvedOffset::LeaderNotAvailable => {
            response.error_code = ERROR_LEADER_NOT_AVAILABLE;
            response.old_style_offsets = Vec::new();
        }
    }
    response
}

/// v1+ encoding: a single (timestamp, offset) pair
pub fn current_partition_response(
    partition_index: i32,
    resolved: ResolvedOffset,
) -> ListOffsetsPartitionResponse {
    let mut response = ListOffsetsPartitionResponse::default();
    response.partition_index = partition_index;
    match resolved {
        ResolvedOffset::Offset(offset) => {
            response.error_code = ERROR_NONE;
            response.timestamp = DEFAULT_TIMESTAMP;
            response.offset = offset;
        }
        ResolvedOffset::Unavailable | ResolvedOffset::LeaderNotAvailable => {
            response.error_code = if resolved == ResolvedOffset::Unavailable {
                ERROR_UNKNOWN_SERVER_ERROR
            } else {
                ERROR_LEADER_NOT_AVAILABLE
            };
            response.timestamp = UNKNOWN_TIMESTAMP;
            response.offset = UNKNOWN_OFFSET;
        }
    }
    response
}

/// v0 request asking for more than one candidate offset
pub fn multiple_offsets_unsupported(partition_index: i32) -> ListOffsetsPartitionResponse {
    legacy_partition_response(partition_index, ResolvedOffset::Unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::backend::memory::MemoryLog;
    use crate::kafka::backend::MockLogHandle;
    use crate::kafka::error::KafkaError;
    use bytes::Bytes;

    fn log_with_times(times: &[i64]) -> MemoryLog {
        let log = MemoryLog::new(2);
        for t in times {
            log.push_at(Bytes::from_static(b"x"), *t);
        }
        log
    }

    #[tokio::test]
    async fn test_latest_on_empty_log_is_zero_in_segment() {
        let log = MemoryLog::new(2);
        assert_eq!(
            resolve(&log, LATEST_TIMESTAMP).await,
            ResolvedOffset::Offset(LogPosition::new(2, 0).to_offset())
        );
    }

    #[tokio::test]
    async fn test_earliest_on_empty_log_is_zero() {
        let log = MemoryLog::new(2);
        let resolved = resolve(&log, EARLIEST_TIMESTAMP).await;
        assert_eq!(resolved, ResolvedOffset::Offset(0));

        let legacy = legacy_partition_response(0, resolved);
        assert_eq!(legacy.error_code, ERROR_NONE);
        assert_eq!(legacy.old_style_offsets, vec![0]);
    }

    #[tokio::test]
    async fn test_latest_and_earliest() {
        let log = log_with_times(&[10, 20, 30]);
        assert_eq!(
            resolve(&log, LATEST_TIMESTAMP).await,
            ResolvedOffset::Offset(LogPosition::new(2, 2).to_offset())
        );
        assert_eq!(
            resolve(&log, EARLIEST_TIMESTAMP).await,
            ResolvedOffset::Offset(LogPosition::new(2, 0).to_offset())
        );
    }

    #[tokio::test]
    async fn test_explicit_timestamp_between_earliest_and_latest() {
        let log = log_with_times(&[10, 20, 30, 40]);
        let offset = |r: ResolvedOffset| match r {
            ResolvedOffset::Offset(o) => o,
            other => panic!("expected offset, got {:?}", other),
        };
        let earliest = offset(resolve(&log, EARLIEST_TIMESTAMP).await);
        let latest = offset(resolve(&log, LATEST_TIMESTAMP).await);
        for ts in [0, 10, 15, 25, 40] {
            let at = offset(resolve(&log, ts).await);
            assert!(earliest <= at && at <= latest, "ts {} gave {}", ts, at);
        }
        assert_eq!(
            offset(resolve(&log, 25).await),
            LogPosition::new(2, 2).to_offset()
        );
    }

    #[tokio::test]
    async fn test_timestamp_past_end_falls_back_to_earliest() {
        let log = log_with_times(&[10, 20]);
        log.truncate_before(1);
        assert_eq!(
            resolve(&log, 1_000).await,
            ResolvedOffset::Offset(LogPosition::new(2, 1).to_offset())
        );
    }

    #[tokio::test]
    async fn test_timestamp_on_empty_log_is_unavailable() {
        let log = MemoryLog::new(0);
        let resolved = resolve(&log, 1_000).await;
        assert_eq!(resolved, ResolvedOffset::Unavailable);

        let legacy = legacy_partition_response(3, resolved);
        assert_eq!(legacy.error_code, ERROR_UNKNOWN_SERVER_ERROR);
        assert!(legacy.old_style_offsets.is_empty());

        let current = current_partition_response(3, resolved);
        assert_eq!(current.error_code, ERROR_UNKNOWN_SERVER_ERROR);
        assert_eq!(current.offset, UNKNOWN_OFFSET);
        assert_eq!(current.timestamp, UNKNOWN_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_search_failure_is_server_error() {
        let mut log = MockLogHandle::new();
        log.expect_find_by_timestamp()
            .returning(|_| Err(KafkaError::Backend("cursor closed".into())));
        log.expect_first_valid_position().times(0);

        let resolved = resolve(&log, 99).await;
        assert_eq!(resolved, ResolvedOffset::Unavailable);

        let legacy = legacy_partition_response(0, resolved);
        assert_eq!(legacy.error_code, ERROR_UNKNOWN_SERVER_ERROR);
        assert!(legacy.old_style_offsets.is_empty());
        let current = current_partition_response(0, resolved);
        assert_eq!(current.error_code, ERROR_UNKNOWN_SERVER_ERROR);
        assert_eq!(current.offset, UNKNOWN_OFFSET);
        assert_eq!(current.timestamp, UNKNOWN_TIMESTAMP);
    }

    #[tokio::test]
    async fn test_search_miss_falls_back_to_earliest() {
        let mut log = MockLogHandle::new();
        log.expect_find_by_timestamp().returning(|_| Ok(None));
        log.expect_first_valid_position()
            .times(1)
            .returning(|| Ok(Some(LogPosition::new(0, 4))));
        assert_eq!(
            resolve(&log, 99).await,
            ResolvedOffset::Offset(LogPosition::new(0, 4).to_offset())
        );
    }

    #[test]
    fn test_current_encoding() {
        let response = current_partition_response(1, ResolvedOffset::Offset(8192));
        assert_eq!(response.partition_index, 1);
        assert_eq!(response.error_code, ERROR_NONE);
        assert_eq!(response.offset, 8192);
        assert_eq!(response.timestamp, DEFAULT_TIMESTAMP);
    }

    #[test]
    fn test_leader_not_available_encoding() {
        let legacy = legacy_partition_response(0, ResolvedOffset::LeaderNotAvailable);
        assert_eq!(legacy.error_code, ERROR_LEADER_NOT_AVAILABLE);
        let current = current_partition_response(0, ResolvedOffset::LeaderNotAvailable);
        assert_eq!(current.error_code, ERROR_LEADER_NOT_AVAILABLE);
    }

    #[test]
    fn test_multiple_offsets_is_server_error() {
        let response = multiple_offsets_unsupported(0);
        assert_eq!(response.error_code, ERROR_UNKNOWN_SERVER_ERROR);
        assert!(response.old_style_offsets.is_empty());
    }
}
