// Fetch handlers
//
// Handlers for Fetch and ListOffsets requests.
// Stored entries are whole record batches; a fetch returns them back to back
// with each batch's base offset rewritten to the offset of its entry.

use std::time::Duration;

use bytes::BytesMut;
use futures::future::join_all;
use kafka_protocol::messages::fetch_response::{FetchResponse, FetchableTopicResponse, PartitionData};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsResponse, ListOffsetsTopicResponse,
};
use tracing::{debug, warn};

use super::helpers::{partition_error_code, resolve_topic, topic_name, TopicResolution};
use crate::kafka::backend::{LogHandle, LogPosition};
use crate::kafka::constants::{
    ERROR_LEADER_NOT_AVAILABLE, ERROR_NONE, ERROR_UNKNOWN_SERVER_ERROR,
    LIST_OFFSETS_PAIR_MIN_VERSION, MAX_FETCH_WAIT_MS,
};
use crate::kafka::error::Result;
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::messages::{ListOffsetsTopicData, PartitionFetchData, TopicFetchData};
use crate::kafka::protocol::recordbatch::rewrite_base_offset;
use crate::kafka::response_builders::build_fetch_partition_error;
use crate::kafka::timestamp_resolver::{
    current_partition_response, legacy_partition_response, multiple_offsets_unsupported, resolve,
    ResolvedOffset,
};

/// Handle Fetch request
///
/// When nothing at all is available the request waits once, up to
/// `max_wait_ms` (capped), and reads again.
pub async fn handle_fetch(
    ctx: &HandlerContext<'_>,
    max_wait_ms: i32,
    topic_data: &[TopicFetchData],
) -> Result<FetchResponse> {
    let mut response = fetch_once(ctx, topic_data).await;

    let wait = max_wait_ms.clamp(0, MAX_FETCH_WAIT_MS);
    if wait > 0 && returned_bytes(&response) == 0 && !has_errors(&response) {
        debug!(wait_ms = wait, "no data available, waiting before retry");
        tokio::time::sleep(Duration::from_millis(wait as u64)).await;
        response = fetch_once(ctx, topic_data).await;
    }
    Ok(response)
}

async fn fetch_once(ctx: &HandlerContext<'_>, topic_data: &[TopicFetchData]) -> FetchResponse {
    let topics = topic_data.iter().map(|topic| async move {
        let resolution = resolve_topic(ctx, &topic.name).await;
        let partitions = topic
            .partitions
            .iter()
            .map(|partition| fetch_partition(ctx, &topic.name, resolution, partition));

        let mut topic_response = FetchableTopicResponse::default();
        topic_response.topic = topic_name(&topic.name);
        topic_response.partitions = join_all(partitions).await;
        topic_response
    });

    let mut response = FetchResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.session_id = 0;
    response.responses = join_all(topics).await;
    response
}

async fn fetch_partition(
    ctx: &HandlerContext<'_>,
    topic: &str,
    resolution: TopicResolution,
    partition: &PartitionFetchData,
) -> PartitionData {
    let index = partition.partition_index;
    let code = partition_error_code(&resolution, index);
    if code != ERROR_NONE {
        return build_fetch_partition_error(index, code);
    }

    let log = match ctx.log_for(topic, index).await {
        Ok(log) => log,
        Err(e) => {
            debug!(topic, partition = index, error = %e, "fetch from unattached partition");
            return build_fetch_partition_error(index, ERROR_LEADER_NOT_AVAILABLE);
        }
    };

    match read_partition(log.as_ref(), partition).await {
        Ok(data) => data,
        Err(code) => {
            warn!(topic, partition = index, code, "fetch read failed");
            build_fetch_partition_error(index, code)
        }
    }
}

async fn read_partition(
    log: &dyn LogHandle,
    partition: &PartitionFetchData,
) -> std::result::Result<PartitionData, i16> {
    let last = log
        .last_confirmed_position()
        .await
        .map_err(|e| e.to_kafka_error_code())?;
    let high_watermark = if last.entry_id < 0 {
        LogPosition::new(last.segment_id, 0).to_offset()
    } else {
        last.next().to_offset()
    };
    let log_start_offset = log
        .first_valid_position()
        .await
        .map_err(|e| e.to_kafka_error_code())?
        .map(|p| p.to_offset())
        .unwrap_or(0);

    let mut records = BytesMut::new();
    if partition.fetch_offset < high_watermark {
        let from = LogPosition::from_offset(partition.fetch_offset.max(0));
        let entries = log
            .read(from, partition.partition_max_bytes.max(0) as usize)
            .await
            .map_err(|e| e.to_kafka_error_code())?;
        for entry in entries {
            records.extend_from_slice(&rewrite_base_offset(
                &entry.payload,
                entry.position.to_offset(),
            ));
        }
    }

    let mut data = PartitionData::default();
    data.partition_index = partition.partition_index;
    data.error_code = ERROR_NONE;
    data.high_watermark = high_watermark;
    data.last_stable_offset = high_watermark;
    data.log_start_offset = log_start_offset;
    // Empty bytes rather than None avoids "invalid MessageSetSize -1" on flexible versions
    data.records = Some(records.freeze());
    Ok(data)
}

fn returned_bytes(response: &FetchResponse) -> usize {
    response
        .responses
        .iter()
        .flat_map(|t| t.partitions.iter())
        .map(|p| p.records.as_ref().map(|r| r.len()).unwrap_or(0))
        .sum()
}

fn has_errors(response: &FetchResponse) -> bool {
    response
        .responses
        .iter()
        .flat_map(|t| t.partitions.iter())
        .any(|p| p.error_code != ERROR_NONE)
}

/// Handle ListOffsets request
///
/// v0 answers with a singleton offset list, v1+ with a (timestamp, offset)
/// pair. Both come from the same resolution.
pub async fn handle_list_offsets(
    ctx: &HandlerContext<'_>,
    api_version: i16,
    topics: &[ListOffsetsTopicData],
) -> Result<ListOffsetsResponse> {
    let legacy = api_version < LIST_OFFSETS_PAIR_MIN_VERSION;

    let topic_responses = topics.iter().map(|topic| async move {
        let resolution = resolve_topic(ctx, &topic.name).await;
        let partitions = topic.partitions.iter().map(|partition| {
            let resolution = resolution;
            async move {
                let index = partition.partition_index;
                if legacy && partition.max_num_offsets > 1 {
                    debug!(
                        topic = %topic.name,
                        partition = index,
                        max_num_offsets = partition.max_num_offsets,
                        "multiple candidate offsets requested"
                    );
                    return multiple_offsets_unsupported(index);
                }

                let code = partition_error_code(&resolution, index);
                if code != ERROR_NONE {
                    return error_partition(index, code, legacy);
                }

                let resolved = match ctx.log_for(&topic.name, index).await {
                    Ok(log) => resolve(log.as_ref(), partition.timestamp).await,
                    Err(_) => ResolvedOffset::LeaderNotAvailable,
                };
                if legacy {
                    legacy_partition_response(index, resolved)
                } else {
                    current_partition_response(index, resolved)
                }
            }
        });

        let mut topic_response = ListOffsetsTopicResponse::default();
        topic_response.name = topic_name(&topic.name);
        topic_response.partitions = join_all(partitions).await;
        topic_response
    });

    let mut response = ListOffsetsResponse::default();
    response.throttle_time_ms = 0;
    response.topics = join_all(topic_responses).await;
    Ok(response)
}

/// A partition answered with `code` in the encoding the version expects
fn error_partition(index: i32, code: i16, legacy: bool) -> ListOffsetsPartitionResponse {
    let mut response = if legacy {
        legacy_partition_response(index, ResolvedOffset::Unavailable)
    } else {
        current_partition_response(index, ResolvedOffset::Unavailable)
    };
    if code != ERROR_UNKNOWN_SERVER_ERROR {
        response.error_code = code;
    }
    response
}
