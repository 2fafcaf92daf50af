// Produce handler
//
// Handles ProduceRequest - appending record batches to partition logs.
// Every partition is written concurrently and fails on its own; the batch as
// a whole never fails. Ordering between batches is the produce queue's job.

use futures::future::join_all;
use kafka_protocol::messages::produce_response::{
    PartitionProduceResponse, ProduceResponse, TopicProduceResponse,
};
use tracing::{debug, warn};

use super::helpers::topic_name;
use crate::kafka::backend::AppendBatch;
use crate::kafka::constants::{ERROR_CORRUPT_MESSAGE, ERROR_NONE};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::messages::{PartitionProduceData, TopicProduceData};
use crate::kafka::protocol::recordbatch;

/// Handle Produce request
///
/// Returns each partition's base offset, or its own error code:
/// - log cannot be attached → LEADER_NOT_AVAILABLE
/// - batch header unreadable → CORRUPT_MESSAGE
/// - append failed → KAFKA_STORAGE_ERROR
pub async fn handle_produce(
    ctx: &HandlerContext<'_>,
    topic_data: Vec<TopicProduceData>,
) -> ProduceResponse {
    let topics = topic_data.into_iter().map(|topic| async move {
        let writes = topic
            .partitions
            .iter()
            .map(|partition| produce_partition(ctx, &topic.name, partition));
        let partition_responses = join_all(writes).await;

        let mut topic_response = TopicProduceResponse::default();
        topic_response.name = topic_name(&topic.name);
        topic_response.partition_responses = partition_responses;
        topic_response
    });

    let mut response = ProduceResponse::default();
    response.throttle_time_ms = 0;
    response.responses = join_all(topics).await;
    response
}

async fn produce_partition(
    ctx: &HandlerContext<'_>,
    topic: &str,
    partition: &PartitionProduceData,
) -> PartitionProduceResponse {
    let mut partition_response = PartitionProduceResponse::default();
    partition_response.index = partition.partition_index;
    partition_response.log_append_time_ms = -1;
    partition_response.log_start_offset = -1;

    match append(ctx, topic, partition).await {
        Ok(base_offset) => {
            partition_response.error_code = ERROR_NONE;
            partition_response.base_offset = base_offset;
        }
        Err(e) => {
            let code = e.to_kafka_error_code();
            if code != ERROR_CORRUPT_MESSAGE {
                warn!(topic, partition = partition.partition_index, error = %e, "produce failed");
            } else {
                debug!(topic, partition = partition.partition_index, error = %e, "rejected batch");
            }
            partition_response.error_code = code;
            partition_response.base_offset = -1;
        }
    }
    partition_response
}

async fn append(ctx: &HandlerContext<'_>, topic: &str, partition: &PartitionProduceData) -> Result<i64> {
    let payload = partition
        .records
        .clone()
        .ok_or_else(|| KafkaError::CorruptBatch("null record set".to_string()))?;
    let summary = recordbatch::summarize(&payload)?;

    let log = ctx.log_for(topic, partition.partition_index).await?;
    let position = log
        .append(AppendBatch {
            payload,
            record_count: summary.record_count,
            max_timestamp: summary.max_timestamp,
        })
        .await
        .map_err(|e| match e {
            KafkaError::Storage(_) => e,
            other => KafkaError::Storage(other.to_string()),
        })?;

    debug!(
        topic,
        partition = partition.partition_index,
        records = summary.record_count,
        segment = position.segment_id,
        entry = position.entry_id,
        "appended batch"
    );
    Ok(position.to_offset())
}
