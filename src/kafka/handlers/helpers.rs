// Handler helper functions
//
// Topic existence checks and name conversions shared by the read-path and
// offset handlers.

use kafka_protocol::messages::{GroupId, TopicName};
use kafka_protocol::protocol::StrBytes;
use tracing::warn;

use crate::kafka::constants::{ERROR_NONE, ERROR_UNKNOWN_TOPIC_OR_PARTITION};
use crate::kafka::error::KafkaError;
use crate::kafka::handler_context::HandlerContext;

/// Result of looking a topic up through the admin plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicResolution {
    /// Topic exists with this many partitions
    Found(i32),
    NotFound,
    /// Admin lookup failed with this error code
    Error(i16),
}

impl TopicResolution {
    /// Whether `partition` is a valid index of a found topic
    pub fn has_partition(&self, partition: i32) -> bool {
        matches!(self, TopicResolution::Found(count) if partition >= 0 && partition < *count)
    }
}

pub async fn resolve_topic(ctx: &HandlerContext<'_>, topic: &str) -> TopicResolution {
    match ctx.partition_count(topic).await {
        Ok(count) => TopicResolution::Found(count),
        Err(KafkaError::TopicNotFound(_)) => TopicResolution::NotFound,
        Err(e) => {
            warn!(topic, error = %e, "failed to resolve topic");
            TopicResolution::Error(e.to_kafka_error_code())
        }
    }
}

/// Error code for a partition of a topic resolved as `resolution`
///
/// A found topic with an out-of-range partition is unknown-partition.
pub fn partition_error_code(resolution: &TopicResolution, partition: i32) -> i16 {
    match resolution {
        TopicResolution::Found(_) if resolution.has_partition(partition) => ERROR_NONE,
        TopicResolution::Found(_) | TopicResolution::NotFound => ERROR_UNKNOWN_TOPIC_OR_PARTITION,
        TopicResolution::Error(code) => *code,
    }
}

pub fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

pub fn group_id(name: &str) -> GroupId {
    GroupId(StrBytes::from_string(name.to_string()))
}

pub fn str_bytes(value: &str) -> StrBytes {
    StrBytes::from_string(value.to_string())
}
