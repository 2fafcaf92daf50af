// Consumer offset handlers
//
// Handlers for OffsetCommit and OffsetFetch requests.
// The coordinator's offset store is the system of record; after a commit
// succeeds the offsets are forwarded to the backend as cumulative acks in a
// background task, so the response does not wait on the backend.

use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponse, OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponse, OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use tracing::{debug, warn};

use super::helpers::{str_bytes, topic_name};
use crate::kafka::constants::ERROR_NONE;
use crate::kafka::coordinator::CommittedOffset;
use crate::kafka::error::Result;
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::messages::{OffsetCommitTopicData, OffsetFetchTopicData};

/// Handle OffsetCommit request
///
/// Partitions of topics that do not exist are accepted like any other.
/// Backend acknowledgment happens after the response is built.
pub fn handle_offset_commit(
    ctx: &HandlerContext<'_>,
    group_id: &str,
    generation_id: i32,
    member_id: &str,
    topics: &[OffsetCommitTopicData],
) -> Result<OffsetCommitResponse> {
    let offsets: Vec<((String, i32), CommittedOffset)> = topics
        .iter()
        .flat_map(|topic| {
            topic.partitions.iter().map(move |p| {
                (
                    (topic.name.clone(), p.partition_index),
                    CommittedOffset {
                        offset: p.committed_offset,
                        metadata: p.metadata.clone(),
                    },
                )
            })
        })
        .collect();

    let error_code = match ctx
        .gateway
        .coordinator
        .commit_offsets(group_id, member_id, generation_id, offsets)
    {
        Ok(()) => ERROR_NONE,
        Err(e) => {
            debug!(group = group_id, member = member_id, error = %e, "offset commit rejected");
            e.to_kafka_error_code()
        }
    };

    if error_code == ERROR_NONE {
        let acks: Vec<(String, i64)> = topics
            .iter()
            .flat_map(|topic| {
                topic.partitions.iter().map(move |p| {
                    (
                        ctx.resource_for(&topic.name, p.partition_index),
                        p.committed_offset,
                    )
                })
            })
            .collect();
        ctx.gateway.acker.spawn_acknowledge(group_id, acks);
    }

    let mut response = OffsetCommitResponse::default();
    response.throttle_time_ms = 0;
    response.topics = topics
        .iter()
        .map(|topic| {
            let mut topic_response = OffsetCommitResponseTopic::default();
            topic_response.name = topic_name(&topic.name);
            topic_response.partitions = topic
                .partitions
                .iter()
                .map(|p| {
                    let mut partition = OffsetCommitResponsePartition::default();
                    partition.partition_index = p.partition_index;
                    partition.error_code = error_code;
                    partition
                })
                .collect();
            topic_response
        })
        .collect();
    Ok(response)
}

/// Handle OffsetFetch request
///
/// `None` fetches every committed partition. Partitions without a committed
/// offset report -1.
pub fn handle_offset_fetch(
    ctx: &HandlerContext<'_>,
    group_id: &str,
    topics: Option<&[OffsetFetchTopicData]>,
) -> Result<OffsetFetchResponse> {
    let requested: Option<Vec<(String, Vec<i32>)>> = topics.map(|topics| {
        topics
            .iter()
            .map(|t| (t.name.clone(), t.partition_indexes.clone()))
            .collect()
    });
    let fetched = ctx
        .gateway
        .coordinator
        .fetch_offsets(group_id, requested.as_deref());

    // Keep topics in first-seen order
    let mut topic_responses: Vec<OffsetFetchResponseTopic> = Vec::new();
    for ((topic, partition_index), committed) in fetched {
        let mut partition = OffsetFetchResponsePartition::default();
        partition.partition_index = partition_index;
        partition.error_code = ERROR_NONE;
        partition.committed_leader_epoch = -1;
        match committed {
            Some(committed) => {
                partition.committed_offset = committed.offset;
                partition.metadata = committed.metadata.as_deref().map(str_bytes);
            }
            None => {
                partition.committed_offset = -1;
                partition.metadata = None;
            }
        }

        match topic_responses
            .iter_mut()
            .find(|t| t.name.0.as_str() == topic.as_str())
        {
            Some(existing) => existing.partitions.push(partition),
            None => {
                let mut topic_response = OffsetFetchResponseTopic::default();
                topic_response.name = topic_name(&topic);
                topic_response.partitions.push(partition);
                topic_responses.push(topic_response);
            }
        }
    }

    if topic_responses.is_empty() && topics.is_none() {
        warn!(group = group_id, "offset fetch for group with no committed offsets");
    }

    let mut response = OffsetFetchResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.topics = topic_responses;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::kafka::backend::{LogPosition, PassiveReader, ReaderFactory};
    use crate::kafka::constants::ERROR_ILLEGAL_GENERATION;
    use crate::kafka::context::GatewayContext;
    use crate::kafka::handler_context::HandlerContext;
    use crate::kafka::messages::OffsetCommitPartitionData;
    use crate::testing::helpers::{wait_until, TestGateway, TEST_LISTENERS};

    /// Reader creation that never finishes
    #[derive(Default)]
    struct StalledReaderFactory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReaderFactory for StalledReaderFactory {
        async fn create_reader(
            &self,
            _resource: &str,
            _role_prefix: &str,
        ) -> Result<Arc<dyn PassiveReader>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    fn commit(topic: &str, partition: i32, offset: i64) -> Vec<OffsetCommitTopicData> {
        vec![OffsetCommitTopicData {
            name: topic.to_string(),
            partitions: vec![OffsetCommitPartitionData {
                partition_index: partition,
                committed_offset: offset,
                metadata: Some("meta".to_string()),
            }],
        }]
    }

    #[tokio::test]
    async fn test_commit_then_fetch() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let offset = LogPosition::new(0, 3).to_offset();

        let response =
            handle_offset_commit(&ctx, "g1", -1, "", &commit("orders", 0, offset)).unwrap();
        assert_eq!(response.topics[0].partitions[0].error_code, ERROR_NONE);

        let request = vec![OffsetFetchTopicData {
            name: "orders".to_string(),
            partition_indexes: vec![0, 1],
        }];
        let fetched = handle_offset_fetch(&ctx, "g1", Some(request.as_slice())).unwrap();
        let partitions = &fetched.topics[0].partitions;
        assert_eq!(partitions[0].committed_offset, offset);
        assert_eq!(partitions[0].metadata.as_ref().map(|m| m.as_str()), Some("meta"));
        assert_eq!(partitions[1].committed_offset, -1);
    }

    #[tokio::test]
    async fn test_commit_acknowledges_on_backend() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let offset = LogPosition::new(0, 5).to_offset();
        handle_offset_commit(&ctx, "g1", -1, "", &commit("orders", 2, offset)).unwrap();

        let resource = ctx.resource_for("orders", 2);
        wait_until(|| {
            gw.backend
                .readers
                .readers_for(&resource)
                .first()
                .is_some_and(|r| r.acknowledged().is_some())
        })
        .await;
        let readers = gw.backend.readers.readers_for(&resource);
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].role_prefix, "g1");
        assert_eq!(readers[0].acknowledged(), Some(LogPosition::new(0, 5)));
    }

    #[tokio::test]
    async fn test_rejected_commit_is_not_acknowledged() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let joined = gw.join("g1");

        let response = handle_offset_commit(
            &ctx,
            "g1",
            joined.generation_id + 5,
            &joined.member_id,
            &commit("orders", 0, 4096),
        )
        .unwrap();
        assert_eq!(
            response.topics[0].partitions[0].error_code,
            ERROR_ILLEGAL_GENERATION
        );
        assert_eq!(gw.backend.readers.created_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_all_offsets() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        handle_offset_commit(&ctx, "g1", -1, "", &commit("a", 0, 1)).unwrap();
        handle_offset_commit(&ctx, "g1", -1, "", &commit("b", 1, 2)).unwrap();

        let fetched = handle_offset_fetch(&ctx, "g1", None).unwrap();
        let names: Vec<&str> = fetched.topics.iter().map(|t| t.name.0.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_commit_answers_while_backend_reader_stalls() {
        let gw = TestGateway::new();
        let factory = Arc::new(StalledReaderFactory::default());
        let mut collaborators = gw.backend.collaborators();
        collaborators.reader_factory = factory.clone();
        let config = GatewayConfig {
            listeners: TEST_LISTENERS.to_string(),
            ..GatewayConfig::default()
        };
        let gateway = GatewayContext::new(config, collaborators);
        let ctx = HandlerContext::new(&gateway, &gw.namespace, &gw.client_host);

        let response =
            handle_offset_commit(&ctx, "g1", -1, "", &commit("orders", 0, 4096)).unwrap();
        assert_eq!(response.topics[0].partitions[0].error_code, ERROR_NONE);

        // The stored offset is visible even though the backend ack never lands
        let fetched = handle_offset_fetch(&ctx, "g1", None).unwrap();
        assert_eq!(fetched.topics[0].partitions[0].committed_offset, 4096);
        wait_until(|| factory.calls.load(Ordering::SeqCst) == 1).await;
    }
}
