// Response builder utilities for kafka-protocol types
//
// This module provides helper functions to construct kafka-protocol response types:
// the static ApiVersions table, metadata pieces, and typed error responses that
// carry the error code in the place each API expects it.

use kafka_protocol::messages::api_versions_response::{ApiVersion, ApiVersionsResponse};
use kafka_protocol::messages::delete_groups_response::{DeletableGroupResult, DeleteGroupsResponse};
use kafka_protocol::messages::describe_groups_response::{DescribeGroupsResponse, DescribedGroup};
use kafka_protocol::messages::fetch_response::{FetchResponse, FetchableTopicResponse, PartitionData};
use kafka_protocol::messages::find_coordinator_response::FindCoordinatorResponse;
use kafka_protocol::messages::heartbeat_response::HeartbeatResponse;
use kafka_protocol::messages::join_group_response::JoinGroupResponse;
use kafka_protocol::messages::leave_group_response::LeaveGroupResponse;
use kafka_protocol::messages::list_groups_response::ListGroupsResponse;
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::metadata_response::{
    MetadataResponse, MetadataResponseBroker, MetadataResponsePartition, MetadataResponseTopic,
};
use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponse, OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponse, OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use kafka_protocol::messages::produce_response::{
    PartitionProduceResponse, ProduceResponse, TopicProduceResponse,
};
use kafka_protocol::messages::sasl_authenticate_response::SaslAuthenticateResponse;
use kafka_protocol::messages::sasl_handshake_response::SaslHandshakeResponse;
use kafka_protocol::messages::sync_group_response::SyncGroupResponse;
use kafka_protocol::messages::{BrokerId, GroupId, TopicName};
use kafka_protocol::protocol::StrBytes;

use super::broker_metadata::NodeDescriptor;
use super::constants::*;
use super::messages::{KafkaRequest, KafkaResponse, RequestHeader};

/// Supported version range per API: (api_key, min_version, max_version)
///
/// Produce starts at v3 so the legacy MessageSet encoding is never negotiated.
/// Fetch starts at v4 for the same reason. ListOffsets keeps v0 for old clients
/// that still ask for the singleton offset list.
pub const SUPPORTED_API_VERSIONS: &[(i16, i16, i16)] = &[
    (API_KEY_PRODUCE, 3, 9),
    (API_KEY_FETCH, 4, 11),
    (API_KEY_LIST_OFFSETS, 0, 5),
    (API_KEY_METADATA, 0, 9),
    (API_KEY_OFFSET_COMMIT, 0, 8),
    (API_KEY_OFFSET_FETCH, 0, 7),
    (API_KEY_FIND_COORDINATOR, 0, 3),
    (API_KEY_JOIN_GROUP, 0, 7),
    (API_KEY_HEARTBEAT, 0, 4),
    (API_KEY_LEAVE_GROUP, 0, 4),
    (API_KEY_SYNC_GROUP, 0, 4),
    (API_KEY_DESCRIBE_GROUPS, 0, 5),
    (API_KEY_LIST_GROUPS, 0, 4),
    (API_KEY_SASL_HANDSHAKE, 0, 1),
    (API_KEY_API_VERSIONS, 0, 3),
    (API_KEY_SASL_AUTHENTICATE, 0, 2),
    (API_KEY_DELETE_GROUPS, 0, 2),
];

/// Build an ApiVersionsResponse with the API versions we support
pub fn build_api_versions_response() -> ApiVersionsResponse {
    let mut response = ApiVersionsResponse::default();
    response.error_code = ERROR_NONE;
    response.throttle_time_ms = 0;

    for (api_key, min_version, max_version) in SUPPORTED_API_VERSIONS {
        let mut version = ApiVersion::default();
        version.api_key = *api_key;
        version.min_version = *min_version;
        version.max_version = *max_version;
        response.api_keys.push(version);
    }

    response
}

/// Build a MetadataResponseBroker from a node descriptor
pub fn build_broker_metadata(node: &NodeDescriptor) -> MetadataResponseBroker {
    let mut broker = MetadataResponseBroker::default();
    broker.node_id = BrokerId(node.node_id);
    broker.host = StrBytes::from_string(node.host.to_string());
    broker.port = node.port;
    broker.rack = None;
    broker
}

/// Build a MetadataResponseTopic with partitions
pub fn build_topic_metadata(
    topic_name: String,
    error_code: i16,
    partitions: Vec<MetadataResponsePartition>,
) -> MetadataResponseTopic {
    let mut topic = MetadataResponseTopic::default();
    topic.error_code = error_code;
    topic.name = Some(TopicName(StrBytes::from_string(topic_name)));
    topic.is_internal = false;
    topic.partitions = partitions;
    topic
}

/// Build a MetadataResponsePartition led by `leader`, which is also the only replica
pub fn build_partition_metadata(
    partition_index: i32,
    leader: &NodeDescriptor,
) -> MetadataResponsePartition {
    let mut partition = MetadataResponsePartition::default();
    partition.error_code = ERROR_NONE;
    partition.partition_index = partition_index;
    partition.leader_id = BrokerId(leader.node_id);
    partition.replica_nodes = vec![BrokerId(leader.node_id)];
    partition.isr_nodes = vec![BrokerId(leader.node_id)];
    partition
}

/// Build a MetadataResponsePartition for a partition whose leader could not be resolved
pub fn build_failed_partition_metadata(
    partition_index: i32,
    error_code: i16,
) -> MetadataResponsePartition {
    let mut partition = MetadataResponsePartition::default();
    partition.error_code = error_code;
    partition.partition_index = partition_index;
    partition.leader_id = BrokerId(-1);
    partition
}

/// Build a MetadataResponse advertising only `self_node` and no topics
pub fn build_self_only_metadata(cluster_name: &str, self_node: &NodeDescriptor) -> MetadataResponse {
    let mut response = MetadataResponse::default();
    response.throttle_time_ms = 0;
    response.cluster_id = Some(StrBytes::from_string(cluster_name.to_string()));
    response.controller_id = BrokerId(self_node.node_id);
    response.brokers = vec![build_broker_metadata(self_node)];
    response
}

fn topic_name(name: &str) -> TopicName {
    TopicName(StrBytes::from_string(name.to_string()))
}

fn group_id(name: &str) -> GroupId {
    GroupId(StrBytes::from_string(name.to_string()))
}

/// Build the error response matching `header.api_key`.
///
/// When the decoded request is available, per-topic/partition/group entries are
/// echoed back with `error_code` so the client sees the shape it asked for.
/// Without the request (or for an API with no typed response here) the body is
/// empty apart from any top-level error field.
pub fn build_error_response(
    header: &RequestHeader,
    request: Option<&KafkaRequest>,
    error_code: i16,
    error_message: Option<String>,
) -> KafkaResponse {
    let correlation_id = header.correlation_id;
    let api_version = header.api_version;

    match header.api_key {
        API_KEY_API_VERSIONS => {
            let mut response = ApiVersionsResponse::default();
            response.error_code = error_code;
            KafkaResponse::ApiVersions {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_METADATA => {
            let mut response = MetadataResponse::default();
            response.controller_id = BrokerId(-1);
            if let Some(KafkaRequest::Metadata {
                topics: Some(topics),
            }) = request
            {
                response.topics = topics
                    .iter()
                    .map(|name| build_topic_metadata(name.clone(), error_code, Vec::new()))
                    .collect();
            }
            KafkaResponse::Metadata {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_PRODUCE => {
            let mut response = ProduceResponse::default();
            if let Some(KafkaRequest::Produce { topic_data, .. }) = request {
                response.responses = topic_data
                    .iter()
                    .map(|topic| {
                        let mut topic_response = TopicProduceResponse::default();
                        topic_response.name = topic_name(&topic.name);
                        topic_response.partition_responses = topic
                            .partitions
                            .iter()
                            .map(|p| {
                                let mut partition = PartitionProduceResponse::default();
                                partition.index = p.partition_index;
                                partition.error_code = error_code;
                                partition.base_offset = -1;
                                partition.log_append_time_ms = -1;
                                partition.log_start_offset = -1;
                                partition.error_message =
                                    error_message.clone().map(StrBytes::from_string);
                                partition
                            })
                            .collect();
                        topic_response
                    })
                    .collect();
            }
            KafkaResponse::Produce {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_FETCH => {
            let mut response = FetchResponse::default();
            response.error_code = error_code;
            if let Some(KafkaRequest::Fetch { topic_data, .. }) = request {
                response.responses = topic_data
                    .iter()
                    .map(|topic| {
                        let mut topic_response = FetchableTopicResponse::default();
                        topic_response.topic = topic_name(&topic.name);
                        topic_response.partitions = topic
                            .partitions
                            .iter()
                            .map(|p| build_fetch_partition_error(p.partition_index, error_code))
                            .collect();
                        topic_response
                    })
                    .collect();
            }
            KafkaResponse::Fetch {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_LIST_OFFSETS => {
            let mut response = ListOffsetsResponse::default();
            if let Some(KafkaRequest::ListOffsets { topics, .. }) = request {
                response.topics = topics
                    .iter()
                    .map(|topic| {
                        let mut topic_response = ListOffsetsTopicResponse::default();
                        topic_response.name = topic_name(&topic.name);
                        topic_response.partitions = topic
                            .partitions
                            .iter()
                            .map(|p| {
                                let mut partition = ListOffsetsPartitionResponse::default();
                                partition.partition_index = p.partition_index;
                                partition.error_code = error_code;
                                partition.timestamp = UNKNOWN_TIMESTAMP;
                                partition.offset = UNKNOWN_OFFSET;
                                partition
                            })
                            .collect();
                        topic_response
                    })
                    .collect();
            }
            KafkaResponse::ListOffsets {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_OFFSET_COMMIT => {
            let mut response = OffsetCommitResponse::default();
            if let Some(KafkaRequest::OffsetCommit { topics, .. }) = request {
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
            }
            KafkaResponse::OffsetCommit {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_OFFSET_FETCH => {
            let mut response = OffsetFetchResponse::default();
            response.error_code = error_code;
            if let Some(KafkaRequest::OffsetFetch {
                topics: Some(topics),
                ..
            }) = request
            {
                response.topics = topics
                    .iter()
                    .map(|topic| {
                        let mut topic_response = OffsetFetchResponseTopic::default();
                        topic_response.name = topic_name(&topic.name);
                        topic_response.partitions = topic
                            .partition_indexes
                            .iter()
                            .map(|index| {
                                let mut partition = OffsetFetchResponsePartition::default();
                                partition.partition_index = *index;
                                partition.committed_offset = -1;
                                partition.error_code = error_code;
                                partition
                            })
                            .collect();
                        topic_response
                    })
                    .collect();
            }
            KafkaResponse::OffsetFetch {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_FIND_COORDINATOR => KafkaResponse::FindCoordinator {
            correlation_id,
            api_version,
            response: build_find_coordinator_error_response(error_code, error_message),
        },
        API_KEY_JOIN_GROUP => {
            let mut response = JoinGroupResponse::default();
            response.error_code = error_code;
            response.generation_id = -1;
            KafkaResponse::JoinGroup {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_SYNC_GROUP => {
            let mut response = SyncGroupResponse::default();
            response.error_code = error_code;
            KafkaResponse::SyncGroup {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_HEARTBEAT => {
            let mut response = HeartbeatResponse::default();
            response.error_code = error_code;
            KafkaResponse::Heartbeat {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_LEAVE_GROUP => {
            let mut response = LeaveGroupResponse::default();
            response.error_code = error_code;
            KafkaResponse::LeaveGroup {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_DESCRIBE_GROUPS => {
            let mut response = DescribeGroupsResponse::default();
            if let Some(KafkaRequest::DescribeGroups { groups }) = request {
                response.groups = groups
                    .iter()
                    .map(|name| {
                        let mut group = DescribedGroup::default();
                        group.group_id = group_id(name);
                        group.error_code = error_code;
                        group
                    })
                    .collect();
            }
            KafkaResponse::DescribeGroups {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_LIST_GROUPS => {
            let mut response = ListGroupsResponse::default();
            response.error_code = error_code;
            KafkaResponse::ListGroups {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_DELETE_GROUPS => {
            let mut response = DeleteGroupsResponse::default();
            if let Some(KafkaRequest::DeleteGroups { groups }) = request {
                response.results = groups
                    .iter()
                    .map(|name| {
                        let mut result = DeletableGroupResult::default();
                        result.group_id = group_id(name);
                        result.error_code = error_code;
                        result
                    })
                    .collect();
            }
            KafkaResponse::DeleteGroups {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_SASL_HANDSHAKE => {
            let mut response = SaslHandshakeResponse::default();
            response.error_code = error_code;
            KafkaResponse::SaslHandshake {
                correlation_id,
                api_version,
                response,
            }
        }
        API_KEY_SASL_AUTHENTICATE => {
            let mut response = SaslAuthenticateResponse::default();
            response.error_code = error_code;
            response.error_message = error_message.map(StrBytes::from_string);
            KafkaResponse::SaslAuthenticate {
                correlation_id,
                api_version,
                response,
            }
        }
        _ => KafkaResponse::Error {
            correlation_id,
            error_code,
            error_message,
        },
    }
}

/// Build a FetchResponse partition entry carrying only an error
pub fn build_fetch_partition_error(partition_index: i32, error_code: i16) -> PartitionData {
    let mut partition = PartitionData::default();
    partition.partition_index = partition_index;
    partition.error_code = error_code;
    partition.high_watermark = -1;
    partition.last_stable_offset = -1;
    partition.log_start_offset = -1;
    // Empty bytes rather than None avoids "invalid MessageSetSize -1" on flexible versions
    partition.records = Some(bytes::Bytes::new());
    partition
}

/// Build a FindCoordinatorResponse with an error code and no node
pub fn build_find_coordinator_error_response(
    error_code: i16,
    error_message: Option<String>,
) -> FindCoordinatorResponse {
    let mut response = FindCoordinatorResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = error_code;
    response.error_message = error_message.map(StrBytes::from_string);
    response.node_id = BrokerId(-1);
    response.host = StrBytes::from_static_str("");
    response.port = -1;
    response
}
