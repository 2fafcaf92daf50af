// Request/response types exchanged between the listener and the session
//
// The listener decodes a frame into a `RequestHeader` plus a typed `KafkaRequest`
// and pairs it with a `ResponseHandle`. The session completes that handle exactly
// once; the listener writes completed responses back in receipt order.
//
// Response variants wrap the kafka-protocol response structs directly so the
// encoder only has to pick the header version.

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::warn;

use super::constants::{CHANNEL_CLOSING_MESSAGE, ERROR_LEADER_NOT_AVAILABLE};
use super::response_builders::build_error_response;

/// Header fields shared by every request, echoed back on the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// API key identifying the operation
    pub api_key: i16,
    /// API version used by the client (drives response encoding)
    pub api_version: i16,
    /// Correlation ID from client - MUST be echoed back in response
    pub correlation_id: i32,
    /// Optional client identifier string
    pub client_id: Option<String>,
}

/// Kafka request bodies, already decoded from the wire
#[derive(Debug, Clone)]
pub enum KafkaRequest {
    /// ApiVersions request - asks which API versions the broker supports
    ApiVersions,
    /// Metadata request - asks for topic and broker metadata
    Metadata {
        /// Topics to describe (None or empty = all topics in the namespace)
        topics: Option<Vec<String>>,
    },
    /// Produce request - write record batches to topic partitions
    Produce {
        /// Set by transactional producers; always rejected
        transactional_id: Option<String>,
        /// Acknowledgment level (0=none, 1=leader, -1=all ISR)
        acks: i16,
        /// Timeout for waiting for acknowledgments (milliseconds)
        timeout_ms: i32,
        /// Topic data (topic → partitions → record batch bytes)
        topic_data: Vec<TopicProduceData>,
    },
    /// Fetch request - read record batches from topic partitions
    Fetch {
        max_wait_ms: i32,
        min_bytes: i32,
        max_bytes: i32,
        topic_data: Vec<TopicFetchData>,
    },
    /// ListOffsets request - resolve earliest/latest/at-time offsets
    ListOffsets {
        /// Broker id of the follower, -1 for consumers
        replica_id: i32,
        topics: Vec<ListOffsetsTopicData>,
    },
    /// OffsetCommit request - commit consumed offsets for a consumer group
    OffsetCommit {
        group_id: String,
        generation_id: i32,
        member_id: String,
        topics: Vec<OffsetCommitTopicData>,
    },
    /// OffsetFetch request - fetch committed offsets for a consumer group
    OffsetFetch {
        group_id: String,
        /// Topics to fetch offsets for (None = all topics)
        topics: Option<Vec<OffsetFetchTopicData>>,
    },
    /// FindCoordinator request - discover the coordinator for a consumer group
    FindCoordinator {
        key: String,
        /// 0 = group, 1 = transaction
        key_type: i8,
    },
    /// JoinGroup request - join a consumer group
    JoinGroup {
        group_id: String,
        /// Empty for the first join
        member_id: String,
        session_timeout_ms: i32,
        rebalance_timeout_ms: i32,
        protocol_type: String,
        protocols: Vec<JoinGroupProtocol>,
        group_instance_id: Option<String>,
    },
    /// SyncGroup request - leader distributes assignments, followers collect theirs
    SyncGroup {
        group_id: String,
        generation_id: i32,
        member_id: String,
        group_instance_id: Option<String>,
        assignments: Vec<SyncGroupAssignment>,
    },
    /// Heartbeat request - keep group membership alive
    Heartbeat {
        group_id: String,
        generation_id: i32,
        member_id: String,
    },
    /// LeaveGroup request - leave a consumer group gracefully
    LeaveGroup {
        group_id: String,
        /// v0-v2 carry a single member id, v3+ a member list
        members: Vec<String>,
    },
    /// DescribeGroups request
    DescribeGroups { groups: Vec<String> },
    /// ListGroups request
    ListGroups,
    /// DeleteGroups request
    DeleteGroups { groups: Vec<String> },
    /// SaslHandshake request - pick a SASL mechanism
    SaslHandshake { mechanism: String },
    /// SaslAuthenticate request - opaque mechanism bytes
    SaslAuthenticate { auth_bytes: Bytes },
    /// Any API key the gateway does not implement
    Unsupported,
}

impl KafkaRequest {
    /// Short operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            KafkaRequest::ApiVersions => "ApiVersions",
            KafkaRequest::Metadata { .. } => "Metadata",
            KafkaRequest::Produce { .. } => "Produce",
            KafkaRequest::Fetch { .. } => "Fetch",
            KafkaRequest::ListOffsets { .. } => "ListOffsets",
            KafkaRequest::OffsetCommit { .. } => "OffsetCommit",
            KafkaRequest::OffsetFetch { .. } => "OffsetFetch",
            KafkaRequest::FindCoordinator { .. } => "FindCoordinator",
            KafkaRequest::JoinGroup { .. } => "JoinGroup",
            KafkaRequest::SyncGroup { .. } => "SyncGroup",
            KafkaRequest::Heartbeat { .. } => "Heartbeat",
            KafkaRequest::LeaveGroup { .. } => "LeaveGroup",
            KafkaRequest::DescribeGroups { .. } => "DescribeGroups",
            KafkaRequest::ListGroups => "ListGroups",
            KafkaRequest::DeleteGroups { .. } => "DeleteGroups",
            KafkaRequest::SaslHandshake { .. } => "SaslHandshake",
            KafkaRequest::SaslAuthenticate { .. } => "SaslAuthenticate",
            KafkaRequest::Unsupported => "Unsupported",
        }
    }
}

/// Kafka response types, wrapping kafka-protocol responses ready to encode
#[derive(Debug, Clone)]
pub enum KafkaResponse {
    ApiVersions {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::api_versions_response::ApiVersionsResponse,
    },
    Metadata {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::metadata_response::MetadataResponse,
    },
    Produce {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::produce_response::ProduceResponse,
    },
    Fetch {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::fetch_response::FetchResponse,
    },
    ListOffsets {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::list_offsets_response::ListOffsetsResponse,
    },
    OffsetCommit {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::offset_commit_response::OffsetCommitResponse,
    },
    OffsetFetch {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::offset_fetch_response::OffsetFetchResponse,
    },
    FindCoordinator {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::find_coordinator_response::FindCoordinatorResponse,
    },
    JoinGroup {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::join_group_response::JoinGroupResponse,
    },
    SyncGroup {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::sync_group_response::SyncGroupResponse,
    },
    Heartbeat {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::heartbeat_response::HeartbeatResponse,
    },
    LeaveGroup {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::leave_group_response::LeaveGroupResponse,
    },
    DescribeGroups {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::describe_groups_response::DescribeGroupsResponse,
    },
    ListGroups {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::list_groups_response::ListGroupsResponse,
    },
    DeleteGroups {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::delete_groups_response::DeleteGroupsResponse,
    },
    SaslHandshake {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::sasl_handshake_response::SaslHandshakeResponse,
    },
    SaslAuthenticate {
        correlation_id: i32,
        api_version: i16,
        response: kafka_protocol::messages::sasl_authenticate_response::SaslAuthenticateResponse,
    },
    /// Error response for requests whose API has no typed body here
    /// (unknown API keys, or bodies that failed to decode)
    Error {
        correlation_id: i32,
        error_code: i16,
        error_message: Option<String>,
    },
}

impl KafkaResponse {
    /// Correlation id this response answers
    pub fn correlation_id(&self) -> i32 {
        match self {
            KafkaResponse::ApiVersions { correlation_id, .. }
            | KafkaResponse::Metadata { correlation_id, .. }
            | KafkaResponse::Produce { correlation_id, .. }
            | KafkaResponse::Fetch { correlation_id, .. }
            | KafkaResponse::ListOffsets { correlation_id, .. }
            | KafkaResponse::OffsetCommit { correlation_id, .. }
            | KafkaResponse::OffsetFetch { correlation_id, .. }
            | KafkaResponse::FindCoordinator { correlation_id, .. }
            | KafkaResponse::JoinGroup { correlation_id, .. }
            | KafkaResponse::SyncGroup { correlation_id, .. }
            | KafkaResponse::Heartbeat { correlation_id, .. }
            | KafkaResponse::LeaveGroup { correlation_id, .. }
            | KafkaResponse::DescribeGroups { correlation_id, .. }
            | KafkaResponse::ListGroups { correlation_id, .. }
            | KafkaResponse::DeleteGroups { correlation_id, .. }
            | KafkaResponse::SaslHandshake { correlation_id, .. }
            | KafkaResponse::SaslAuthenticate { correlation_id, .. }
            | KafkaResponse::Error { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Typed result sink for one request.
///
/// Completing consumes the handle, so a response can be delivered at most once.
/// A handle dropped without completion (task aborted, session torn down mid-flight)
/// still answers the client with a typed "channel is closing" error, so every
/// request gets exactly one response.
#[derive(Debug)]
pub struct ResponseHandle {
    header: RequestHeader,
    tx: Option<oneshot::Sender<KafkaResponse>>,
}

impl ResponseHandle {
    /// Create a handle and the receiver the writer side awaits
    pub fn new(header: RequestHeader) -> (Self, oneshot::Receiver<KafkaResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                header,
                tx: Some(tx),
            },
            rx,
        )
    }

    /// Header of the request this handle answers
    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    /// Deliver the response. Returns false when the receiver is already gone.
    pub fn complete(mut self, response: KafkaResponse) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            warn!(
                correlation_id = self.header.correlation_id,
                api_key = self.header.api_key,
                "Response handle dropped before completion, answering with channel-closing error"
            );
            let response = build_error_response(
                &self.header,
                None,
                ERROR_LEADER_NOT_AVAILABLE,
                Some(CHANNEL_CLOSING_MESSAGE.to_string()),
            );
            let _ = tx.send(response);
        }
    }
}

/// A decoded request paired with its response handle
#[derive(Debug)]
pub struct PendingRequest {
    pub header: RequestHeader,
    pub body: KafkaRequest,
    pub handle: ResponseHandle,
}

impl PendingRequest {
    /// Build a pending request and return the receiver for its response
    pub fn new(
        header: RequestHeader,
        body: KafkaRequest,
    ) -> (Self, oneshot::Receiver<KafkaResponse>) {
        let (handle, rx) = ResponseHandle::new(header.clone());
        (
            Self {
                header,
                body,
                handle,
            },
            rx,
        )
    }
}

/// Data for producing to a topic
#[derive(Debug, Clone)]
pub struct TopicProduceData {
    /// Topic name
    pub name: String,
    /// Partitions to write to
    pub partitions: Vec<PartitionProduceData>,
}

/// Data for producing to a partition
#[derive(Debug, Clone)]
pub struct PartitionProduceData {
    /// Partition ID
    pub partition_index: i32,
    /// Raw record batch bytes, stored as one backend entry
    pub records: Option<Bytes>,
}

/// Data for fetching from a topic
#[derive(Debug, Clone)]
pub struct TopicFetchData {
    /// Topic name
    pub name: String,
    /// Partitions to fetch from
    pub partitions: Vec<PartitionFetchData>,
}

/// Data for fetching from a partition
#[derive(Debug, Clone)]
pub struct PartitionFetchData {
    /// Partition ID
    pub partition_index: i32,
    /// Offset to start fetching from
    pub fetch_offset: i64,
    /// Maximum bytes to fetch from this partition
    pub partition_max_bytes: i32,
}

/// Data for committing offsets for a topic
#[derive(Debug, Clone)]
pub struct OffsetCommitTopicData {
    /// Topic name
    pub name: String,
    /// Partitions to commit offsets for
    pub partitions: Vec<OffsetCommitPartitionData>,
}

/// Data for committing offset for a partition
#[derive(Debug, Clone)]
pub struct OffsetCommitPartitionData {
    /// Partition ID
    pub partition_index: i32,
    /// Offset to commit (consumer will fetch from committed_offset)
    pub committed_offset: i64,
    /// Optional metadata
    pub metadata: Option<String>,
}

/// Data for fetching offsets for a topic
#[derive(Debug, Clone)]
pub struct OffsetFetchTopicData {
    /// Topic name
    pub name: String,
    /// Partitions to fetch offsets for
    pub partition_indexes: Vec<i32>,
}

/// JoinGroup protocol (assignment strategy with metadata)
#[derive(Debug, Clone)]
pub struct JoinGroupProtocol {
    /// Protocol name (e.g., "range", "roundrobin", "sticky")
    pub name: String,
    /// Protocol-specific subscription metadata
    pub metadata: Vec<u8>,
}

/// SyncGroup assignment (member ID → partition assignment)
#[derive(Debug, Clone)]
pub struct SyncGroupAssignment {
    /// Member ID to assign partitions to
    pub member_id: String,
    /// Encoded MemberAssignment for this member
    pub assignment: Vec<u8>,
}

/// Data for listing offsets for a topic
#[derive(Debug, Clone)]
pub struct ListOffsetsTopicData {
    /// Topic name
    pub name: String,
    /// Partitions to list offsets for
    pub partitions: Vec<ListOffsetsPartitionData>,
}

/// Data for listing offsets for a partition
#[derive(Debug, Clone)]
pub struct ListOffsetsPartitionData {
    /// Partition ID
    pub partition_index: i32,
    /// Timestamp to query:
    /// - -2 = earliest offset
    /// - -1 = latest offset
    /// - >= 0 = first offset at or after this time
    pub timestamp: i64,
    /// v0 only: number of candidate offsets requested
    pub max_num_offsets: i32,
}
