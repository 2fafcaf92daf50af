//! Kafka protocol constants
//!
//! This module centralizes all magic numbers used by the gateway: API keys,
//! wire error codes, ListOffsets sentinels, and configuration defaults.
//!
//! # Terminology
//! - **API Key**: Identifies which operation/request type (e.g., 18 = ApiVersions, 3 = Metadata)
//! - **API Version**: Identifies which version of that operation (e.g., Metadata v9, ApiVersions v3)

// ===== API Keys =====
// See: https://kafka.apache.org/protocol.html#protocol_api_key

/// API key for Produce requests
pub const API_KEY_PRODUCE: i16 = 0;

/// API key for Fetch requests
pub const API_KEY_FETCH: i16 = 1;

/// API key for ListOffsets requests
///
/// Used to query earliest/latest/at-time offsets for partitions
pub const API_KEY_LIST_OFFSETS: i16 = 2;

/// API key for Metadata requests
pub const API_KEY_METADATA: i16 = 3;

/// API key for OffsetCommit requests
pub const API_KEY_OFFSET_COMMIT: i16 = 8;

/// API key for OffsetFetch requests
pub const API_KEY_OFFSET_FETCH: i16 = 9;

/// API key for FindCoordinator requests
pub const API_KEY_FIND_COORDINATOR: i16 = 10;

/// API key for JoinGroup requests
pub const API_KEY_JOIN_GROUP: i16 = 11;

/// API key for Heartbeat requests
pub const API_KEY_HEARTBEAT: i16 = 12;

/// API key for LeaveGroup requests
pub const API_KEY_LEAVE_GROUP: i16 = 13;

/// API key for SyncGroup requests
pub const API_KEY_SYNC_GROUP: i16 = 14;

/// API key for DescribeGroups requests
pub const API_KEY_DESCRIBE_GROUPS: i16 = 15;

/// API key for ListGroups requests
pub const API_KEY_LIST_GROUPS: i16 = 16;

/// API key for SaslHandshake requests
pub const API_KEY_SASL_HANDSHAKE: i16 = 17;

/// API key for ApiVersions requests
///
/// Used to discover which API versions the broker supports
pub const API_KEY_API_VERSIONS: i16 = 18;

/// API key for SaslAuthenticate requests
pub const API_KEY_SASL_AUTHENTICATE: i16 = 36;

/// API key for DeleteGroups requests
pub const API_KEY_DELETE_GROUPS: i16 = 42;

// ===== Configuration Defaults =====

/// Default Kafka protocol port
pub const DEFAULT_KAFKA_PORT: i32 = 9092;

/// Minimum allowed port number (above privileged ports)
pub const MIN_PORT: i32 = 1024;

/// Maximum allowed port number
pub const MAX_PORT: i32 = 65535;

/// Default listener set advertised by this node
pub const DEFAULT_LISTENERS: &str = "PLAINTEXT://127.0.0.1:9092";

/// Default advertised host name
pub const DEFAULT_ADVERTISED_ADDRESS: &str = "127.0.0.1";

/// Default bind host (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default cluster name reported as the Metadata cluster id
pub const DEFAULT_CLUSTER_NAME: &str = "kafka-bridge";

/// Default namespace for unauthenticated connections
pub const DEFAULT_NAMESPACE: &str = "public/default";

/// Default SASL mechanisms, comma separated
pub const DEFAULT_SASL_MECHANISMS: &str = "PLAIN";

/// Namespace holding internal topics such as the offsets topic
pub const DEFAULT_METADATA_NAMESPACE: &str = "public/__kafka";

/// Name of the internal topic that stores committed group offsets
pub const DEFAULT_OFFSETS_TOPIC: &str = "__consumer_offsets";

/// Number of partitions of the offsets topic
pub const DEFAULT_OFFSETS_TOPIC_PARTITIONS: i32 = 8;

/// Listener URL scheme for plaintext connections
pub const PLAINTEXT_PREFIX: &str = "PLAINTEXT://";

/// Listener URL scheme for TLS connections
pub const SSL_PREFIX: &str = "SSL://";

/// Prefix of fully-qualified backend topic names
pub const PERSISTENT_DOMAIN: &str = "persistent://";

/// Suffix separating a topic from its partition index in backend names
pub const PARTITIONED_TOPIC_SUFFIX: &str = "-partition-";

/// Key of the Kafka listener entry in a node's advertised protocol map
pub const KAFKA_PROTOCOL_NAME: &str = "kafka";

// ===== Protocol Limits =====

/// Maximum request size (100MB)
///
/// This limit prevents DoS attacks via extremely large requests
pub const MAX_REQUEST_SIZE: i32 = 100_000_000;

/// Default graceful shutdown timeout (milliseconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: i32 = 5000;

/// Minimum shutdown timeout (milliseconds)
pub const MIN_SHUTDOWN_TIMEOUT_MS: i32 = 100;

/// Maximum shutdown timeout (milliseconds)
pub const MAX_SHUTDOWN_TIMEOUT_MS: i32 = 60000;

/// Longest a fetch with no available data waits before answering (milliseconds)
pub const MAX_FETCH_WAIT_MS: i32 = 500;

// ===== ListOffsets =====

/// ListOffsets sentinel asking for the next offset to be written
pub const LATEST_TIMESTAMP: i64 = -1;

/// ListOffsets sentinel asking for the first retained offset
pub const EARLIEST_TIMESTAMP: i64 = -2;

/// Timestamp reported next to resolved offsets in the current encoding
pub const DEFAULT_TIMESTAMP: i64 = 0;

/// Timestamp reported when no offset could be resolved
pub const UNKNOWN_TIMESTAMP: i64 = -1;

/// Offset reported when no offset could be resolved
pub const UNKNOWN_OFFSET: i64 = -1;

/// First ListOffsets version using the (timestamp, offset) pair encoding
pub const LIST_OFFSETS_PAIR_MIN_VERSION: i16 = 1;

// ===== FindCoordinator =====

/// Coordinator key type for consumer groups
pub const COORDINATOR_KEY_TYPE_GROUP: i8 = 0;

/// Coordinator key type for transactional producers
pub const COORDINATOR_KEY_TYPE_TRANSACTION: i8 = 1;

// ===== SASL =====

/// The only mechanism whose payload the gateway parses
pub const SASL_MECHANISM_PLAIN: &str = "PLAIN";

/// Separator between the auth method and its data in a PLAIN password
pub const AUTH_METHOD_SEPARATOR: char = ':';

// ===== Offset <-> log position packing =====

/// Bits reserved below the entry id for records inside one batch
pub const BATCH_INDEX_BITS: u32 = 12;

/// Bit position of the segment id inside an offset
pub const SEGMENT_ID_SHIFT: u32 = 44;

/// Mask applied to the entry id after shifting out the batch bits
pub const ENTRY_ID_MASK: i64 = (1 << 32) - 1;

// ===== Protocol Version Constants =====

/// Lookup table for response header version thresholds.
///
/// Returns the minimum API version where ResponseHeader v1 (flexible format) is used.
/// For API versions below this threshold, ResponseHeader v0 is used.
/// ApiVersions and SaslHandshake never use the flexible header.
pub fn get_flexible_format_threshold(api_key: i16) -> Option<i16> {
    match api_key {
        API_KEY_API_VERSIONS => None,
        API_KEY_SASL_HANDSHAKE => None,
        API_KEY_PRODUCE => Some(9),
        API_KEY_FETCH => Some(12),
        API_KEY_LIST_OFFSETS => Some(6),
        API_KEY_METADATA => Some(9),
        API_KEY_OFFSET_COMMIT => Some(8),
        API_KEY_OFFSET_FETCH => Some(6),
        API_KEY_FIND_COORDINATOR => Some(3),
        API_KEY_JOIN_GROUP => Some(6),
        API_KEY_HEARTBEAT => Some(4),
        API_KEY_LEAVE_GROUP => Some(4),
        API_KEY_SYNC_GROUP => Some(4),
        API_KEY_DESCRIBE_GROUPS => Some(5),
        API_KEY_LIST_GROUPS => Some(3),
        API_KEY_SASL_AUTHENTICATE => Some(2),
        API_KEY_DELETE_GROUPS => Some(2),
        _ => None,
    }
}

/// Determines the response header version for a given API key and version.
///
/// Returns 1 for flexible format (tagged fields), 0 for non-flexible format.
pub fn get_response_header_version(api_key: i16, api_version: i16) -> i16 {
    match get_flexible_format_threshold(api_key) {
        Some(threshold) if api_version >= threshold => 1,
        _ => 0,
    }
}

// ===== Kafka Error Codes =====
// See: https://kafka.apache.org/protocol.html#protocol_error_codes

/// No error
pub const ERROR_NONE: i16 = 0;

/// Unknown server error
pub const ERROR_UNKNOWN_SERVER_ERROR: i16 = -1;

/// Corrupt message (invalid RecordBatch format)
pub const ERROR_CORRUPT_MESSAGE: i16 = 2;

/// Unknown topic or partition
pub const ERROR_UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

/// Leader not available (ownership is moving or the channel is closing)
pub const ERROR_LEADER_NOT_AVAILABLE: i16 = 5;

/// This node is not the leader for the partition
pub const ERROR_NOT_LEADER_FOR_PARTITION: i16 = 6;

/// Unsupported version
pub const ERROR_UNSUPPORTED_VERSION: i16 = 35;

/// Storage failure on append
pub const ERROR_KAFKA_STORAGE_ERROR: i16 = 56;

// ===== Consumer Group Coordinator Error Codes =====

/// Illegal generation (consumer group generation mismatch)
pub const ERROR_ILLEGAL_GENERATION: i16 = 22;

/// Unknown member ID
pub const ERROR_UNKNOWN_MEMBER_ID: i16 = 25;

/// Rebalance in progress
pub const ERROR_REBALANCE_IN_PROGRESS: i16 = 27;

/// Non-empty group (cannot delete group with members)
pub const ERROR_NON_EMPTY_GROUP: i16 = 68;

/// Group ID not found
pub const ERROR_GROUP_ID_NOT_FOUND: i16 = 69;

// ===== SASL Error Codes =====

/// Requested SASL mechanism is not enabled
pub const ERROR_UNSUPPORTED_SASL_MECHANISM: i16 = 33;

/// SASL request arrived in the wrong state
pub const ERROR_ILLEGAL_SASL_STATE: i16 = 34;

/// SASL credentials were rejected
pub const ERROR_SASL_AUTHENTICATION_FAILED: i16 = 58;

/// Message attached to every response completed after teardown began
pub const CHANNEL_CLOSING_MESSAGE: &str = "Channel is closing!";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_keys_match_kafka_protocol() {
        // https://kafka.apache.org/protocol.html#protocol_api_key
        assert_eq!(API_KEY_PRODUCE, 0, "Produce API key should be 0");
        assert_eq!(API_KEY_FETCH, 1, "Fetch API key should be 1");
        assert_eq!(API_KEY_METADATA, 3, "Metadata API key should be 3");
        assert_eq!(API_KEY_SASL_HANDSHAKE, 17);
        assert_eq!(API_KEY_API_VERSIONS, 18, "ApiVersions API key should be 18");
        assert_eq!(API_KEY_SASL_AUTHENTICATE, 36);
    }

    #[test]
    fn test_error_codes_match_kafka_protocol() {
        assert_eq!(ERROR_NONE, 0);
        assert_eq!(ERROR_UNKNOWN_SERVER_ERROR, -1);
        assert_eq!(ERROR_CORRUPT_MESSAGE, 2);
        assert_eq!(ERROR_UNKNOWN_TOPIC_OR_PARTITION, 3);
        assert_eq!(ERROR_LEADER_NOT_AVAILABLE, 5);
        assert_eq!(ERROR_NOT_LEADER_FOR_PARTITION, 6);
        assert_eq!(ERROR_UNSUPPORTED_VERSION, 35);
        assert_eq!(ERROR_SASL_AUTHENTICATION_FAILED, 58);
    }

    #[test]
    fn test_list_offsets_sentinels() {
        assert_eq!(LATEST_TIMESTAMP, -1);
        assert_eq!(EARLIEST_TIMESTAMP, -2);
    }

    #[test]
    fn test_port_configuration_valid() {
        assert!(MIN_PORT >= 1024, "Min port should avoid privileged ports");
        assert!(MAX_PORT <= 65535, "Max port must fit in u16");
        assert!(DEFAULT_KAFKA_PORT >= MIN_PORT && DEFAULT_KAFKA_PORT <= MAX_PORT);
    }

    #[test]
    fn test_get_response_header_version_api_versions() {
        assert_eq!(get_response_header_version(API_KEY_API_VERSIONS, 0), 0);
        assert_eq!(get_response_header_version(API_KEY_API_VERSIONS, 3), 0);
    }

    #[test]
    fn test_get_response_header_version_sasl() {
        assert_eq!(get_response_header_version(API_KEY_SASL_HANDSHAKE, 1), 0);
        assert_eq!(get_response_header_version(API_KEY_SASL_AUTHENTICATE, 1), 0);
        assert_eq!(get_response_header_version(API_KEY_SASL_AUTHENTICATE, 2), 1);
    }

    #[test]
    fn test_get_response_header_version_metadata() {
        assert_eq!(get_response_header_version(API_KEY_METADATA, 8), 0);
        assert_eq!(get_response_header_version(API_KEY_METADATA, 9), 1);
    }

    #[test]
    fn test_get_response_header_version_unknown_api() {
        assert_eq!(get_response_header_version(999, 0), 0);
        assert_eq!(get_response_header_version(999, 100), 0);
    }
}
