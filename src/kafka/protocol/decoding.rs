// Request decoding module
//
// Turns one length-delimited frame into a RequestHeader plus a typed
// KafkaRequest. Three outcomes:
// - header cannot be decoded: Err, the connection is closed (no correlation id)
// - body cannot be decoded or version unsupported: Rejected, answered in order
// - otherwise: Request, handed to the session

use bytes::BytesMut;
use kafka_protocol::messages::delete_groups_request::DeleteGroupsRequest;
use kafka_protocol::messages::describe_groups_request::DescribeGroupsRequest;
use kafka_protocol::messages::fetch_request::FetchRequest;
use kafka_protocol::messages::find_coordinator_request::FindCoordinatorRequest;
use kafka_protocol::messages::heartbeat_request::HeartbeatRequest;
use kafka_protocol::messages::join_group_request::JoinGroupRequest;
use kafka_protocol::messages::leave_group_request::LeaveGroupRequest;
use kafka_protocol::messages::list_offsets_request::ListOffsetsRequest;
use kafka_protocol::messages::metadata_request::MetadataRequest;
use kafka_protocol::messages::offset_commit_request::OffsetCommitRequest;
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequest;
use kafka_protocol::messages::produce_request::ProduceRequest;
use kafka_protocol::messages::sasl_authenticate_request::SaslAuthenticateRequest;
use kafka_protocol::messages::sasl_handshake_request::SaslHandshakeRequest;
use kafka_protocol::messages::sync_group_request::SyncGroupRequest;
use kafka_protocol::messages::ApiKey;
use kafka_protocol::protocol::buf::ByteBuf;
use kafka_protocol::protocol::Decodable;
use tracing::{debug, warn};

use super::super::constants::*;
use super::super::error::{KafkaError, Result};
use super::super::messages::{
    JoinGroupProtocol, KafkaRequest, KafkaResponse, ListOffsetsPartitionData,
    ListOffsetsTopicData, OffsetCommitPartitionData, OffsetCommitTopicData, OffsetFetchTopicData,
    PartitionFetchData, PartitionProduceData, RequestHeader, SyncGroupAssignment,
    TopicFetchData, TopicProduceData,
};
use super::super::response_builders::{
    build_api_versions_response, build_error_response, SUPPORTED_API_VERSIONS,
};

/// Decode the request header from the provided buffer.
///
/// Same as `kafka_protocol::protocol::decode_request_header_from_buffer`,
/// which only exists in kafka-protocol 0.16+ (that release drops the
/// ListOffsets v0 fields this crate relies on).
fn decode_request_header_from_buffer<B: ByteBuf>(
    buf: &mut B,
) -> anyhow::Result<kafka_protocol::messages::RequestHeader> {
    let api_key = ApiKey::try_from(bytes::Buf::get_i16(&mut buf.peek_bytes(0..2)))
        .map_err(|_| anyhow::Error::msg("Unknown API key"))?;
    let api_version = bytes::Buf::get_i16(&mut buf.peek_bytes(2..4));
    let header_version = api_key.request_header_version(api_version);
    kafka_protocol::messages::RequestHeader::decode(buf, header_version)
}

/// Outcome of decoding a frame whose header was readable
#[derive(Debug)]
pub enum ParsedRequest {
    /// A request for the session
    Request {
        header: RequestHeader,
        body: KafkaRequest,
    },
    /// A request answered straight away with an error
    Rejected {
        header: RequestHeader,
        error_code: i16,
        error_message: String,
    },
}

/// Build the response for a rejected request.
///
/// ApiVersions rejections still carry the supported version table and are
/// encoded as v0 so that any client can read them and retry.
pub fn rejection_response(header: &RequestHeader, error_code: i16, message: &str) -> KafkaResponse {
    if header.api_key == API_KEY_API_VERSIONS {
        let mut response = build_api_versions_response();
        response.error_code = error_code;
        return KafkaResponse::ApiVersions {
            correlation_id: header.correlation_id,
            api_version: 0,
            response,
        };
    }
    build_error_response(header, None, error_code, Some(message.to_string()))
}

/// Supported version range for `api_key`, if the gateway implements it
pub fn supported_versions(api_key: i16) -> Option<(i16, i16)> {
    SUPPORTED_API_VERSIONS
        .iter()
        .find(|(key, _, _)| *key == api_key)
        .map(|(_, min, max)| (*min, *max))
}

/// Parse a Kafka request from a frame
///
/// The frame has already been extracted by LengthDelimitedCodec, so it holds
/// [RequestHeader] [RequestBody] only.
pub fn parse_request(frame: BytesMut) -> Result<ParsedRequest> {
    let mut payload_buf = frame;

    let raw_header = decode_request_header_from_buffer(&mut payload_buf).map_err(|e| {
        warn!("Failed to decode RequestHeader: {}", e);
        KafkaError::ProtocolCodec(e)
    })?;

    let header = RequestHeader {
        api_key: raw_header.request_api_key,
        api_version: raw_header.request_api_version,
        correlation_id: raw_header.correlation_id,
        client_id: raw_header.client_id.map(|s| s.to_string()),
    };

    debug!(
        api_key = header.api_key,
        api_version = header.api_version,
        correlation_id = header.correlation_id,
        client_id = ?header.client_id,
        "Parsed RequestHeader"
    );

    let Some((min_version, max_version)) = supported_versions(header.api_key) else {
        debug!(api_key = header.api_key, "Request for unsupported API key");
        return Ok(ParsedRequest::Request {
            header,
            body: KafkaRequest::Unsupported,
        });
    };

    if header.api_version < min_version || header.api_version > max_version {
        warn!(
            api_key = header.api_key,
            api_version = header.api_version,
            "Unsupported API version"
        );
        let error_message = format!(
            "API key {} version {} is not supported (supported {}-{})",
            header.api_key, header.api_version, min_version, max_version
        );
        return Ok(ParsedRequest::Rejected {
            header,
            error_code: ERROR_UNSUPPORTED_VERSION,
            error_message,
        });
    }

    match decode_body(header.api_key, header.api_version, &mut payload_buf) {
        Ok(body) => Ok(ParsedRequest::Request { header, body }),
        Err(error_message) => {
            warn!(correlation_id = header.correlation_id, "{}", error_message);
            Ok(ParsedRequest::Rejected {
                header,
                error_code: ERROR_CORRUPT_MESSAGE,
                error_message,
            })
        }
    }
}

fn decode<T: Decodable>(buf: &mut BytesMut, api_version: i16, name: &str) -> std::result::Result<T, String> {
    T::decode(buf, api_version).map_err(|e| format!("Malformed {}Request: {}", name, e))
}

fn decode_body(
    api_key: i16,
    api_version: i16,
    buf: &mut BytesMut,
) -> std::result::Result<KafkaRequest, String> {
    let request = match api_key {
        // The body only carries client software info, which is not used
        API_KEY_API_VERSIONS => KafkaRequest::ApiVersions,

        API_KEY_METADATA => {
            let req: MetadataRequest = decode(buf, api_version, "Metadata")?;
            // None or an empty list both mean "all topics"
            let topics = req
                .topics
                .map(|topics| {
                    topics
                        .into_iter()
                        .filter_map(|t| t.name.map(|n| n.to_string()))
                        .collect::<Vec<_>>()
                })
                .filter(|names| !names.is_empty());
            KafkaRequest::Metadata { topics }
        }

        API_KEY_PRODUCE => {
            let req: ProduceRequest = decode(buf, api_version, "Produce")?;
            let topic_data = req
                .topic_data
                .into_iter()
                .map(|topic| TopicProduceData {
                    name: topic.name.to_string(),
                    partitions: topic
                        .partition_data
                        .into_iter()
                        .map(|p| PartitionProduceData {
                            partition_index: p.index,
                            records: p.records,
                        })
                        .collect(),
                })
                .collect();
            KafkaRequest::Produce {
                transactional_id: req.transactional_id.map(|s| s.to_string()),
                acks: req.acks,
                timeout_ms: req.timeout_ms,
                topic_data,
            }
        }

        API_KEY_FETCH => {
            let req: FetchRequest = decode(buf, api_version, "Fetch")?;
            let topic_data = req
                .topics
                .into_iter()
                .map(|topic| TopicFetchData {
                    name: topic.topic.to_string(),
                    partitions: topic
                        .partitions
                        .into_iter()
                        .map(|p| PartitionFetchData {
                            partition_index: p.partition,
                            fetch_offset: p.fetch_offset,
                            partition_max_bytes: p.partition_max_bytes,
                        })
                        .collect(),
                })
                .collect();
            KafkaRequest::Fetch {
                max_wait_ms: req.max_wait_ms,
                min_bytes: req.min_bytes,
                max_bytes: req.max_bytes,
                topic_data,
            }
        }

        API_KEY_LIST_OFFSETS => {
            let req: ListOffsetsRequest = decode(buf, api_version, "ListOffsets")?;
            let topics = req
                .topics
                .into_iter()
                .map(|topic| ListOffsetsTopicData {
                    name: topic.name.to_string(),
                    partitions: topic
                        .partitions
                        .into_iter()
                        .map(|p| ListOffsetsPartitionData {
                            partition_index: p.partition_index,
                            timestamp: p.timestamp,
                            max_num_offsets: p.max_num_offsets,
                        })
                        .collect(),
                })
                .collect();
            KafkaRequest::ListOffsets {
                replica_id: req.replica_id.0,
                topics,
            }
        }

        API_KEY_OFFSET_COMMIT => {
            let req: OffsetCommitRequest = decode(buf, api_version, "OffsetCommit")?;
            let topics = req
                .topics
                .into_iter()
                .map(|topic| OffsetCommitTopicData {
                    name: topic.name.to_string(),
                    partitions: topic
                        .partitions
                        .into_iter()
                        .map(|p| OffsetCommitPartitionData {
                            partition_index: p.partition_index,
                            committed_offset: p.committed_offset,
                            metadata: p
                                .committed_metadata
                                .map(|s| s.to_string())
                                .filter(|s| !s.is_empty()),
                        })
                        .collect(),
                })
                .collect();
            KafkaRequest::OffsetCommit {
                group_id: req.group_id.to_string(),
                generation_id: req.generation_id_or_member_epoch,
                member_id: req.member_id.to_string(),
                topics,
            }
        }

        API_KEY_OFFSET_FETCH => {
            let req: OffsetFetchRequest = decode(buf, api_version, "OffsetFetch")?;
            let topics = req.topics.map(|topics| {
                topics
                    .into_iter()
                    .map(|t| OffsetFetchTopicData {
                        name: t.name.to_string(),
                        partition_indexes: t.partition_indexes,
                    })
                    .collect()
            });
            KafkaRequest::OffsetFetch {
                group_id: req.group_id.to_string(),
                topics,
            }
        }

        API_KEY_FIND_COORDINATOR => {
            let req: FindCoordinatorRequest = decode(buf, api_version, "FindCoordinator")?;
            KafkaRequest::FindCoordinator {
                key: req.key.to_string(),
                key_type: req.key_type,
            }
        }

        API_KEY_JOIN_GROUP => {
            let req: JoinGroupRequest = decode(buf, api_version, "JoinGroup")?;
            KafkaRequest::JoinGroup {
                group_id: req.group_id.to_string(),
                member_id: req.member_id.to_string(),
                session_timeout_ms: req.session_timeout_ms,
                rebalance_timeout_ms: req.rebalance_timeout_ms,
                protocol_type: req.protocol_type.to_string(),
                protocols: req
                    .protocols
                    .into_iter()
                    .map(|p| JoinGroupProtocol {
                        name: p.name.to_string(),
                        metadata: p.metadata.to_vec(),
                    })
                    .collect(),
                group_instance_id: req.group_instance_id.map(|s| s.to_string()),
            }
        }

        API_KEY_SYNC_GROUP => {
            let req: SyncGroupRequest = decode(buf, api_version, "SyncGroup")?;
            KafkaRequest::SyncGroup {
                group_id: req.group_id.to_string(),
                generation_id: req.generation_id,
                member_id: req.member_id.to_string(),
                group_instance_id: req.group_instance_id.map(|s| s.to_string()),
                assignments: req
                    .assignments
                    .into_iter()
                    .map(|a| SyncGroupAssignment {
                        member_id: a.member_id.to_string(),
                        assignment: a.assignment.to_vec(),
                    })
                    .collect(),
            }
        }

        API_KEY_HEARTBEAT => {
            let req: HeartbeatRequest = decode(buf, api_version, "Heartbeat")?;
            KafkaRequest::Heartbeat {
                group_id: req.group_id.to_string(),
                generation_id: req.generation_id,
                member_id: req.member_id.to_string(),
            }
        }

        API_KEY_LEAVE_GROUP => {
            let req: LeaveGroupRequest = decode(buf, api_version, "LeaveGroup")?;
            // v0-v2 name one member, v3+ a batch
            let members = if api_version < 3 {
                vec![req.member_id.to_string()]
            } else {
                req.members
                    .into_iter()
                    .map(|m| m.member_id.to_string())
                    .collect()
            };
            KafkaRequest::LeaveGroup {
                group_id: req.group_id.to_string(),
                members,
            }
        }

        API_KEY_DESCRIBE_GROUPS => {
            let req: DescribeGroupsRequest = decode(buf, api_version, "DescribeGroups")?;
            KafkaRequest::DescribeGroups {
                groups: req.groups.into_iter().map(|g| g.to_string()).collect(),
            }
        }

        // Only v4 adds a states filter, which is ignored
        API_KEY_LIST_GROUPS => KafkaRequest::ListGroups,

        API_KEY_DELETE_GROUPS => {
            let req: DeleteGroupsRequest = decode(buf, api_version, "DeleteGroups")?;
            KafkaRequest::DeleteGroups {
                groups: req.groups_names.into_iter().map(|g| g.to_string()).collect(),
            }
        }

        API_KEY_SASL_HANDSHAKE => {
            let req: SaslHandshakeRequest = decode(buf, api_version, "SaslHandshake")?;
            KafkaRequest::SaslHandshake {
                mechanism: req.mechanism.to_string(),
            }
        }

        API_KEY_SASL_AUTHENTICATE => {
            let req: SaslAuthenticateRequest = decode(buf, api_version, "SaslAuthenticate")?;
            KafkaRequest::SaslAuthenticate {
                auth_bytes: req.auth_bytes,
            }
        }

        _ => KafkaRequest::Unsupported,
    };
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use kafka_protocol::messages::heartbeat_request::HeartbeatRequest;
    use kafka_protocol::messages::metadata_request::MetadataRequestTopic;
    use kafka_protocol::messages::produce_request::{
        PartitionProduceData as WirePartition, TopicProduceData as WireTopic,
    };
    use kafka_protocol::messages::{GroupId, RequestHeader as WireHeader, TopicName};
    use kafka_protocol::protocol::{Encodable, StrBytes};

    /// Encode header v1 (non-flexible) plus body
    fn frame<T: Encodable>(api_key: i16, api_version: i16, correlation_id: i32, body: &T) -> BytesMut {
        let header = WireHeader::default()
            .with_request_api_key(api_key)
            .with_request_api_version(api_version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_static_str("decoder-test")));
        let mut buf = BytesMut::new();
        header.encode(&mut buf, 1).unwrap();
        body.encode(&mut buf, api_version).unwrap();
        buf
    }

    fn request(parsed: ParsedRequest) -> (RequestHeader, KafkaRequest) {
        match parsed {
            ParsedRequest::Request { header, body } => (header, body),
            other => panic!("Expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_metadata_with_topics() {
        let mut req = MetadataRequest::default();
        let mut topic = MetadataRequestTopic::default();
        topic.name = Some(TopicName(StrBytes::from_static_str("orders")));
        req.topics = Some(vec![topic]);

        let (header, body) = request(parse_request(frame(API_KEY_METADATA, 1, 7, &req)).unwrap());
        assert_eq!(header.correlation_id, 7);
        assert_eq!(header.client_id.as_deref(), Some("decoder-test"));
        match body {
            KafkaRequest::Metadata { topics } => {
                assert_eq!(topics, Some(vec!["orders".to_string()]));
            }
            other => panic!("Expected Metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_metadata_empty_list_means_all() {
        let mut req = MetadataRequest::default();
        req.topics = Some(Vec::new());
        let (_, body) = request(parse_request(frame(API_KEY_METADATA, 1, 1, &req)).unwrap());
        assert!(matches!(body, KafkaRequest::Metadata { topics: None }));
    }

    #[test]
    fn test_parse_produce() {
        let mut partition = WirePartition::default();
        partition.index = 2;
        partition.records = Some(Bytes::from_static(b"batch"));
        let mut topic = WireTopic::default();
        topic.name = TopicName(StrBytes::from_static_str("orders"));
        topic.partition_data = vec![partition];
        let mut req = ProduceRequest::default();
        req.acks = -1;
        req.timeout_ms = 1500;
        req.topic_data = vec![topic];

        let (_, body) = request(parse_request(frame(API_KEY_PRODUCE, 3, 9, &req)).unwrap());
        match body {
            KafkaRequest::Produce {
                transactional_id,
                acks,
                timeout_ms,
                topic_data,
            } => {
                assert!(transactional_id.is_none());
                assert_eq!(acks, -1);
                assert_eq!(timeout_ms, 1500);
                assert_eq!(topic_data[0].name, "orders");
                assert_eq!(topic_data[0].partitions[0].partition_index, 2);
                assert_eq!(
                    topic_data[0].partitions[0].records.as_deref(),
                    Some(&b"batch"[..])
                );
            }
            other => panic!("Expected Produce, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_heartbeat() {
        let mut req = HeartbeatRequest::default();
        req.group_id = GroupId(StrBytes::from_static_str("g1"));
        req.generation_id = 4;
        req.member_id = StrBytes::from_static_str("m-1");

        let (_, body) = request(parse_request(frame(API_KEY_HEARTBEAT, 1, 3, &req)).unwrap());
        match body {
            KafkaRequest::Heartbeat {
                group_id,
                generation_id,
                member_id,
            } => {
                assert_eq!(group_id, "g1");
                assert_eq!(generation_id, 4);
                assert_eq!(member_id, "m-1");
            }
            other => panic!("Expected Heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_api_key_is_unsupported() {
        let mut buf = BytesMut::new();
        WireHeader::default()
            .with_request_api_key(57)
            .with_request_api_version(0)
            .with_correlation_id(11)
            .encode(&mut buf, 1)
            .unwrap();
        let (header, body) = request(parse_request(buf).unwrap());
        assert_eq!(header.correlation_id, 11);
        assert!(matches!(body, KafkaRequest::Unsupported));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let req = ProduceRequest::default();
        // v2 still uses the legacy message set and is not advertised
        match parse_request(frame(API_KEY_PRODUCE, 2, 5, &req)).unwrap() {
            ParsedRequest::Rejected {
                header, error_code, ..
            } => {
                assert_eq!(header.correlation_id, 5);
                assert_eq!(error_code, ERROR_UNSUPPORTED_VERSION);
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_body_is_corrupt() {
        let mut req = HeartbeatRequest::default();
        req.group_id = GroupId(StrBytes::from_static_str("g1"));
        req.member_id = StrBytes::from_static_str("member");
        let mut buf = frame(API_KEY_HEARTBEAT, 1, 3, &req);
        buf.truncate(buf.len() - 4);

        match parse_request(buf).unwrap() {
            ParsedRequest::Rejected { error_code, .. } => {
                assert_eq!(error_code, ERROR_CORRUPT_MESSAGE)
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_header_is_an_error() {
        let buf = BytesMut::from(&[0x00, 0x03][..]);
        assert!(matches!(
            parse_request(buf),
            Err(KafkaError::ProtocolCodec(_))
        ));
    }

    #[test]
    fn test_api_versions_rejection_is_v0_with_table() {
        let header = RequestHeader {
            api_key: API_KEY_API_VERSIONS,
            api_version: 9,
            correlation_id: 1,
            client_id: None,
        };
        match rejection_response(&header, ERROR_UNSUPPORTED_VERSION, "too new") {
            KafkaResponse::ApiVersions {
                api_version,
                response,
                ..
            } => {
                assert_eq!(api_version, 0);
                assert_eq!(response.error_code, ERROR_UNSUPPORTED_VERSION);
                assert!(!response.api_keys.is_empty());
            }
            other => panic!("Expected ApiVersions, got {:?}", other),
        }
    }
}
