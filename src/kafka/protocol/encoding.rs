// Response encoding module
//
// Handles encoding of Kafka responses into binary wire protocol format.
// The returned payload has no size prefix; LengthDelimitedCodec adds it.

use bytes::{BufMut, BytesMut};
use kafka_protocol::messages::ResponseHeader;
use kafka_protocol::protocol::Encodable;

use super::super::constants::*;
use super::super::error::Result;
use super::super::messages::KafkaResponse;

/// Encode header (version looked up from API key and version) then body
fn encode_typed<T: Encodable>(
    buf: &mut BytesMut,
    correlation_id: i32,
    api_key: i16,
    api_version: i16,
    body: &T,
) -> Result<()> {
    let header = ResponseHeader::default().with_correlation_id(correlation_id);
    header.encode(buf, get_response_header_version(api_key, api_version))?;
    body.encode(buf, api_version)?;
    Ok(())
}

/// Maps each typed variant to its API key
macro_rules! encode_standard_responses {
    ($response:expr, $buf:expr, { $($variant:ident => $api_key:expr),* $(,)? }) => {
        match $response {
            $(
                KafkaResponse::$variant {
                    correlation_id,
                    api_version,
                    response,
                } => encode_typed($buf, correlation_id, $api_key, api_version, &response)?,
            )*
            KafkaResponse::Error {
                correlation_id,
                error_code,
                error_message,
            } => encode_error($buf, correlation_id, error_code, error_message)?,
        }
    };
}

/// Encode a Kafka response into bytes
pub fn encode_response(response: KafkaResponse) -> Result<BytesMut> {
    let mut response_buf = BytesMut::new();

    encode_standard_responses!(response, &mut response_buf, {
        ApiVersions => API_KEY_API_VERSIONS,
        Metadata => API_KEY_METADATA,
        Produce => API_KEY_PRODUCE,
        Fetch => API_KEY_FETCH,
        ListOffsets => API_KEY_LIST_OFFSETS,
        OffsetCommit => API_KEY_OFFSET_COMMIT,
        OffsetFetch => API_KEY_OFFSET_FETCH,
        FindCoordinator => API_KEY_FIND_COORDINATOR,
        JoinGroup => API_KEY_JOIN_GROUP,
        SyncGroup => API_KEY_SYNC_GROUP,
        Heartbeat => API_KEY_HEARTBEAT,
        LeaveGroup => API_KEY_LEAVE_GROUP,
        DescribeGroups => API_KEY_DESCRIBE_GROUPS,
        ListGroups => API_KEY_LIST_GROUPS,
        DeleteGroups => API_KEY_DELETE_GROUPS,
        SaslHandshake => API_KEY_SASL_HANDSHAKE,
        SaslAuthenticate => API_KEY_SASL_AUTHENTICATE,
    });

    Ok(response_buf)
}

/// Error body for APIs with no typed response: header v0, error code, nullable string.
///
/// Only unknown API keys reach this; everything the gateway implements gets
/// its own response shape from `build_error_response`.
fn encode_error(
    buf: &mut BytesMut,
    correlation_id: i32,
    error_code: i16,
    error_message: Option<String>,
) -> Result<()> {
    let header = ResponseHeader::default().with_correlation_id(correlation_id);
    header.encode(buf, 0)?;
    buf.put_i16(error_code);
    match error_message {
        Some(msg) => {
            let bytes = msg.as_bytes();
            let len = bytes.len().min(i16::MAX as usize);
            buf.put_i16(len as i16);
            buf.put_slice(&bytes[..len]);
        }
        None => buf.put_i16(-1),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use kafka_protocol::messages::api_versions_response::ApiVersionsResponse;
    use kafka_protocol::messages::heartbeat_response::HeartbeatResponse;
    use kafka_protocol::messages::metadata_response::MetadataResponse;
    use kafka_protocol::protocol::Decodable;

    #[test]
    fn test_encode_preserves_correlation_id() {
        let encoded = encode_response(KafkaResponse::Metadata {
            correlation_id: 456,
            api_version: 1,
            response: MetadataResponse::default(),
        })
        .unwrap();
        assert_eq!(
            i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]),
            456
        );
    }

    #[test]
    fn test_api_versions_always_uses_header_v0() {
        let v0 = encode_response(KafkaResponse::ApiVersions {
            correlation_id: 1,
            api_version: 3,
            response: ApiVersionsResponse::default(),
        })
        .unwrap();

        let mut expected = BytesMut::new();
        ResponseHeader::default()
            .with_correlation_id(1)
            .encode(&mut expected, 0)
            .unwrap();
        ApiVersionsResponse::default().encode(&mut expected, 3).unwrap();
        assert_eq!(v0, expected);
    }

    #[test]
    fn test_flexible_versions_decode_back() {
        let mut body = HeartbeatResponse::default();
        body.error_code = ERROR_REBALANCE_IN_PROGRESS;
        let mut encoded = encode_response(KafkaResponse::Heartbeat {
            correlation_id: 77,
            api_version: 4,
            response: body,
        })
        .unwrap();

        let header = ResponseHeader::decode(&mut encoded, 1).unwrap();
        assert_eq!(header.correlation_id, 77);
        let decoded = HeartbeatResponse::decode(&mut encoded, 4).unwrap();
        assert_eq!(decoded.error_code, ERROR_REBALANCE_IN_PROGRESS);
        assert!(!encoded.has_remaining());
    }

    #[test]
    fn test_encode_error_response_with_message() {
        let mut encoded = encode_response(KafkaResponse::Error {
            correlation_id: 2000,
            error_code: ERROR_UNSUPPORTED_VERSION,
            error_message: Some("Unsupported API".to_string()),
        })
        .unwrap();

        assert_eq!(encoded.get_i32(), 2000);
        assert_eq!(encoded.get_i16(), ERROR_UNSUPPORTED_VERSION);
        assert_eq!(encoded.get_i16() as usize, "Unsupported API".len());
        assert_eq!(&encoded[..], b"Unsupported API");
    }

    #[test]
    fn test_encode_error_response_without_message() {
        let mut encoded = encode_response(KafkaResponse::Error {
            correlation_id: 2001,
            error_code: ERROR_UNKNOWN_TOPIC_OR_PARTITION,
            error_message: None,
        })
        .unwrap();
        assert_eq!(encoded.get_i32(), 2001);
        assert_eq!(encoded.get_i16(), ERROR_UNKNOWN_TOPIC_OR_PARTITION);
        assert_eq!(encoded.get_i16(), -1);
    }
}
