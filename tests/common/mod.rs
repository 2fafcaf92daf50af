// Shared fixtures for integration tests
//
// A gateway wired to a single-node in-memory backend, plus builders for
// record batches and wire frames.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_bridge::kafka::backend::memory::MemoryBackend;
use kafka_bridge::kafka::backend::BackendAddress;
use kafka_bridge::kafka::messages::{PartitionProduceData, RequestHeader, TopicProduceData};
use kafka_bridge::{GatewayConfig, GatewayContext};
use kafka_protocol::messages::RequestHeader as WireHeader;
use kafka_protocol::protocol::{Encodable, StrBytes};
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};

pub const LISTENERS: &str = "PLAINTEXT://127.0.0.1:9092";

pub struct Fixture {
    pub gateway: Arc<GatewayContext>,
    pub backend: MemoryBackend,
}

pub fn fixture(configure: impl FnOnce(&mut GatewayConfig)) -> Fixture {
    let mut config = GatewayConfig {
        listeners: LISTENERS.to_string(),
        ..GatewayConfig::default()
    };
    configure(&mut config);
    let backend = MemoryBackend::single_node(BackendAddress::new("127.0.0.1", 6650), LISTENERS);
    let gateway = GatewayContext::new(config, backend.collaborators());
    Fixture { gateway, backend }
}

pub fn peer() -> SocketAddr {
    "10.1.2.3:41000".parse().unwrap()
}

pub fn header(api_key: i16, api_version: i16, correlation_id: i32) -> RequestHeader {
    RequestHeader {
        api_key,
        api_version,
        correlation_id,
        client_id: Some("it-client".to_string()),
    }
}

/// Encode `values` as one v2 record batch
pub fn record_batch(values: &[&str]) -> Bytes {
    let records: Vec<Record> = values
        .iter()
        .enumerate()
        .map(|(i, value)| Record {
            transactional: false,
            control: false,
            partition_leader_epoch: 0,
            producer_id: -1,
            producer_epoch: -1,
            timestamp_type: TimestampType::Creation,
            offset: i as i64,
            sequence: i as i32,
            timestamp: 5_000 + i as i64,
            key: None,
            value: Some(Bytes::copy_from_slice(value.as_bytes())),
            headers: Default::default(),
        })
        .collect();

    let mut encoded = BytesMut::new();
    RecordBatchEncoder::encode(
        &mut encoded,
        records.iter(),
        &RecordEncodeOptions {
            version: 2,
            compression: Compression::None,
        },
    )
    .unwrap();
    encoded.freeze()
}

/// Produce data touching `partitions` of `topic`, one batch each
pub fn produce_data(topic: &str, partitions: &[i32]) -> Vec<TopicProduceData> {
    vec![TopicProduceData {
        name: topic.to_string(),
        partitions: partitions
            .iter()
            .map(|&partition_index| PartitionProduceData {
                partition_index,
                records: Some(record_batch(&["v"])),
            })
            .collect(),
    }]
}

/// Size-prefixed request frame with a v1 (non-flexible) header
pub fn wire_frame<T: Encodable>(
    api_key: i16,
    api_version: i16,
    correlation_id: i32,
    body: &T,
) -> Bytes {
    let header = WireHeader::default()
        .with_request_api_key(api_key)
        .with_request_api_version(api_version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_static_str("it-client")));
    let mut payload = BytesMut::new();
    header.encode(&mut payload, 1).unwrap();
    body.encode(&mut payload, api_version).unwrap();

    let mut frame = BytesMut::new();
    frame.put_i32(payload.len() as i32);
    frame.put(payload);
    frame.freeze()
}
