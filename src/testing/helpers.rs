//! Test helper functions
//!
//! Fixtures for handler and session tests: a gateway wired to a single-node
//! in-memory backend, and builders for the request data handlers take.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};

use crate::config::GatewayConfig;
use crate::kafka::backend::memory::MemoryBackend;
use crate::kafka::backend::BackendAddress;
use crate::kafka::constants::{DEFAULT_NAMESPACE, PERSISTENT_DOMAIN};
use crate::kafka::context::GatewayContext;
use crate::kafka::coordinator::{JoinOutcome, JoinRequest};
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::messages::{
    PartitionFetchData, PartitionProduceData, TopicFetchData, TopicProduceData,
};

/// Kafka listener the local test node advertises
pub const TEST_LISTENERS: &str = "PLAINTEXT://127.0.0.1:9092";

/// A gateway whose only backend node is itself
pub struct TestGateway {
    pub gateway: Arc<GatewayContext>,
    pub backend: MemoryBackend,
    pub namespace: String,
    pub client_host: String,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build with a tweaked default configuration
    pub fn with_config(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let mut config = GatewayConfig {
            listeners: TEST_LISTENERS.to_string(),
            ..GatewayConfig::default()
        };
        configure(&mut config);

        let backend = MemoryBackend::single_node(BackendAddress::new("127.0.0.1", 6650), TEST_LISTENERS);
        let gateway = GatewayContext::new(config, backend.collaborators());
        Self {
            gateway,
            backend,
            namespace: DEFAULT_NAMESPACE.to_string(),
            client_host: "/127.0.0.1".to_string(),
        }
    }

    pub fn ctx(&self) -> HandlerContext<'_> {
        HandlerContext::new(&self.gateway, &self.namespace, &self.client_host)
    }

    /// Register a topic in the default namespace
    pub fn add_topic(&self, name: &str, partitions: i32) {
        self.backend.admin.add_topic(
            &format!("{}{}/{}", PERSISTENT_DOMAIN, self.namespace, name),
            partitions,
        );
    }

    /// Join `group` as a fresh consumer member
    pub fn join(&self, group: &str) -> JoinOutcome {
        self.gateway
            .coordinator
            .join_group(JoinRequest {
                group_id: group.to_string(),
                member_id: String::new(),
                client_id: "test-client".to_string(),
                client_host: self.client_host.clone(),
                session_timeout_ms: 30_000,
                rebalance_timeout_ms: 30_000,
                protocol_type: "consumer".to_string(),
                protocols: vec![("range".to_string(), Vec::new())],
                group_instance_id: None,
            })
            .unwrap()
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
            timestamp: 1_000 + i as i64,
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

/// Produce data for a single partition
pub fn produce_data(topic: &str, partition: i32, records: Bytes) -> Vec<TopicProduceData> {
    vec![TopicProduceData {
        name: topic.to_string(),
        partitions: vec![PartitionProduceData {
            partition_index: partition,
            records: Some(records),
        }],
    }]
}

/// Fetch data for a single partition with a generous byte limit
pub fn fetch_data(topic: &str, partition: i32, offset: i64) -> Vec<TopicFetchData> {
    vec![TopicFetchData {
        name: topic.to_string(),
        partitions: vec![PartitionFetchData {
            partition_index: partition,
            fetch_offset: offset,
            partition_max_bytes: 1024 * 1024,
        }],
    }]
}

/// Poll `condition` until it holds, for work handlers leave to background tasks
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}
