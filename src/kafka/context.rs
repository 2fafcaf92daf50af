//! Gateway-wide shared state
//!
//! One [`GatewayContext`] is built at startup and shared by every connection
//! as an `Arc`. It owns the immutable configuration and the components whose
//! state is shared across connections: the topic/address cache, the metadata
//! resolver, the group coordinator and the offset acknowledgment tracker.
//!
//! # Usage
//!
//! ```rust,ignore
//! let backend = MemoryBackend::single_node(local, "PLAINTEXT://127.0.0.1:9092");
//! let gateway = GatewayContext::new(GatewayConfig::load()?, backend.collaborators());
//!
//! // Cheap pointer copy per connection
//! let session = KafkaSession::new(gateway.clone(), peer);
//! ```

use std::sync::Arc;

use crate::config::GatewayConfig;

use super::backend::{AdminClient, Authenticator, Collaborators};
use super::coordinator::GroupCoordinator;
use super::metadata_resolver::MetadataResolver;
use super::naming::NameTranslator;
use super::offset_acker::OffsetAcker;
use super::topic_manager::TopicManager;

pub struct GatewayContext {
    config: Arc<GatewayConfig>,
    pub topics: Arc<TopicManager>,
    pub resolver: MetadataResolver,
    pub coordinator: GroupCoordinator,
    pub acker: Arc<OffsetAcker>,
    pub admin: Arc<dyn AdminClient>,
    pub authenticator: Arc<dyn Authenticator>,
    pub translator: Arc<dyn NameTranslator>,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig, backend: Collaborators) -> Arc<Self> {
        let config = Arc::new(config);
        let topics = Arc::new(TopicManager::new(backend.log_store, backend.placement));
        let resolver = MetadataResolver::new(
            config.clone(),
            topics.clone(),
            backend.discovery,
            backend.admin.clone(),
            backend.translator.clone(),
        );

        Arc::new(Self {
            config,
            topics,
            resolver,
            coordinator: GroupCoordinator::new(),
            acker: Arc::new(OffsetAcker::new(backend.reader_factory)),
            admin: backend.admin,
            authenticator: backend.authenticator,
            translator: backend.translator,
        })
    }

    /// Current config (single pointer copy)
    pub fn config(&self) -> Arc<GatewayConfig> {
        self.config.clone()
    }

    /// Backend resource for a Kafka (topic, partition) pair in `namespace`
    pub fn resource_for(&self, namespace: &str, topic: &str, partition: i32) -> String {
        self.translator.resource_for(namespace, topic, partition)
    }
}
