//! Handler context for unified parameter passing
//!
//! Every handler takes `&HandlerContext` first: the shared gateway plus the
//! few per-connection values a handler may need (namespace, client host).
//! Adding context means adding a field here, not touching every signature.

use std::sync::Arc;

use super::backend::LogHandle;
use super::context::GatewayContext;
use super::error::{KafkaError, Result};

pub struct HandlerContext<'a> {
    /// Shared state: resolver, coordinator, offset tracker, collaborators
    pub gateway: &'a GatewayContext,

    /// Namespace Kafka topic names are qualified with
    ///
    /// The configured default until SASL binds the connection elsewhere.
    pub namespace: &'a str,

    /// Peer address as reported in group descriptions, e.g. `/10.0.0.7`
    pub client_host: &'a str,
}

impl<'a> HandlerContext<'a> {
    pub fn new(gateway: &'a GatewayContext, namespace: &'a str, client_host: &'a str) -> Self {
        Self {
            gateway,
            namespace,
            client_host,
        }
    }

    /// Fully-qualified backend topic for a Kafka topic name
    pub fn full_topic(&self, topic: &str) -> String {
        self.gateway.translator.full_topic_name(self.namespace, topic)
    }

    /// Backend resource for one partition of a Kafka topic
    pub fn resource_for(&self, topic: &str, partition: i32) -> String {
        self.gateway.resource_for(self.namespace, topic, partition)
    }

    /// Attached log for one partition
    ///
    /// Any attach failure is reported as leader-not-available so the client
    /// refreshes metadata and retries.
    pub async fn log_for(&self, topic: &str, partition: i32) -> Result<Arc<dyn LogHandle>> {
        let resource = self.resource_for(topic, partition);
        self.gateway
            .topics
            .get_topic(&resource)
            .await
            .map_err(|e| match e {
                KafkaError::LeaderNotAvailable(_) => e,
                other => KafkaError::LeaderNotAvailable(format!("{}: {}", resource, other)),
            })
    }

    /// Partition count of a Kafka topic, or TopicNotFound
    pub async fn partition_count(&self, topic: &str) -> Result<i32> {
        let full_topic = self.full_topic(topic);
        let count = self.gateway.admin.partition_count_of(&full_topic).await?;
        if count <= 0 {
            return Err(KafkaError::TopicNotFound(topic.to_string()));
        }
        Ok(count)
    }
}
