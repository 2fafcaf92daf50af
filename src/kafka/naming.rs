//! Kafka topic/partition ↔ backend resource names
//!
//! Backend resources are namespace qualified and carry the partition index
//! as a suffix: `persistent://tenant/ns/orders-partition-3`.

use super::constants::{PARTITIONED_TOPIC_SUFFIX, PERSISTENT_DOMAIN};

/// A backend resource name split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    /// Fully-qualified topic name without the partition suffix
    pub full_topic: String,
    /// Topic name as Kafka clients know it
    pub local_name: String,
    /// Partition index, -1 for a non-partitioned resource
    pub partition: i32,
}

/// Deterministic translation between Kafka names and backend resource names
pub trait NameTranslator: Send + Sync {
    /// Qualify a Kafka topic with a namespace; already-qualified names pass through
    fn full_topic_name(&self, namespace: &str, topic: &str) -> String;

    /// Resource name of one partition of a fully-qualified topic
    fn partition_resource(&self, full_topic: &str, partition: i32) -> String;

    /// Inverse of `partition_resource`
    fn parse_resource(&self, resource: &str) -> Option<ResourceName>;

    /// Resource name for a Kafka (topic, partition) pair in `namespace`
    fn resource_for(&self, namespace: &str, topic: &str, partition: i32) -> String {
        self.partition_resource(&self.full_topic_name(namespace, topic), partition)
    }
}

/// `persistent://<namespace>/<topic>-partition-<n>` naming
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionedNameTranslator;

impl NameTranslator for PartitionedNameTranslator {
    fn full_topic_name(&self, namespace: &str, topic: &str) -> String {
        if topic.starts_with(PERSISTENT_DOMAIN) {
            topic.to_string()
        } else {
            format!("{}{}/{}", PERSISTENT_DOMAIN, namespace, topic)
        }
    }

    fn partition_resource(&self, full_topic: &str, partition: i32) -> String {
        format!("{}{}{}", full_topic, PARTITIONED_TOPIC_SUFFIX, partition)
    }

    fn parse_resource(&self, resource: &str) -> Option<ResourceName> {
        let path = resource.strip_prefix(PERSISTENT_DOMAIN)?;
        // tenant/namespace/topic
        let mut parts = path.splitn(3, '/');
        let (_tenant, _namespace, topic) = (parts.next()?, parts.next()?, parts.next()?);
        if topic.is_empty() {
            return None;
        }

        let split = topic
            .rsplit_once(PARTITIONED_TOPIC_SUFFIX)
            .and_then(|(name, index)| match index.parse::<i32>() {
                Ok(partition) if partition >= 0 && !name.is_empty() => {
                    Some((name, partition, PARTITIONED_TOPIC_SUFFIX.len() + index.len()))
                }
                _ => None,
            });

        let (local_name, partition, full_topic) = match split {
            Some((name, partition, suffix_len)) => (
                name,
                partition,
                resource[..resource.len() - suffix_len].to_string(),
            ),
            None => (topic, -1, resource.to_string()),
        };

        Some(ResourceName {
            full_topic,
            local_name: local_name.to_string(),
            partition,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_topic_name_qualifies_local_names() {
        let t = PartitionedNameTranslator;
        assert_eq!(
            t.full_topic_name("public/default", "orders"),
            "persistent://public/default/orders"
        );
        assert_eq!(
            t.full_topic_name("public/default", "persistent://other/ns/orders"),
            "persistent://other/ns/orders"
        );
    }

    #[test]
    fn test_resource_for() {
        let t = PartitionedNameTranslator;
        assert_eq!(
            t.resource_for("public/default", "orders", 2),
            "persistent://public/default/orders-partition-2"
        );
    }

    #[test]
    fn test_parse_partitioned_resource() {
        let t = PartitionedNameTranslator;
        let parsed = t
            .parse_resource("persistent://public/default/orders-partition-11")
            .unwrap();
        assert_eq!(parsed.full_topic, "persistent://public/default/orders");
        assert_eq!(parsed.local_name, "orders");
        assert_eq!(parsed.partition, 11);
    }

    #[test]
    fn test_parse_non_partitioned_resource() {
        let t = PartitionedNameTranslator;
        let parsed = t.parse_resource("persistent://public/default/plain").unwrap();
        assert_eq!(parsed.full_topic, "persistent://public/default/plain");
        assert_eq!(parsed.partition, -1);
    }

    #[test]
    fn test_parse_topic_with_dashes() {
        let t = PartitionedNameTranslator;
        let parsed = t
            .parse_resource("persistent://public/default/my-partition-topic-partition-0")
            .unwrap();
        assert_eq!(parsed.local_name, "my-partition-topic");
        assert_eq!(parsed.partition, 0);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        let t = PartitionedNameTranslator;
        assert!(t.parse_resource("orders-partition-0").is_none());
        assert!(t.parse_resource("persistent://public/default").is_none());
    }
}
