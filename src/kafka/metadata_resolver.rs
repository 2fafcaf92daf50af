// Partition leader and topic metadata resolution
//
// The backend decides which node owns a partition and may move it at any
// time. Clients only understand Kafka brokers, so each owner is translated:
//
//   placement address (host:port of the backend node)
//     → that node's service-discovery record (matched by host:port)
//     → its advertised Kafka listener for our security mode
//     → NodeDescriptor (murmur3 node id)
//
// An owner that turns out to be another node evicts the cached address so the
// next lookup asks placement again. An owner that is this node gets its log
// attached before the answer is returned.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use futures::future::join_all;
use kafka_protocol::messages::metadata_response::{MetadataResponse, MetadataResponsePartition};
use tracing::{debug, warn};

use super::backend::{AdminClient, BackendAddress, DiscoveryRegistry};
use super::broker_metadata::NodeDescriptor;
use super::constants::{
    DEFAULT_KAFKA_PORT, ERROR_NONE, ERROR_NOT_LEADER_FOR_PARTITION,
    ERROR_UNKNOWN_TOPIC_OR_PARTITION, KAFKA_PROTOCOL_NAME, PERSISTENT_DOMAIN,
};
use super::naming::NameTranslator;
use super::response_builders::{
    build_broker_metadata, build_failed_partition_metadata, build_partition_metadata,
    build_self_only_metadata, build_topic_metadata,
};
use super::topic_manager::TopicManager;
use crate::config::GatewayConfig;

/// One topic to describe: the name to answer with and its partition resources
struct TopicPlan {
    answer_name: String,
    /// (partition index, backend resource)
    partitions: Vec<(i32, String)>,
    error_code: i16,
}

impl TopicPlan {
    fn failed(answer_name: String, error_code: i16) -> Self {
        Self {
            answer_name,
            partitions: Vec::new(),
            error_code,
        }
    }
}

pub struct MetadataResolver {
    config: Arc<GatewayConfig>,
    topics: Arc<TopicManager>,
    discovery: Arc<dyn DiscoveryRegistry>,
    admin: Arc<dyn AdminClient>,
    translator: Arc<dyn NameTranslator>,
}

impl MetadataResolver {
    pub fn new(
        config: Arc<GatewayConfig>,
        topics: Arc<TopicManager>,
        discovery: Arc<dyn DiscoveryRegistry>,
        admin: Arc<dyn AdminClient>,
        translator: Arc<dyn NameTranslator>,
    ) -> Self {
        Self {
            config,
            topics,
            discovery,
            admin,
            translator,
        }
    }

    /// The node clients reach this gateway instance at
    pub fn self_node(&self) -> NodeDescriptor {
        NodeDescriptor::new(
            self.config.advertised_address.clone(),
            self.config.advertised_port().unwrap_or(DEFAULT_KAFKA_PORT),
        )
    }

    /// Node currently leading the partition stored as `resource`
    ///
    /// None when placement has no owner, the owner cannot be matched to an
    /// advertised Kafka listener, or a local attach fails.
    pub async fn resolve(&self, resource: &str) -> Option<NodeDescriptor> {
        let address = match self.topics.topic_broker(resource).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                debug!(resource, "no owner for resource");
                return None;
            }
            Err(e) => {
                warn!(resource, error = %e, "owner lookup failed");
                return None;
            }
        };

        let Some(listeners) = self.advertised_listeners_for(&address).await else {
            debug!(resource, owner = %address.host_port(), "owner advertises no kafka listener");
            self.topics.remove_lookup_cache(resource);
            return None;
        };

        let Some(url) = self.config.select_listener(&listeners) else {
            warn!(resource, listeners = %listeners, "no listener for our security mode");
            self.topics.remove_lookup_cache(resource);
            return None;
        };
        let Some(node) = NodeDescriptor::from_listener_url(&url) else {
            warn!(resource, url = %url, "unparsable advertised listener");
            self.topics.remove_lookup_cache(resource);
            return None;
        };

        if !self.config.is_local_listener(&url) {
            // Owned elsewhere: never trust the cached address on the next lookup
            self.topics.remove_lookup_cache(resource);
            return Some(node);
        }

        if !self.topics.is_attached(resource) {
            if let Err(e) = self.topics.get_topic(resource).await {
                warn!(resource, error = %e, "failed to attach locally owned resource");
                return None;
            }
        }
        Some(node)
    }

    /// Kafka listener string the backend node at `address` advertises
    pub async fn advertised_listeners_for(&self, address: &BackendAddress) -> Option<String> {
        let nodes = match self.discovery.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "failed to list discovery nodes");
                return None;
            }
        };

        let host_prefix = format!("{}:", address.host);
        let candidates: Vec<String> = nodes
            .into_iter()
            .filter(|node| node.starts_with(&host_prefix))
            .collect();

        let records = join_all(candidates.iter().map(|node| self.discovery.data_of(node))).await;
        let host_port = address.host_port();
        records
            .into_iter()
            .filter_map(|record| match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "failed to read discovery record");
                    None
                }
            })
            .find(|record| record.contains_address(&host_port))
            .and_then(|record| record.protocol(KAFKA_PROTOCOL_NAME).map(str::to_string))
    }

    /// Partition of the offsets topic that stores `group`
    pub fn offsets_partition_for(&self, group: &str) -> i32 {
        partition_for(group, self.config.offsets_topic_partitions)
    }

    /// Backend resource of the offsets partition that stores `group`
    pub fn offsets_resource_for(&self, group: &str) -> String {
        self.translator.resource_for(
            &self.config.metadata_namespace,
            &self.config.offsets_topic_name,
            self.offsets_partition_for(group),
        )
    }

    /// Coordinator node for `group`: the leader of its offsets partition
    pub async fn coordinator_for(&self, group: &str) -> Option<NodeDescriptor> {
        self.resolve(&self.offsets_resource_for(group)).await
    }

    /// Metadata for `requested` topics in `namespace`, or every topic when none are named
    ///
    /// Completes only after every partition of every topic has resolved.
    pub async fn topic_metadata(
        &self,
        namespace: &str,
        requested: Option<&[String]>,
    ) -> MetadataResponse {
        let plans = match requested {
            Some(names) if !names.is_empty() => {
                join_all(names.iter().map(|name| self.plan_named_topic(namespace, name))).await
            }
            _ => self.plan_all_topics(namespace).await,
        };

        let described = join_all(plans.into_iter().map(|plan| self.describe_topic(plan))).await;

        let mut seen = HashSet::new();
        let mut brokers = Vec::new();
        let mut topics = Vec::with_capacity(described.len());
        for (topic, nodes) in described {
            for node in nodes {
                if seen.insert(node.node_id) {
                    brokers.push(build_broker_metadata(&node));
                }
            }
            topics.push(topic);
        }

        let self_node = self.self_node();
        let mut response = build_self_only_metadata(&self.config.cluster_name, &self_node);
        if !brokers.is_empty() {
            response.brokers = brokers;
        }
        response.topics = topics;
        response
    }

    async fn plan_all_topics(&self, namespace: &str) -> Vec<TopicPlan> {
        let resources = match self.admin.list_topics(namespace).await {
            Ok(resources) => resources,
            Err(e) => {
                warn!(namespace, error = %e, "failed to list topics");
                return Vec::new();
            }
        };

        let mut grouped: BTreeMap<String, Vec<(i32, String)>> = BTreeMap::new();
        for resource in resources {
            let Some(parsed) = self.translator.parse_resource(&resource) else {
                debug!(resource = %resource, "skipping unrecognised resource");
                continue;
            };
            grouped
                .entry(parsed.local_name)
                .or_default()
                .push((parsed.partition.max(0), resource));
        }

        grouped
            .into_iter()
            .map(|(answer_name, mut partitions)| {
                partitions.sort_by_key(|(index, _)| *index);
                TopicPlan {
                    answer_name,
                    partitions,
                    error_code: ERROR_NONE,
                }
            })
            .collect()
    }

    async fn plan_named_topic(&self, namespace: &str, name: &str) -> TopicPlan {
        let full = self.translator.full_topic_name(namespace, name);
        let answer_name = if name.starts_with(PERSISTENT_DOMAIN) {
            full.clone()
        } else {
            name.to_string()
        };

        let count = match self.admin.partition_count_of(&full).await {
            Ok(count) => count,
            Err(e) => {
                warn!(topic = %full, error = %e, "failed to read partition count");
                return TopicPlan::failed(answer_name, ERROR_UNKNOWN_TOPIC_OR_PARTITION);
            }
        };

        let count = if count > 0 {
            count
        } else if self.config.allow_auto_topic_creation {
            if let Err(e) = self.admin.create_partitioned_topic(&full, 1).await {
                warn!(topic = %full, error = %e, "auto topic creation failed");
                return TopicPlan::failed(answer_name, ERROR_UNKNOWN_TOPIC_OR_PARTITION);
            }
            debug!(topic = %full, "auto-created topic with one partition");
            1
        } else {
            return TopicPlan::failed(answer_name, ERROR_UNKNOWN_TOPIC_OR_PARTITION);
        };

        TopicPlan {
            answer_name,
            partitions: (0..count)
                .map(|p| (p, self.translator.partition_resource(&full, p)))
                .collect(),
            error_code: ERROR_NONE,
        }
    }

    async fn describe_topic(
        &self,
        plan: TopicPlan,
    ) -> (
        kafka_protocol::messages::metadata_response::MetadataResponseTopic,
        Vec<NodeDescriptor>,
    ) {
        let resolved = join_all(
            plan.partitions
                .iter()
                .map(|(_, resource)| self.resolve(resource)),
        )
        .await;

        let mut nodes = Vec::new();
        let partitions: Vec<MetadataResponsePartition> = plan
            .partitions
            .iter()
            .zip(resolved)
            .map(|((index, _), node)| match node {
                Some(node) => {
                    let partition = build_partition_metadata(*index, &node);
                    nodes.push(node);
                    partition
                }
                None => build_failed_partition_metadata(*index, ERROR_NOT_LEADER_FOR_PARTITION),
            })
            .collect();

        (
            build_topic_metadata(plan.answer_name, plan.error_code, partitions),
            nodes,
        )
    }
}

/// Stable partition for a group key: murmur3 of the key modulo `partitions`
pub fn partition_for(key: &str, partitions: i32) -> i32 {
    if partitions <= 0 {
        return 0;
    }
    // Reading from an in-memory cursor cannot fail
    let hash = murmur3::murmur3_32(&mut Cursor::new(key.as_bytes()), 0).unwrap_or(0);
    (hash % partitions as u32) as i32
}
