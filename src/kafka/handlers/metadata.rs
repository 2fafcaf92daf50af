// Metadata handlers
//
// Handlers for ApiVersions, Metadata and FindCoordinator requests.
// These are discovery-focused APIs: they tell clients what this gateway
// speaks and which node leads each partition or group.

use kafka_protocol::messages::api_versions_response::ApiVersionsResponse;
use kafka_protocol::messages::find_coordinator_response::FindCoordinatorResponse;
use kafka_protocol::messages::metadata_response::MetadataResponse;
use kafka_protocol::messages::BrokerId;
use tracing::debug;

use super::helpers::str_bytes;
use crate::kafka::constants::{
    COORDINATOR_KEY_TYPE_GROUP, COORDINATOR_KEY_TYPE_TRANSACTION, ERROR_LEADER_NOT_AVAILABLE,
    ERROR_NONE,
};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::response_builders::{
    build_api_versions_response, build_find_coordinator_error_response,
};

/// Handle ApiVersions request
///
/// Static table, no backend calls.
pub fn handle_api_versions() -> ApiVersionsResponse {
    build_api_versions_response()
}

/// Handle Metadata request
///
/// `None` or an empty list describes every topic in the connection's namespace.
pub async fn handle_metadata(
    ctx: &HandlerContext<'_>,
    topics: Option<&[String]>,
) -> Result<MetadataResponse> {
    debug!(
        namespace = ctx.namespace,
        requested = topics.map(|t| t.len()).unwrap_or(0),
        "Metadata"
    );
    Ok(ctx
        .gateway
        .resolver
        .topic_metadata(ctx.namespace, topics)
        .await)
}

/// Handle FindCoordinator request
///
/// A group's coordinator is the leader of the offsets partition its id
/// hashes to. Transaction coordinators are not supported.
pub async fn handle_find_coordinator(
    ctx: &HandlerContext<'_>,
    key: &str,
    key_type: i8,
) -> Result<FindCoordinatorResponse> {
    match key_type {
        COORDINATOR_KEY_TYPE_GROUP => {}
        COORDINATOR_KEY_TYPE_TRANSACTION => {
            return Err(KafkaError::Unsupported("transaction coordinator".to_string()))
        }
        other => {
            return Err(KafkaError::Unsupported(format!(
                "FindCoordinator key type {}",
                other
            )))
        }
    }

    let Some(node) = ctx.gateway.resolver.coordinator_for(key).await else {
        debug!(group = key, "no coordinator available");
        return Ok(build_find_coordinator_error_response(
            ERROR_LEADER_NOT_AVAILABLE,
            None,
        ));
    };

    debug!(group = key, node_id = node.node_id, host = %node.host, "coordinator found");
    let mut response = FindCoordinatorResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.error_message = None;
    response.node_id = BrokerId(node.node_id);
    response.host = str_bytes(&node.host);
    response.port = node.port;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::backend::BackendAddress;
    use crate::kafka::constants::{ERROR_UNKNOWN_TOPIC_OR_PARTITION, ERROR_UNSUPPORTED_VERSION};
    use crate::testing::helpers::TestGateway;

    #[tokio::test]
    async fn test_find_coordinator_returns_local_node() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let response = handle_find_coordinator(&ctx, "my-group", COORDINATOR_KEY_TYPE_GROUP)
            .await
            .unwrap();
        assert_eq!(response.error_code, ERROR_NONE);
        assert_eq!(response.host.as_str(), "127.0.0.1");
        assert_eq!(response.port, 9092);
        assert_eq!(response.node_id.0, gw.gateway.resolver.self_node().node_id);
    }

    #[tokio::test]
    async fn test_find_coordinator_without_owner() {
        let gw = TestGateway::new();
        gw.backend.placement.set_default_owner(None);
        let ctx = gw.ctx();
        let response = handle_find_coordinator(&ctx, "my-group", COORDINATOR_KEY_TYPE_GROUP)
            .await
            .unwrap();
        assert_eq!(response.error_code, ERROR_LEADER_NOT_AVAILABLE);
        assert_eq!(response.node_id.0, -1);
    }

    #[tokio::test]
    async fn test_find_transaction_coordinator_unsupported() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let err = handle_find_coordinator(&ctx, "txn", COORDINATOR_KEY_TYPE_TRANSACTION)
            .await
            .unwrap_err();
        assert!(matches!(err, KafkaError::Unsupported(_)));
        assert_eq!(err.to_kafka_error_code(), ERROR_UNSUPPORTED_VERSION);

        let err = handle_find_coordinator(&ctx, "other", 7).await.unwrap_err();
        assert!(matches!(err, KafkaError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_metadata_unknown_topic_without_auto_create() {
        let gw = TestGateway::with_config(|c| c.allow_auto_topic_creation = false);
        let ctx = gw.ctx();
        let requested = vec!["missing".to_string()];
        let response = handle_metadata(&ctx, Some(requested.as_slice()))
            .await
            .unwrap();
        assert_eq!(response.topics.len(), 1);
        assert_eq!(response.topics[0].error_code, ERROR_UNKNOWN_TOPIC_OR_PARTITION);
        assert!(response.topics[0].partitions.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_reports_foreign_leader() {
        let gw = TestGateway::new();
        let foreign = BackendAddress::new("10.0.0.2", 6650);
        gw.backend
            .discovery
            .register(&foreign, "PLAINTEXT://10.0.0.2:9092");
        gw.backend.admin.add_topic("persistent://public/default/t", 1);
        gw.backend.placement.set_owner(
            "persistent://public/default/t-partition-0",
            Some(foreign),
        );

        let ctx = gw.ctx();
        let requested = vec!["t".to_string()];
        let response = handle_metadata(&ctx, Some(requested.as_slice()))
            .await
            .unwrap();
        let partition = &response.topics[0].partitions[0];
        let leader = response
            .brokers
            .iter()
            .find(|b| b.node_id == partition.leader_id)
            .unwrap();
        assert_eq!(leader.host.as_str(), "10.0.0.2");
        // Nothing was attached locally for a foreign partition
        assert_eq!(gw.backend.logs.open_count(), 0);
    }
}
