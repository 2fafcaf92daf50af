// Per-connection request orchestration
//
// A `KafkaSession` accepts decoded requests one at a time and completes each
// request's response handle exactly once. Produce requests go through the
// connection's ordering queue; everything else runs on its own task and may
// complete out of order. The listener restores receipt order when writing.
//
// Teardown flips the liveness flag, fails queued produce batches and aborts
// in-flight tasks. An aborted task drops its `ResponseHandle`, which answers
// with the channel-closing error, so nothing is left unanswered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kafka_protocol::messages::produce_response::ProduceResponse;
use parking_lot::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::constants::ERROR_ILLEGAL_SASL_STATE;
use super::context::GatewayContext;
use super::dispatch::{dispatch_error, dispatch_response};
use super::error::KafkaError;
use super::handler_context::HandlerContext;
use super::handlers::{self, JoinGroupParams};
use super::messages::{
    KafkaRequest, KafkaResponse, PendingRequest, RequestHeader, ResponseHandle, TopicProduceData,
};
use super::produce_queue::{ProduceEntry, ProduceQueue, ProduceWriter};

/// Writes produce batches through the produce handler
struct HandlerProduceWriter {
    gateway: Arc<GatewayContext>,
    client_host: String,
}

#[async_trait]
impl ProduceWriter for HandlerProduceWriter {
    async fn write(&self, namespace: &str, topic_data: Vec<TopicProduceData>) -> ProduceResponse {
        let ctx = HandlerContext::new(&self.gateway, namespace, &self.client_host);
        handlers::handle_produce(&ctx, topic_data).await
    }
}

pub struct KafkaSession {
    gateway: Arc<GatewayContext>,
    peer: SocketAddr,
    /// Peer as reported in group descriptions
    client_host: String,
    live: AtomicBool,
    namespace: RwLock<String>,
    role: RwLock<Option<String>>,
    /// Mechanism accepted by SaslHandshake
    sasl_mechanism: RwLock<Option<String>>,
    produce_queue: Arc<ProduceQueue>,
    in_flight: Mutex<HashMap<u64, AbortHandle>>,
    next_task: AtomicU64,
}

impl KafkaSession {
    pub fn new(gateway: Arc<GatewayContext>, peer: SocketAddr) -> Arc<Self> {
        let client_host = format!("/{}", peer.ip());
        let namespace = gateway.config().namespace.clone();
        let writer = Arc::new(HandlerProduceWriter {
            gateway: Arc::clone(&gateway),
            client_host: client_host.clone(),
        });
        Arc::new(Self {
            gateway,
            peer,
            client_host,
            live: AtomicBool::new(true),
            namespace: RwLock::new(namespace),
            role: RwLock::new(None),
            sasl_mechanism: RwLock::new(None),
            produce_queue: ProduceQueue::new(writer),
            in_flight: Mutex::new(HashMap::new()),
            next_task: AtomicU64::new(0),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Namespace topic names are currently qualified with
    pub fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    /// Role bound by SASL, if any
    pub fn role(&self) -> Option<String> {
        self.role.read().clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Number of produce batches queued or running
    pub fn pending_produces(&self) -> usize {
        self.produce_queue.len()
    }

    /// Accept one request. Never blocks; the response arrives on the handle.
    pub fn submit(self: &Arc<Self>, request: PendingRequest) {
        let PendingRequest {
            header,
            body,
            handle,
        } = request;
        let name = body.name();
        debug!(
            peer = %self.peer,
            correlation_id = header.correlation_id,
            api_version = header.api_version,
            "{}",
            name
        );

        if !self.is_live() {
            dispatch_error(name, handle, Some(&body), KafkaError::ChannelClosing);
            return;
        }
        if self.needs_authentication(&body) {
            dispatch_error(
                name,
                handle,
                Some(&body),
                KafkaError::Protocol {
                    code: ERROR_ILLEGAL_SASL_STATE,
                    message: "authentication required".to_string(),
                },
            );
            return;
        }

        match body {
            KafkaRequest::ApiVersions => {
                dispatch_response(name, handle, &body, Ok(handlers::handle_api_versions()), |h, response| {
                    KafkaResponse::ApiVersions {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::Unsupported => {
                dispatch_error(
                    name,
                    handle,
                    Some(&body),
                    KafkaError::Unsupported(format!("API key {}", header.api_key)),
                );
            }
            KafkaRequest::Produce {
                transactional_id: Some(_),
                ..
            } => {
                dispatch_error(
                    name,
                    handle,
                    Some(&body),
                    KafkaError::Unsupported("transactional produce".to_string()),
                );
            }
            KafkaRequest::Produce { topic_data, .. } => {
                self.produce_queue.submit(ProduceEntry {
                    header,
                    namespace: self.namespace(),
                    topic_data,
                    handle,
                });
            }
            body => self.spawn_dispatch(header, body, handle),
        }
    }

    /// Tear the session down
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            return;
        }
        self.produce_queue.fail_pending();

        let tasks: Vec<AbortHandle> = self.in_flight.lock().drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.abort();
        }

        let namespace = self.namespace();
        self.gateway.topics.release_namespace(&namespace);
        info!(
            peer = %self.peer,
            namespace = %namespace,
            aborted = tasks.len(),
            "session closed"
        );
    }

    fn needs_authentication(&self, body: &KafkaRequest) -> bool {
        if !self.gateway.config().sasl_enabled || self.role.read().is_some() {
            return false;
        }
        !matches!(
            body,
            KafkaRequest::ApiVersions
                | KafkaRequest::SaslHandshake { .. }
                | KafkaRequest::SaslAuthenticate { .. }
        )
    }

    fn spawn_dispatch(self: &Arc<Self>, header: RequestHeader, body: KafkaRequest, handle: ResponseHandle) {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let session = Arc::clone(self);
        // Held across spawn so the task's own removal cannot run before the insert
        let mut in_flight = self.in_flight.lock();
        let task = tokio::spawn(async move {
            session.dispatch(header, body, handle).await;
            session.in_flight.lock().remove(&id);
        });
        in_flight.insert(id, task.abort_handle());
    }

    async fn dispatch(&self, header: RequestHeader, body: KafkaRequest, handle: ResponseHandle) {
        let namespace = self.namespace();
        let ctx = HandlerContext::new(&self.gateway, &namespace, &self.client_host);
        let name = body.name();

        match &body {
            KafkaRequest::Metadata { topics } => {
                let result = handlers::handle_metadata(&ctx, topics.as_deref()).await;
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::Metadata {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::Fetch {
                max_wait_ms,
                topic_data,
                ..
            } => {
                let result = handlers::handle_fetch(&ctx, *max_wait_ms, topic_data).await;
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::Fetch {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::ListOffsets { topics, .. } => {
                let result = handlers::handle_list_offsets(&ctx, header.api_version, topics).await;
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::ListOffsets {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::OffsetCommit {
                group_id,
                generation_id,
                member_id,
                topics,
            } => {
                let result =
                    handlers::handle_offset_commit(&ctx, group_id, *generation_id, member_id, topics);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::OffsetCommit {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::OffsetFetch { group_id, topics } => {
                let result = handlers::handle_offset_fetch(&ctx, group_id, topics.as_deref());
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::OffsetFetch {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::FindCoordinator { key, key_type } => {
                let result = handlers::handle_find_coordinator(&ctx, key, *key_type).await;
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::FindCoordinator {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::JoinGroup {
                group_id,
                member_id,
                session_timeout_ms,
                rebalance_timeout_ms,
                protocol_type,
                protocols,
                group_instance_id,
            } => {
                let result = handlers::handle_join_group(
                    &ctx,
                    JoinGroupParams {
                        group_id,
                        member_id,
                        client_id: header.client_id.as_deref().unwrap_or_default(),
                        session_timeout_ms: *session_timeout_ms,
                        rebalance_timeout_ms: *rebalance_timeout_ms,
                        protocol_type,
                        protocols,
                        group_instance_id: group_instance_id.as_deref(),
                    },
                );
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::JoinGroup {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::SyncGroup {
                group_id,
                generation_id,
                member_id,
                assignments,
                ..
            } => {
                let result =
                    handlers::handle_sync_group(&ctx, group_id, member_id, *generation_id, assignments);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::SyncGroup {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::Heartbeat {
                group_id,
                generation_id,
                member_id,
            } => {
                let result = handlers::handle_heartbeat(&ctx, group_id, member_id, *generation_id);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::Heartbeat {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::LeaveGroup { group_id, members } => {
                let result = handlers::handle_leave_group(&ctx, group_id, members);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::LeaveGroup {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::DescribeGroups { groups } => {
                let result = handlers::handle_describe_groups(&ctx, groups);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::DescribeGroups {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::ListGroups => {
                let result = handlers::handle_list_groups(&ctx);
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::ListGroups {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::DeleteGroups { groups } => {
                let result = handlers::handle_delete_groups(&ctx, groups).await;
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::DeleteGroups {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::SaslHandshake { mechanism } => {
                let response = handlers::handle_sasl_handshake(&ctx, mechanism);
                if response.error_code == 0 {
                    *self.sasl_mechanism.write() = Some(mechanism.clone());
                }
                dispatch_response(name, handle, &body, Ok(response), |h, response| {
                    KafkaResponse::SaslHandshake {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::SaslAuthenticate { auth_bytes } => {
                if self.sasl_mechanism.read().is_none() {
                    dispatch_error(
                        name,
                        handle,
                        Some(&body),
                        KafkaError::Protocol {
                            code: ERROR_ILLEGAL_SASL_STATE,
                            message: "SaslAuthenticate before SaslHandshake".to_string(),
                        },
                    );
                    return;
                }
                let result = handlers::handle_sasl_authenticate(&ctx, auth_bytes)
                    .await
                    .map(|(response, principal)| {
                        *self.role.write() = Some(principal.role);
                        *self.namespace.write() = principal.namespace;
                        response
                    });
                dispatch_response(name, handle, &body, result, |h, response| {
                    KafkaResponse::SaslAuthenticate {
                        correlation_id: h.correlation_id,
                        api_version: h.api_version,
                        response,
                    }
                });
            }
            KafkaRequest::ApiVersions | KafkaRequest::Produce { .. } | KafkaRequest::Unsupported => {
                dispatch_error(
                    name,
                    handle,
                    Some(&body),
                    KafkaError::Internal(format!("{} is answered on submit", name)),
                );
            }
        }
    }
}

impl Drop for KafkaSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::constants::{
        API_KEY_API_VERSIONS, API_KEY_HEARTBEAT, API_KEY_PRODUCE, API_KEY_SASL_AUTHENTICATE,
        API_KEY_SASL_HANDSHAKE, CHANNEL_CLOSING_MESSAGE, ERROR_LEADER_NOT_AVAILABLE, ERROR_NONE,
        ERROR_UNSUPPORTED_VERSION,
    };
    use crate::testing::helpers::{produce_data, record_batch, TestGateway};

    fn header(api_key: i16, api_version: i16, correlation_id: i32) -> RequestHeader {
        RequestHeader {
            api_key,
            api_version,
            correlation_id,
            client_id: Some("test".to_string()),
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.7:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_api_versions_answered_inline() {
        let gw = TestGateway::new();
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        let (request, mut rx) =
            PendingRequest::new(header(API_KEY_API_VERSIONS, 3, 1), KafkaRequest::ApiVersions);
        session.submit(request);

        match rx.try_recv().unwrap() {
            KafkaResponse::ApiVersions { response, .. } => {
                assert_eq!(response.error_code, ERROR_NONE);
                assert!(!response.api_keys.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsupported_request() {
        let gw = TestGateway::new();
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        let (request, rx) = PendingRequest::new(header(22, 1, 9), KafkaRequest::Unsupported);
        session.submit(request);

        match rx.await.unwrap() {
            KafkaResponse::Error {
                correlation_id,
                error_code,
                ..
            } => {
                assert_eq!(correlation_id, 9);
                assert_eq!(error_code, ERROR_UNSUPPORTED_VERSION);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transactional_produce_rejected() {
        let gw = TestGateway::new();
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        let (request, rx) = PendingRequest::new(
            header(API_KEY_PRODUCE, 7, 3),
            KafkaRequest::Produce {
                transactional_id: Some("txn".to_string()),
                acks: -1,
                timeout_ms: 1000,
                topic_data: produce_data("orders", 0, record_batch(&["a"])),
            },
        );
        session.submit(request);

        match rx.await.unwrap() {
            KafkaResponse::Produce { response, .. } => {
                let partition = &response.responses[0].partition_responses[0];
                assert_eq!(partition.error_code, ERROR_UNSUPPORTED_VERSION);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gw.backend.logs.open_count(), 0);
    }

    fn heartbeat(correlation_id: i32) -> (PendingRequest, tokio::sync::oneshot::Receiver<KafkaResponse>) {
        PendingRequest::new(
            header(API_KEY_HEARTBEAT, 4, correlation_id),
            KafkaRequest::Heartbeat {
                group_id: "g".to_string(),
                generation_id: 1,
                member_id: "m".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_closed_session_answers_channel_closing() {
        let gw = TestGateway::new();
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        session.close();
        assert!(!session.is_live());

        let (request, rx) = heartbeat(4);
        session.submit(request);
        match rx.await.unwrap() {
            KafkaResponse::Heartbeat {
                correlation_id,
                response,
                ..
            } => {
                assert_eq!(correlation_id, 4);
                assert_eq!(response.error_code, ERROR_LEADER_NOT_AVAILABLE);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_fails_queued_produce() {
        let gw = TestGateway::new();
        gw.backend
            .logs
            .log(&gw.ctx().resource_for("orders", 0))
            .set_append_delay(std::time::Duration::from_secs(60));
        let session = KafkaSession::new(gw.gateway.clone(), peer());

        let mut receivers = Vec::new();
        for correlation_id in 0..2 {
            let (request, rx) = PendingRequest::new(
                header(API_KEY_PRODUCE, 7, correlation_id),
                KafkaRequest::Produce {
                    transactional_id: None,
                    acks: 1,
                    timeout_ms: 1000,
                    topic_data: produce_data("orders", 0, record_batch(&["a"])),
                },
            );
            session.submit(request);
            receivers.push(rx);
        }
        session.close();

        for rx in receivers {
            match rx.await.unwrap() {
                KafkaResponse::Produce { response, .. } => {
                    let partition = &response.responses[0].partition_responses[0];
                    assert_eq!(partition.error_code, ERROR_LEADER_NOT_AVAILABLE);
                    assert_eq!(
                        partition.error_message.as_ref().map(|m| m.as_str()),
                        Some(CHANNEL_CLOSING_MESSAGE)
                    );
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_sasl_required_before_other_requests() {
        let gw = TestGateway::with_config(|c| c.sasl_enabled = true);
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        let (request, rx) = heartbeat(5);
        session.submit(request);
        match rx.await.unwrap() {
            KafkaResponse::Heartbeat { response, .. } => {
                assert_eq!(response.error_code, ERROR_ILLEGAL_SASL_STATE)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sasl_authenticate_rebinds_namespace() {
        let gw = TestGateway::with_config(|c| c.sasl_enabled = true);
        gw.backend.authenticator.add_token("secret", "app");
        gw.backend.admin.grant("tenant/ns", "app", &["produce"]);
        let session = KafkaSession::new(gw.gateway.clone(), peer());

        let (request, rx) = PendingRequest::new(
            header(API_KEY_SASL_HANDSHAKE, 1, 1),
            KafkaRequest::SaslHandshake {
                mechanism: "PLAIN".to_string(),
            },
        );
        session.submit(request);
        rx.await.unwrap();

        let (request, rx) = PendingRequest::new(
            header(API_KEY_SASL_AUTHENTICATE, 2, 2),
            KafkaRequest::SaslAuthenticate {
                auth_bytes: bytes::Bytes::from_static(b"\0tenant/ns\0token:secret"),
            },
        );
        session.submit(request);
        match rx.await.unwrap() {
            KafkaResponse::SaslAuthenticate { response, .. } => {
                assert_eq!(response.error_code, ERROR_NONE)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.role().as_deref(), Some("app"));
        assert_eq!(session.namespace(), "tenant/ns");
    }

    #[tokio::test]
    async fn test_authenticate_without_handshake() {
        let gw = TestGateway::with_config(|c| c.sasl_enabled = true);
        let session = KafkaSession::new(gw.gateway.clone(), peer());
        let (request, rx) = PendingRequest::new(
            header(API_KEY_SASL_AUTHENTICATE, 2, 2),
            KafkaRequest::SaslAuthenticate {
                auth_bytes: bytes::Bytes::from_static(b"\0ns\0token:x"),
            },
        );
        session.submit(request);
        match rx.await.unwrap() {
            KafkaResponse::SaslAuthenticate { response, .. } => {
                assert_eq!(response.error_code, ERROR_ILLEGAL_SASL_STATE)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
