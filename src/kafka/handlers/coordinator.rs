// Consumer group coordinator handlers
//
// Handlers for consumer group management APIs:
// JoinGroup, SyncGroup, Heartbeat, LeaveGroup, DescribeGroups, ListGroups, DeleteGroups
//
// Group state lives in the shared GroupCoordinator. SyncGroup and DeleteGroups
// also drive the offset acknowledgment tracker so backend readers follow the
// group's assignments.

use kafka_protocol::messages::delete_groups_response::{DeletableGroupResult, DeleteGroupsResponse};
use kafka_protocol::messages::describe_groups_response::{
    DescribeGroupsResponse, DescribedGroup, DescribedGroupMember,
};
use kafka_protocol::messages::heartbeat_response::HeartbeatResponse;
use kafka_protocol::messages::join_group_response::{JoinGroupResponse, JoinGroupResponseMember};
use kafka_protocol::messages::leave_group_response::{LeaveGroupResponse, MemberResponse};
use kafka_protocol::messages::list_groups_response::{ListGroupsResponse, ListedGroup};
use kafka_protocol::messages::sync_group_response::SyncGroupResponse;
use tracing::{debug, warn};

use super::helpers::{group_id, str_bytes};
use crate::kafka::assignment::MemberAssignment;
use crate::kafka::constants::ERROR_NONE;
use crate::kafka::coordinator::{GroupState, JoinRequest};
use crate::kafka::error::Result;
use crate::kafka::handler_context::HandlerContext;
use crate::kafka::messages::{JoinGroupProtocol, SyncGroupAssignment};

/// Fields of a JoinGroup request
pub struct JoinGroupParams<'a> {
    pub group_id: &'a str,
    pub member_id: &'a str,
    pub client_id: &'a str,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub protocol_type: &'a str,
    pub protocols: &'a [JoinGroupProtocol],
    pub group_instance_id: Option<&'a str>,
}

/// Handle JoinGroup request
///
/// The leader gets every member's subscription metadata; followers get an
/// empty member list.
pub fn handle_join_group(
    ctx: &HandlerContext<'_>,
    params: JoinGroupParams<'_>,
) -> Result<JoinGroupResponse> {
    debug!(
        group = params.group_id,
        member = params.member_id,
        client = params.client_id,
        "JoinGroup"
    );

    let outcome = ctx.gateway.coordinator.join_group(JoinRequest {
        group_id: params.group_id.to_string(),
        member_id: params.member_id.to_string(),
        client_id: params.client_id.to_string(),
        client_host: ctx.client_host.to_string(),
        session_timeout_ms: params.session_timeout_ms,
        rebalance_timeout_ms: params.rebalance_timeout_ms,
        protocol_type: params.protocol_type.to_string(),
        protocols: params
            .protocols
            .iter()
            .map(|p| (p.name.clone(), p.metadata.clone()))
            .collect(),
        group_instance_id: params.group_instance_id.map(str::to_string),
    })?;

    let mut response = JoinGroupResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.generation_id = outcome.generation_id;
    response.protocol_type = Some(str_bytes(&outcome.protocol_type));
    response.protocol_name = Some(str_bytes(&outcome.protocol_name));
    response.leader = str_bytes(&outcome.leader);
    response.member_id = str_bytes(&outcome.member_id);
    response.members = outcome
        .members
        .into_iter()
        .map(|(member_id, instance_id, metadata)| {
            let mut member = JoinGroupResponseMember::default();
            member.member_id = str_bytes(&member_id);
            member.group_instance_id = instance_id.as_deref().map(str_bytes);
            member.metadata = metadata.into();
            member
        })
        .collect();
    Ok(response)
}

/// Handle SyncGroup request
///
/// When the leader syncs, every assigned partition gets a backend reader for
/// the group so later commits can be acknowledged. Readers are created in the
/// background; the response does not wait for them.
pub fn handle_sync_group(
    ctx: &HandlerContext<'_>,
    group: &str,
    member_id: &str,
    generation_id: i32,
    assignments: &[SyncGroupAssignment],
) -> Result<SyncGroupResponse> {
    debug!(
        group,
        member = member_id,
        generation = generation_id,
        assignments = assignments.len(),
        "SyncGroup"
    );

    let pairs: Vec<(String, Vec<u8>)> = assignments
        .iter()
        .map(|a| (a.member_id.clone(), a.assignment.clone()))
        .collect();
    let own = ctx
        .gateway
        .coordinator
        .sync_group(group, member_id, generation_id, &pairs)?;

    if !assignments.is_empty() {
        let resources = assigned_resources(ctx, group, assignments);
        ctx.gateway.acker.spawn_track(group, resources);
    }

    let mut response = SyncGroupResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.assignment = own.into();
    Ok(response)
}

fn assigned_resources(
    ctx: &HandlerContext<'_>,
    group: &str,
    assignments: &[SyncGroupAssignment],
) -> Vec<String> {
    let mut resources = Vec::new();
    for assignment in assignments {
        if assignment.assignment.is_empty() {
            continue;
        }
        match MemberAssignment::parse(&assignment.assignment) {
            Ok(parsed) => resources.extend(
                parsed
                    .iter_partitions()
                    .map(|(topic, partition)| ctx.resource_for(topic, partition)),
            ),
            Err(e) => warn!(
                group,
                member = %assignment.member_id,
                error = %e,
                "unreadable member assignment"
            ),
        }
    }
    resources.sort();
    resources.dedup();
    resources
}

/// Handle Heartbeat request
pub fn handle_heartbeat(
    ctx: &HandlerContext<'_>,
    group: &str,
    member_id: &str,
    generation_id: i32,
) -> Result<HeartbeatResponse> {
    ctx.gateway
        .coordinator
        .heartbeat(group, member_id, generation_id)?;

    let mut response = HeartbeatResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    Ok(response)
}

/// Handle LeaveGroup request
///
/// Each departing member gets its own error code.
pub fn handle_leave_group(
    ctx: &HandlerContext<'_>,
    group: &str,
    members: &[String],
) -> Result<LeaveGroupResponse> {
    debug!(group, members = members.len(), "LeaveGroup");
    let codes = ctx.gateway.coordinator.leave_group(group, members)?;

    let mut response = LeaveGroupResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.members = members
        .iter()
        .zip(codes)
        .map(|(member_id, code)| {
            let mut member = MemberResponse::default();
            member.member_id = str_bytes(member_id);
            member.error_code = code;
            member
        })
        .collect();
    Ok(response)
}

/// Handle DescribeGroups request
///
/// Unknown groups are reported in the Dead state, as Kafka brokers do.
pub fn handle_describe_groups(
    ctx: &HandlerContext<'_>,
    groups: &[String],
) -> Result<DescribeGroupsResponse> {
    let mut response = DescribeGroupsResponse::default();
    response.throttle_time_ms = 0;
    response.groups = groups
        .iter()
        .map(|name| {
            let mut described = DescribedGroup::default();
            described.group_id = group_id(name);
            described.error_code = ERROR_NONE;

            match ctx.gateway.coordinator.describe_group(name) {
                Some(description) => {
                    described.group_state = str_bytes(description.state.as_str());
                    described.protocol_type = str_bytes(&description.protocol_type);
                    described.protocol_data = str_bytes(&description.protocol_name);
                    described.members = description
                        .members
                        .into_iter()
                        .map(|m| {
                            let mut member = DescribedGroupMember::default();
                            member.member_id = str_bytes(&m.member_id);
                            member.group_instance_id = m.group_instance_id.as_deref().map(str_bytes);
                            member.client_id = str_bytes(&m.client_id);
                            member.client_host = str_bytes(&m.client_host);
                            member.member_metadata = m.metadata.into();
                            member.member_assignment = m.assignment.into();
                            member
                        })
                        .collect();
                }
                None => {
                    described.group_state = str_bytes(GroupState::Dead.as_str());
                    described.protocol_type = str_bytes("");
                    described.protocol_data = str_bytes("");
                }
            }
            described
        })
        .collect();
    Ok(response)
}

/// Handle ListGroups request
pub fn handle_list_groups(ctx: &HandlerContext<'_>) -> Result<ListGroupsResponse> {
    let mut response = ListGroupsResponse::default();
    response.throttle_time_ms = 0;
    response.error_code = ERROR_NONE;
    response.groups = ctx
        .gateway
        .coordinator
        .list_groups()
        .into_iter()
        .map(|(name, protocol_type, state)| {
            let mut listed = ListedGroup::default();
            listed.group_id = group_id(&name);
            listed.protocol_type = str_bytes(&protocol_type);
            listed.group_state = str_bytes(state.as_str());
            listed
        })
        .collect();
    Ok(response)
}

/// Handle DeleteGroups request
///
/// Readers of successfully deleted groups are closed.
pub async fn handle_delete_groups(
    ctx: &HandlerContext<'_>,
    groups: &[String],
) -> Result<DeleteGroupsResponse> {
    let results = ctx.gateway.coordinator.delete_groups(groups);
    let deleted: Vec<String> = results
        .iter()
        .filter(|(_, code)| *code == ERROR_NONE)
        .map(|(name, _)| name.clone())
        .collect();
    if !deleted.is_empty() {
        ctx.gateway.acker.release(&deleted).await;
    }

    let mut response = DeleteGroupsResponse::default();
    response.throttle_time_ms = 0;
    response.results = results
        .into_iter()
        .map(|(name, code)| {
            let mut result = DeletableGroupResult::default();
            result.group_id = group_id(&name);
            result.error_code = code;
            result
        })
        .collect();
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::constants::{
        ERROR_GROUP_ID_NOT_FOUND, ERROR_ILLEGAL_GENERATION, ERROR_NON_EMPTY_GROUP,
        ERROR_UNKNOWN_MEMBER_ID,
    };
    use crate::kafka::error::KafkaError;
    use crate::testing::helpers::{wait_until, TestGateway};

    fn protocols() -> Vec<JoinGroupProtocol> {
        vec![JoinGroupProtocol {
            name: "range".to_string(),
            metadata: vec![0, 1],
        }]
    }

    fn join<'a>(group: &'a str, member: &'a str, protocols: &'a [JoinGroupProtocol]) -> JoinGroupParams<'a> {
        JoinGroupParams {
            group_id: group,
            member_id: member,
            client_id: "client",
            session_timeout_ms: 30_000,
            rebalance_timeout_ms: 30_000,
            protocol_type: "consumer",
            protocols,
            group_instance_id: None,
        }
    }

    #[tokio::test]
    async fn test_join_sync_tracks_assigned_partitions() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let protocols = protocols();

        let joined = handle_join_group(&ctx, join("g1", "", &protocols)).unwrap();
        let member_id = joined.member_id.as_str().to_string();
        assert_eq!(joined.leader.as_str(), member_id);
        assert_eq!(joined.members.len(), 1);
        assert_eq!(joined.protocol_name.as_ref().map(|p| p.as_str()), Some("range"));

        let assignment = MemberAssignment::new(vec![("orders".to_string(), vec![0, 1])]).encode();
        let synced = handle_sync_group(
            &ctx,
            "g1",
            &member_id,
            joined.generation_id,
            &[SyncGroupAssignment {
                member_id: member_id.clone(),
                assignment: assignment.clone(),
            }],
        )
        .unwrap();
        assert_eq!(synced.assignment.as_ref(), assignment.as_slice());
        wait_until(|| gw.gateway.acker.tracked_count("g1") == 2).await;

        let heartbeat = handle_heartbeat(&ctx, "g1", &member_id, joined.generation_id).unwrap();
        assert_eq!(heartbeat.error_code, ERROR_NONE);
    }

    #[tokio::test]
    async fn test_heartbeat_with_stale_generation() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let joined = gw.join("g1");
        let err = handle_heartbeat(&ctx, "g1", &joined.member_id, joined.generation_id - 1)
            .unwrap_err();
        assert_eq!(err.to_kafka_error_code(), ERROR_ILLEGAL_GENERATION);
    }

    #[tokio::test]
    async fn test_leave_reports_per_member_codes() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let joined = gw.join("g1");

        let members = vec![joined.member_id.clone(), "ghost".to_string()];
        let response = handle_leave_group(&ctx, "g1", &members).unwrap();
        assert_eq!(response.members[0].error_code, ERROR_NONE);
        assert_eq!(response.members[1].error_code, ERROR_UNKNOWN_MEMBER_ID);
    }

    #[tokio::test]
    async fn test_leave_unknown_group() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        let err = handle_leave_group(&ctx, "nope", &["m".to_string()]).unwrap_err();
        assert!(matches!(err, KafkaError::CoordinatorError(ERROR_UNKNOWN_MEMBER_ID, _)));
    }

    #[tokio::test]
    async fn test_describe_and_list() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();
        gw.join("g1");

        let described =
            handle_describe_groups(&ctx, &["g1".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(described.groups[0].members.len(), 1);
        assert_eq!(described.groups[0].members[0].client_host.as_str(), "/127.0.0.1");
        assert_eq!(described.groups[1].group_state.as_str(), "Dead");

        let listed = handle_list_groups(&ctx).unwrap();
        assert_eq!(listed.groups.len(), 1);
        assert_eq!(listed.groups[0].group_id.0.as_str(), "g1");
        assert_eq!(listed.groups[0].protocol_type.as_str(), "consumer");
    }

    #[tokio::test]
    async fn test_delete_groups_closes_readers() {
        let gw = TestGateway::new();
        let ctx = gw.ctx();

        let joined = gw.join("busy");
        gw.gateway
            .coordinator
            .commit_offsets("idle", "", -1, Vec::new())
            .unwrap();
        gw.gateway
            .acker
            .acknowledge("idle", &[(ctx.resource_for("orders", 0), 0)])
            .await;

        let response = handle_delete_groups(
            &ctx,
            &["idle".to_string(), "busy".to_string(), "missing".to_string()],
        )
        .await
        .unwrap();
        let codes: Vec<i16> = response.results.iter().map(|r| r.error_code).collect();
        assert_eq!(codes, vec![ERROR_NONE, ERROR_NON_EMPTY_GROUP, ERROR_GROUP_ID_NOT_FOUND]);

        let readers = gw.backend.readers.readers_for(&ctx.resource_for("orders", 0));
        assert!(readers[0].is_closed());
        assert!(gw.gateway.coordinator.get_group_state("idle").is_none());
        assert!(gw
            .gateway
            .coordinator
            .get_group_state("busy")
            .is_some_and(|g| g.members.contains_key(&joined.member_id)));
    }
}
