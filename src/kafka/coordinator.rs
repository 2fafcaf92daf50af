//! Consumer Group Coordinator
//!
//! In-memory group membership plus the committed offset store.
//!
//! # State Machine
//!
//! ```text
//! Empty → PreparingRebalance → CompletingRebalance → Stable → Empty
//!   ↑                                                          ↓
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Empty**: No members in the group (committed offsets may still exist)
//! - **PreparingRebalance**: A member joined or left; generation was bumped
//! - **CompletingRebalance**: Waiting for the leader's SyncGroup
//! - **Stable**: Leader delivered assignments
//! - **Dead**: Group was deleted
//!
//! Offsets are kept per group independent of membership, so a group that
//! only ever commits (generation -1) still has a record here.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::constants::{
    ERROR_GROUP_ID_NOT_FOUND, ERROR_ILLEGAL_GENERATION, ERROR_NONE, ERROR_NON_EMPTY_GROUP,
    ERROR_UNKNOWN_MEMBER_ID,
};
use super::error::{KafkaError, Result};

/// Consumer group member information
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    /// No heartbeat for this long and the member is dropped on the next join
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    /// Supported assignors with their subscription metadata
    pub protocols: Vec<(String, Vec<u8>)>,
    /// Assignment delivered by the leader's SyncGroup
    pub assignment: Option<Vec<u8>>,
    pub last_heartbeat: SystemTime,
    pub group_instance_id: Option<String>,
}

impl GroupMember {
    /// Check if member's session has timed out
    pub fn is_timed_out(&self) -> bool {
        let elapsed = SystemTime::now()
            .duration_since(self.last_heartbeat)
            .unwrap_or(Duration::from_secs(0));
        elapsed.as_millis() > self.session_timeout_ms.max(0) as u128
    }
}

/// Consumer group state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

impl GroupState {
    /// Name reported by DescribeGroups and ListGroups
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupState::Empty => "Empty",
            GroupState::PreparingRebalance => "PreparingRebalance",
            GroupState::CompletingRebalance => "CompletingRebalance",
            GroupState::Stable => "Stable",
            GroupState::Dead => "Dead",
        }
    }
}

/// A committed offset with its client metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOffset {
    pub offset: i64,
    pub metadata: Option<String>,
}

/// Consumer group metadata and state
#[derive(Debug, Clone)]
pub struct ConsumerGroup {
    pub group_id: String,
    /// Incremented on every rebalance
    pub generation_id: i32,
    pub protocol_type: String,
    /// Assignor chosen at join time
    pub protocol_name: Option<String>,
    /// First member to join leads the group
    pub leader: Option<String>,
    pub members: HashMap<String, GroupMember>,
    pub state: GroupState,
    /// (topic, partition) → committed offset
    pub offsets: HashMap<(String, i32), CommittedOffset>,
}

impl ConsumerGroup {
    fn new(group_id: String) -> Self {
        Self {
            group_id,
            generation_id: 0,
            protocol_type: String::new(),
            protocol_name: None,
            leader: None,
            members: HashMap::new(),
            state: GroupState::Empty,
            offsets: HashMap::new(),
        }
    }

    /// Insert or replace a member. Returns true when it is the leader.
    fn add_member(&mut self, member: GroupMember) -> bool {
        let member_id = member.member_id.clone();
        if self.leader.is_none() || self.members.is_empty() {
            self.leader = Some(member_id.clone());
        }
        self.members.insert(member_id.clone(), member);
        self.leader.as_deref() == Some(member_id.as_str())
    }

    fn remove_member(&mut self, member_id: &str) -> bool {
        if self.members.remove(member_id).is_none() {
            return false;
        }
        if self.leader.as_deref() == Some(member_id) {
            self.leader = self.members.keys().next().cloned();
        }
        if self.members.is_empty() {
            self.state = GroupState::Empty;
            self.generation_id = 0;
            self.protocol_name = None;
            self.leader = None;
        }
        true
    }

    fn remove_expired_members(&mut self) {
        let expired: Vec<String> = self
            .members
            .values()
            .filter(|m| m.is_timed_out())
            .map(|m| m.member_id.clone())
            .collect();
        for member_id in expired {
            info!(group = %self.group_id, member = %member_id, "member session expired");
            self.remove_member(&member_id);
        }
    }

    fn start_rebalance(&mut self) {
        self.generation_id += 1;
        self.state = GroupState::PreparingRebalance;
        debug!(
            group = %self.group_id,
            generation = self.generation_id,
            "starting rebalance"
        );
    }

    fn check_member(&self, member_id: &str, generation_id: i32) -> Result<()> {
        if !self.members.contains_key(member_id) {
            return Err(KafkaError::CoordinatorError(
                ERROR_UNKNOWN_MEMBER_ID,
                format!("unknown member {} in group {}", member_id, self.group_id),
            ));
        }
        if self.generation_id != generation_id {
            return Err(KafkaError::CoordinatorError(
                ERROR_ILLEGAL_GENERATION,
                format!(
                    "illegal generation {} for group {} (current {})",
                    generation_id, self.group_id, self.generation_id
                ),
            ));
        }
        Ok(())
    }
}

/// JoinGroup parameters for one member
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub group_id: String,
    /// Empty on first join
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub session_timeout_ms: i32,
    pub rebalance_timeout_ms: i32,
    pub protocol_type: String,
    pub protocols: Vec<(String, Vec<u8>)>,
    pub group_instance_id: Option<String>,
}

/// What a joining member is told
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub member_id: String,
    pub generation_id: i32,
    pub protocol_type: String,
    pub protocol_name: String,
    pub leader: String,
    /// Every member's subscription metadata, only for the leader
    pub members: Vec<(String, Option<String>, Vec<u8>)>,
}

/// A group's membership as reported by DescribeGroups
#[derive(Debug, Clone)]
pub struct GroupDescription {
    pub group_id: String,
    pub state: GroupState,
    pub protocol_type: String,
    pub protocol_name: String,
    /// (member_id, group_instance_id, client_id, client_host, metadata, assignment)
    pub members: Vec<MemberDescription>,
}

#[derive(Debug, Clone)]
pub struct MemberDescription {
    pub member_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
    pub client_host: String,
    pub metadata: Vec<u8>,
    pub assignment: Vec<u8>,
}

/// Thread-safe consumer group coordinator shared by every connection
pub struct GroupCoordinator {
    groups: RwLock<HashMap<String, ConsumerGroup>>,
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Add (or refresh) a member; a new member starts a rebalance
    pub fn join_group(&self, request: JoinRequest) -> Result<JoinOutcome> {
        let mut groups = self.groups.write();
        let group = groups
            .entry(request.group_id.clone())
            .or_insert_with(|| ConsumerGroup::new(request.group_id.clone()));

        group.remove_expired_members();

        let member_id = if group.members.contains_key(&request.member_id) {
            request.member_id.clone()
        } else {
            generate_member_id(&request.client_id)
        };

        let needs_rebalance = match group.state {
            GroupState::Empty | GroupState::Dead => true,
            GroupState::Stable => !group.members.contains_key(&member_id),
            _ => false,
        };
        if needs_rebalance {
            group.start_rebalance();
        }

        if group.protocol_type.is_empty() {
            group.protocol_type = request.protocol_type.clone();
        }
        if group.protocol_name.is_none() {
            group.protocol_name = request.protocols.first().map(|(name, _)| name.clone());
        }
        group.state = GroupState::CompletingRebalance;

        let is_leader = group.add_member(GroupMember {
            member_id: member_id.clone(),
            client_id: request.client_id,
            client_host: request.client_host,
            session_timeout_ms: request.session_timeout_ms,
            rebalance_timeout_ms: request.rebalance_timeout_ms,
            protocols: request.protocols,
            assignment: None,
            last_heartbeat: SystemTime::now(),
            group_instance_id: request.group_instance_id,
        });

        let protocol_name = group.protocol_name.clone().unwrap_or_default();
        let members = if is_leader {
            group
                .members
                .values()
                .map(|m| {
                    let metadata = m
                        .protocols
                        .iter()
                        .find(|(name, _)| *name == protocol_name)
                        .or_else(|| m.protocols.first())
                        .map(|(_, metadata)| metadata.clone())
                        .unwrap_or_default();
                    (m.member_id.clone(), m.group_instance_id.clone(), metadata)
                })
                .collect()
        } else {
            Vec::new()
        };

        debug!(
            group = %group.group_id,
            member = %member_id,
            generation = group.generation_id,
            is_leader,
            "member joined"
        );

        Ok(JoinOutcome {
            member_id,
            generation_id: group.generation_id,
            protocol_type: group.protocol_type.clone(),
            protocol_name,
            leader: group.leader.clone().unwrap_or_default(),
            members,
        })
    }

    /// Store the leader's assignments and return the caller's own
    pub fn sync_group(
        &self,
        group_id: &str,
        member_id: &str,
        generation_id: i32,
        assignments: &[(String, Vec<u8>)],
    ) -> Result<Vec<u8>> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or_else(|| unknown_member(group_id, member_id))?;
        group.check_member(member_id, generation_id)?;

        if group.leader.as_deref() == Some(member_id) {
            for (target, assignment) in assignments {
                if let Some(member) = group.members.get_mut(target) {
                    member.assignment = Some(assignment.clone());
                }
            }
            group.state = GroupState::Stable;
            debug!(group = %group_id, generation = generation_id, "group stable");
        }

        Ok(group
            .members
            .get(member_id)
            .and_then(|m| m.assignment.clone())
            .unwrap_or_default())
    }

    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation_id: i32) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups.get_mut(group_id).ok_or_else(|| unknown_member(group_id, member_id))?;
        group.check_member(member_id, generation_id)?;
        if let Some(member) = group.members.get_mut(member_id) {
            member.last_heartbeat = SystemTime::now();
        }
        Ok(())
    }

    /// Remove members; returns one error code per member, in order
    pub fn leave_group(&self, group_id: &str, member_ids: &[String]) -> Result<Vec<i16>> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| unknown_member(group_id, ""))?;

        let codes = member_ids
            .iter()
            .map(|member_id| {
                if group.remove_member(member_id) {
                    debug!(group = %group_id, member = %member_id, "member left");
                    ERROR_NONE
                } else {
                    ERROR_UNKNOWN_MEMBER_ID
                }
            })
            .collect();
        if !group.members.is_empty() {
            group.start_rebalance();
        }
        Ok(codes)
    }

    /// Record committed offsets
    ///
    /// A generation of -1 is a standalone commit and skips membership checks.
    pub fn commit_offsets(
        &self,
        group_id: &str,
        member_id: &str,
        generation_id: i32,
        offsets: Vec<((String, i32), CommittedOffset)>,
    ) -> Result<()> {
        let mut groups = self.groups.write();
        let group = groups
            .entry(group_id.to_string())
            .or_insert_with(|| ConsumerGroup::new(group_id.to_string()));

        if generation_id >= 0 {
            group.check_member(member_id, generation_id)?;
        }
        if group.state == GroupState::Dead {
            group.state = GroupState::Empty;
        }
        group.offsets.extend(offsets);
        Ok(())
    }

    /// Committed offsets for `partitions`, or every committed partition when None
    pub fn fetch_offsets(
        &self,
        group_id: &str,
        partitions: Option<&[(String, Vec<i32>)]>,
    ) -> Vec<((String, i32), Option<CommittedOffset>)> {
        let groups = self.groups.read();
        let group = groups.get(group_id);

        match partitions {
            Some(requested) => requested
                .iter()
                .flat_map(|(topic, indexes)| indexes.iter().map(move |p| (topic.clone(), *p)))
                .map(|key| {
                    let committed = group.and_then(|g| g.offsets.get(&key).cloned());
                    (key, committed)
                })
                .collect(),
            None => {
                let mut all: Vec<_> = group
                    .map(|g| {
                        g.offsets
                            .iter()
                            .map(|(k, v)| (k.clone(), Some(v.clone())))
                            .collect()
                    })
                    .unwrap_or_default();
                all.sort_by(|a, b| a.0.cmp(&b.0));
                all
            }
        }
    }

    pub fn describe_group(&self, group_id: &str) -> Option<GroupDescription> {
        let groups = self.groups.read();
        let group = groups.get(group_id)?;
        let protocol_name = group.protocol_name.clone().unwrap_or_default();
        let members = group
            .members
            .values()
            .map(|m| MemberDescription {
                member_id: m.member_id.clone(),
                group_instance_id: m.group_instance_id.clone(),
                client_id: m.client_id.clone(),
                client_host: m.client_host.clone(),
                metadata: m
                    .protocols
                    .iter()
                    .find(|(name, _)| *name == protocol_name)
                    .map(|(_, metadata)| metadata.clone())
                    .unwrap_or_default(),
                assignment: m.assignment.clone().unwrap_or_default(),
            })
            .collect();
        Some(GroupDescription {
            group_id: group.group_id.clone(),
            state: group.state,
            protocol_type: group.protocol_type.clone(),
            protocol_name,
            members,
        })
    }

    /// (group id, protocol type, state) for every known group
    pub fn list_groups(&self) -> Vec<(String, String, GroupState)> {
        let groups = self.groups.read();
        let mut listed: Vec<_> = groups
            .values()
            .filter(|g| g.state != GroupState::Dead)
            .map(|g| (g.group_id.clone(), g.protocol_type.clone(), g.state))
            .collect();
        listed.sort();
        listed
    }

    /// Delete empty groups; returns one error code per group, in order
    pub fn delete_groups(&self, group_ids: &[String]) -> Vec<(String, i16)> {
        let mut groups = self.groups.write();
        group_ids
            .iter()
            .map(|group_id| {
                let code = match groups.get(group_id) {
                    None => ERROR_GROUP_ID_NOT_FOUND,
                    Some(g) if g.state == GroupState::Dead => ERROR_GROUP_ID_NOT_FOUND,
                    Some(g) if !g.members.is_empty() => ERROR_NON_EMPTY_GROUP,
                    Some(_) => {
                        groups.remove(group_id);
                        info!(group = %group_id, "group deleted");
                        ERROR_NONE
                    }
                };
                (group_id.clone(), code)
            })
            .collect()
    }

    /// Snapshot of one group, for tests and diagnostics
    pub fn get_group_state(&self, group_id: &str) -> Option<ConsumerGroup> {
        self.groups.read().get(group_id).cloned()
    }
}

impl Default for GroupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for GroupState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

fn unknown_member(group_id: &str, member_id: &str) -> KafkaError {
    KafkaError::CoordinatorError(
        ERROR_UNKNOWN_MEMBER_ID,
        format!("unknown member '{}' in group {}", member_id, group_id),
    )
}

/// Format: {client_id}-{uuid}
fn generate_member_id(client_id: &str) -> String {
    format!("{}-{}", client_id, uuid::Uuid::new_v4())
}
