// Kafka protocol handlers
//
// Each handler takes a `HandlerContext` plus the borrowed request fields and
// returns a typed kafka-protocol response. Handlers know nothing about
// sockets, response handles or ordering; the session owns those.
//
// Module organization:
// - helpers: topic resolution and name conversions
// - metadata: ApiVersions, Metadata and FindCoordinator
// - produce: Produce
// - fetch: Fetch and ListOffsets
// - consumer: OffsetCommit and OffsetFetch
// - coordinator: JoinGroup, SyncGroup, Heartbeat, LeaveGroup, DescribeGroups, ListGroups, DeleteGroups
// - sasl: SaslHandshake and SaslAuthenticate

mod consumer;
mod coordinator;
mod fetch;
mod helpers;
mod metadata;
mod produce;
mod sasl;

pub use consumer::{handle_offset_commit, handle_offset_fetch};
pub use coordinator::{
    handle_delete_groups, handle_describe_groups, handle_heartbeat, handle_join_group,
    handle_leave_group, handle_list_groups, handle_sync_group, JoinGroupParams,
};
pub use fetch::{handle_fetch, handle_list_offsets};
pub use helpers::{partition_error_code, resolve_topic, TopicResolution};
pub use metadata::{handle_api_versions, handle_find_coordinator, handle_metadata};
pub use produce::handle_produce;
pub use sasl::{handle_sasl_authenticate, handle_sasl_handshake, Principal};
