//! Consumer protocol assignment parsing
//!
//! The group leader computes assignments client side and ships them to the
//! coordinator inside SyncGroup as opaque bytes. The gateway only needs to
//! peek inside them to learn which partitions each group consumes, so it can
//! attach offset readers for those partitions up front.
//!
//! ```text
//! ConsumerProtocolAssignment:
//!   version: i16
//!   topic_partitions: [ (topic: string, partitions: [i32]) ]
//!   user_data: bytes (nullable)
//! ```

pub mod member_assignment;

pub use member_assignment::MemberAssignment;
