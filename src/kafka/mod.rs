// Kafka protocol gateway module
//
// Everything between the socket and the backend collaborators lives here:
// - Binary protocol parsing/encoding (protocol)
// - Request/response types and the one-shot response handle (messages)
// - TCP listener and the per-connection session that orchestrates requests
// - Per-API handlers
// - Shared state: topic cache, metadata resolver, group coordinator, offset acker
//
// Architecture Overview:
// =====================
//
//   socket -> listener (decode) -> KafkaSession::submit
//                                     |-- Produce -> ProduceQueue (single flight, FIFO)
//                                     `-- others  -> spawned handler task
//   handler -> ResponseHandle::complete -> listener writer (receipt order) -> socket
//
// Backend calls are all async; nothing in this module blocks a runtime thread.

pub mod assignment;
pub mod backend;
pub mod broker_metadata;
pub mod constants;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod handler_context;
pub mod handlers;
pub mod listener;
pub mod messages;
pub mod metadata_resolver;
pub mod naming;
pub mod offset_acker;
pub mod produce_queue;
pub mod protocol;
pub mod response_builders;
pub mod session;
pub mod timestamp_resolver;
pub mod topic_manager;

// Re-export commonly used types for convenience
pub use constants::*;
pub use context::GatewayContext;
pub use coordinator::{GroupCoordinator, GroupState};
pub use error::{KafkaError, Result};
pub use listener::run as run_listener;
pub use messages::{KafkaRequest, KafkaResponse, PendingRequest, RequestHeader, ResponseHandle};
pub use session::KafkaSession;
