// Kafka protocol parsing and encoding module
//
// This module handles the binary Kafka wire protocol format:
// [4 bytes: Size (big-endian i32)] [RequestHeader] [RequestBody]
//
// The kafka-protocol crate provides auto-generated structs for all Kafka messages,
// but we need to handle the framing (size prefix) and routing (api_key matching) ourselves.
//
// Module organization:
// - decoding: frame -> RequestHeader + KafkaRequest
// - encoding: KafkaResponse -> bytes
// - recordbatch: RecordBatch header inspection and base offset rewriting

mod decoding;
mod encoding;
pub mod recordbatch;

pub use decoding::{parse_request, rejection_response, supported_versions, ParsedRequest};
pub use encoding::encode_response;
pub use recordbatch::{rewrite_base_offset, summarize, BatchSummary};
