//! Kafka protocol error types
//!
//! Every failure inside the gateway is expressed as a [`KafkaError`] and
//! translated to a wire error code exactly once, through
//! [`KafkaError::to_kafka_error_code`], before it reaches a response.

use thiserror::Error;

use crate::kafka::constants::{
    ERROR_CORRUPT_MESSAGE, ERROR_KAFKA_STORAGE_ERROR, ERROR_LEADER_NOT_AVAILABLE,
    ERROR_NOT_LEADER_FOR_PARTITION, ERROR_SASL_AUTHENTICATION_FAILED, ERROR_UNKNOWN_SERVER_ERROR,
    ERROR_UNKNOWN_TOPIC_OR_PARTITION, ERROR_UNSUPPORTED_VERSION, MAX_REQUEST_SIZE,
};

/// Errors that can occur during Kafka protocol operations
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Request size is invalid (negative, zero, or exceeds maximum)
    #[error("Invalid request size: {0} (must be between 1 and {MAX_REQUEST_SIZE})")]
    InvalidRequestSize(i32),

    /// IO error occurred during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from kafka-protocol crate (anyhow::Error)
    #[error("Protocol encoding/decoding error: {0}")]
    ProtocolCodec(#[from] anyhow::Error),

    /// Record batch bytes could not be parsed
    #[error("Corrupt record batch: {0}")]
    CorruptBatch(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kafka protocol error code
    #[error("Kafka error code {code}: {message}")]
    Protocol { code: i16, message: String },

    /// Feature intentionally not implemented
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Topic does not exist
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Ownership could not be established or the resource could not be attached
    #[error("Leader not available: {0}")]
    LeaderNotAvailable(String),

    /// Ownership points at another node
    #[error("Not leader for partition: {0}")]
    NotLeaderForPartition(String),

    /// The connection began closing before the request completed
    #[error("Channel is closing!")]
    ChannelClosing,

    /// Backend I/O or lookup failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Append to the backend log failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Consumer group coordinator error
    #[error("Coordinator error (code {0}): {1}")]
    CoordinatorError(i16, String),

    /// SASL credentials or role were rejected
    #[error("{0}")]
    Authentication(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KafkaError {
    /// Convert this error to a Kafka protocol error code
    pub fn to_kafka_error_code(&self) -> i16 {
        match self {
            KafkaError::TopicNotFound(_) => ERROR_UNKNOWN_TOPIC_OR_PARTITION,
            KafkaError::LeaderNotAvailable(_) | KafkaError::ChannelClosing => {
                ERROR_LEADER_NOT_AVAILABLE
            }
            KafkaError::NotLeaderForPartition(_) => ERROR_NOT_LEADER_FOR_PARTITION,
            KafkaError::Unsupported(_) => ERROR_UNSUPPORTED_VERSION,
            KafkaError::CorruptBatch(_) => ERROR_CORRUPT_MESSAGE,
            KafkaError::Storage(_) => ERROR_KAFKA_STORAGE_ERROR,
            KafkaError::Authentication(_) => ERROR_SASL_AUTHENTICATION_FAILED,
            KafkaError::CoordinatorError(code, _) => *code,
            KafkaError::Protocol { code, .. } => *code,
            KafkaError::InvalidRequestSize(_)
            | KafkaError::Io(_)
            | KafkaError::ProtocolCodec(_)
            | KafkaError::InvalidConfig(_)
            | KafkaError::Backend(_)
            | KafkaError::Internal(_) => ERROR_UNKNOWN_SERVER_ERROR,
        }
    }
}

/// Result type alias for Kafka operations
pub type Result<T> = std::result::Result<T, KafkaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::constants::ERROR_ILLEGAL_GENERATION;

    #[test]
    fn test_error_display() {
        let err = KafkaError::InvalidRequestSize(150_000_000);
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid request size"));
        assert!(msg.contains("150000000"));
    }

    #[test]
    fn test_channel_closing_message() {
        assert_eq!(KafkaError::ChannelClosing.to_string(), "Channel is closing!");
        assert_eq!(
            KafkaError::ChannelClosing.to_kafka_error_code(),
            ERROR_LEADER_NOT_AVAILABLE
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed");
        let kafka_err: KafkaError = io_err.into();
        let msg = format!("{}", kafka_err);
        assert!(msg.contains("IO error"));
        assert!(msg.contains("connection closed"));
        assert_eq!(kafka_err.to_kafka_error_code(), ERROR_UNKNOWN_SERVER_ERROR);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            KafkaError::TopicNotFound("t".into()).to_kafka_error_code(),
            ERROR_UNKNOWN_TOPIC_OR_PARTITION
        );
        assert_eq!(
            KafkaError::NotLeaderForPartition("t".into()).to_kafka_error_code(),
            ERROR_NOT_LEADER_FOR_PARTITION
        );
        assert_eq!(
            KafkaError::Unsupported("txn".into()).to_kafka_error_code(),
            ERROR_UNSUPPORTED_VERSION
        );
        assert_eq!(
            KafkaError::Storage("disk".into()).to_kafka_error_code(),
            ERROR_KAFKA_STORAGE_ERROR
        );
        assert_eq!(
            KafkaError::CoordinatorError(ERROR_ILLEGAL_GENERATION, "gen".into())
                .to_kafka_error_code(),
            ERROR_ILLEGAL_GENERATION
        );
    }

    #[test]
    fn test_authentication_message_is_verbatim() {
        let err = KafkaError::Authentication("Role: bob Not allowed on this namespace".into());
        assert_eq!(err.to_string(), "Role: bob Not allowed on this namespace");
    }
}
