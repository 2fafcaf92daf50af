// Request dispatch helpers for the session
//
// Every request ends the same way:
// 1. Handler returns a typed response or a KafkaError
// 2. On success: wrap the response in its KafkaResponse variant
// 3. On error: log, build the API-specific error response, complete the handle
//
// dispatch_response() encapsulates this so the session's match stays flat.

use tracing::{debug, warn};

use crate::kafka::error::KafkaError;
use crate::kafka::messages::{KafkaRequest, KafkaResponse, RequestHeader, ResponseHandle};
use crate::kafka::response_builders::build_error_response;

/// Complete `handle` with a handler result.
///
/// # Arguments
/// * `handler_name` - Name of the handler for logging
/// * `handle` - Response handle of the request
/// * `request` - The decoded request, echoed into error responses
/// * `result` - What the handler returned
/// * `wrap_response` - Wraps a successful result into its KafkaResponse variant
pub fn dispatch_response<R, W>(
    handler_name: &str,
    handle: ResponseHandle,
    request: &KafkaRequest,
    result: Result<R, KafkaError>,
    wrap_response: W,
) where
    W: FnOnce(&RequestHeader, R) -> KafkaResponse,
{
    match result {
        Ok(result) => {
            let response = wrap_response(handle.header(), result);
            send(handler_name, handle, response);
        }
        Err(e) => dispatch_error(handler_name, handle, Some(request), e),
    }
}

/// Complete `handle` with an error response for `error`
pub fn dispatch_error(
    handler_name: &str,
    handle: ResponseHandle,
    request: Option<&KafkaRequest>,
    error: KafkaError,
) {
    let code = error.to_kafka_error_code();
    warn!(
        correlation_id = handle.header().correlation_id,
        error_code = code,
        error = %error,
        "Failed to handle {} request",
        handler_name
    );
    let response = build_error_response(handle.header(), request, code, Some(error.to_string()));
    send(handler_name, handle, response);
}

fn send(handler_name: &str, handle: ResponseHandle, response: KafkaResponse) {
    let correlation_id = response.correlation_id();
    if handle.complete(response) {
        debug!(correlation_id, "{} response sent", handler_name);
    } else {
        debug!(correlation_id, "{} response dropped, connection gone", handler_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::constants::{
        API_KEY_HEARTBEAT, ERROR_ILLEGAL_GENERATION, ERROR_NONE, ERROR_UNKNOWN_SERVER_ERROR,
    };
    use crate::kafka::messages::PendingRequest;
    use kafka_protocol::messages::heartbeat_response::HeartbeatResponse;

    fn heartbeat_request() -> (PendingRequest, tokio::sync::oneshot::Receiver<KafkaResponse>) {
        PendingRequest::new(
            RequestHeader {
                api_key: API_KEY_HEARTBEAT,
                api_version: 4,
                correlation_id: 42,
                client_id: None,
            },
            KafkaRequest::Heartbeat {
                group_id: "g".to_string(),
                generation_id: 1,
                member_id: "m".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_dispatch_response_success() {
        let (pending, rx) = heartbeat_request();
        dispatch_response(
            "Heartbeat",
            pending.handle,
            &pending.body,
            Ok::<_, KafkaError>(HeartbeatResponse::default()),
            |header, response| KafkaResponse::Heartbeat {
                correlation_id: header.correlation_id,
                api_version: header.api_version,
                response,
            },
        );

        match rx.await.unwrap() {
            KafkaResponse::Heartbeat {
                correlation_id,
                response,
                ..
            } => {
                assert_eq!(correlation_id, 42);
                assert_eq!(response.error_code, ERROR_NONE);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_response_error() {
        let (pending, rx) = heartbeat_request();
        dispatch_response(
            "Heartbeat",
            pending.handle,
            &pending.body,
            Err::<HeartbeatResponse, _>(KafkaError::CoordinatorError(
                ERROR_ILLEGAL_GENERATION,
                "stale".into(),
            )),
            |_, _| unreachable!(),
        );

        match rx.await.unwrap() {
            KafkaResponse::Heartbeat { response, .. } => {
                assert_eq!(response.error_code, ERROR_ILLEGAL_GENERATION);
            }
            other => panic!("Expected heartbeat error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_error_without_request() {
        let (pending, rx) = heartbeat_request();
        dispatch_error(
            "Heartbeat",
            pending.handle,
            None,
            KafkaError::Internal("boom".into()),
        );
        match rx.await.unwrap() {
            KafkaResponse::Heartbeat { response, .. } => {
                assert_eq!(response.error_code, ERROR_UNKNOWN_SERVER_ERROR);
            }
            other => panic!("Expected heartbeat error, got {:?}", other),
        }
    }
}
