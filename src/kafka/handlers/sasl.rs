// SASL handlers
//
// SaslHandshake picks a mechanism; SaslAuthenticate carries the PLAIN token.
// PLAIN is `authzid NUL username NUL password` where the username names the
// namespace the connection binds to and the password is `method:data` for the
// backend authenticator.

use bytes::Bytes;
use kafka_protocol::messages::sasl_authenticate_response::SaslAuthenticateResponse;
use kafka_protocol::messages::sasl_handshake_response::SaslHandshakeResponse;
use tracing::{debug, info};

use super::helpers::str_bytes;
use crate::kafka::constants::{
    AUTH_METHOD_SEPARATOR, ERROR_NONE, ERROR_UNSUPPORTED_SASL_MECHANISM,
};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::handler_context::HandlerContext;

/// Identity bound to a connection by a successful authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub role: String,
    pub namespace: String,
}

/// Handle SaslHandshake request
pub fn handle_sasl_handshake(ctx: &HandlerContext<'_>, mechanism: &str) -> SaslHandshakeResponse {
    let allowed = ctx.gateway.config().sasl_mechanisms();
    let mut response = SaslHandshakeResponse::default();

    if allowed.iter().any(|m| m == mechanism) {
        response.error_code = ERROR_NONE;
        response.mechanisms = allowed.iter().map(|m| str_bytes(m)).collect();
    } else {
        debug!(mechanism, "rejected SASL mechanism");
        response.error_code = ERROR_UNSUPPORTED_SASL_MECHANISM;
        response.mechanisms = Vec::new();
    }
    response
}

/// Handle SaslAuthenticate request
///
/// Returns the response plus the principal the session should adopt.
pub async fn handle_sasl_authenticate(
    ctx: &HandlerContext<'_>,
    auth_bytes: &Bytes,
) -> Result<(SaslAuthenticateResponse, Principal)> {
    let credentials = PlainCredentials::parse(auth_bytes)?;
    let (method, data) = credentials
        .password
        .split_once(AUTH_METHOD_SEPARATOR)
        .ok_or_else(|| {
            KafkaError::Authentication(
                "password must have the form <method>:<data>".to_string(),
            )
        })?;

    let role = ctx
        .gateway
        .authenticator
        .authenticate(method, data.as_bytes())
        .await?;

    let permissions = ctx
        .gateway
        .admin
        .namespace_permissions(&credentials.username)
        .await
        .map_err(|e| KafkaError::Authentication(e.to_string()))?;
    if !permissions.contains_key(&role) {
        return Err(KafkaError::Authentication(format!(
            "Role: {} Not allowed on this namespace",
            role
        )));
    }

    info!(role = %role, namespace = %credentials.username, "SASL authenticated");

    let mut response = SaslAuthenticateResponse::default();
    response.error_code = ERROR_NONE;
    response.error_message = None;
    response.auth_bytes = auth_bytes.clone();
    response.session_lifetime_ms = 0;
    Ok((
        response,
        Principal {
            role,
            namespace: credentials.username,
        },
    ))
}

struct PlainCredentials {
    username: String,
    password: String,
}

impl PlainCredentials {
    fn parse(token: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(token)
            .map_err(|_| KafkaError::Authentication("PLAIN token is not UTF-8".to_string()))?;
        let mut parts = text.split('\0');
        let (Some(_authzid), Some(username), Some(password), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KafkaError::Authentication(
                "malformed PLAIN token".to_string(),
            ));
        };
        if username.is_empty() || password.is_empty() {
            return Err(KafkaError::Authentication(
                "PLAIN username and password are required".to_string(),
            ));
        }
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}
