//! Bearer-token authorization.
//!
//! After the handshake a client with a configured token sends one
//! Authorization envelope. The server's [`AuthorizationValidator`] decides;
//! a rejected session is answered and then closed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Server-side token policy.
pub trait AuthorizationValidator: Send + Sync + 'static {
    /// Validate the token presented in the Authorization phase.
    fn is_authorization_token_valid(&self, token: &str) -> bool;

    /// Validate the token carried by an individual request. Only consulted
    /// when `ServerConfig::validate_request_tokens` is set.
    fn is_request_token_valid(&self, _token: &str) -> bool {
        true
    }
}

/// Accepts a fixed set of tokens for both the session and each request.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashSet<String>,
}

impl StaticTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl AuthorizationValidator for StaticTokenValidator {
    fn is_authorization_token_valid(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    fn is_request_token_valid(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Body of the client's Authorization envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub token: String,
}

/// Body of the server's Authorization envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub authorized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthorizationResponse {
    pub fn granted() -> Self {
        Self {
            authorized: true,
            message: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            authorized: false,
            message: Some(message.into()),
        }
    }
}
