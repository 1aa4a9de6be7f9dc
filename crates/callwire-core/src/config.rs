//! Centralized configuration for callwire.
//!
//! Protocol-wide constants live on [`ProtocolConfig`]; per-endpoint settings
//! are plain structs with builder methods ([`ClientConfig`], [`ServerConfig`]).

use crate::auth::AuthorizationValidator;
use crate::format::{Formatter, JsonFormatter};
use crate::message::TypeMode;
use std::sync::Arc;
use std::time::Duration;

/// Protocol-wide limits and defaults.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Maximum frame size accepted by the framed transports (16 MB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    /// Size of the envelope header: 16-byte id plus 1-byte kind.
    pub const ENVELOPE_HEADER_SIZE: usize = 17;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_CLIENTS: usize = 64;
    /// Buffered events per event hub before slow sessions start lagging.
    pub const EVENT_HUB_CAPACITY: usize = 256;
    pub const SESSION_KEY_SIZE: usize = 32;
    pub const SESSION_IV_SIZE: usize = 24;
    pub const NONCE_SIZE: usize = 24;
    pub const PUBLIC_KEY_SIZE: usize = 32;
}

/// Client session configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Serializer used for envelope bodies and argument payloads.
    pub formatter: Arc<dyn Formatter>,
    /// Perform the key exchange and encrypt payloads.
    pub encryption: bool,
    /// Bearer token presented during authorization. `None` skips the phase.
    pub authorization_token: Option<String>,
    /// Strong or weak type descriptors on outbound requests.
    pub type_mode: TypeMode,
    /// Budget for transport connect plus handshake.
    pub connect_timeout: Duration,
    /// Default per-request timeout. `None` waits until reply or disconnect.
    pub request_timeout: Option<Duration>,
    /// Reconnect transparently when a request is issued while disconnected.
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            formatter: Arc::new(JsonFormatter),
            encryption: true,
            authorization_token: None,
            type_mode: TypeMode::Strong,
            connect_timeout: ProtocolConfig::DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Some(ProtocolConfig::DEFAULT_REQUEST_TIMEOUT),
            auto_reconnect: false,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("formatter", &self.formatter.name())
            .field("encryption", &self.encryption)
            .field("authorization", &self.authorization_token.is_some())
            .field("type_mode", &self.type_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("auto_reconnect", &self.auto_reconnect)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new client config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    pub fn with_authorization_token(mut self, token: impl Into<String>) -> Self {
        self.authorization_token = Some(token.into());
        self
    }

    pub fn with_type_mode(mut self, mode: TypeMode) -> Self {
        self.type_mode = mode;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }
}

/// Server configuration shared by every session the server creates.
#[derive(Clone)]
pub struct ServerConfig {
    pub formatter: Arc<dyn Formatter>,
    /// Require the key exchange before any other traffic.
    pub encryption: bool,
    /// Validator for session and request tokens. `None` disables authorization.
    pub validator: Option<Arc<dyn AuthorizationValidator>>,
    /// Re-check `Request::token` on every request.
    pub validate_request_tokens: bool,
    /// Descriptor mode for outbound callbacks.
    pub type_mode: TypeMode,
    /// Connections beyond this count are refused before a session exists.
    pub max_clients: usize,
    /// Time an accepted connection gets to initialize.
    pub accept_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            formatter: Arc::new(JsonFormatter),
            encryption: true,
            validator: None,
            validate_request_tokens: false,
            type_mode: TypeMode::Strong,
            max_clients: ProtocolConfig::DEFAULT_MAX_CLIENTS,
            accept_timeout: ProtocolConfig::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("formatter", &self.formatter.name())
            .field("encryption", &self.encryption)
            .field("authorization", &self.validator.is_some())
            .field("validate_request_tokens", &self.validate_request_tokens)
            .field("type_mode", &self.type_mode)
            .field("max_clients", &self.max_clients)
            .finish()
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption = enabled;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn AuthorizationValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_request_token_validation(mut self, enabled: bool) -> Self {
        self.validate_request_tokens = enabled;
        self
    }

    pub fn with_type_mode(mut self, mode: TypeMode) -> Self {
        self.type_mode = mode;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}
