//! Callwire Core - RPC runtime for calling remote service objects.
//!
//! A client calls methods on a remote service through an ordinary call, over
//! a pluggable byte-frame transport, with optional encryption and bearer
//! token authorization, and with an interchangeable payload format.
//!
//! # Example
//!
//! ```rust,ignore
//! use callwire_core::{
//!     ClientConfig, ClientSession, Dispatcher, RemoteProxy, RpcServer, ServerConfig,
//!     ServiceBuilder, TcpTransport, TcpTransportListener,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> callwire_core::Result<()> {
//!     let service = ServiceBuilder::new("Echo")
//!         .method("Echo", |text: String| -> anyhow::Result<String> { Ok(text) })
//!         .build();
//!     let listener = TcpTransportListener::bind("127.0.0.1:0").await?;
//!     let address = listener.local_addr().to_string();
//!     let dispatcher = Arc::new(Dispatcher::new(service));
//!     let _server = RpcServer::start(listener, dispatcher, ServerConfig::new());
//!
//!     let transport = Arc::new(TcpTransport::client(address));
//!     let session = ClientSession::new(transport, ClientConfig::new());
//!     session.connect().await?;
//!
//!     let proxy = RemoteProxy::new(session);
//!     let reply: String = proxy.call("Echo", ("hello".to_string(),)).await?;
//!     assert_eq!(reply, "hello");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cancel;
pub mod config;
pub mod converter;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod interceptor;
pub mod message;
pub mod retry;
pub mod server;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use auth::{AuthorizationValidator, StaticTokenValidator};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{ClientConfig, ProtocolConfig, ServerConfig};
pub use converter::{FromArguments, ValueConverter};
pub use crypto::HandshakeState;
pub use dispatch::{Dispatcher, EventHub, ServiceBuilder, ServiceDefinition, TypePattern};
pub use error::{CallwireError, ErrorKind, Result};
pub use format::{Formatter, JsonFormatter, MessagePackFormatter};
pub use interceptor::{ProxyConfig, RemoteProxy, SyncCallMode};
pub use message::{
    Argument, IntoArguments, Message, MessageKind, ParameterType, RemoteType, Request, Response,
    Signature, StatusCode, TypeDescriptor, TypeHandle, TypeMode, TypeTag, ValueKind,
};
pub use retry::{Backoff, RetryPolicy, RetryStats};
pub use server::{RpcServer, ServerHandle};
pub use session::{CallbackRegistry, ClientSession, ServerSession, SessionState, SubscriptionId};
pub use transport::{
    MemoryConnector, MemoryListener, MemoryTransport, TcpTransport, TcpTransportListener,
    Transport, TransportEvent, TransportListener,
};
