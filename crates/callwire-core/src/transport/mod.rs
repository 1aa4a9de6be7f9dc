//! Transport port.
//!
//! A transport moves whole envelopes as opaque byte frames between two
//! endpoints. Inbound frames and the loss of the connection are reported as
//! [`TransportEvent`]s on the sink handed over at connect time; sessions
//! never read from a transport directly.
//!
//! Two reference implementations ship with the crate:
//! - [`memory`]: in-process channels, for tests and embedding.
//! - [`tcp`]: 4-byte big-endian length-prefixed frames over TCP.

pub mod framing;
pub mod memory;
pub mod tcp;

use crate::cancel::CancellationToken;
use crate::error::{CallwireError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use memory::{MemoryConnector, MemoryListener, MemoryTransport};
pub use tcp::{TcpTransport, TcpTransportListener};

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DataReceived { connection_id: Uuid, bytes: Vec<u8> },
    Disconnected { connection_id: Uuid },
}

/// Where a transport delivers its events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// A bidirectional frame-oriented connection.
///
/// `connect` and `initialize_accepted` return `Ok(false)` when the peer is
/// simply not available (refused, listener gone); errors are reserved for
/// timeouts, cancellation, and I/O failures.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn connection_id(&self) -> Uuid;

    /// Human readable peer description for logs.
    fn peer(&self) -> String;

    /// Open an outbound connection.
    async fn connect(
        &self,
        _timeout: Duration,
        _cancel: &CancellationToken,
        _events: EventSink,
    ) -> Result<bool> {
        Err(CallwireError::transport(format!(
            "transport to {} cannot initiate connections",
            self.peer()
        )))
    }

    /// Start delivering events for a connection produced by a listener.
    async fn initialize_accepted(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<bool>;

    /// Send one frame.
    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<()>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);
}

/// Source of server-side transports, one per accepted connection.
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    async fn accept(&self) -> Result<Arc<dyn Transport>>;

    /// Listening address for logs and handles.
    fn local_description(&self) -> String;
}
