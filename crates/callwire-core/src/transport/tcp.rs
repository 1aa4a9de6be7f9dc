//! TCP transport with length-prefixed frames.

use super::framing::{read_frame, write_frame};
use super::{EventSink, Transport, TransportEvent, TransportListener};
use crate::cancel::CancellationToken;
use crate::error::{CallwireError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

/// A TCP connection, either dialed by a client or produced by a listener.
pub struct TcpTransport {
    id: Uuid,
    /// Dial target; `None` for accepted connections.
    target: Option<String>,
    peer_addr: Mutex<Option<SocketAddr>>,
    /// Accepted stream waiting for `initialize_accepted`.
    accepted: Mutex<Option<TcpStream>>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl TcpTransport {
    /// Client transport that dials `target` (`host:port`) on connect.
    pub fn client(target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: Some(target.into()),
            peer_addr: Mutex::new(None),
            accepted: Mutex::new(None),
            connection: Mutex::new(None),
        }
    }

    fn from_accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: None,
            peer_addr: Mutex::new(Some(peer)),
            accepted: Mutex::new(Some(stream)),
            connection: Mutex::new(None),
        }
    }

    fn start(&self, stream: TcpStream, events: EventSink) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.peer(), e);
        }
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Connection {
            writer: tokio::sync::Mutex::new(writer),
            reader: spawn_reader(self.id, reader, events),
        });
        if let Some(previous) = self.connection.lock().replace(connection) {
            previous.reader.abort();
        }
    }
}

fn spawn_reader(
    connection_id: Uuid,
    mut reader: OwnedReadHalf,
    events: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(bytes)) => {
                    if events
                        .send(TransportEvent::DataReceived {
                            connection_id,
                            bytes,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => {
                    debug!("TCP connection {} closed by peer", connection_id);
                    break;
                }
                Err(e) => {
                    warn!("TCP connection {} failed: {}", connection_id, e);
                    break;
                }
            }
        }
        let _ = events.send(TransportEvent::Disconnected { connection_id });
    })
}

#[async_trait]
impl Transport for TcpTransport {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    fn peer(&self) -> String {
        match (*self.peer_addr.lock(), &self.target) {
            (Some(addr), _) => addr.to_string(),
            (None, Some(target)) => target.clone(),
            (None, None) => "tcp:unknown".to_string(),
        }
    }

    async fn connect(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<bool> {
        let Some(target) = self.target.as_deref() else {
            return Err(CallwireError::transport(
                "accepted TCP transport cannot initiate connections",
            ));
        };
        cancel.check()?;

        let stream = tokio::select! {
            result = tokio::time::timeout(timeout, TcpStream::connect(target)) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    debug!("TCP connect to {} refused", target);
                    return Ok(false);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(CallwireError::Timeout(timeout)),
            },
            _ = cancel.cancelled() => return Err(CallwireError::Cancelled),
        };

        *self.peer_addr.lock() = stream.peer_addr().ok();
        debug!("TCP transport connected to {}", target);
        self.start(stream, events);
        Ok(true)
    }

    async fn initialize_accepted(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<bool> {
        cancel.check()?;
        let stream = self.accepted.lock().take();
        match stream {
            Some(stream) => {
                self.start(stream, events);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        let connection = self
            .connection
            .lock()
            .clone()
            .ok_or(CallwireError::NotConnected)?;
        let mut writer = connection.writer.lock().await;
        write_frame(&mut *writer, &bytes).await
    }

    async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        self.accepted.lock().take();
        if let Some(connection) = connection {
            connection.reader.abort();
            let mut writer = connection.writer.lock().await;
            let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader.abort();
        }
    }
}

/// Accepts TCP connections and wraps each in a [`TcpTransport`].
pub struct TcpTransportListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpTransportListener {
    /// Bind to `addr`. Use port 0 for an OS-assigned port.
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    async fn accept(&self) -> Result<Arc<dyn Transport>> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Accepted TCP connection from {}", peer);
        Ok(Arc::new(TcpTransport::from_accepted(stream, peer)))
    }

    fn local_description(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
