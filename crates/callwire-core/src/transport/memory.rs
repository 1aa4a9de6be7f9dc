//! In-process transport over tokio channels.
//!
//! ```rust,ignore
//! let listener = MemoryListener::new();
//! let connector = listener.connector();
//! let client_transport = connector.transport();
//! ```
//!
//! Each `connect` creates a fresh channel pair and hands the server half to
//! the listener, so a client transport can reconnect after a disconnect.

use super::{EventSink, Transport, TransportEvent, TransportListener};
use crate::cancel::CancellationToken;
use crate::error::{CallwireError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

const PENDING_ACCEPTS: usize = 64;

#[derive(Default)]
struct Channels {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Inbound half of an accepted connection, parked until initialization.
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    pump: Option<JoinHandle<()>>,
}

/// One end of an in-process connection.
pub struct MemoryTransport {
    id: Uuid,
    /// Present on client ends: where new connections are announced.
    connector: Option<mpsc::Sender<Arc<MemoryTransport>>>,
    channels: Mutex<Channels>,
}

impl MemoryTransport {
    fn accepted(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector: None,
            channels: Mutex::new(Channels {
                outbound: Some(outbound),
                inbound: Some(inbound),
                pump: None,
            }),
        }
    }

    fn install(
        &self,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        events: EventSink,
    ) {
        let pump = spawn_pump(self.id, inbound, events);
        let mut channels = self.channels.lock();
        if let Some(previous) = channels.pump.replace(pump) {
            previous.abort();
        }
        channels.outbound = Some(outbound);
    }
}

fn spawn_pump(
    connection_id: Uuid,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = inbound.recv().await {
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
        debug!("Memory connection {} closed by peer", connection_id);
        let _ = events.send(TransportEvent::Disconnected { connection_id });
    })
}

#[async_trait]
impl Transport for MemoryTransport {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    fn peer(&self) -> String {
        format!("memory:{}", self.id)
    }

    async fn connect(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<bool> {
        let Some(connector) = &self.connector else {
            return Err(CallwireError::transport(
                "accepted memory transport cannot initiate connections",
            ));
        };
        cancel.check()?;

        let (to_server, server_inbound) = mpsc::unbounded_channel();
        let (to_client, client_inbound) = mpsc::unbounded_channel();
        let server_end = Arc::new(MemoryTransport::accepted(to_client, server_inbound));

        let announced = tokio::select! {
            sent = tokio::time::timeout(timeout, connector.send(server_end)) => match sent {
                Ok(result) => result.is_ok(),
                Err(_) => return Err(CallwireError::Timeout(timeout)),
            },
            _ = cancel.cancelled() => return Err(CallwireError::Cancelled),
        };
        if !announced {
            debug!("Memory listener is gone, connection {} refused", self.id);
            return Ok(false);
        }

        self.install(to_server, client_inbound, events);
        Ok(true)
    }

    async fn initialize_accepted(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<bool> {
        cancel.check()?;
        let mut channels = self.channels.lock();
        let Some(inbound) = channels.inbound.take() else {
            return Ok(false);
        };
        channels.pump = Some(spawn_pump(self.id, inbound, events));
        Ok(true)
    }

    async fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        let outbound = self.channels.lock().outbound.clone();
        match outbound {
            Some(sender) => sender
                .send(bytes)
                .map_err(|_| CallwireError::transport("memory peer has closed the connection")),
            None => Err(CallwireError::NotConnected),
        }
    }

    async fn disconnect(&self) {
        let mut channels = self.channels.lock();
        channels.outbound = None;
        channels.inbound = None;
        if let Some(pump) = channels.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.channels.get_mut().pump.take() {
            pump.abort();
        }
    }
}

/// Accepts in-process connections made through its [`MemoryConnector`]s.
pub struct MemoryListener {
    announce: mpsc::Sender<Arc<MemoryTransport>>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Arc<MemoryTransport>>>,
}

impl MemoryListener {
    pub fn new() -> Self {
        let (announce, incoming) = mpsc::channel(PENDING_ACCEPTS);
        Self {
            announce,
            incoming: tokio::sync::Mutex::new(incoming),
        }
    }

    /// A handle clients use to reach this listener.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            announce: self.announce.clone(),
        }
    }
}

impl Default for MemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportListener for MemoryListener {
    async fn accept(&self) -> Result<Arc<dyn Transport>> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(transport) => Ok(transport),
            None => Err(CallwireError::transport("memory listener closed")),
        }
    }

    fn local_description(&self) -> String {
        "memory".to_string()
    }
}

/// Creates client transports bound to one [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    announce: mpsc::Sender<Arc<MemoryTransport>>,
}

impl MemoryConnector {
    pub fn transport(&self) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            id: Uuid::new_v4(),
            connector: Some(self.announce.clone()),
            channels: Mutex::new(Channels::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (
        Arc<MemoryTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
        Arc<dyn Transport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let listener = MemoryListener::new();
        let client = listener.connector().transport();
        let cancel = CancellationToken::new();

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        assert!(client
            .connect(Duration::from_secs(1), &cancel, client_tx)
            .await
            .unwrap());

        let server = listener.accept().await.unwrap();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        assert!(server.initialize_accepted(&cancel, server_tx).await.unwrap());

        (client, client_rx, server, server_rx)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (client, mut client_rx, server, mut server_rx) = connected_pair().await;

        client.send_bytes(b"hello".to_vec()).await.unwrap();
        assert_eq!(
            server_rx.recv().await,
            Some(TransportEvent::DataReceived {
                connection_id: server.connection_id(),
                bytes: b"hello".to_vec(),
            })
        );

        server.send_bytes(b"world".to_vec()).await.unwrap();
        match client_rx.recv().await {
            Some(TransportEvent::DataReceived { bytes, .. }) => assert_eq!(bytes, b"world"),
            other => panic!("Expected data, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_notifies_peer() {
        let (client, _client_rx, server, mut server_rx) = connected_pair().await;

        client.disconnect().await;
        assert_eq!(
            server_rx.recv().await,
            Some(TransportEvent::Disconnected {
                connection_id: server.connection_id()
            })
        );
        assert!(client.send_bytes(vec![1]).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_to_dropped_listener_is_refused() {
        let listener = MemoryListener::new();
        let client = listener.connector().transport();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let connected = client
            .connect(Duration::from_secs(1), &CancellationToken::new(), tx)
            .await
            .unwrap();
        assert!(!connected);
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let listener = MemoryListener::new();
        let client = listener.connector().transport();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = client.connect(Duration::from_secs(1), &cancel, tx).await;
        assert!(matches!(result, Err(CallwireError::Cancelled)));
    }

    #[tokio::test]
    async fn test_client_can_reconnect() {
        let listener = MemoryListener::new();
        let client = listener.connector().transport();
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let (tx, _rx) = mpsc::unbounded_channel();
            assert!(client.connect(Duration::from_secs(1), &cancel, tx).await.unwrap());
            let server = listener.accept().await.unwrap();
            let (server_tx, mut server_rx) = mpsc::unbounded_channel();
            server.initialize_accepted(&cancel, server_tx).await.unwrap();

            client.send_bytes(b"again".to_vec()).await.unwrap();
            assert!(matches!(
                server_rx.recv().await,
                Some(TransportEvent::DataReceived { .. })
            ));
            client.disconnect().await;
        }
    }
}
