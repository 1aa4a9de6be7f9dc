//! Client session: connect, handshake, request correlation, callbacks.
//!
//! # Correlation
//!
//! Every outbound Request, Initialization, and Authorization envelope gets a
//! fresh id and a one-shot slot in the pending map. The receive loop removes
//! the slot when the matching reply arrives; a local timeout, a failed send,
//! or teardown removes it otherwise. Each id leaves the map exactly once.
//!
//! # Receive loop
//!
//! One task per link reads transport events. It never waits on a particular
//! reply, so callbacks and responses interleave freely. Framing and
//! decryption errors end the session; a callback with an undecodable body is
//! dropped.

use super::callbacks::CallbackRegistry;
use super::link::Link;
use super::SessionState;
use crate::auth::{AuthorizationRequest, AuthorizationResponse};
use crate::cancel::CancellationToken;
use crate::config::ClientConfig;
use crate::error::{CallwireError, Result};
use crate::format::Formatter;
use crate::message::{Message, MessageKind, Request, Response};
use crate::transport::{Transport, TransportEvent};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Pending = oneshot::Sender<Result<Message>>;

struct Shared {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    state: watch::Sender<SessionState>,
    link: RwLock<Option<Arc<Link>>>,
    pending: Mutex<HashMap<Uuid, Pending>>,
    callbacks: Arc<CallbackRegistry>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// Client end of a connection.
///
/// Cheap to clone; clones share the connection, pending requests, and
/// callback registry.
#[derive(Clone)]
pub struct ClientSession {
    shared: Arc<Shared>,
}

impl ClientSession {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                state,
                link: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                callbacks: Arc::new(CallbackRegistry::new()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn formatter(&self) -> &Arc<dyn Formatter> {
        &self.shared.config.formatter
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.shared.callbacks
    }

    /// Requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Connect and run the handshake. Returns immediately when already Ready.
    pub async fn connect(&self) -> Result<()> {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    pub async fn connect_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.shared.connect_lock.lock().await;
        if self.shared.ready_link().is_some() {
            return Ok(());
        }
        self.shared.establish(cancel).await
    }

    /// Send a request with the configured default timeout.
    pub async fn request(&self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, self.shared.config.request_timeout)
            .await
    }

    /// Send a request and wait for its response, at most `timeout`.
    ///
    /// A timeout abandons the request locally; the server is not told.
    pub async fn request_with_timeout(
        &self,
        mut request: Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let link = match self.shared.ready_link() {
            Some(link) => link,
            None if self.shared.config.auto_reconnect => {
                debug!("Session not ready, reconnecting before {}", request.method_name);
                self.connect().await?;
                self.shared.ready_link().ok_or(CallwireError::NotConnected)?
            }
            None => return Err(CallwireError::NotConnected),
        };

        if request.token.is_none() {
            request.token = self.shared.config.authorization_token.clone();
        }

        let reply = self
            .shared
            .exchange(&link, MessageKind::Request, &request, timeout)
            .await?;
        let response: Response = link.decode(&reply.payload)?;
        response.validate()?;
        Ok(response)
    }

    /// Close the connection and fail every pending request.
    pub async fn disconnect(&self) {
        let link = self.shared.link.read().clone();
        if let Some(link) = link {
            info!("Disconnecting from {}", self.shared.transport.peer());
            self.shared.teardown(&link).await;
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("peer", &self.shared.transport.peer())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {} -> {}", previous, state);
        }
    }

    fn ready_link(&self) -> Option<Arc<Link>> {
        if *self.state.borrow() != SessionState::Ready {
            return None;
        }
        self.link.read().clone()
    }

    async fn establish(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        self.set_state(SessionState::Connecting);
        let link = Arc::new(Link::new(
            self.transport.clone(),
            self.config.formatter.clone(),
        ));
        *self.link.write() = Some(link.clone());

        // Cancelled on failure so a transport still connecting gives up.
        let attempt = cancel.child_token();
        let budget = self.config.connect_timeout;
        let outcome = tokio::select! {
            result = tokio::time::timeout(budget, self.handshake(&link, &attempt)) => {
                result.unwrap_or(Err(CallwireError::Timeout(budget)))
            }
            _ = attempt.cancelled() => Err(CallwireError::Cancelled),
        };

        match outcome {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                info!("Session ready with {}", self.transport.peer());
                Ok(())
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", self.transport.peer(), e);
                attempt.cancel();
                self.teardown(&link).await;
                Err(e)
            }
        }
    }

    async fn handshake(
        self: &Arc<Self>,
        link: &Arc<Link>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (sink, events) = mpsc::unbounded_channel();
        let connected = self
            .transport
            .connect(self.config.connect_timeout, cancel, sink)
            .await?;
        if !connected {
            return Err(CallwireError::ConnectFailed {
                message: format!("{} is not accepting connections", self.transport.peer()),
            });
        }
        tokio::spawn(receive_loop(Arc::downgrade(self), link.clone(), events));

        if self.config.encryption {
            self.set_state(SessionState::Initializing);
            let request = link.begin_handshake();
            self.exchange(link, MessageKind::Initialization, &request, None)
                .await?;
            debug!("Session key established");
        }

        // Sent even without a token. A server with no validator grants it.
        self.set_state(SessionState::Authorizing);
        let body = AuthorizationRequest {
            token: self.config.authorization_token.clone().unwrap_or_default(),
        };
        let reply = self
            .exchange(link, MessageKind::Authorization, &body, None)
            .await?;
        let response: AuthorizationResponse = link.decode(&reply.payload)?;
        if !response.authorized {
            return Err(CallwireError::Unauthorized {
                message: response
                    .message
                    .unwrap_or_else(|| "authorization rejected".to_string()),
            });
        }
        Ok(())
    }

    /// Send one envelope and wait for the envelope answering it.
    async fn exchange<T: Serialize + Sync + ?Sized>(
        &self,
        link: &Arc<Link>,
        kind: MessageKind,
        body: &T,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            loop {
                let id = Uuid::new_v4();
                if let Entry::Vacant(slot) = pending.entry(id) {
                    slot.insert(tx);
                    break id;
                }
            }
        };

        // Teardown may have drained the map between our caller picking the
        // link and the insert above.
        let current = self
            .link
            .read()
            .as_ref()
            .is_some_and(|existing| Arc::ptr_eq(existing, link));
        if !current {
            self.pending.lock().remove(&id);
            return Err(CallwireError::Disconnected);
        }

        if let Err(e) = link.send(id, kind, body).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let delivered = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(delivered) => delivered,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    debug!("{} {} abandoned after {:?}", kind, id, limit);
                    return Err(CallwireError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        delivered.unwrap_or(Err(CallwireError::Disconnected))
    }

    fn deliver(&self, id: Uuid, kind: MessageKind, outcome: Result<Message>) {
        let slot = self.pending.lock().remove(&id);
        match slot {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("Dropping unsolicited {} {}", kind, id),
        }
    }

    fn handle_frame(&self, link: &Link, bytes: &[u8]) -> Result<()> {
        let message = Message::decode(bytes)?;
        match message.kind {
            MessageKind::Initialization => {
                let outcome = link.complete_handshake(&message).map(|()| message.clone());
                self.deliver(message.id, message.kind, outcome);
            }
            MessageKind::Response | MessageKind::Authorization => {
                let plain = link.open(&message)?;
                let reply = Message::new(message.id, message.kind, plain);
                self.deliver(message.id, message.kind, Ok(reply));
            }
            MessageKind::Callback => {
                let plain = link.open(&message)?;
                match link.decode::<Request>(&plain) {
                    Ok(callback) => {
                        self.callbacks
                            .dispatch(&callback.method_name, &callback.arguments);
                    }
                    Err(e) => warn!("Dropping undecodable callback {}: {}", message.id, e),
                }
            }
            MessageKind::Request | MessageKind::Unknown => {
                warn!("Dropping unexpected {} envelope {}", message.kind, message.id);
            }
        }
        Ok(())
    }

    /// Tear down `link` if it is still the current one.
    async fn teardown(&self, link: &Arc<Link>) {
        {
            let mut current = self.link.write();
            match current.as_ref() {
                Some(existing) if Arc::ptr_eq(existing, link) => *current = None,
                _ => return,
            }
        }

        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!("Failing {} pending requests", drained.len());
        }
        for tx in drained {
            let _ = tx.send(Err(CallwireError::Disconnected));
        }

        self.set_state(SessionState::Disconnected);
        link.transport().disconnect().await;
    }
}

async fn receive_loop(
    shared: Weak<Shared>,
    link: Arc<Link>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = shared.upgrade() else {
            return;
        };
        match event {
            TransportEvent::DataReceived { bytes, .. } => {
                if let Err(e) = session.handle_frame(&link, &bytes) {
                    warn!("Closing session after receive error: {}", e);
                    session.teardown(&link).await;
                    return;
                }
            }
            TransportEvent::Disconnected { connection_id } => {
                info!("Connection {} lost", connection_id);
                session.teardown(&link).await;
                return;
            }
        }
    }

    if let Some(session) = shared.upgrade() {
        session.teardown(&link).await;
    }
}
