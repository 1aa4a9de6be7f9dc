//! Server end of one accepted connection.
//!
//! Phases run strictly in order: key exchange (if encryption is on), then
//! authorization (if a validator is configured), then ready traffic. Each
//! request is dispatched on its own task so a slow method never blocks the
//! receive loop; responses go out as they complete. Request tasks still
//! running when the session ends are aborted.

use super::link::Link;
use crate::auth::{AuthorizationRequest, AuthorizationResponse};
use crate::cancel::CancellationToken;
use crate::config::ServerConfig;
use crate::converter::ValueConverter;
use crate::crypto::{accept_initialization, InitializationRequest, InitializationResponse};
use crate::dispatch::{Dispatcher, EventHub};
use crate::error::{CallwireError, Result};
use crate::message::{Message, MessageKind, Request, Response, Signature, TypeTag};
use crate::transport::{Transport, TransportEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInitialization,
    AwaitingAuthorization,
    Ready,
}

enum Flow {
    Continue,
    Close,
}

/// Serves one connection until the peer leaves or the server shuts down.
pub struct ServerSession {
    link: Arc<Link>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    converter: Arc<ValueConverter>,
    phase: Phase,
    forwarders: Vec<JoinHandle<()>>,
    requests: JoinSet<()>,
}

impl ServerSession {
    /// Run a session over an accepted transport.
    ///
    /// Returns when the connection closes, the session is rejected, or
    /// `shutdown` flips to `true`.
    pub async fn run(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<ServerConfig>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let peer = transport.peer();
        let cancel = CancellationToken::new();
        let (sink, mut events) = mpsc::unbounded_channel();

        let initialized = tokio::time::timeout(
            config.accept_timeout,
            transport.initialize_accepted(&cancel, sink),
        )
        .await
        .map_err(|_| CallwireError::Timeout(config.accept_timeout))??;
        if !initialized {
            debug!("Connection from {} closed before initialization", peer);
            return Ok(());
        }

        let mut session = ServerSession {
            link: Arc::new(Link::new(transport.clone(), config.formatter.clone())),
            converter: Arc::new(ValueConverter::new(config.formatter.clone())),
            dispatcher,
            phase: Phase::AwaitingInitialization,
            forwarders: Vec::new(),
            requests: JoinSet::new(),
            config,
        };
        session.advance_past_initialization();

        let deadline = Instant::now() + session.config.accept_timeout;
        let outcome = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::DataReceived { bytes, .. }) => {
                        match session.handle_frame(&bytes).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Close) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }
                    Some(TransportEvent::Disconnected { .. }) | None => {
                        debug!("Client {} disconnected", peer);
                        break Ok(());
                    }
                },
                Some(finished) = session.requests.join_next(), if !session.requests.is_empty() => {
                    if let Err(e) = finished {
                        error!("Request task for {} failed: {}", peer, e);
                    }
                }
                _ = tokio::time::sleep_until(deadline), if session.phase != Phase::Ready => {
                    warn!("Client {} did not complete the handshake in time", peer);
                    break Err(CallwireError::Timeout(session.config.accept_timeout));
                }
                _ = shutdown.changed() => {
                    debug!("Closing session with {} for server shutdown", peer);
                    break Ok(());
                }
            }
        };

        for forwarder in session.forwarders.drain(..) {
            forwarder.abort();
        }
        if !session.requests.is_empty() {
            debug!("Abandoning {} requests from {}", session.requests.len(), peer);
            session.requests.abort_all();
        }
        transport.disconnect().await;
        outcome
    }

    fn advance_past_initialization(&mut self) {
        if self.config.encryption {
            return;
        }
        self.advance_past_authorization_setup();
    }

    fn advance_past_authorization_setup(&mut self) {
        if self.config.validator.is_some() {
            self.phase = Phase::AwaitingAuthorization;
        } else {
            self.become_ready();
        }
    }

    fn become_ready(&mut self) {
        self.phase = Phase::Ready;
        for hub in self.dispatcher.event_hubs() {
            self.forwarders.push(spawn_forwarder(
                hub,
                self.link.clone(),
                self.config.clone(),
            ));
        }
        debug!("Session with {} ready", self.link.transport().peer());
    }

    async fn handle_frame(&mut self, bytes: &[u8]) -> Result<Flow> {
        let message = Message::decode(bytes)?;

        match (message.kind, self.phase) {
            (MessageKind::Initialization, phase) => self.on_initialization(&message, phase).await,
            (kind, Phase::AwaitingInitialization) => {
                warn!(
                    "Dropping {}: {} envelope before key exchange",
                    self.link.transport().peer(),
                    kind
                );
                Ok(Flow::Close)
            }
            (MessageKind::Authorization, _) => self.on_authorization(&message).await,
            (MessageKind::Request, Phase::AwaitingAuthorization) => {
                self.link
                    .send(
                        message.id,
                        MessageKind::Response,
                        &Response::unauthorized("session is not authorized"),
                    )
                    .await?;
                Ok(Flow::Continue)
            }
            (MessageKind::Request, Phase::Ready) => {
                self.on_request(message)?;
                Ok(Flow::Continue)
            }
            (kind, _) => {
                debug!("Ignoring unexpected {} envelope {}", kind, message.id);
                Ok(Flow::Continue)
            }
        }
    }

    async fn on_initialization(&mut self, message: &Message, phase: Phase) -> Result<Flow> {
        if !self.config.encryption {
            let refusal = InitializationResponse::refused("encryption is disabled on this server");
            self.link
                .send(message.id, MessageKind::Initialization, &refusal)
                .await?;
            return Ok(Flow::Continue);
        }
        if phase != Phase::AwaitingInitialization {
            return Err(CallwireError::handshake("repeated Initialization"));
        }

        let request: InitializationRequest = self.link.decode(&message.payload)?;
        let (response, cipher) = accept_initialization(&request)?;
        self.link
            .send(message.id, MessageKind::Initialization, &response)
            .await?;
        self.link.install_cipher(cipher)?;
        debug!("Session key sent to {}", self.link.transport().peer());

        self.advance_past_authorization_setup();
        Ok(Flow::Continue)
    }

    async fn on_authorization(&mut self, message: &Message) -> Result<Flow> {
        let plain = self.link.open(message)?;
        let request: AuthorizationRequest = self.link.decode(&plain)?;

        let Some(validator) = self.config.validator.clone() else {
            self.link
                .send(message.id, MessageKind::Authorization, &AuthorizationResponse::granted())
                .await?;
            return Ok(Flow::Continue);
        };

        if validator.is_authorization_token_valid(&request.token) {
            self.link
                .send(message.id, MessageKind::Authorization, &AuthorizationResponse::granted())
                .await?;
            info!("Client {} authorized", self.link.transport().peer());
            if self.phase != Phase::Ready {
                self.become_ready();
            }
            Ok(Flow::Continue)
        } else {
            warn!("Rejecting client {}: invalid token", self.link.transport().peer());
            self.link
                .send(
                    message.id,
                    MessageKind::Authorization,
                    &AuthorizationResponse::denied("invalid authorization token"),
                )
                .await?;
            Ok(Flow::Close)
        }
    }

    fn on_request(&mut self, message: Message) -> Result<()> {
        let plain = self.link.open(&message)?;
        let id = message.id;
        let link = self.link.clone();

        let request: Request = match self.link.decode(&plain) {
            Ok(request) => request,
            Err(e) => {
                let response = Response::error(
                    e.to_status_code(),
                    format!("undecodable request: {}", e),
                    None,
                );
                self.requests
                    .spawn(async move { send_response(&link, id, response).await });
                return Ok(());
            }
        };

        if self.config.validate_request_tokens {
            let valid = match (&self.config.validator, request.token.as_deref()) {
                (Some(validator), Some(token)) => validator.is_request_token_valid(token),
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !valid {
                debug!("Rejecting {}: invalid request token", request.method_name);
                let response = Response::unauthorized("invalid request token");
                self.requests
                    .spawn(async move { send_response(&link, id, response).await });
                return Ok(());
            }
        }

        let dispatcher = self.dispatcher.clone();
        let converter = self.converter.clone();
        self.requests.spawn(async move {
            let response = dispatcher.dispatch(&converter, &request).await;
            send_response(&link, id, response).await;
        });
        Ok(())
    }
}

async fn send_response(link: &Link, id: Uuid, response: Response) {
    if let Err(e) = link.send(id, MessageKind::Response, &response).await {
        debug!("Could not deliver response {}: {}", id, e);
    }
}

/// Forward events raised on `hub` as Callback envelopes.
fn spawn_forwarder(hub: EventHub, link: Arc<Link>, config: Arc<ServerConfig>) -> JoinHandle<()> {
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Session fell behind, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };

            let mut arguments = Vec::with_capacity(event.arguments.len());
            for argument in &event.arguments {
                match link.formatter().serialize_value(&argument.value) {
                    Ok(bytes) => arguments.push(bytes),
                    Err(e) => {
                        warn!("Cannot encode argument of event {}: {}", event.name, e);
                        break;
                    }
                }
            }
            if arguments.len() != event.arguments.len() {
                continue;
            }

            let tags: Vec<TypeTag> = event.arguments.iter().map(|a| a.tag.clone()).collect();
            let callback = Request::new(
                event.name.clone(),
                arguments,
                Signature::for_tags(config.type_mode, &tags, &[]),
            );
            if let Err(e) = link
                .send(Uuid::new_v4(), MessageKind::Callback, &callback)
                .await
            {
                debug!("Stopping event forwarding: {}", e);
                return;
            }
        }
    })
}
