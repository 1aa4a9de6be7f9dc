//! RPC server: accept loop with client capacity.
//!
//! Accepts connections from a [`TransportListener`] and runs one
//! [`ServerSession`] per connection on its own task. Connections beyond
//! `ServerConfig::max_clients` are closed before a session is created.
//!
//! # Thread Safety
//!
//! The dispatcher and config are shared via `Arc`; sessions never share
//! mutable state with each other.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::session::ServerSession;
use crate::transport::TransportListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping shuts down the server.
pub struct ServerHandle {
    address: String,
    active_sessions: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    session_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Description of the listening address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections and signals all sessions to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.session_shutdown_tx.send(true);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("address", &self.address)
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

pub struct RpcServer;

impl RpcServer {
    /// Start serving `dispatcher` on `listener`.
    ///
    /// The server runs in background tokio tasks until the handle is shut
    /// down or dropped.
    pub fn start<L: TransportListener>(
        listener: L,
        dispatcher: Arc<Dispatcher>,
        config: ServerConfig,
    ) -> ServerHandle {
        let address = listener.local_description();
        info!("RPC server listening on {}", address);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (session_shutdown_tx, session_shutdown_rx) = watch::channel(false);
        let active_sessions = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatcher,
            Arc::new(config),
            shutdown_rx,
            session_shutdown_rx,
            active_sessions.clone(),
        ));

        ServerHandle {
            address,
            active_sessions,
            shutdown_tx: Some(shutdown_tx),
            session_shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    async fn accept_loop<L: TransportListener>(
        listener: L,
        dispatcher: Arc<Dispatcher>,
        config: Arc<ServerConfig>,
        mut shutdown_rx: oneshot::Receiver<()>,
        session_shutdown_rx: watch::Receiver<bool>,
        active_sessions: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(transport) => {
                            let peer = transport.peer();
                            let current = active_sessions.load(Ordering::SeqCst);
                            if current >= config.max_clients {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer,
                                    config.max_clients
                                );
                                transport.disconnect().await;
                                continue;
                            }

                            active_sessions.fetch_add(1, Ordering::SeqCst);
                            let dispatcher = dispatcher.clone();
                            let config = config.clone();
                            let sessions = active_sessions.clone();
                            let shutdown = session_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Session started for {}", peer);
                                let outcome =
                                    ServerSession::run(transport, dispatcher, config, shutdown)
                                        .await;
                                if let Err(e) = outcome {
                                    debug!("Session with {} ended: {}", peer, e);
                                }
                                sessions.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }
}
