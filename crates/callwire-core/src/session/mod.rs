//! Connection lifecycle on both ends of a link.
//!
//! [`ClientSession`] drives the handshake, correlates requests with
//! responses, and routes callbacks. [`ServerSession`] answers one accepted
//! connection: handshake, authorization, dispatch, and event forwarding.

pub mod callbacks;
pub mod client;
mod link;
pub mod server;

pub use callbacks::{CallbackRegistry, SubscriptionId};
pub use client::ClientSession;
pub use server::ServerSession;

/// Client session lifecycle.
///
/// `Disconnected → Connecting → Initializing → Authorizing → Ready`. The
/// Initializing step is skipped when encryption is off. Authorizing always
/// runs, with an empty token when none is configured. Any failure returns to
/// `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initializing,
    Authorizing,
    Ready,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Initializing => "initializing",
            SessionState::Authorizing => "authorizing",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}
