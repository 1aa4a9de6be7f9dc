//! One live connection: transport, formatter, and the session cipher.

use crate::crypto::{ClientHandshake, InitializationRequest, InitializationResponse, SessionCipher};
use crate::error::{CallwireError, Result};
use crate::format::{self, Formatter};
use crate::message::{Message, MessageKind};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

pub(crate) struct Link {
    transport: Arc<dyn Transport>,
    formatter: Arc<dyn Formatter>,
    cipher: OnceLock<SessionCipher>,
    handshake: Mutex<Option<ClientHandshake>>,
}

impl Link {
    pub(crate) fn new(transport: Arc<dyn Transport>, formatter: Arc<dyn Formatter>) -> Self {
        Self {
            transport,
            formatter,
            cipher: OnceLock::new(),
            handshake: Mutex::new(None),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn formatter(&self) -> &Arc<dyn Formatter> {
        &self.formatter
    }

    pub(crate) fn install_cipher(&self, cipher: SessionCipher) -> Result<()> {
        self.cipher
            .set(cipher)
            .map_err(|_| CallwireError::handshake("session cipher already installed"))
    }

    /// Start the client side of the key exchange.
    pub(crate) fn begin_handshake(&self) -> InitializationRequest {
        let mut handshake = ClientHandshake::new();
        let request = handshake.initialization_request();
        *self.handshake.lock() = Some(handshake);
        request
    }

    /// Finish the key exchange from the server's Initialization reply.
    pub(crate) fn complete_handshake(&self, message: &Message) -> Result<()> {
        let mut handshake = self
            .handshake
            .lock()
            .take()
            .ok_or_else(|| CallwireError::handshake("unsolicited Initialization response"))?;
        let response: InitializationResponse = format::decode(&*self.formatter, &message.payload)?;
        let cipher = handshake.complete(&response)?;
        self.install_cipher(cipher)
    }

    /// Encode `body`, seal it when a cipher is installed, and send the envelope.
    pub(crate) async fn send<T: Serialize + Sync + ?Sized>(
        &self,
        id: Uuid,
        kind: MessageKind,
        body: &T,
    ) -> Result<()> {
        let plain = format::encode(&*self.formatter, body)?;
        let payload = match self.cipher.get() {
            Some(cipher) if kind != MessageKind::Initialization => cipher.seal(&id, kind, &plain)?,
            _ => plain,
        };
        self.transport
            .send_bytes(Message::new(id, kind, payload).encode())
            .await
    }

    /// Plaintext payload of an inbound envelope.
    pub(crate) fn open(&self, message: &Message) -> Result<Vec<u8>> {
        match self.cipher.get() {
            Some(cipher) if message.kind != MessageKind::Initialization => {
                cipher.open(&message.id, message.kind, &message.payload)
            }
            _ => Ok(message.payload.clone()),
        }
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, plain: &[u8]) -> Result<T> {
        format::decode(&*self.formatter, plain)
    }
}
