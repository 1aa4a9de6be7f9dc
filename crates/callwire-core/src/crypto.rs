//! Session encryption: key exchange and payload sealing.
//!
//! # Handshake
//!
//! ```text
//! client                                        server
//!   | generate X25519 keypair                      |
//!   |-- Initialization { public_key } ------------>|
//!   |                                              | generate session key + IV
//!   |                                              | seal them for the client key
//!   |<-- Initialization { server key, sealed } ----|
//!   | open, install session cipher                 | install session cipher
//! ```
//!
//! Sealing the session material uses an ephemeral server keypair: both sides
//! derive the same wrapping key from the X25519 agreement with SHA-256, so
//! only the holder of the client's private key can open it.
//!
//! # Payloads
//!
//! After the handshake every payload is sealed with XChaCha20-Poly1305 under
//! a random 24-byte nonce, sent as `nonce || ciphertext`. The IV, envelope id
//! and envelope kind are bound in as associated data, so a payload cannot be
//! replayed under another envelope header.

use crate::config::ProtocolConfig;
use crate::error::{CallwireError, Result};
use crate::message::MessageKind;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

const KEY_WRAP_CONTEXT: &[u8] = b"callwire/kex/v1";
const MATERIAL_AAD: &[u8] = b"callwire/session-material";

/// Progress of the client side of the key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NoEncryption,
    KeysGenerated,
    PublicKeySent,
    SessionKeyReceived,
    SessionEstablished,
}

/// Body of the client's Initialization envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationRequest {
    pub public_key: Vec<u8>,
}

/// Body of the server's Initialization envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationResponse {
    pub accepted: bool,
    #[serde(default)]
    pub server_public_key: Vec<u8>,
    #[serde(default)]
    pub nonce: Vec<u8>,
    #[serde(default)]
    pub sealed_material: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InitializationResponse {
    /// Response of a server that does not do encryption.
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            server_public_key: Vec::new(),
            nonce: Vec::new(),
            sealed_material: Vec::new(),
            message: Some(message.into()),
        }
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

fn public_key_from(bytes: &[u8]) -> Result<PublicKey> {
    let array: [u8; ProtocolConfig::PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| {
            CallwireError::handshake(format!("public key must be 32 bytes, got {}", bytes.len()))
        })?;
    Ok(PublicKey::from(array))
}

fn wrapping_cipher(
    secret: &StaticSecret,
    peer: &PublicKey,
    client_public: &PublicKey,
    server_public: &PublicKey,
) -> Result<XChaCha20Poly1305> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(CallwireError::handshake("peer public key is a low-order point"));
    }

    let mut hasher = Sha256::new();
    hasher.update(KEY_WRAP_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.update(client_public.as_bytes());
    hasher.update(server_public.as_bytes());
    let key = hasher.finalize();

    XChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| CallwireError::handshake("invalid wrapping key length"))
}

/// Client half of the key exchange.
pub struct ClientHandshake {
    secret: StaticSecret,
    public: PublicKey,
    state: HandshakeState,
}

impl ClientHandshake {
    /// Generate a fresh keypair.
    pub fn new() -> Self {
        let secret = StaticSecret::from(random_bytes::<32>());
        let public = PublicKey::from(&secret);
        Self {
            secret,
            public,
            state: HandshakeState::KeysGenerated,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Produce the Initialization body carrying our public key.
    pub fn initialization_request(&mut self) -> InitializationRequest {
        self.state = HandshakeState::PublicKeySent;
        InitializationRequest {
            public_key: self.public.as_bytes().to_vec(),
        }
    }

    /// Open the server's sealed session material and build the session cipher.
    pub fn complete(&mut self, response: &InitializationResponse) -> Result<SessionCipher> {
        if self.state != HandshakeState::PublicKeySent {
            return Err(CallwireError::handshake(format!(
                "unexpected Initialization response in state {:?}",
                self.state
            )));
        }
        if !response.accepted {
            return Err(CallwireError::handshake(
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| "server refused encryption".to_string()),
            ));
        }

        let server_public = public_key_from(&response.server_public_key)?;
        let wrapper = wrapping_cipher(&self.secret, &server_public, &self.public, &server_public)?;
        if response.nonce.len() != ProtocolConfig::NONCE_SIZE {
            return Err(CallwireError::handshake("malformed Initialization nonce"));
        }

        let material = wrapper
            .decrypt(
                XNonce::from_slice(&response.nonce),
                Payload {
                    msg: &response.sealed_material,
                    aad: MATERIAL_AAD,
                },
            )
            .map_err(|_| CallwireError::handshake("cannot open session material"))?;
        self.state = HandshakeState::SessionKeyReceived;

        let cipher = SessionCipher::from_material(&material)?;
        self.state = HandshakeState::SessionEstablished;
        Ok(cipher)
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Server half of the key exchange: generate session material, seal it for
/// the client, and return the reply together with the session cipher.
pub fn accept_initialization(
    request: &InitializationRequest,
) -> Result<(InitializationResponse, SessionCipher)> {
    let client_public = public_key_from(&request.public_key)?;

    let key = random_bytes::<{ ProtocolConfig::SESSION_KEY_SIZE }>();
    let iv = random_bytes::<{ ProtocolConfig::SESSION_IV_SIZE }>();
    let mut material = Vec::with_capacity(key.len() + iv.len());
    material.extend_from_slice(&key);
    material.extend_from_slice(&iv);

    let ephemeral = StaticSecret::from(random_bytes::<32>());
    let server_public = PublicKey::from(&ephemeral);
    let wrapper = wrapping_cipher(&ephemeral, &client_public, &client_public, &server_public)?;

    let nonce = random_bytes::<{ ProtocolConfig::NONCE_SIZE }>();
    let sealed_material = wrapper
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &material,
                aad: MATERIAL_AAD,
            },
        )
        .map_err(|_| CallwireError::handshake("cannot seal session material"))?;

    let cipher = SessionCipher::from_material(&material)?;
    let response = InitializationResponse {
        accepted: true,
        server_public_key: server_public.as_bytes().to_vec(),
        nonce: nonce.to_vec(),
        sealed_material,
        message: None,
    };
    Ok((response, cipher))
}

/// Symmetric cipher for one session's payloads.
pub struct SessionCipher {
    aead: XChaCha20Poly1305,
    iv: [u8; ProtocolConfig::SESSION_IV_SIZE],
}

impl SessionCipher {
    /// Build from `key || iv` material.
    pub fn from_material(material: &[u8]) -> Result<Self> {
        let expected = ProtocolConfig::SESSION_KEY_SIZE + ProtocolConfig::SESSION_IV_SIZE;
        if material.len() != expected {
            return Err(CallwireError::handshake(format!(
                "session material must be {} bytes, got {}",
                expected,
                material.len()
            )));
        }
        let (key, iv_bytes) = material.split_at(ProtocolConfig::SESSION_KEY_SIZE);
        let aead = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CallwireError::handshake("invalid session key length"))?;
        let mut iv = [0u8; ProtocolConfig::SESSION_IV_SIZE];
        iv.copy_from_slice(iv_bytes);
        Ok(Self { aead, iv })
    }

    fn associated_data(&self, id: &Uuid, kind: MessageKind) -> Vec<u8> {
        let mut aad = Vec::with_capacity(self.iv.len() + 17);
        aad.extend_from_slice(&self.iv);
        aad.extend_from_slice(id.as_bytes());
        aad.push(kind as u8);
        aad
    }

    /// Seal a payload for the envelope `(id, kind)`.
    pub fn seal(&self, id: &Uuid, kind: MessageKind, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = random_bytes::<{ ProtocolConfig::NONCE_SIZE }>();
        let aad = self.associated_data(id, kind);
        let ciphertext = self
            .aead
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CallwireError::protocol("payload encryption failed"))?;

        let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed payload. Any failure is a hard session error.
    pub fn open(&self, id: &Uuid, kind: MessageKind, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < ProtocolConfig::NONCE_SIZE {
            return Err(CallwireError::protocol("sealed payload shorter than its nonce"));
        }
        let (nonce, ciphertext) = sealed.split_at(ProtocolConfig::NONCE_SIZE);
        let aad = self.associated_data(id, kind);
        self.aead
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CallwireError::protocol(format!("cannot decrypt {} payload", kind)))
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established_pair() -> (SessionCipher, SessionCipher) {
        let mut client = ClientHandshake::new();
        let request = client.initialization_request();
        let (response, server_cipher) = accept_initialization(&request).unwrap();
        let client_cipher = client.complete(&response).unwrap();
        (client_cipher, server_cipher)
    }

    #[test]
    fn test_handshake_state_progression() {
        let mut client = ClientHandshake::new();
        assert_eq!(client.state(), HandshakeState::KeysGenerated);

        let request = client.initialization_request();
        assert_eq!(client.state(), HandshakeState::PublicKeySent);
        assert_eq!(request.public_key.len(), 32);

        let (response, _) = accept_initialization(&request).unwrap();
        client.complete(&response).unwrap();
        assert_eq!(client.state(), HandshakeState::SessionEstablished);
    }

    #[test]
    fn test_both_sides_share_session_key() {
        let (client, server) = established_pair();
        let id = Uuid::new_v4();

        let sealed = client.seal(&id, MessageKind::Request, b"ping").unwrap();
        assert_ne!(&sealed[ProtocolConfig::NONCE_SIZE..], b"ping");
        assert_eq!(server.open(&id, MessageKind::Request, &sealed).unwrap(), b"ping");

        let sealed = server.seal(&id, MessageKind::Response, b"pong").unwrap();
        assert_eq!(client.open(&id, MessageKind::Response, &sealed).unwrap(), b"pong");
    }

    #[test]
    fn test_payload_bound_to_envelope_header() {
        let (client, server) = established_pair();
        let id = Uuid::new_v4();
        let sealed = client.seal(&id, MessageKind::Request, b"ping").unwrap();

        assert!(server.open(&Uuid::new_v4(), MessageKind::Request, &sealed).is_err());
        assert!(server.open(&id, MessageKind::Callback, &sealed).is_err());
    }

    #[test]
    fn test_fresh_keys_per_handshake() {
        let (first, _) = established_pair();
        let (_, second_server) = established_pair();
        let id = Uuid::new_v4();
        let sealed = first.seal(&id, MessageKind::Request, b"ping").unwrap();
        assert!(second_server.open(&id, MessageKind::Request, &sealed).is_err());
    }

    #[test]
    fn test_tampered_material_fails() {
        let mut client = ClientHandshake::new();
        let request = client.initialization_request();
        let (mut response, _) = accept_initialization(&request).unwrap();
        response.sealed_material[0] ^= 0xff;
        assert!(matches!(
            client.complete(&response),
            Err(CallwireError::Handshake { .. })
        ));
    }

    #[test]
    fn test_refused_initialization() {
        let mut client = ClientHandshake::new();
        client.initialization_request();
        let err = client
            .complete(&InitializationResponse::refused("encryption disabled"))
            .unwrap_err();
        assert!(err.to_string().contains("encryption disabled"));
    }

    #[test]
    fn test_low_order_key_rejected() {
        let request = InitializationRequest {
            public_key: vec![0u8; 32],
        };
        assert!(accept_initialization(&request).is_err());
    }

    #[test]
    fn test_complete_before_sending_key_fails() {
        let mut client = ClientHandshake::new();
        let mut other = ClientHandshake::new();
        let (response, _) = accept_initialization(&other.initialization_request()).unwrap();
        assert!(client.complete(&response).is_err());
    }
}
