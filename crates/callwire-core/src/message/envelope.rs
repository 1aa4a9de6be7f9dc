//! Wire envelope: the smallest addressable unit exchanged by sessions.
//!
//! ```text
//! [16 bytes: id (big-endian UUID)][1 byte: kind][payload bytes...]
//! ```
//!
//! The transport delimits one envelope from the next; a buffer handed to
//! [`Message::decode`] is exactly one envelope.

use crate::config::ProtocolConfig;
use crate::error::{CallwireError, Result};
use uuid::Uuid;

/// Envelope kind. The numeric values are part of the wire contract and the
/// set is closed: any other byte is rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Unknown = 0,
    Initialization = 1,
    Authorization = 2,
    Request = 3,
    Response = 4,
    Callback = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = CallwireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageKind::Unknown),
            1 => Ok(MessageKind::Initialization),
            2 => Ok(MessageKind::Authorization),
            3 => Ok(MessageKind::Request),
            4 => Ok(MessageKind::Response),
            5 => Ok(MessageKind::Callback),
            other => Err(CallwireError::Framing {
                message: format!("unknown envelope kind {}", other),
            }),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(id: Uuid, kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { id, kind, payload }
    }

    /// Encode into bytes ready for `Transport::send_bytes`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ProtocolConfig::ENVELOPE_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(self.id.as_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ProtocolConfig::ENVELOPE_HEADER_SIZE {
            return Err(CallwireError::Framing {
                message: format!(
                    "envelope of {} bytes is shorter than the {}-byte header",
                    bytes.len(),
                    ProtocolConfig::ENVELOPE_HEADER_SIZE
                ),
            });
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes[..16]);
        let kind = MessageKind::try_from(bytes[16])?;

        Ok(Self {
            id: Uuid::from_bytes(id),
            kind,
            payload: bytes[ProtocolConfig::ENVELOPE_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let id = Uuid::new_v4();
        let message = Message::new(id, MessageKind::Response, vec![9, 8, 7]);
        let bytes = message.encode();

        assert_eq!(&bytes[..16], id.as_bytes());
        assert_eq!(bytes[16], 4);
        assert_eq!(&bytes[17..], &[9, 8, 7]);
    }

    #[test]
    fn test_decode_roundtrip_with_empty_payload() {
        let message = Message::new(Uuid::new_v4(), MessageKind::Initialization, Vec::new());
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let err = Message::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, CallwireError::Framing { .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut bytes = Message::new(Uuid::nil(), MessageKind::Request, vec![]).encode();
        bytes[16] = 6;
        let err = Message::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown envelope kind 6"));
    }

    #[test]
    fn test_kind_values_are_stable() {
        assert_eq!(MessageKind::Unknown as u8, 0);
        assert_eq!(MessageKind::Initialization as u8, 1);
        assert_eq!(MessageKind::Authorization as u8, 2);
        assert_eq!(MessageKind::Request as u8, 3);
        assert_eq!(MessageKind::Response as u8, 4);
        assert_eq!(MessageKind::Callback as u8, 5);
    }
}
