//! Pluggable payload formats.
//!
//! A [`Formatter`] converts between bytes and a generic value tree
//! (`serde_json::Value`). Envelope bodies and argument payloads both go
//! through it, so swapping the format never touches the session or dispatch
//! code. Formatters must be deterministic and side-effect free.
//!
//! ```rust,ignore
//! let formatter: Arc<dyn Formatter> = Arc::new(MessagePackFormatter);
//! let bytes = encode(&*formatter, &request)?;
//! let back: Request = decode(&*formatter, &bytes)?;
//! ```

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Serializer port.
pub trait Formatter: Send + Sync + 'static {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>>;

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value>;
}

/// Encode any serializable value with `formatter`.
pub fn encode<T: Serialize + ?Sized>(formatter: &dyn Formatter, value: &T) -> Result<Vec<u8>> {
    formatter.serialize_value(&serde_json::to_value(value)?)
}

/// Decode bytes produced by [`encode`] into `T`.
pub fn decode<T: DeserializeOwned>(formatter: &dyn Formatter, bytes: &[u8]) -> Result<T> {
    let tree = formatter.deserialize_value(bytes)?;
    Ok(serde_json::from_value(tree)?)
}

/// UTF-8 JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary MessagePack with named map keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackFormatter;

impl Formatter for MessagePackFormatter {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ParameterType, Request, Response, Signature};

    fn sample_request() -> Request {
        Request::new(
            "Add",
            vec![vec![1, 2, 3], vec![]],
            Signature::Weak {
                parameter_types: vec![ParameterType::new("i64", "core")],
                generic_arguments: vec![],
            },
        )
    }

    #[test]
    fn test_json_request_roundtrip() {
        let request = sample_request();
        let bytes = encode(&JsonFormatter, &request).unwrap();
        let back: Request = decode(&JsonFormatter, &bytes).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_msgpack_request_roundtrip() {
        let request = sample_request();
        let bytes = encode(&MessagePackFormatter, &request).unwrap();
        let back: Request = decode(&MessagePackFormatter, &bytes).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_msgpack_is_more_compact_than_json() {
        let response = Response::ok(vec![0u8; 32]);
        let json = encode(&JsonFormatter, &response).unwrap();
        let packed = encode(&MessagePackFormatter, &response).unwrap();
        assert!(packed.len() < json.len());
    }

    #[test]
    fn test_json_rejects_garbage() {
        assert!(JsonFormatter.deserialize_value(b"{not json").is_err());
    }
}
