//! Wire data model: envelopes, requests, responses, and type descriptors.

pub mod envelope;
pub mod request;
pub mod response;
pub mod types;

pub use envelope::{Message, MessageKind};
pub use request::{Request, Signature};
pub use response::{Response, StatusCode};
pub use types::{
    Argument, IntoArguments, ParameterType, RemoteType, TypeDescriptor, TypeHandle, TypeMode,
    TypeTag, ValueKind,
};
