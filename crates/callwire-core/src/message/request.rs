//! Remote call request.

use super::types::{ParameterType, TypeDescriptor, TypeHandle, TypeMode, TypeTag};
use serde::{Deserialize, Serialize};

/// Parameter and generic-argument descriptors of a request.
///
/// A request is either fully strong or fully weak, so the dispatcher always has
/// one deterministic matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum Signature {
    Strong {
        parameter_types: Vec<TypeHandle>,
        #[serde(default)]
        generic_arguments: Vec<TypeHandle>,
    },
    Weak {
        parameter_types: Vec<ParameterType>,
        #[serde(default)]
        generic_arguments: Vec<ParameterType>,
    },
}

impl Signature {
    /// Describe local types in the given mode.
    pub fn for_tags(mode: TypeMode, parameters: &[TypeTag], generics: &[TypeTag]) -> Self {
        match mode {
            TypeMode::Strong => Signature::Strong {
                parameter_types: parameters.iter().map(|t| t.handle().clone()).collect(),
                generic_arguments: generics.iter().map(|t| t.handle().clone()).collect(),
            },
            TypeMode::Weak => Signature::Weak {
                parameter_types: parameters.iter().map(|t| t.parameter_type().clone()).collect(),
                generic_arguments: generics.iter().map(|t| t.parameter_type().clone()).collect(),
            },
        }
    }

    pub fn mode(&self) -> TypeMode {
        match self {
            Signature::Strong { .. } => TypeMode::Strong,
            Signature::Weak { .. } => TypeMode::Weak,
        }
    }

    pub fn parameters(&self) -> Vec<TypeDescriptor> {
        match self {
            Signature::Strong { parameter_types, .. } => parameter_types
                .iter()
                .cloned()
                .map(TypeDescriptor::Strong)
                .collect(),
            Signature::Weak { parameter_types, .. } => parameter_types
                .iter()
                .cloned()
                .map(TypeDescriptor::Weak)
                .collect(),
        }
    }

    pub fn generic_arguments(&self) -> Vec<TypeDescriptor> {
        match self {
            Signature::Strong {
                generic_arguments, ..
            } => generic_arguments
                .iter()
                .cloned()
                .map(TypeDescriptor::Strong)
                .collect(),
            Signature::Weak {
                generic_arguments, ..
            } => generic_arguments
                .iter()
                .cloned()
                .map(TypeDescriptor::Weak)
                .collect(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Signature::Strong { parameter_types, .. } => parameter_types.len(),
            Signature::Weak { parameter_types, .. } => parameter_types.len(),
        }
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::Strong {
            parameter_types: Vec::new(),
            generic_arguments: Vec::new(),
        }
    }
}

/// One remote call: method name, encoded arguments, and their descriptors.
///
/// Also used as the body of Callback envelopes, where `method_name` is the
/// event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub method_name: String,
    /// One formatter-encoded payload per argument, in order.
    #[serde(default)]
    pub arguments: Vec<Vec<u8>>,
    #[serde(default)]
    pub signature: Signature,
}

impl Request {
    pub fn new(
        method_name: impl Into<String>,
        arguments: Vec<Vec<u8>>,
        signature: Signature,
    ) -> Self {
        Self {
            token: None,
            method_name: method_name.into(),
            arguments,
            signature,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}
