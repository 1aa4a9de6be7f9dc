//! Type descriptors exchanged in requests, and the local type tags they are
//! matched against.
//!
//! A parameter type travels in one of two forms:
//!
//! - **strong** ([`TypeHandle`]): a hash of the Rust `TypeId`. Only meaningful
//!   between peers built from the same artifact.
//! - **weak** ([`ParameterType`]): the `(type name, module name)` pair derived
//!   from `std::any::type_name`, which survives independent builds of the
//!   same type.
//!
//! [`TypeTag`] is the local, full description of a type: both descriptor
//! forms, the [`ValueKind`] that drives value conversion, and a normalizer
//! that checks a generic value tree against the concrete type.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use uuid::Uuid;

/// Which descriptor form a peer puts on its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeMode {
    Strong,
    Weak,
}

/// Runtime type handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeHandle {
    pub id: u64,
    /// Full type name, for diagnostics only; equality uses `id`.
    pub name: String,
}

impl TypeHandle {
    pub fn of<T: 'static + ?Sized>() -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<T>().hash(&mut hasher);
        Self {
            id: hasher.finish(),
            name: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn same_type(&self, other: &TypeHandle) -> bool {
        self.id == other.id
    }
}

/// Weak type descriptor: type name plus declaring module (crate) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterType {
    pub type_name: String,
    pub module_name: String,
}

impl ParameterType {
    pub fn new(type_name: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            module_name: module_name.into(),
        }
    }

    pub fn of<T: ?Sized>() -> Self {
        Self::from_type_name(std::any::type_name::<T>())
    }

    /// Split a full Rust type path at its crate root.
    ///
    /// `alloc::vec::Vec<alloc::string::String>` becomes module `alloc`, name
    /// `vec::Vec<alloc::string::String>`. Paths without a crate segment
    /// (primitives, tuples) belong to `core`.
    pub fn from_type_name(full: &str) -> Self {
        let head_end = full.find(['<', '(', '[', '&']).unwrap_or(full.len());
        match full[..head_end].find("::") {
            Some(idx) => Self::new(&full[idx + 2..], &full[..idx]),
            None => Self::new(full, "core"),
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.type_name, self.module_name)
    }
}

/// One descriptor as carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDescriptor {
    Strong(TypeHandle),
    Weak(ParameterType),
}

impl TypeDescriptor {
    /// Structural equality between two descriptors of the same form.
    /// Descriptors of different forms never match.
    pub fn same_type(&self, other: &TypeDescriptor) -> bool {
        match (self, other) {
            (TypeDescriptor::Strong(a), TypeDescriptor::Strong(b)) => a.same_type(b),
            (TypeDescriptor::Weak(a), TypeDescriptor::Weak(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeDescriptor::Strong(handle) => write!(f, "{}", handle.name),
            TypeDescriptor::Weak(parameter) => write!(f, "[{}]", parameter),
        }
    }
}

/// Shape of a value, used by the converter to coerce generic trees.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Unit,
    Bool,
    Integer { signed: bool, bits: u8 },
    Float,
    Text,
    Guid,
    Duration,
    Timestamp,
    /// Unit-variant enum serialized by variant name.
    Enum(&'static [&'static str]),
    Sequence(Box<ValueKind>),
    Optional(Box<ValueKind>),
    Structured,
}

type Normalizer = fn(Value) -> std::result::Result<Value, String>;

fn normalize_as<T>(value: Value) -> std::result::Result<Value, String>
where
    T: Serialize + DeserializeOwned,
{
    let typed: T = serde_json::from_value(value).map_err(|e| e.to_string())?;
    serde_json::to_value(typed).map_err(|e| e.to_string())
}

/// Local description of a concrete type.
#[derive(Clone)]
pub struct TypeTag {
    handle: TypeHandle,
    parameter_type: ParameterType,
    kind: ValueKind,
    normalize: Normalizer,
}

impl TypeTag {
    pub fn new<T: Serialize + DeserializeOwned + 'static>(kind: ValueKind) -> Self {
        Self {
            handle: TypeHandle::of::<T>(),
            parameter_type: ParameterType::of::<T>(),
            kind,
            normalize: normalize_as::<T>,
        }
    }

    pub fn of<T: RemoteType>() -> Self {
        T::type_tag()
    }

    pub fn structured<T: Serialize + DeserializeOwned + 'static>() -> Self {
        Self::new::<T>(ValueKind::Structured)
    }

    pub fn enumeration<T: Serialize + DeserializeOwned + 'static>(
        variants: &'static [&'static str],
    ) -> Self {
        Self::new::<T>(ValueKind::Enum(variants))
    }

    pub fn handle(&self) -> &TypeHandle {
        &self.handle
    }

    pub fn parameter_type(&self) -> &ParameterType {
        &self.parameter_type
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Check `value` against this type and return its canonical tree.
    pub fn normalize(&self, value: Value) -> std::result::Result<Value, String> {
        (self.normalize)(value)
    }

    pub fn descriptor(&self, mode: TypeMode) -> TypeDescriptor {
        match mode {
            TypeMode::Strong => TypeDescriptor::Strong(self.handle.clone()),
            TypeMode::Weak => TypeDescriptor::Weak(self.parameter_type.clone()),
        }
    }

    /// Does a request descriptor name this type?
    pub fn matches(&self, descriptor: &TypeDescriptor) -> bool {
        match descriptor {
            TypeDescriptor::Strong(handle) => self.handle.same_type(handle),
            TypeDescriptor::Weak(parameter) => &self.parameter_type == parameter,
        }
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.handle.same_type(&other.handle)
    }
}

impl std::fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeTag")
            .field("name", &self.handle.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A type that can cross the wire as a parameter, return value, or event argument.
///
/// The default tag treats the type as a structured tree. Unit-variant enums
/// should override [`type_tag`](Self::type_tag) with
/// [`TypeTag::enumeration`] so ordinals and case-insensitive names convert.
pub trait RemoteType: Serialize + DeserializeOwned + Send + 'static {
    fn type_tag() -> TypeTag {
        TypeTag::structured::<Self>()
    }
}

macro_rules! remote_kind {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl RemoteType for $ty {
                fn type_tag() -> TypeTag {
                    TypeTag::new::<$ty>($kind)
                }
            }
        )*
    };
}

remote_kind! {
    () => ValueKind::Unit,
    bool => ValueKind::Bool,
    i8 => ValueKind::Integer { signed: true, bits: 8 },
    i16 => ValueKind::Integer { signed: true, bits: 16 },
    i32 => ValueKind::Integer { signed: true, bits: 32 },
    i64 => ValueKind::Integer { signed: true, bits: 64 },
    isize => ValueKind::Integer { signed: true, bits: 64 },
    u8 => ValueKind::Integer { signed: false, bits: 8 },
    u16 => ValueKind::Integer { signed: false, bits: 16 },
    u32 => ValueKind::Integer { signed: false, bits: 32 },
    u64 => ValueKind::Integer { signed: false, bits: 64 },
    usize => ValueKind::Integer { signed: false, bits: 64 },
    f32 => ValueKind::Float,
    f64 => ValueKind::Float,
    String => ValueKind::Text,
    Uuid => ValueKind::Guid,
    Duration => ValueKind::Duration,
    DateTime<Utc> => ValueKind::Timestamp,
    Value => ValueKind::Structured,
}

impl<T: RemoteType> RemoteType for Vec<T> {
    fn type_tag() -> TypeTag {
        TypeTag::new::<Vec<T>>(ValueKind::Sequence(Box::new(T::type_tag().kind)))
    }
}

impl<T: RemoteType> RemoteType for Option<T> {
    fn type_tag() -> TypeTag {
        TypeTag::new::<Option<T>>(ValueKind::Optional(Box::new(T::type_tag().kind)))
    }
}

impl<V: RemoteType> RemoteType for HashMap<String, V> {}

/// A typed argument ready for encoding.
#[derive(Debug, Clone)]
pub struct Argument {
    pub tag: TypeTag,
    pub value: Value,
}

impl Argument {
    pub fn new<T: RemoteType>(value: &T) -> Result<Self> {
        Ok(Self {
            tag: T::type_tag(),
            value: serde_json::to_value(value)?,
        })
    }
}

/// Conversion of a Rust argument list into typed arguments.
pub trait IntoArguments {
    fn into_arguments(self) -> Result<Vec<Argument>>;
}

impl IntoArguments for Vec<Argument> {
    fn into_arguments(self) -> Result<Vec<Argument>> {
        Ok(self)
    }
}

macro_rules! impl_into_arguments {
    ($($arg:ident),*) => {
        impl<$($arg: RemoteType,)*> IntoArguments for ($($arg,)*) {
            #[allow(non_snake_case)]
            fn into_arguments(self) -> Result<Vec<Argument>> {
                let ($($arg,)*) = self;
                Ok(vec![$(Argument::new(&$arg)?),*])
            }
        }
    };
}

impl_into_arguments!();
impl_into_arguments!(A1);
impl_into_arguments!(A1, A2);
impl_into_arguments!(A1, A2, A3);
impl_into_arguments!(A1, A2, A3, A4);
impl_into_arguments!(A1, A2, A3, A4, A5);
impl_into_arguments!(A1, A2, A3, A4, A5, A6);
