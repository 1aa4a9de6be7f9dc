//! Service definitions: the explicit method registry.
//!
//! ```rust,ignore
//! let calculator = ServiceBuilder::new("Calculator")
//!     .method("Add", |a: i64, b: i64| -> anyhow::Result<i64> { Ok(a + b) })
//!     .async_method("Slow", slow_echo)
//!     .generic_method("Identity", 1, vec![TypePattern::Generic(0)])
//!         .instance(vec![TypeTag::of::<i64>()], |x: i64| -> anyhow::Result<i64> { Ok(x) })
//!         .instance(vec![TypeTag::of::<String>()], |x: String| -> anyhow::Result<String> {
//!             Ok(x)
//!         })
//!         .finish()
//!     .with_events(hub)
//!     .build();
//! ```

use super::events::EventHub;
use super::handler::{async_invoker, sync_invoker, AsyncHandler, Invoker, SyncHandler};
use crate::converter::FromArguments;
use crate::message::{TypeDescriptor, TypeTag};

/// One parameter position of a generic method.
#[derive(Debug, Clone)]
pub enum TypePattern {
    /// A concrete parameter type.
    Exact(TypeTag),
    /// The method's `n`-th generic argument.
    Generic(usize),
}

pub(crate) struct Invocation {
    pub(crate) parameters: Vec<TypeTag>,
    pub(crate) invoker: Invoker,
}

struct GenericInstance {
    generic_arguments: Vec<TypeTag>,
    invocation: Invocation,
}

enum MethodShape {
    Plain(Invocation),
    Generic {
        arity: usize,
        parameters: Vec<TypePattern>,
        instances: Vec<GenericInstance>,
    },
}

struct MethodEntry {
    name: String,
    shape: MethodShape,
}

/// Outcome of matching one request against one service.
pub(crate) enum Resolution<'a> {
    /// No method of this name.
    NameNotFound,
    /// The name exists but no overload accepts the descriptors.
    NoOverload,
    /// The open generic method matched but the closing instance is missing.
    MissingInstance(String),
    Ambiguous(usize),
    Found(&'a Invocation),
}

/// A named set of methods plus an optional event source.
pub struct ServiceDefinition {
    name: String,
    methods: Vec<MethodEntry>,
    events: Option<EventHub>,
}

impl ServiceDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> Option<&EventHub> {
        self.events.as_ref()
    }

    /// Method names in registration order; overloads appear once per overload.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name.as_str()).collect()
    }

    pub(crate) fn resolve(
        &self,
        method_name: &str,
        parameters: &[TypeDescriptor],
        generics: &[TypeDescriptor],
    ) -> Resolution<'_> {
        let mut named = false;
        let mut found: Vec<&Invocation> = Vec::new();
        let mut missing: Option<String> = None;

        for method in &self.methods {
            if !method.name.eq_ignore_ascii_case(method_name) {
                continue;
            }
            named = true;

            match &method.shape {
                MethodShape::Plain(invocation) => {
                    if generics.is_empty() && tags_match(&invocation.parameters, parameters) {
                        found.push(invocation);
                    }
                }
                MethodShape::Generic {
                    arity,
                    parameters: patterns,
                    instances,
                } => {
                    if *arity != generics.len() || !patterns_match(patterns, parameters, generics) {
                        continue;
                    }
                    match instances
                        .iter()
                        .find(|instance| tags_match(&instance.generic_arguments, generics))
                    {
                        Some(instance) => found.push(&instance.invocation),
                        None => {
                            missing = Some(format!(
                                "{} has no instantiation for the requested generic arguments",
                                method.name
                            ))
                        }
                    }
                }
            }
        }

        match (named, found.len(), missing) {
            (false, _, _) => Resolution::NameNotFound,
            (true, 1, _) => Resolution::Found(found[0]),
            (true, 0, Some(message)) => Resolution::MissingInstance(message),
            (true, 0, None) => Resolution::NoOverload,
            (true, count, _) => Resolution::Ambiguous(count),
        }
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .field("events", &self.events.is_some())
            .finish()
    }
}

fn tags_match(tags: &[TypeTag], descriptors: &[TypeDescriptor]) -> bool {
    tags.len() == descriptors.len()
        && tags
            .iter()
            .zip(descriptors)
            .all(|(tag, descriptor)| tag.matches(descriptor))
}

fn patterns_match(
    patterns: &[TypePattern],
    parameters: &[TypeDescriptor],
    generics: &[TypeDescriptor],
) -> bool {
    patterns.len() == parameters.len()
        && patterns
            .iter()
            .zip(parameters)
            .all(|(pattern, descriptor)| match pattern {
                TypePattern::Exact(tag) => tag.matches(descriptor),
                TypePattern::Generic(index) => generics
                    .get(*index)
                    .is_some_and(|generic| generic.same_type(descriptor)),
            })
}

/// Builds a [`ServiceDefinition`].
pub struct ServiceBuilder {
    name: String,
    methods: Vec<MethodEntry>,
    events: Option<EventHub>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            events: None,
        }
    }

    /// Register a synchronous method.
    pub fn method<Args, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        Args: FromArguments,
        H: SyncHandler<Args>,
    {
        self.methods.push(MethodEntry {
            name: name.into(),
            shape: MethodShape::Plain(Invocation {
                parameters: Args::parameter_tags(),
                invoker: sync_invoker::<Args, H>(handler),
            }),
        });
        self
    }

    /// Register an asynchronous method.
    pub fn async_method<Args, H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        Args: FromArguments,
        H: AsyncHandler<Args>,
    {
        self.methods.push(MethodEntry {
            name: name.into(),
            shape: MethodShape::Plain(Invocation {
                parameters: Args::parameter_tags(),
                invoker: async_invoker::<Args, H>(handler),
            }),
        });
        self
    }

    /// Start an open generic method with `arity` generic parameters.
    ///
    /// Each closed instantiation is registered with
    /// [`GenericMethodBuilder::instance`].
    pub fn generic_method(
        self,
        name: impl Into<String>,
        arity: usize,
        parameters: Vec<TypePattern>,
    ) -> GenericMethodBuilder {
        GenericMethodBuilder {
            service: self,
            name: name.into(),
            arity,
            parameters,
            instances: Vec::new(),
        }
    }

    /// Attach an event source whose events reach ready sessions as callbacks.
    pub fn with_events(mut self, hub: EventHub) -> Self {
        self.events = Some(hub);
        self
    }

    pub fn build(self) -> ServiceDefinition {
        ServiceDefinition {
            name: self.name,
            methods: self.methods,
            events: self.events,
        }
    }
}

/// Collects the instantiations of one generic method.
pub struct GenericMethodBuilder {
    service: ServiceBuilder,
    name: String,
    arity: usize,
    parameters: Vec<TypePattern>,
    instances: Vec<GenericInstance>,
}

impl GenericMethodBuilder {
    /// Register a synchronous instantiation for `generic_arguments`.
    pub fn instance<Args, H>(mut self, generic_arguments: Vec<TypeTag>, handler: H) -> Self
    where
        Args: FromArguments,
        H: SyncHandler<Args>,
    {
        self.instances.push(GenericInstance {
            generic_arguments,
            invocation: Invocation {
                parameters: Args::parameter_tags(),
                invoker: sync_invoker::<Args, H>(handler),
            },
        });
        self
    }

    /// Register an asynchronous instantiation for `generic_arguments`.
    pub fn async_instance<Args, H>(mut self, generic_arguments: Vec<TypeTag>, handler: H) -> Self
    where
        Args: FromArguments,
        H: AsyncHandler<Args>,
    {
        self.instances.push(GenericInstance {
            generic_arguments,
            invocation: Invocation {
                parameters: Args::parameter_tags(),
                invoker: async_invoker::<Args, H>(handler),
            },
        });
        self
    }

    /// Finish the generic method and return to the service builder.
    pub fn finish(mut self) -> ServiceBuilder {
        self.service.methods.push(MethodEntry {
            name: self.name,
            shape: MethodShape::Generic {
                arity: self.arity,
                parameters: self.parameters,
                instances: self.instances,
            },
        });
        self.service
    }
}
