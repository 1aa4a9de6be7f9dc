//! Request dispatch on the receiving side.
//!
//! A [`Dispatcher`] holds one or more [`ServiceDefinition`]s. For each
//! request the services are consulted in registration order; the first one
//! with a method whose name (case-insensitive) and signature match wins.
//!
//! # Status mapping
//!
//! | Situation | Status |
//! |---|---|
//! | unknown method, no matching overload, missing generic instance | BadRequest |
//! | more than one matching overload in a service | BadRequest |
//! | argument count mismatch, undecodable or unconvertible argument | BadRequest |
//! | method returned an error or panicked | InternalServerError |
//! | dispatch itself panicked | InternalServerError |

mod events;
mod handler;
mod service;

pub use events::{EventHub, RaisedEvent};
pub use handler::{AsyncHandler, InvocationError, SyncHandler};
pub use service::{GenericMethodBuilder, ServiceBuilder, ServiceDefinition, TypePattern};

use crate::converter::ValueConverter;
use crate::message::{Request, Response};
use futures::FutureExt;
use handler::panic_message;
use service::{Invocation, Resolution};
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Routes requests to registered services.
#[derive(Debug)]
pub struct Dispatcher {
    services: Vec<ServiceDefinition>,
}

impl Dispatcher {
    /// Dispatcher over a single service.
    pub fn new(service: ServiceDefinition) -> Self {
        Self {
            services: vec![service],
        }
    }

    /// Dispatcher over several services, consulted in the given order.
    pub fn composite(services: Vec<ServiceDefinition>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Event sources of every service.
    pub fn event_hubs(&self) -> Vec<EventHub> {
        self.services
            .iter()
            .filter_map(|service| service.events().cloned())
            .collect()
    }

    fn resolve(&self, request: &Request) -> Result<&Invocation, String> {
        let parameters = request.signature.parameters();
        let generics = request.signature.generic_arguments();
        let mut known_name = false;
        let mut missing_instance = None;

        for service in &self.services {
            match service.resolve(&request.method_name, &parameters, &generics) {
                Resolution::Found(invocation) => return Ok(invocation),
                Resolution::Ambiguous(count) => {
                    return Err(format!(
                        "call to {} is ambiguous: {} overloads in {} match",
                        request.method_name,
                        count,
                        service.name()
                    ))
                }
                Resolution::MissingInstance(message) => {
                    known_name = true;
                    missing_instance.get_or_insert(message);
                }
                Resolution::NoOverload => known_name = true,
                Resolution::NameNotFound => {}
            }
        }

        Err(match (known_name, missing_instance) {
            (_, Some(message)) => message,
            (true, None) => format!(
                "no overload of {} matches the given parameter types",
                request.method_name
            ),
            (false, None) => format!("method {} not found", request.method_name),
        })
    }

    /// Resolve, convert arguments, invoke, and encode the result.
    ///
    /// Never panics: a panic anywhere on the way becomes an
    /// InternalServerError response.
    pub async fn dispatch(&self, converter: &ValueConverter, request: &Request) -> Response {
        match AssertUnwindSafe(self.dispatch_inner(converter, request))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(payload) => {
                let detail = panic_message(payload);
                error!("Dispatch of {} panicked: {}", request.method_name, detail);
                Response::internal_error("dispatch panicked", Some(detail))
            }
        }
    }

    async fn dispatch_inner(&self, converter: &ValueConverter, request: &Request) -> Response {
        if request.arguments.len() != request.signature.parameter_count() {
            return Response::bad_request(format!(
                "{} carries {} arguments but describes {}",
                request.method_name,
                request.arguments.len(),
                request.signature.parameter_count()
            ));
        }

        let invocation = match self.resolve(request) {
            Ok(invocation) => invocation,
            Err(message) => {
                debug!("Rejecting request: {}", message);
                return Response::bad_request(message);
            }
        };

        let mut values = Vec::with_capacity(request.arguments.len());
        for (index, (payload, tag)) in request
            .arguments
            .iter()
            .zip(&invocation.parameters)
            .enumerate()
        {
            match converter.decode_argument(payload, tag) {
                Ok(value) => values.push(value),
                Err(e) => {
                    return Response::bad_request(format!(
                        "argument {} of {}: {}",
                        index, request.method_name, e
                    ))
                }
            }
        }

        match (invocation.invoker)(values).await {
            Ok(value) => match converter.formatter().serialize_value(&value) {
                Ok(payload) => Response::ok(payload),
                Err(e) => Response::internal_error("cannot encode result", Some(e.to_string())),
            },
            Err(InvocationError::Arguments(e)) => {
                Response::error(e.to_status_code(), e.to_string(), None)
            }
            Err(InvocationError::Failed { message, detail }) => {
                warn!("{} failed: {}", request.method_name, message);
                Response::internal_error(message, Some(detail))
            }
        }
    }
}
