//! Client-side request interception.
//!
//! [`RemoteProxy`] turns a method call into a [`Request`], sends it over a
//! [`ClientSession`], and converts the response back into the caller's
//! return type. Event accessors (`add_X` / `remove_X`) never go over the
//! wire: they edit the session's callback registry, which the receive loop
//! consults for every Callback envelope.
//!
//! Typed adapters are generated with [`remote_proxy!`](crate::remote_proxy):
//!
//! ```rust,ignore
//! remote_proxy! {
//!     pub struct ChatProxy {
//!         fn post(text: String) -> u64 = "Post";
//!         fn history() -> Vec<String> = "History";
//!         event "MessagePosted"(String) => on_message_posted, off_message_posted;
//!     }
//! }
//!
//! let chat = ChatProxy::new(RemoteProxy::new(session));
//! let id = chat.post("hello".into()).await?;
//! let subscription = chat.on_message_posted(|(text,)| println!("{text}"));
//! ```

use crate::converter::{FromArguments, ValueConverter};
use crate::error::{CallwireError, Result};
use crate::message::{
    Argument, IntoArguments, RemoteType, Request, Response, Signature, TypeMode, TypeTag,
};
use crate::retry::RetryPolicy;
use crate::session::{ClientSession, SubscriptionId};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::warn;

/// How [`RemoteProxy::call_blocking`] waits for the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncCallMode {
    /// Spawn the exchange on the runtime and block on a one-shot receiver.
    #[default]
    DedicatedTask,
    /// Drive the exchange with `Handle::block_on`.
    BlockOn,
}

/// Per-proxy settings.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Descriptor mode for requests. `None` uses the session's mode.
    pub type_mode: Option<TypeMode>,
    pub retry: Option<RetryPolicy>,
    pub sync_mode: SyncCallMode,
    /// Runtime for blocking calls. `None` uses the current runtime.
    pub runtime: Option<Handle>,
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type_mode(mut self, mode: TypeMode) -> Self {
        self.type_mode = Some(mode);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncCallMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Dynamic proxy for one remote service.
#[derive(Debug, Clone)]
pub struct RemoteProxy {
    session: ClientSession,
    converter: Arc<ValueConverter>,
    config: ProxyConfig,
}

impl RemoteProxy {
    pub fn new(session: ClientSession) -> Self {
        Self::with_config(session, ProxyConfig::default())
    }

    pub fn with_config(session: ClientSession, config: ProxyConfig) -> Self {
        let converter = Arc::new(ValueConverter::new(session.formatter().clone()));
        Self {
            session,
            converter,
            config,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn converter(&self) -> &ValueConverter {
        &self.converter
    }

    fn type_mode(&self) -> TypeMode {
        self.config
            .type_mode
            .unwrap_or(self.session.config().type_mode)
    }

    /// Encode arguments and describe them in the proxy's type mode.
    pub fn build_request(
        &self,
        method: &str,
        arguments: Vec<Argument>,
        generic_arguments: &[TypeTag],
    ) -> Result<Request> {
        let formatter = self.converter.formatter();
        let mut payloads = Vec::with_capacity(arguments.len());
        let mut tags = Vec::with_capacity(arguments.len());
        for argument in arguments {
            payloads.push(formatter.serialize_value(&argument.value)?);
            tags.push(argument.tag);
        }
        let signature = Signature::for_tags(self.type_mode(), &tags, generic_arguments);
        Ok(Request::new(method, payloads, signature))
    }

    /// Send a prepared request, with retries when a policy is configured.
    pub async fn send(&self, request: Request) -> Result<Response> {
        match &self.config.retry {
            Some(policy) => {
                policy
                    .execute_response(|| self.session.request(request.clone()))
                    .await
            }
            None => self.session.request(request).await,
        }
    }

    /// Call `method` and convert its result to `R`.
    pub async fn call<R, A>(&self, method: &str, arguments: A) -> Result<R>
    where
        R: RemoteType,
        A: IntoArguments,
    {
        self.call_generic(method, &[], arguments).await
    }

    /// Call a generic method closed over `generic_arguments`.
    pub async fn call_generic<R, A>(
        &self,
        method: &str,
        generic_arguments: &[TypeTag],
        arguments: A,
    ) -> Result<R>
    where
        R: RemoteType,
        A: IntoArguments,
    {
        let request = self.build_request(method, arguments.into_arguments()?, generic_arguments)?;
        let payload = self.send(request).await?.into_payload()?;
        let value = self.converter.formatter().deserialize_value(&payload)?;
        self.converter.convert_to::<R>(value)
    }

    /// Call a method whose result is discarded.
    pub async fn notify<A: IntoArguments>(&self, method: &str, arguments: A) -> Result<()> {
        let request = self.build_request(method, arguments.into_arguments()?, &[])?;
        self.send(request).await?.into_payload()?;
        Ok(())
    }

    /// Call from synchronous code.
    ///
    /// Must run outside the runtime's async context, for example on a
    /// `spawn_blocking` thread or a plain OS thread given
    /// [`ProxyConfig::runtime`].
    pub fn call_blocking<R, A>(&self, method: &str, arguments: A) -> Result<R>
    where
        R: RemoteType,
        A: IntoArguments + Send + 'static,
    {
        let runtime = match &self.config.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| CallwireError::Config {
                message: "blocking call needs a tokio runtime handle".to_string(),
            })?,
        };

        match self.config.sync_mode {
            SyncCallMode::DedicatedTask => {
                let proxy = self.clone();
                let method = method.to_string();
                let (tx, rx) = oneshot::channel();
                runtime.spawn(async move {
                    let _ = tx.send(proxy.call::<R, A>(&method, arguments).await);
                });
                rx.blocking_recv().map_err(|_| {
                    CallwireError::Other("blocking call task was dropped".to_string())
                })?
            }
            SyncCallMode::BlockOn => runtime.block_on(self.call::<R, A>(method, arguments)),
        }
    }

    /// Subscribe to a server event.
    ///
    /// `accessor` is either the event name or its `add_` accessor. The
    /// handler receives the callback's arguments converted to `A`; callbacks
    /// whose arguments do not convert are logged and skipped.
    pub fn add_event_handler<A, F>(&self, accessor: &str, handler: F) -> SubscriptionId
    where
        A: FromArguments,
        F: Fn(A) + Send + Sync + 'static,
    {
        let event = event_name(accessor, "add_").to_string();
        let converter = self.converter.clone();
        let label = event.clone();
        self.session.callbacks().add(
            event,
            Arc::new(move |payloads: &[Vec<u8>]| {
                match converter.decode_arguments::<A>(payloads) {
                    Ok(arguments) => handler(arguments),
                    Err(e) => warn!("Skipping {} callback: {}", label, e),
                }
            }),
        )
    }

    /// Unsubscribe. `accessor` is the event name or its `remove_` accessor.
    pub fn remove_event_handler(&self, accessor: &str, id: SubscriptionId) -> bool {
        self.session
            .callbacks()
            .remove(event_name(accessor, "remove_"), id)
    }
}

fn event_name<'a>(accessor: &'a str, prefix: &str) -> &'a str {
    match accessor.strip_prefix(prefix) {
        Some(name) if !name.is_empty() => name,
        _ => accessor,
    }
}

/// Generate a typed adapter over [`RemoteProxy`].
///
/// Methods map to remote method names; events get an explicit subscribe and
/// unsubscribe method pair.
#[macro_export]
macro_rules! remote_proxy {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                fn $method:ident($($arg:ident : $arg_ty:ty),* $(,)?) -> $ret:ty = $remote:literal;
            )*
            $(
                event $event:literal ($($event_ty:ty),* $(,)?) => $add:ident, $remove:ident;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            proxy: $crate::interceptor::RemoteProxy,
        }

        impl $name {
            $vis fn new(proxy: $crate::interceptor::RemoteProxy) -> Self {
                Self { proxy }
            }

            $vis fn proxy(&self) -> &$crate::interceptor::RemoteProxy {
                &self.proxy
            }

            $(
                $vis async fn $method(&self, $($arg: $arg_ty),*) -> $crate::error::Result<$ret> {
                    self.proxy.call::<$ret, _>($remote, ($($arg,)*)).await
                }
            )*

            $(
                $vis fn $add<F>(&self, handler: F) -> $crate::session::SubscriptionId
                where
                    F: Fn(($($event_ty,)*)) + Send + Sync + 'static,
                {
                    self.proxy.add_event_handler::<($($event_ty,)*), F>($event, handler)
                }

                $vis fn $remove(&self, id: $crate::session::SubscriptionId) -> bool {
                    self.proxy.remove_event_handler($event, id)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::message::{ParameterType, TypeDescriptor};
    use crate::transport::MemoryListener;

    fn proxy(mode: TypeMode) -> RemoteProxy {
        let listener = MemoryListener::new();
        let session = ClientSession::new(
            listener.connector().transport(),
            ClientConfig::new().with_type_mode(mode),
        );
        RemoteProxy::new(session)
    }

    #[test]
    fn test_event_name_from_accessor() {
        assert_eq!(event_name("add_Changed", "add_"), "Changed");
        assert_eq!(event_name("Changed", "add_"), "Changed");
        assert_eq!(event_name("remove_Changed", "remove_"), "Changed");
        assert_eq!(event_name("add_", "add_"), "add_");
    }

    #[tokio::test]
    async fn test_build_request_in_weak_mode() {
        let proxy = proxy(TypeMode::Weak);
        let request = proxy
            .build_request("Echo", ("hi".to_string(), 3u8).into_arguments().unwrap(), &[])
            .unwrap();

        assert_eq!(request.method_name, "Echo");
        assert_eq!(request.arguments, vec![b"\"hi\"".to_vec(), b"3".to_vec()]);
        assert_eq!(
            request.signature.parameters()[1],
            TypeDescriptor::Weak(ParameterType::new("u8", "core"))
        );
    }

    #[tokio::test]
    async fn test_proxy_mode_overrides_session_mode() {
        let listener = MemoryListener::new();
        let session = ClientSession::new(listener.connector().transport(), ClientConfig::new());
        let proxy =
            RemoteProxy::with_config(session, ProxyConfig::new().with_type_mode(TypeMode::Weak));
        let request = proxy
            .build_request("Echo", vec![], &[TypeTag::of::<i64>()])
            .unwrap();
        assert_eq!(request.signature.mode(), TypeMode::Weak);
        assert_eq!(request.signature.generic_arguments().len(), 1);
    }

    #[tokio::test]
    async fn test_event_handlers_are_local() {
        let proxy = proxy(TypeMode::Strong);
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = received.clone();

        let id = proxy.add_event_handler("add_Changed", move |(value,): (i64,)| {
            sink.lock().push(value)
        });
        assert_eq!(proxy.session().callbacks().handler_count("Changed"), 1);

        proxy.session().callbacks().dispatch("Changed", &[b"5".to_vec()]);
        // Undecodable arguments are skipped.
        proxy.session().callbacks().dispatch("Changed", &[b"\"x\"".to_vec()]);
        assert_eq!(*received.lock(), vec![5]);

        assert!(proxy.remove_event_handler("remove_Changed", id));
        assert!(!proxy.session().callbacks().has_event("Changed"));
    }

    #[tokio::test]
    async fn test_call_without_connection() {
        let proxy = proxy(TypeMode::Strong);
        let result = proxy.call::<String, _>("Echo", ("hi".to_string(),)).await;
        assert!(matches!(result, Err(CallwireError::NotConnected)));
    }
}
