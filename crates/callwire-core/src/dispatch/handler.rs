//! Adapters from plain Rust functions to type-erased invokers.
//!
//! Sync methods are `Fn(A1, .., An) -> anyhow::Result<R>`, async methods are
//! `Fn(A1, .., An) -> impl Future<Output = anyhow::Result<R>>`. Arguments and
//! results are any [`RemoteType`]. Up to six parameters are supported.

use crate::converter::FromArguments;
use crate::error::CallwireError;
use crate::message::RemoteType;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Why an invocation produced no value.
#[derive(Debug)]
pub enum InvocationError {
    /// Converted arguments did not fit the handler's parameters.
    Arguments(CallwireError),
    /// The method returned an error or panicked.
    Failed { message: String, detail: String },
}

pub(crate) type Invoker =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, InvocationError>> + Send + Sync>;

/// A synchronous method body.
pub trait SyncHandler<Args>: Send + Sync + 'static {
    type Output: RemoteType;

    fn call(&self, args: Args) -> anyhow::Result<Self::Output>;
}

/// An asynchronous method body.
pub trait AsyncHandler<Args>: Send + Sync + 'static {
    type Output: RemoteType;
    type Future: Future<Output = anyhow::Result<Self::Output>> + Send + 'static;

    fn call(&self, args: Args) -> Self::Future;
}

macro_rules! impl_handlers {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> SyncHandler<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> anyhow::Result<Ret> + Send + Sync + 'static,
            Ret: RemoteType,
            $($arg: RemoteType,)*
        {
            type Output = Ret;

            #[allow(non_snake_case)]
            fn call(&self, args: ($($arg,)*)) -> anyhow::Result<Ret> {
                let ($($arg,)*) = args;
                (self)($($arg),*)
            }
        }

        impl<Func, Fut, Ret, $($arg,)*> AsyncHandler<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = anyhow::Result<Ret>> + Send + 'static,
            Ret: RemoteType,
            $($arg: RemoteType,)*
        {
            type Output = Ret;
            type Future = Fut;

            #[allow(non_snake_case)]
            fn call(&self, args: ($($arg,)*)) -> Fut {
                let ($($arg,)*) = args;
                (self)($($arg),*)
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A1);
impl_handlers!(A1, A2);
impl_handlers!(A1, A2, A3);
impl_handlers!(A1, A2, A3, A4);
impl_handlers!(A1, A2, A3, A4, A5);
impl_handlers!(A1, A2, A3, A4, A5, A6);

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn finish<R: RemoteType>(
    outcome: std::thread::Result<anyhow::Result<R>>,
) -> Result<Value, InvocationError> {
    match outcome {
        Ok(Ok(value)) => serde_json::to_value(value).map_err(|e| InvocationError::Failed {
            message: "cannot encode result".to_string(),
            detail: e.to_string(),
        }),
        Ok(Err(e)) => Err(InvocationError::Failed {
            message: e.to_string(),
            detail: format!("{:?}", e),
        }),
        Err(payload) => Err(InvocationError::Failed {
            message: "method panicked".to_string(),
            detail: panic_message(payload),
        }),
    }
}

pub(crate) fn sync_invoker<Args, H>(handler: H) -> Invoker
where
    Args: FromArguments,
    H: SyncHandler<Args>,
{
    let handler = Arc::new(handler);
    Arc::new(move |values: Vec<Value>| {
        let handler = handler.clone();
        async move {
            let args = Args::from_values(values).map_err(InvocationError::Arguments)?;
            finish(std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))))
        }
        .boxed()
    })
}

pub(crate) fn async_invoker<Args, H>(handler: H) -> Invoker
where
    Args: FromArguments,
    H: AsyncHandler<Args>,
{
    let handler = Arc::new(handler);
    Arc::new(move |values: Vec<Value>| {
        let handler = handler.clone();
        async move {
            let args = Args::from_values(values).map_err(InvocationError::Arguments)?;
            let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
                Ok(future) => future,
                Err(payload) => return finish::<H::Output>(Err(payload)),
            };
            finish(AssertUnwindSafe(future).catch_unwind().await)
        }
        .boxed()
    })
}
