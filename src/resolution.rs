use crate::promise::{HandlerResult, Promise};
use crate::Error;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};
use tracing::debug;

/// What a promise gets resolved with: a plain value, or another promise whose
/// outcome it should adopt.
#[derive(Debug)]
pub enum Resolution<T: 'static, E: 'static> {
    Value(T),
    Nested(Promise<T, E>),
}

impl<T: 'static, E: 'static> From<Promise<T, E>> for Resolution<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Resolution::Nested(promise)
    }
}

/// Who is asking a promise to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// A `Resolver`, `Rejecter`, setup routine or handler result.
    Handle,
    /// The promise being adopted reporting its outcome.
    Adoption,
}

/// Runs a `then` handler and settles `child` with whatever it produced.
pub(crate) fn run<U, E, H>(child: &Promise<U, E>, handler: H)
where
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
    H: FnOnce() -> HandlerResult<U, E>,
{
    let result = match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            debug!(%message, "promise handler panicked");
            Err(Error::Panicked(message).into())
        }
    };
    parse(child, result);
}

/// Settles `promise` from a handler result: adopt a nested promise, fulfill
/// with a plain value, reject on error. A promise asked to adopt itself is
/// rejected with [`Error::ChainingCycle`]. Any other promise is adopted,
/// including the parent whose handler produced `result`.
pub(crate) fn parse<T, E>(promise: &Promise<T, E>, result: HandlerResult<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    match result {
        Ok(Resolution::Nested(nested)) if nested.ptr_eq(promise) => {
            debug!("chaining cycle detected");
            promise.complete(Err(Error::ChainingCycle.into()), Source::Handle);
        }
        Ok(Resolution::Nested(nested)) => promise.adopt(nested),
        Ok(Resolution::Value(value)) => promise.complete(Ok(value), Source::Handle),
        Err(reason) => promise.complete(Err(reason), Source::Handle),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
