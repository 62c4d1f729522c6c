//! Single-assignment promises for rust.
//!
//! A [`Promise`] settles at most once, either fulfilled with a value or
//! rejected with a reason. Continuations registered with [`Promise::then`]
//! never run synchronously: they are pushed onto the calling thread's job
//! queue and run when that queue is driven (see [`queue`]).
//!
//! # Examples
//!
//! ```
//! use thenable::{queue, Promise};
//!
//! let doubled = Promise::<i32, String>::resolve(21).map(|value| value * 2);
//! assert!(doubled.is_pending());
//!
//! queue::run_until_stalled();
//! assert_eq!(doubled.value(), Some(Ok(42)));
//! ```
mod combinators;
mod promise;
pub mod queue;
mod resolution;
mod settled;

pub use promise::{identity, propagate, HandlerResult, Promise, Rejecter, Resolver, Status};
pub use resolution::Resolution;
pub use settled::Settled;

/// Failures produced by the promise machinery itself. They reach callers as
/// ordinary rejection reasons, so every reason type must implement
/// `From<Error>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Chaining cycle detected for promise")]
    ChainingCycle,
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("promise never settled: job queue is empty")]
    Stalled,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
