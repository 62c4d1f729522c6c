use crate::resolution::{self, panic_message, Resolution, Source};
use crate::{queue, Error};
use std::{
    cell::{Cell, RefCell},
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};
use tracing::{debug, trace};

/// What a `then` handler hands back: a plain value, a promise to adopt, or an
/// error that rejects the child.
pub type HandlerResult<U, E> = Result<Resolution<U, E>, E>;

/// Default fulfillment handler, passes the value through.
pub fn identity<T: 'static, E: 'static>(value: T) -> HandlerResult<T, E> {
    Ok(Resolution::Value(value))
}

/// Default rejection handler, passes the reason through.
pub fn propagate<U: 'static, E: 'static>(reason: E) -> HandlerResult<U, E> {
    Err(reason)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => f.write_str("pending"),
            Status::Fulfilled => f.write_str("fulfilled"),
            Status::Rejected => f.write_str("rejected"),
        }
    }
}

struct Continuation<T, E> {
    on_fulfilled: Box<dyn FnOnce(T)>,
    on_rejected: Box<dyn FnOnce(E)>,
}

impl<T, E> Continuation<T, E> {
    fn fire(self, outcome: Result<T, E>) {
        match outcome {
            Ok(value) => (self.on_fulfilled)(value),
            Err(reason) => (self.on_rejected)(reason),
        }
    }
}

enum State<T, E> {
    Pending {
        continuations: Vec<Continuation<T, E>>,
        // Set once the promise subscribed to another one. From then on only
        // that promise's outcome may settle it.
        adopting: bool,
    },
    Fulfilled(T),
    Rejected(E),
}

/// A single-assignment deferred value.
///
/// Cloning a `Promise` clones the handle, both handles observe the same
/// settlement.
///
/// # Examples
///
/// ```
/// use thenable::{queue, Promise};
///
/// let (promise, resolver) = {
///     let mut slot = None;
///     let promise = Promise::<String, String>::new(|resolve, _reject| {
///         slot = Some(resolve);
///         Ok(())
///     });
///     (promise, slot.unwrap())
/// };
/// let greeting = promise.map(|name| format!("hello {name}"));
///
/// resolver.resolve("🍓".into());
/// queue::run_until_stalled();
/// assert_eq!(greeting.value(), Some(Ok("hello 🍓".to_string())));
/// ```
pub struct Promise<T: 'static, E: 'static> {
    inner: Rc<RefCell<State<T, E>>>,
}

impl<T: 'static, E: 'static> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static, E: 'static> Promise<T, E> {
    pub(crate) fn pending() -> Self {
        Self {
            inner: Rc::new(RefCell::new(State::Pending {
                continuations: vec![],
                adopting: false,
            })),
        }
    }

    pub fn status(&self) -> Status {
        match &*self.inner.borrow() {
            State::Pending { .. } => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.status() == Status::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == Status::Rejected
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// The settled outcome, or `None` while pending.
    pub fn value(&self) -> Option<Result<T, E>> {
        match &*self.inner.borrow() {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Settles the promise and schedules every queued continuation.
    pub(crate) fn complete(&self, outcome: Result<T, E>, source: Source) {
        let continuations = {
            let mut state = self.inner.borrow_mut();
            match &*state {
                State::Pending { adopting: true, .. } if source == Source::Handle => return,
                State::Pending { .. } => {}
                State::Fulfilled(_) | State::Rejected(_) => return,
            }
            let settled = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            match std::mem::replace(&mut *state, settled) {
                State::Pending { continuations, .. } => continuations,
                State::Fulfilled(_) | State::Rejected(_) => return,
            }
        };
        trace!(
            status = %self.status(),
            continuations = continuations.len(),
            "promise settled"
        );
        for continuation in continuations {
            let outcome = outcome.clone();
            queue::enqueue(move || continuation.fire(outcome));
        }
    }

    /// Mirrors `other`'s eventual outcome.
    pub(crate) fn adopt(&self, other: Promise<T, E>) {
        match &mut *self.inner.borrow_mut() {
            State::Pending { adopting, .. } if !*adopting => *adopting = true,
            _ => return,
        }
        trace!("promise adopting another promise");
        let (fulfilled, rejected) = (self.clone(), self.clone());
        other.subscribe(
            move |value| fulfilled.complete(Ok(value), Source::Adoption),
            move |reason| rejected.complete(Err(reason), Source::Adoption),
        );
    }

    /// Registers a raw continuation pair. A settled promise schedules the
    /// matching branch right away.
    pub(crate) fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let continuation = Continuation {
            on_fulfilled: Box::new(on_fulfilled),
            on_rejected: Box::new(on_rejected),
        };
        let outcome = match &mut *self.inner.borrow_mut() {
            State::Pending { continuations, .. } => {
                continuations.push(continuation);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(reason) => Err(reason.clone()),
        };
        queue::enqueue(move || continuation.fire(outcome));
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Creates a pending promise and runs `setup` right away with its two
    /// settlement handles. An `Err` returned from `setup`, or a panic inside
    /// it, rejects the promise.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending();
        let resolver = Resolver {
            promise: promise.clone(),
        };
        let rejecter = Rejecter {
            promise: promise.clone(),
        };
        match panic::catch_unwind(AssertUnwindSafe(|| setup(resolver, rejecter))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => promise.complete(Err(reason), Source::Handle),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                debug!(%message, "promise setup panicked");
                promise.complete(Err(Error::Panicked(message).into()), Source::Handle);
            }
        }
        promise
    }

    /// Registers a continuation and returns the promise its result settles.
    ///
    /// Exactly one of the handlers runs, on the job queue, never before
    /// `then` returns. Pass [`identity`] or [`propagate`] to let an outcome
    /// through untouched.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> HandlerResult<U, E> + 'static,
        R: FnOnce(E) -> HandlerResult<U, E> + 'static,
    {
        let child = Promise::pending();
        let (fulfilled, rejected) = (child.clone(), child.clone());
        self.subscribe(
            move |value| resolution::run(&fulfilled, move || on_fulfilled(value)),
            move |reason| resolution::run(&rejected, move || on_rejected(reason)),
        );
        child
    }

    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> HandlerResult<U, E> + 'static,
    {
        self.then(on_fulfilled, propagate)
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then(move |value| Ok(Resolution::Value(f(value))), propagate)
    }

    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> HandlerResult<T, E> + 'static,
    {
        self.then(identity, on_rejected)
    }

    /// Runs `f` once this promise settles either way, then passes the
    /// outcome on unchanged.
    pub fn finally<F>(&self, f: F) -> Promise<T, E>
    where
        F: FnOnce() + 'static,
    {
        let once = Rc::new(Cell::new(Some(f)));
        let other = once.clone();
        self.then(
            move |value| {
                if let Some(f) = once.take() {
                    f();
                }
                Ok(Resolution::Value(value))
            },
            move |reason| {
                if let Some(f) = other.take() {
                    f();
                }
                Err(reason)
            },
        )
    }
}

impl<T: fmt::Debug + 'static, E: fmt::Debug + 'static> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(state) = self.inner.try_borrow() else {
            return f.write_str("Promise { <borrowed> }");
        };
        let mut out = f.debug_struct("Promise");
        match &*state {
            State::Pending { continuations, .. } => out
                .field("status", &Status::Pending)
                .field("continuations", &continuations.len()),
            State::Fulfilled(value) => out
                .field("status", &Status::Fulfilled)
                .field("value", value),
            State::Rejected(reason) => out
                .field("status", &Status::Rejected)
                .field("reason", reason),
        };
        out.finish()
    }
}

impl<T: 'static, E: 'static> Drop for Promise<T, E> {
    /// The last handle to a pending promise hands its continuations to the
    /// thread's discard list, so a long unsettled chain is torn down in a
    /// loop rather than one nested drop per link.
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) != 1 {
            return;
        }
        let continuations = match self.inner.try_borrow_mut().as_deref_mut() {
            Ok(State::Pending { continuations, .. }) => std::mem::take(continuations),
            _ => return,
        };
        if !continuations.is_empty() {
            queue::discard(continuations);
        }
    }
}

/// Fulfills the promise it was created for. Handed to the setup routine of
/// [`Promise::new`].
pub struct Resolver<T: 'static, E: 'static> {
    promise: Promise<T, E>,
}

impl<T: 'static, E: 'static> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// Fulfills with `value`. Ignored once the promise is settled or adopting.
    pub fn resolve(&self, value: T) {
        self.promise.complete(Ok(value), Source::Handle);
    }

    /// Settles with a plain value or adopts a nested promise.
    pub fn resolve_with(&self, resolution: impl Into<Resolution<T, E>>) {
        resolution::parse(&self.promise, Ok(resolution.into()));
    }
}

/// Rejects the promise it was created for.
pub struct Rejecter<T: 'static, E: 'static> {
    promise: Promise<T, E>,
}

impl<T: 'static, E: 'static> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> Rejecter<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn reject(&self, reason: E) {
        self.promise.complete(Err(reason), Source::Handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::run_until_stalled;

    fn deferred() -> (Promise<i32, String>, Resolver<i32, String>, Rejecter<i32, String>) {
        let mut handles = None;
        let promise = Promise::new(|resolve, reject| {
            handles = Some((resolve, reject));
            Ok(())
        });
        let (resolve, reject) = handles.expect("setup runs synchronously");
        (promise, resolve, reject)
    }

    #[test]
    fn test_setup_runs_synchronously() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let promise = Promise::<i32, String>::new(move |resolve, _| {
            flag.set(true);
            resolve.resolve(1);
            Ok(())
        });
        assert!(ran.get());
        assert_eq!(promise.value(), Some(Ok(1)));
    }

    #[test]
    fn test_setup_error_rejects() {
        let promise = Promise::<i32, String>::new(|_, _| Err("💥".into()));
        assert_eq!(promise.status(), Status::Rejected);
        assert_eq!(promise.value(), Some(Err("💥".to_string())));
    }

    #[test]
    fn test_setup_panic_rejects() {
        let promise = Promise::<i32, String>::new(|_, _| panic!("boom"));
        assert_eq!(
            promise.value(),
            Some(Err(Error::Panicked("boom".into()).to_string()))
        );
    }

    #[test]
    fn test_first_settlement_wins() {
        let (promise, resolve, reject) = deferred();
        resolve.resolve(1);
        reject.reject("late".into());
        resolve.resolve(2);
        assert_eq!(promise.value(), Some(Ok(1)));

        let (promise, resolve, reject) = deferred();
        reject.reject("first".into());
        resolve.resolve(3);
        assert_eq!(promise.value(), Some(Err("first".to_string())));
    }

    #[test]
    fn test_adopting_promise_ignores_direct_settlement() {
        let (source, source_resolve, _) = deferred();
        let (promise, resolve, reject) = deferred();
        resolve.resolve_with(source);
        resolve.resolve(7);
        reject.reject("ignored".into());
        assert!(promise.is_pending());

        source_resolve.resolve(5);
        run_until_stalled();
        assert_eq!(promise.value(), Some(Ok(5)));
    }

    #[test]
    fn test_queued_continuations_run_in_registration_order() {
        let (promise, resolve, _) = deferred();
        let seen = Rc::new(RefCell::new(vec![]));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            promise.map(move |value| seen.borrow_mut().push((tag, value)));
        }
        resolve.resolve(9);
        assert!(seen.borrow().is_empty());

        run_until_stalled();
        assert_eq!(*seen.borrow(), vec![("a", 9), ("b", 9), ("c", 9)]);
    }

    #[test]
    fn test_catch_recovers() {
        let recovered = Promise::<i32, String>::reject("nope".into())
            .catch(|reason| Ok(Resolution::Value(reason.len() as i32)));
        run_until_stalled();
        assert_eq!(recovered.value(), Some(Ok(4)));
    }

    #[test]
    fn test_handler_error_rejects_child() {
        let child = Promise::<i32, String>::resolve(1)
            .and_then::<i32, _>(|_| Err("bad handler".into()));
        run_until_stalled();
        assert_eq!(child.value(), Some(Err("bad handler".to_string())));
    }

    #[test]
    fn test_handler_panic_rejects_child() {
        let child = Promise::<i32, String>::resolve(1)
            .map(|_| -> i32 { panic!("handler blew up") });
        run_until_stalled();
        assert_eq!(
            child.value(),
            Some(Err(Error::Panicked("handler blew up".into()).to_string()))
        );
    }

    #[test]
    fn test_finally_passes_outcome_through() {
        let calls = Rc::new(Cell::new(0));
        let (a, b) = (calls.clone(), calls.clone());
        let fulfilled =
            Promise::<i32, String>::resolve(3).finally(move || a.set(a.get() + 1));
        let rejected =
            Promise::<i32, String>::reject("x".into()).finally(move || b.set(b.get() + 1));
        run_until_stalled();
        assert_eq!(calls.get(), 2);
        assert_eq!(fulfilled.value(), Some(Ok(3)));
        assert_eq!(rejected.value(), Some(Err("x".to_string())));
    }

    #[test]
    fn test_debug_shows_status() {
        let promise = Promise::<i32, String>::resolve(4);
        assert_eq!(
            format!("{promise:?}"),
            "Promise { status: Fulfilled, value: 4 }"
        );
        let (pending, _, _) = deferred();
        pending.map(|value| value);
        assert_eq!(
            format!("{pending:?}"),
            "Promise { status: Pending, continuations: 1 }"
        );
    }

    #[test]
    fn test_dropping_long_unsettled_chain() {
        let root = Promise::<u64, String>::new(|_, _| Ok(()));
        let mut tail = root.clone();
        for _ in 0..50_000 {
            tail = tail.map(|value| value + 1);
        }
        drop(tail);
        drop(root);
    }

    #[test]
    fn test_dropping_unsettled_chain_tail_first() {
        let dropped = Rc::new(Cell::new(0));
        let root = Promise::<u64, String>::new(|_, _| Ok(()));
        let mut tail = root.clone();
        for _ in 0..50_000 {
            let counter = dropped.clone();
            tail = tail.map(move |value| {
                counter.set(counter.get() + 1);
                value
            });
        }
        drop(root);
        assert!(tail.is_pending());
        drop(tail);
        assert_eq!(dropped.get(), 0);
    }
}
