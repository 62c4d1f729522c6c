//! The deferred job queue continuations are scheduled on.
//!
//! Each thread owns one FIFO queue. Nothing on it runs until the thread
//! drives it with [`run_next`], [`run_until_stalled`] or [`block_on`].
use crate::Error;
use futures::task::noop_waker_ref;
use std::{
    any::Any,
    cell::RefCell,
    collections::VecDeque,
    future::{Future, IntoFuture},
    pin::pin,
    task::{Context, Poll},
};
use tracing::{debug, trace};

type Job = Box<dyn FnOnce()>;

#[derive(Default)]
struct Discarded {
    items: Vec<Box<dyn Any>>,
    draining: bool,
}

thread_local! {
    static JOBS: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
    static DISCARDED: RefCell<Discarded> = RefCell::new(Discarded::default());
}

pub(crate) fn enqueue<F>(job: F)
where
    F: FnOnce() + 'static,
{
    JOBS.with(|jobs| {
        let mut jobs = jobs.borrow_mut();
        jobs.push_back(Box::new(job));
        trace!(pending = jobs.len(), "job enqueued");
    });
}

/// Drops `item` on this thread's discard list. Whatever gets discarded while
/// the list is being emptied joins the list instead of recursing.
pub(crate) fn discard<D: 'static>(item: D) {
    let item: Box<dyn Any> = Box::new(item);
    let first = DISCARDED.try_with(|discarded| {
        let mut discarded = discarded.borrow_mut();
        discarded.items.push(item);
        !std::mem::replace(&mut discarded.draining, true)
    });
    // Not first: an outer call is already draining. Err: the thread is
    // exiting and the item was dropped in place.
    if !matches!(first, Ok(true)) {
        return;
    }
    loop {
        let batch = DISCARDED.with(|discarded| {
            let mut discarded = discarded.borrow_mut();
            let batch = std::mem::take(&mut discarded.items);
            if batch.is_empty() {
                discarded.draining = false;
            }
            batch
        });
        if batch.is_empty() {
            break;
        }
        drop(batch);
    }
}

/// Runs the oldest queued job. Returns `false` when the queue was empty.
pub fn run_next() -> bool {
    // The borrow must end before the job runs, jobs enqueue more jobs.
    let job = JOBS.with(|jobs| jobs.borrow_mut().pop_front());
    match job {
        Some(job) => {
            trace!("running job");
            job();
            true
        }
        None => false,
    }
}

/// Runs jobs until the queue is empty, including jobs enqueued along the
/// way. Returns how many jobs ran.
pub fn run_until_stalled() -> usize {
    let mut ran = 0;
    while run_next() {
        ran += 1;
    }
    ran
}

/// Number of jobs waiting on this thread's queue.
pub fn pending_jobs() -> usize {
    JOBS.with(|jobs| jobs.borrow().len())
}

/// Drives the job queue until `future` completes.
///
/// Only futures that make progress through this queue (promises, and async
/// blocks awaiting them) can complete here. If the queue empties while the
/// future is still pending it can never complete, and `Error::Stalled` is
/// returned.
///
/// # Examples
///
/// ```
/// use thenable::{queue, Promise};
///
/// let answer = Promise::<i32, String>::resolve(6).map(|value| value * 7);
/// assert_eq!(queue::block_on(answer), Ok(Ok(42)));
///
/// let never = Promise::<i32, String>::new(|_resolve, _reject| Ok(()));
/// assert_eq!(queue::block_on(never), Err(thenable::Error::Stalled));
/// ```
pub fn block_on<F>(future: F) -> Result<F::Output, Error>
where
    F: IntoFuture,
{
    let mut future = pin!(future.into_future());
    let mut cx = Context::from_waker(noop_waker_ref());
    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(output);
        }
        if !run_next() {
            debug!("block_on stalled with an empty job queue");
            return Err(Error::Stalled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_jobs_run_in_fifo_order() {
        let seen = Rc::new(RefCell::new(vec![]));
        for index in 0..3 {
            let seen = seen.clone();
            enqueue(move || seen.borrow_mut().push(index));
        }
        assert_eq!(pending_jobs(), 3);
        assert!(seen.borrow().is_empty());

        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(pending_jobs(), 0);
    }

    #[test]
    fn test_jobs_enqueued_while_running_go_to_the_back() {
        let seen = Rc::new(RefCell::new(vec![]));
        let outer = seen.clone();
        enqueue(move || {
            outer.borrow_mut().push("first");
            let inner = outer.clone();
            enqueue(move || inner.borrow_mut().push("nested"));
        });
        let second = seen.clone();
        enqueue(move || second.borrow_mut().push("second"));

        assert_eq!(run_until_stalled(), 3);
        assert_eq!(*seen.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_run_next_on_empty_queue() {
        assert!(!run_next());
        assert_eq!(run_until_stalled(), 0);
    }

    #[test]
    fn test_block_on_ready_future() {
        assert_eq!(block_on(async { 7 }), Ok(7));
    }
}
