use crate::Promise;
use std::{
    cell::RefCell,
    future::{Future, IntoFuture},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// Awaits the outcome of a [`Promise`]. Returns `Result<T, E>`.
///
/// The promise only makes progress when its thread's job queue is driven, so
/// await it from [`queue::block_on`](crate::queue::block_on) or from another
/// executor whose thread also drives the queue.
///
/// # Examples
///
/// ```
/// use thenable::{queue, Promise};
///
/// let a = Promise::<i32, String>::resolve(1);
/// let b = Promise::<i32, String>::resolve(2).map(|value| value * 10);
/// let sum = queue::block_on(async { Ok::<_, String>(a.await? + b.await?) });
/// assert_eq!(sum, Ok(Ok(21)));
/// ```
#[derive(Debug)]
pub struct Settled<T: 'static, E: 'static> {
    promise: Option<Promise<T, E>>,
    slot: Rc<RefCell<Slot<T, E>>>,
}

#[derive(Debug)]
struct Slot<T, E> {
    value: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Slot<T, E> {
    fn fill(&mut self, value: Result<T, E>) {
        self.value = Some(value);
        if let Some(waker) = self.waker.take() {
            waker.wake()
        }
    }
}

impl<T, E> Future for Settled<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(promise) = this.promise.take() {
            // Already settled: no need to wait for a job.
            if let Some(value) = promise.value() {
                return Poll::Ready(value);
            }
            let (fulfilled, rejected) = (this.slot.clone(), this.slot.clone());
            promise.subscribe(
                move |value| fulfilled.borrow_mut().fill(Ok(value)),
                move |reason| rejected.borrow_mut().fill(Err(reason)),
            );
        }
        let mut slot = this.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled {
            promise: Some(self),
            slot: Rc::new(RefCell::new(Slot {
                value: None,
                waker: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{queue, Error, Promise};
    use futures::executor::block_on;
    use std::future::IntoFuture;

    #[test]
    fn test_await_settled_promise() {
        let promise = Promise::<String, String>::resolve("🍓".into());
        assert_eq!(block_on(promise.into_future()), Ok("🍓".to_string()));
    }

    #[test]
    fn test_await_rejected_promise() {
        let promise = Promise::<String, String>::reject("reject!!".into());
        assert_eq!(block_on(async { promise.await }), Err("reject!!".to_string()));
    }

    #[test]
    fn test_await_pending_promise_through_the_queue() {
        let mut resolver = None;
        let promise = Promise::<i32, String>::new(|resolve, _| {
            resolver = Some(resolve);
            Ok(())
        });
        let chained = promise.map(|value| value + 1);
        if let Some(resolve) = resolver {
            queue::enqueue(move || resolve.resolve(41));
        }
        assert_eq!(queue::block_on(chained), Ok(Ok(42)));
    }

    #[test]
    fn test_await_never_settling_promise_stalls() {
        let promise = Promise::<i32, String>::new(|_, _| Ok(()));
        assert_eq!(queue::block_on(promise), Err(Error::Stalled));
    }
}
