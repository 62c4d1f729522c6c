//! Static constructors and the aggregate combinators, all built on `then`.
use crate::{Error, Promise, Resolution};
use std::{cell::RefCell, rc::Rc};

struct Collected<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    /// A promise fulfilled with `value`.
    pub fn resolve(value: T) -> Self {
        Self::new(|resolve, _reject| {
            resolve.resolve(value);
            Ok(())
        })
    }

    /// A promise settled from `resolution`. A nested promise is adopted, so
    /// `resolve_with(resolve_with(resolve(5)))` fulfills with `5`.
    pub fn resolve_with(resolution: impl Into<Resolution<T, E>>) -> Self {
        let resolution = resolution.into();
        Self::new(|resolve, _reject| {
            resolve.resolve_with(resolution);
            Ok(())
        })
    }

    /// A promise rejected with `reason`. The reason is never unwrapped.
    pub fn reject(reason: E) -> Self {
        Self::new(|_resolve, reject| {
            reject.reject(reason);
            Ok(())
        })
    }

    /// Fulfills with every input's value, in input order, once all of them
    /// fulfilled. Rejects with the first rejection; the remaining inputs keep
    /// running but nothing observes them. No inputs fulfills with `vec![]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use thenable::{queue, Promise};
    ///
    /// let all = Promise::all([
    ///     Promise::<i32, String>::resolve(1),
    ///     Promise::<i32, String>::resolve(2).map(|value| value * 2),
    /// ]);
    /// queue::run_until_stalled();
    /// assert_eq!(all.value(), Some(Ok(vec![1, 4])));
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolve, reject| {
            if promises.is_empty() {
                resolve.resolve(vec![]);
                return Ok(());
            }
            let collected = Rc::new(RefCell::new(Collected {
                values: vec![None; promises.len()],
                remaining: promises.len(),
            }));
            for (index, promise) in promises.into_iter().enumerate() {
                let collected = collected.clone();
                let resolve = resolve.clone();
                let reject = reject.clone();
                promise.then(
                    move |value| {
                        let done = {
                            let mut collected = collected.borrow_mut();
                            collected.values[index] = Some(value);
                            collected.remaining -= 1;
                            (collected.remaining == 0)
                                .then(|| std::mem::take(&mut collected.values))
                        };
                        if let Some(values) = done {
                            resolve.resolve(values.into_iter().flatten().collect());
                        }
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
            Ok(())
        })
    }

    /// Settles like whichever input settles first. No inputs never settles.
    pub fn race<I>(promises: I) -> Promise<T, E>
    where
        I: IntoIterator<Item = Promise<T, E>>,
    {
        let promises: Vec<_> = promises.into_iter().collect();
        Promise::new(move |resolve, reject| {
            for promise in promises {
                let resolve = resolve.clone();
                let reject = reject.clone();
                promise.then(
                    move |value| {
                        resolve.resolve(value);
                        Ok(Resolution::Value(()))
                    },
                    move |reason| {
                        reject.reject(reason);
                        Ok(Resolution::Value(()))
                    },
                );
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::queue::run_until_stalled;
    use crate::{Promise, Resolution};

    #[test]
    fn test_resolve_with_plain_value() {
        let promise = Promise::<i32, String>::resolve_with(Resolution::Value(3));
        assert_eq!(promise.value(), Some(Ok(3)));
    }

    #[test]
    fn test_all_ignores_later_rejections() {
        let all = Promise::all([
            Promise::<i32, String>::reject("first".into()),
            Promise::<i32, String>::reject("second".into()),
        ]);
        run_until_stalled();
        assert_eq!(all.value(), Some(Err("first".to_string())));
    }

    #[test]
    fn test_race_empty_never_settles() {
        let race = Promise::<i32, String>::race(Vec::new());
        assert_eq!(run_until_stalled(), 0);
        assert!(race.is_pending());
    }

    #[test]
    fn test_race_fulfilled_first() {
        let race = Promise::race([
            Promise::<&str, String>::resolve("fast"),
            Promise::<&str, String>::resolve("slow").map(|value| value),
        ]);
        run_until_stalled();
        assert_eq!(race.value(), Some(Ok("fast")));
    }
}
