use crate::exception::Failure;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

type Callback<T> = Box<dyn FnOnce(Result<T, Failure>) + Send>;

enum State<T> {
    /// Not completed yet; holds the consumer callback once registered
    Pending(Option<Callback<T>>),
    /// Completed before a consumer registered
    Done(Result<T, Failure>),
    /// Result handed to the consumer
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// Producer side of a [`Completion`].
///
/// Completes at most once. Dropping a completer that never completed fails the completion
/// with an [`ABANDONED`](crate::exception::ABANDONED) failure, so consumers always observe an
/// outcome even when the producing side is cancelled.
pub struct Completer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// The canonical asynchronous result of the dispatch pipeline.
///
/// Every handler result, whether a plain value or a foreign future, is turned into a
/// `Completion` exactly once per handler (see [`adapters`](crate::completion)) so the rest of
/// the pipeline only deals with this type. Single consumer: every combinator takes `self`.
pub struct Completion<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

/// Create a connected completer/completion pair
pub fn pair<T: Send + 'static>() -> (Completer<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
    });
    (
        Completer {
            shared: Arc::clone(&shared),
        },
        Completion { shared },
    )
}

impl<T: Send + 'static> Completer<T> {
    /// Deliver the outcome. Returns `false` if the completion was already completed.
    ///
    /// Safe to call from any thread or coroutine; the consumer callback (if registered) runs
    /// on the calling thread after the state lock is released.
    pub fn complete(&self, result: Result<T, Failure>) -> bool {
        let callback = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending(callback) => match callback.take() {
                    Some(cb) => {
                        *state = State::Taken;
                        Some(cb)
                    }
                    None => {
                        *state = State::Done(result);
                        return true;
                    }
                },
                State::Done(_) | State::Taken => return false,
            }
        };
        if let Some(cb) = callback {
            cb(result);
        }
        true
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, failure: Failure) -> bool {
        self.complete(Err(failure))
    }

    pub fn is_done(&self) -> bool {
        !matches!(&*self.shared.state.lock(), State::Pending(_))
    }
}

impl<T: Send + 'static> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.is_done() && self.fail(Failure::abandoned("completer dropped before completing"))
        {
            debug!("Completion abandoned by its producer");
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// An already-successful completion
    pub fn ready(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already-failed completion
    pub fn failed(failure: Failure) -> Self {
        Self::from_result(Err(failure))
    }

    pub fn from_result(result: Result<T, Failure>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Done(result)),
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Done(_))
    }

    /// Register the consumer. Runs `f` immediately if already completed, otherwise on the
    /// thread that completes.
    pub fn on_complete<F>(self, f: F)
    where
        F: FnOnce(Result<T, Failure>) + Send + 'static,
    {
        let ready = {
            let mut state = self.shared.state.lock();
            match std::mem::replace(&mut *state, State::Taken) {
                State::Done(result) => result,
                State::Pending(_) => {
                    *state = State::Pending(Some(Box::new(f)));
                    return;
                }
                State::Taken => return,
            }
        };
        f(ready);
    }

    /// Block the current thread or coroutine until the outcome is available
    pub fn wait(self) -> Result<T, Failure> {
        if let Some(result) = self.try_take() {
            return result;
        }
        let (tx, rx) = may::sync::mpsc::channel();
        self.on_complete(move |result| {
            tx.send(result).ok();
        });
        rx.recv()
            .unwrap_or_else(|_| Err(Failure::abandoned("completion callback dropped")))
    }

    /// Take the outcome without waiting if it is already there
    fn try_take(&self) -> Option<Result<T, Failure>> {
        let mut state = self.shared.state.lock();
        if matches!(&*state, State::Done(_)) {
            if let State::Done(result) = std::mem::replace(&mut *state, State::Taken) {
                return Some(result);
            }
        }
        None
    }

    pub fn map<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        if let Some(result) = self.try_take() {
            return Completion::from_result(result.map(f));
        }
        let (completer, completion) = pair();
        self.on_complete(move |result| {
            completer.complete(result.map(f));
        });
        completion
    }

    /// Chain an asynchronous step that runs only on success
    pub fn and_then<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        if let Some(result) = self.try_take() {
            return match result {
                Ok(value) => f(value),
                Err(failure) => Completion::failed(failure),
            };
        }
        let (completer, completion) = pair();
        self.on_complete(move |result| match result {
            Ok(value) => f(value).on_complete(move |r| {
                completer.complete(r);
            }),
            Err(failure) => {
                completer.fail(failure);
            }
        });
        completion
    }

    /// Turn a failure into a value (or another failure)
    pub fn recover<F>(self, f: F) -> Completion<T>
    where
        F: FnOnce(Failure) -> Result<T, Failure> + Send + 'static,
    {
        self.or_else(move |failure| Completion::from_result(f(failure)))
    }

    /// Chain an asynchronous step that runs only on failure
    pub fn or_else<F>(self, f: F) -> Completion<T>
    where
        F: FnOnce(Failure) -> Completion<T> + Send + 'static,
    {
        if let Some(result) = self.try_take() {
            return match result {
                Ok(value) => Completion::ready(value),
                Err(failure) => f(failure),
            };
        }
        let (completer, completion) = pair();
        self.on_complete(move |result| match result {
            Ok(value) => {
                completer.succeed(value);
            }
            Err(failure) => f(failure).on_complete(move |r| {
                completer.complete(r);
            }),
        });
        completion
    }

    /// Run `f` on both outcomes, producing a new completion
    pub fn then<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T, Failure>) -> Completion<U> + Send + 'static,
    {
        if let Some(result) = self.try_take() {
            return f(result);
        }
        let (completer, completion) = pair();
        self.on_complete(move |result| {
            f(result).on_complete(move |r| {
                completer.complete(r);
            })
        });
        completion
    }
}
