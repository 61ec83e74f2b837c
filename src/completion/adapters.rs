//! Conversions from foreign asynchronous results into [`Completion`].
//!
//! Each adapter preserves the producer's own `Failure` unchanged, completes exactly once and
//! can be completed from any thread.

use super::core::{pair, Completer, Completion};
use crate::exception::{panic_message, Failure};
use futures::future::BoxFuture;
use futures::task::{waker, ArcWake};
use may::sync::mpsc;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error};

/// Stack size for the coroutines that wait on coroutine handles and channels.
///
/// The waiter completes the completion, so everything chained on it (response writing,
/// exception mapping, completion callbacks) runs on its stack. It starts at the worker pool
/// default and the dispatcher raises it to its largest pool stack.
static WAITER_STACK_SIZE: AtomicUsize = AtomicUsize::new(0x10000);

/// Raise the waiter stack size to at least `size` bytes; never lowers it
pub fn raise_waiter_stack_size(size: usize) {
    let previous = WAITER_STACK_SIZE.fetch_max(size, Ordering::AcqRel);
    if size > previous {
        debug!(stack_size = size, "Completion waiter stack size raised");
    }
}

/// Current stack size for completion waiters
pub fn waiter_stack_size() -> usize {
    WAITER_STACK_SIZE.load(Ordering::Acquire)
}

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const NOTIFIED: u8 = 2;
const DONE: u8 = 3;

/// Drives a `std::future::Future` by polling on whichever thread wakes it.
///
/// No executor or thread is involved: the first poll happens on the caller, later polls on
/// the waker's thread. A wake that arrives mid-poll is recorded as `NOTIFIED` and causes one
/// more poll instead of a concurrent one.
struct FutureTask<T: Send + 'static> {
    future: Mutex<Option<BoxFuture<'static, Result<T, Failure>>>>,
    completer: Mutex<Option<Completer<T>>>,
    state: AtomicU8,
}

impl<T: Send + 'static> FutureTask<T> {
    fn schedule(self: &Arc<Self>) {
        loop {
            match self
                .state
                .compare_exchange(IDLE, POLLING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.run();
                    return;
                }
                Err(POLLING) => {
                    if self
                        .state
                        .compare_exchange(POLLING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }

    fn run(self: &Arc<Self>) {
        let task_waker = waker(Arc::clone(self));
        let mut cx = Context::from_waker(&task_waker);
        loop {
            let polled = {
                let mut slot = self.future.lock();
                let Some(future) = slot.as_mut() else {
                    return;
                };
                match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                    Ok(poll) => poll,
                    Err(panic) => {
                        error!(
                            panic_message = %panic_message(&*panic),
                            "Future panicked while being polled"
                        );
                        Poll::Ready(Err(Failure::panic(&*panic)))
                    }
                }
            };
            match polled {
                Poll::Ready(result) => {
                    self.future.lock().take();
                    self.state.store(DONE, Ordering::Release);
                    if let Some(completer) = self.completer.lock().take() {
                        completer.complete(result);
                    }
                    return;
                }
                Poll::Pending => {
                    if self
                        .state
                        .compare_exchange(POLLING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                    // Woken while polling: poll again.
                    self.state.store(POLLING, Ordering::Release);
                }
            }
        }
    }
}

impl<T: Send + 'static> ArcWake for FutureTask<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

/// Adapt a `std::future::Future`.
///
/// If the future is dropped while pending (its waker is never called again), the completion
/// stays pending; futures that can be cancelled should resolve to a `Failure` instead.
pub fn from_future<T, F>(future: F) -> Completion<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Failure>> + Send + 'static,
{
    let (completer, completion) = pair();
    let task = Arc::new(FutureTask {
        future: Mutex::new(Some(Box::pin(future))),
        completer: Mutex::new(Some(completer)),
        state: AtomicU8::new(IDLE),
    });
    task.schedule();
    completion
}

/// Spawn a small waiter coroutine, failing `completer` if the runtime refuses
fn spawn_waiter<T, F>(completer: Arc<Mutex<Option<Completer<T>>>>, name: &'static str, body: F)
where
    T: Send + 'static,
    F: FnOnce() + Send + 'static,
{
    // SAFETY: may's spawn is unsafe because a coroutine must not use thread-local storage
    // across yields or block the OS thread. The waiter only blocks on may primitives.
    #[allow(unsafe_code)]
    let spawned = unsafe {
        may::coroutine::Builder::new()
            .name(name.to_string())
            .stack_size(waiter_stack_size())
            .spawn(body)
    };
    if let Err(e) = spawned {
        error!(waiter = name, error = %e, "Failed to spawn completion waiter");
        if let Some(c) = completer.lock().take() {
            c.fail(Failure::illegal_state(format!(
                "failed to spawn completion waiter: {}",
                e
            )));
        }
    }
}

/// Adapt a `may` coroutine handle.
///
/// A panic inside the coroutine becomes a [`HANDLER_PANIC`](crate::exception::HANDLER_PANIC)
/// failure; a `Failure` returned by the coroutine passes through as-is.
pub fn from_coroutine<T>(handle: may::coroutine::JoinHandle<Result<T, Failure>>) -> Completion<T>
where
    T: Send + 'static,
{
    let (completer, completion) = pair();
    if handle.is_done() {
        completer.complete(join_outcome(handle.join()));
        return completion;
    }
    let slot = Arc::new(Mutex::new(Some(completer)));
    let waiter_slot = Arc::clone(&slot);
    spawn_waiter(slot, "completion-join", move || {
        let outcome = join_outcome(handle.join());
        if let Some(c) = waiter_slot.lock().take() {
            c.complete(outcome);
        }
    });
    completion
}

fn join_outcome<T>(
    joined: Result<Result<T, Failure>, Box<dyn std::any::Any + Send>>,
) -> Result<T, Failure> {
    match joined {
        Ok(result) => result,
        Err(panic) => {
            error!(
                panic_message = %panic_message(&*panic),
                "Handler coroutine panicked"
            );
            Err(Failure::panic(&*panic))
        }
    }
}

/// Adapt a `may` channel used as a one-shot promise.
///
/// The first message completes; a sender dropped without sending becomes an
/// [`ABANDONED`](crate::exception::ABANDONED) failure.
pub fn from_channel<T>(receiver: mpsc::Receiver<Result<T, Failure>>) -> Completion<T>
where
    T: Send + 'static,
{
    let (completer, completion) = pair();
    if let Ok(result) = receiver.try_recv() {
        completer.complete(result);
        return completion;
    }
    let slot = Arc::new(Mutex::new(Some(completer)));
    let waiter_slot = Arc::clone(&slot);
    spawn_waiter(slot, "completion-recv", move || {
        let outcome = receiver.recv().unwrap_or_else(|_| {
            debug!("Promise channel closed without a value");
            Err(Failure::abandoned("promise sender dropped without a value"))
        });
        if let Some(c) = waiter_slot.lock().take() {
            c.complete(outcome);
        }
    });
    completion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ABANDONED, HANDLER_PANIC, ILLEGAL_ARGUMENT};
    use std::pin::Pin;
    use std::time::Duration;

    /// Future that is pending until a flag is set from another thread
    struct Gate {
        shared: Arc<Mutex<(bool, Option<std::task::Waker>)>>,
    }

    impl Future for Gate {
        type Output = Result<&'static str, Failure>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let mut guard = self.shared.lock();
            if guard.0 {
                Poll::Ready(Ok("ok"))
            } else {
                guard.1 = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    #[test]
    fn test_waiter_stack_size_only_grows() {
        raise_waiter_stack_size(0x1000);
        assert!(waiter_stack_size() >= 0x10000);
        raise_waiter_stack_size(0x20000);
        assert!(waiter_stack_size() >= 0x20000);
        raise_waiter_stack_size(0x10000);
        assert!(waiter_stack_size() >= 0x20000);
    }

    #[test]
    fn test_future_ready_on_first_poll() {
        let completion = from_future(async { Ok::<_, Failure>(7) });
        assert!(completion.is_done());
        assert_eq!(completion.wait().unwrap(), 7);
    }

    #[test]
    fn test_future_woken_from_other_thread() {
        let shared = Arc::new(Mutex::new((false, None)));
        let completion = from_future(Gate {
            shared: Arc::clone(&shared),
        });
        assert!(!completion.is_done());

        let opener = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let waker = {
                let mut guard = opener.lock();
                guard.0 = true;
                guard.1.take()
            };
            if let Some(w) = waker {
                w.wake();
            }
        });
        assert_eq!(completion.wait().unwrap(), "ok");
        handle.join().unwrap();
    }

    #[test]
    fn test_future_failure_is_not_rewrapped() {
        let err = from_future(async { Err::<(), _>(Failure::illegal_argument("bad id")) })
            .wait()
            .unwrap_err();
        assert_eq!(err.kind(), &ILLEGAL_ARGUMENT);
        assert_eq!(err.message(), "bad id");
    }

    #[test]
    fn test_coroutine_value_and_panic() {
        may::config().set_workers(2);
        #[allow(unsafe_code)]
        let ok = unsafe { may::coroutine::spawn(|| Ok::<_, Failure>("ok")) };
        assert_eq!(from_coroutine(ok).wait().unwrap(), "ok");

        #[allow(unsafe_code)]
        let boom = unsafe {
            may::coroutine::spawn(|| -> Result<(), Failure> {
                panic!("kaboom");
            })
        };
        let err = from_coroutine(boom).wait().unwrap_err();
        assert!(err.is(&HANDLER_PANIC));
        assert_eq!(err.message(), "kaboom");
    }

    #[test]
    fn test_channel_value_and_disconnect() {
        let (tx, rx) = mpsc::channel();
        let completion = from_channel(rx);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            tx.send(Ok::<_, Failure>("ok")).unwrap();
        });
        assert_eq!(completion.wait().unwrap(), "ok");

        let (tx, rx) = mpsc::channel::<Result<u8, Failure>>();
        drop(tx);
        let err = from_channel(rx).wait().unwrap_err();
        assert!(err.is(&ABANDONED));
    }
}
