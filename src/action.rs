//! Defines `AsyncAction`, an eagerly started fire-and-forget computation.
//!
//! Unlike a [`Task`](crate::Task), an action starts running the moment it is
//! created and keeps running on its own: whatever wakes it (a queue producer,
//! the scheduler's run loop, another action) resumes it in place. An action
//! carries no result, only the fact that it has finished. That fact can be
//! awaited from async code or waited on from a plain thread with
//! [`AsyncAction::wait`].
//!
//! Several actions can be joined with [`AsyncAction::when_all`] or the
//! [`when_all!`](crate::when_all) macro.
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::task::AtomicWaker;
use pin_project_lite::pin_project;

use crate::{frame::Frame, task::panic_message};

// The one-shot completion flag of an action. Async awaiters are released
// through `waker`, blocked threads through `parked`.
struct Completion {
    finished: AtomicBool,
    waker: AtomicWaker,
    lock: Mutex<()>,
    parked: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            finished: AtomicBool::new(false),
            waker: AtomicWaker::new(),
            lock: Mutex::new(()),
            parked: Condvar::new(),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish(&self) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let was_finished = self.finished.swap(true, Ordering::AcqRel);
        debug_assert!(!was_finished, "an action can only finish once");
        self.parked.notify_all();
        drop(guard);
        self.waker.wake();
    }

    fn wait(&self) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_finished() {
            guard = self
                .parked
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn poll_finished(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_finished() {
            return Poll::Ready(());
        }
        self.waker.register(cx.waker());
        // Re-check, the action may have finished before the waker landed.
        if self.is_finished() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

pin_project! {
    // The body an action's frame runs: the user's future, followed by the
    // completion signal. Panics are swallowed here.
    struct Body<F> {
        #[pin]
        future: F,
        completion: Arc<Completion>,
    }
}

impl<F> Future for Body<F>
where
    F: Future<Output = ()>,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.project();
        let future = this.future;
        match panic::catch_unwind(AssertUnwindSafe(move || future.poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(())) => {}
            Err(payload) => {
                tracing::debug!(
                    panic = panic_message(&*payload),
                    "async action panicked, nobody will observe it"
                );
            }
        }
        this.completion.finish();
        Poll::Ready(())
    }
}

/// A computation that starts running as soon as it is created.
///
/// The action's future is polled once on the constructing thread, up to its
/// first suspension point. From then on it is resumed by whichever thread
/// wakes it. Awaiting an `AsyncAction` completes immediately if it has
/// already finished and suspends the awaiter otherwise.
///
/// Dropping the handle does not stop the action: it keeps running for as
/// long as something can still wake it.
///
/// A panic inside the action is caught and discarded. The action is then
/// considered finished; joiners are not told that it failed.
///
/// # Example
/// ```
/// # use coroloop::{AsyncAction, AsyncQueue};
/// # use std::sync::Arc;
/// let queue = Arc::new(AsyncQueue::new());
/// let q = Arc::clone(&queue);
/// let action = AsyncAction::new(async move {
///     let value: u32 = q.dequeue().await;
///     assert_eq!(value, 7);
/// });
///
/// assert!(!action.is_finished());
/// queue.enqueue(7); // Resumes the action on this thread.
/// action.wait();
/// ```
pub struct AsyncAction {
    frame: Arc<Frame>,
    completion: Arc<Completion>,
}

impl AsyncAction {
    /// Creates the action and runs `future` until it first suspends.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let body = Body {
            future,
            completion: Arc::clone(&completion),
        };
        let frame = Frame::start(Box::pin(body));
        Self { frame, completion }
    }

    /// Returns `true` once the action's future has completed or panicked.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    /// Blocks the current thread until the action has finished.
    ///
    /// This parks the thread, so it must not be called from the thread that
    /// is expected to resume the action (for example the thread running
    /// [`Scheduler::process_events`](crate::Scheduler::process_events) the
    /// action is scheduled on); that would never return.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Returns an action that finishes once every action in `actions` has.
    ///
    /// The actions are awaited one after another in iteration order. Each of
    /// them was already started when it was created, so this only joins them;
    /// they make progress concurrently only if something else keeps resuming
    /// them in the meantime. Finishing order does not matter.
    ///
    /// # Example
    /// ```
    /// # use coroloop::AsyncAction;
    /// let all = AsyncAction::when_all([
    ///     AsyncAction::new(async {}),
    ///     AsyncAction::new(async {}),
    /// ]);
    /// assert!(all.is_finished());
    /// ```
    pub fn when_all<I>(actions: I) -> Self
    where
        I: IntoIterator<Item = AsyncAction>,
    {
        let actions: Vec<_> = actions.into_iter().collect();
        Self::new(async move {
            for action in actions {
                action.await;
            }
        })
    }
}

impl Future for AsyncAction {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.completion.poll_finished(cx)
    }
}

impl fmt::Debug for AsyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAction")
            .field("finished", &self.is_finished())
            .field("frame", &self.frame)
            .finish()
    }
}

/// Joins any number of [`AsyncAction`]s, see [`AsyncAction::when_all`].
///
/// ```
/// # use coroloop::{AsyncAction, when_all};
/// let a = AsyncAction::new(async {});
/// let b = AsyncAction::new(async {});
/// when_all!(a, b).wait();
/// ```
#[macro_export]
macro_rules! when_all {
    ($($action:expr),+ $(,)?) => {
        $crate::AsyncAction::when_all([$($action),+])
    };
}
