//! Defines the `Task` type and its error type, `TaskError`.
//!
//! A `Task` is a lazily started computation with a single result slot. The
//! wrapped future does not run until the task is first awaited (or polled
//! through [`Task::when_ready`]). Awaiting a task drives it inline, inside the
//! awaiter's own poll: when the task completes, the awaiter continues right
//! away on the same thread, without going through any scheduler. A chain of
//! tasks awaiting each other therefore runs as a single computation that
//! suspends and resumes as a whole.
//!
//! A panic inside a task is caught and stored in the result slot instead of
//! unwinding into whoever happened to poll it. It is reported later, through
//! [`Task::result`] or the output of awaiting the task, as
//! [`TaskError::Panicked`].
//!
//! To hop onto an event loop in the middle of a chain, await
//! [`Scheduler::schedule`](crate::Scheduler::schedule) explicitly.
use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    task::{Context, Poll},
    thread,
};

use futures::{future::BoxFuture, ready};

/// Errors returned when reading the result of a [`Task`].
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The handle holds no frame: it was default-constructed or its frame
    /// was moved out.
    #[error("broken promise: the task handle holds no computation")]
    BrokenPromise,

    /// The result was requested before the task finished.
    #[error("the task has not finished yet")]
    Incomplete,

    /// The result was already taken by an earlier call.
    #[error("the task result was already taken")]
    Consumed,

    /// The task panicked. Holds the panic payload.
    #[error("the task panicked")]
    Panicked(Box<dyn Any + Send + 'static>),
}

impl TaskError {
    /// Returns `true` if the error is a captured panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// Returns the panic payload, if the error is a captured panic.
    #[must_use]
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            TaskError::Panicked(payload) => Some(payload),
            _ => None,
        }
    }

    /// Re-raises a captured panic on the current thread. Any other error is
    /// handed back unchanged.
    pub fn resume_unwind(self) -> Self {
        match self {
            TaskError::Panicked(payload) => panic::resume_unwind(payload),
            other => other,
        }
    }
}

enum Stage<'a, T> {
    Running {
        future: BoxFuture<'a, T>,
        started: bool,
    },
    Finished(thread::Result<T>),
    Consumed,
}

/// A lazily started computation producing a single `T`.
///
/// `Task` is move-only: exactly one handle owns the computation, and dropping
/// the handle drops the computation with it, wherever it was suspended.
///
/// Awaiting a `Task` yields `Result<T, TaskError>`. It can be awaited by value
/// or through `&mut task`; in the latter case the handle remains usable for
/// [`Task::is_ready`] and [`Task::result`].
///
/// `T` may borrow: a `Task<'a, &'a U>` returns a reference into something
/// that outlives `'a`.
///
/// # Example
/// ```
/// # use coroloop::Task;
/// # futures::executor::block_on(async {
/// let mut task = Task::new(async { 40 + 2 });
/// assert!(!task.is_started());
///
/// task.when_ready().await;
/// assert!(task.is_ready());
/// assert_eq!(task.result().unwrap(), 42);
/// # });
/// ```
pub struct Task<'a, T> {
    frame: Option<Stage<'a, T>>,
}

// `T` is never pinned in place: it is only stored once the boxed future has
// produced it, and moved out by value.
impl<T> Unpin for Task<'_, T> {}

impl<'a, T> Task<'a, T> {
    /// Wraps `future` into a task without polling it.
    ///
    /// The future starts running the first time the task is awaited.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'a,
    {
        Self {
            frame: Some(Stage::Running {
                future: Box::pin(future),
                started: false,
            }),
        }
    }

    /// Returns `true` if the task holds no computation or its computation
    /// has finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !matches!(self.frame, Some(Stage::Running { .. }))
    }

    /// Returns `true` once the computation has been polled at least once.
    #[must_use]
    pub fn is_started(&self) -> bool {
        match &self.frame {
            None => false,
            Some(Stage::Running { started, .. }) => *started,
            Some(_) => true,
        }
    }

    /// Takes the result of a finished task.
    ///
    /// The result can be taken once. Afterwards the slot is empty and every
    /// further call returns [`TaskError::Consumed`].
    ///
    /// # Errors
    ///
    /// - [`TaskError::BrokenPromise`]: the handle holds no computation.
    /// - [`TaskError::Incomplete`]: the computation has not finished; await the
    ///   task (or [`Task::when_ready`]) first.
    /// - [`TaskError::Consumed`]: the result was already taken.
    /// - [`TaskError::Panicked`]: the computation panicked.
    pub fn result(&mut self) -> Result<T, TaskError> {
        let stage = self.frame.as_mut().ok_or(TaskError::BrokenPromise)?;
        match mem::replace(stage, Stage::Consumed) {
            Stage::Finished(outcome) => outcome.map_err(TaskError::Panicked),
            Stage::Consumed => Err(TaskError::Consumed),
            running @ Stage::Running { .. } => {
                *stage = running;
                Err(TaskError::Incomplete)
            }
        }
    }

    /// Returns a future that resolves once the task has finished, without
    /// taking its result.
    ///
    /// Resolves immediately for an empty handle or a finished task.
    pub fn when_ready(&mut self) -> WhenReady<'_, 'a, T> {
        WhenReady { task: self }
    }

    fn poll_frame(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let Some(stage) = self.frame.as_mut() else {
            return Poll::Ready(());
        };
        let Stage::Running { future, started } = &mut *stage else {
            return Poll::Ready(());
        };

        *started = true;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(value)) => Ok(value),
            Err(payload) => {
                tracing::trace!(
                    panic = panic_message(&*payload),
                    "task panicked, stored for the reader"
                );
                Err(payload)
            }
        };
        *stage = Stage::Finished(outcome);
        Poll::Ready(())
    }
}

impl<T> Default for Task<'_, T> {
    fn default() -> Self {
        Self { frame: None }
    }
}

impl<T> Future for Task<'_, T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.frame.is_none() {
            return Poll::Ready(Err(TaskError::BrokenPromise));
        }
        ready!(this.poll_frame(cx));
        Poll::Ready(this.result())
    }
}

impl<T> fmt::Debug for Task<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match &self.frame {
            None => "empty",
            Some(Stage::Running { started: false, .. }) => "unstarted",
            Some(Stage::Running { started: true, .. }) => "suspended",
            Some(Stage::Finished(_)) => "finished",
            Some(Stage::Consumed) => "consumed",
        };
        f.debug_struct("Task").field("stage", &stage).finish()
    }
}

/// Future returned by [`Task::when_ready`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct WhenReady<'t, 'a, T> {
    task: &'t mut Task<'a, T>,
}

impl<T> Future for WhenReady<'_, '_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().task.poll_frame(cx)
    }
}

impl<T> fmt::Debug for WhenReady<'_, '_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhenReady").field("task", &self.task).finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
