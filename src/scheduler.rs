//! Provides the `Scheduler`, a user-driven event loop.
//!
//! A computation hands itself to the loop by awaiting
//! [`Scheduler::schedule`]. That always suspends it and links a schedule
//! operation onto the scheduler's lock-free list. Whichever thread runs
//! [`Scheduler::process_events`] takes the whole list in one atomic swap and
//! resumes every operation in it, on its own stack, before looking at the
//! list again.
//!
//! The scheduler never spawns threads. It runs exactly where its embedder
//! calls `process_events` (or [`Scheduler::run_once`]).
//!
//! Resumption is batch based: operations scheduled while a batch is being
//! resumed wait for the next batch, and within a batch the most recently
//! scheduled operation is resumed first.

use std::{
    fmt,
    pin::Pin,
    sync::{
        Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    channel::oneshot::{self, Canceled},
    future::FusedFuture,
};

use crate::stack::TransferStack;

const DEFAULT_NAME: &str = "scheduler";

/// Configures and creates a [`Scheduler`].
///
/// # Example
/// ```
/// # use coroloop::Scheduler;
/// let scheduler = Scheduler::builder().name("io").build();
/// assert_eq!(scheduler.name(), "io");
/// ```
#[derive(Debug, Default)]
#[must_use]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    /// Sets the name reported in the scheduler's tracing spans.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creates the scheduler.
    pub fn build(self) -> Scheduler {
        Scheduler {
            name: self.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            operations: TransferStack::new(),
            stopped: AtomicBool::new(false),
            notified: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }
}

/// A cooperative event loop.
///
/// The scheduler is an ordinary value: share it by reference or through an
/// `Arc` with everything that schedules onto it. Independent schedulers do
/// not interact.
///
/// # Example
/// ```
/// # use coroloop::{AsyncAction, Scheduler};
/// # use std::{sync::Arc, thread};
/// let scheduler = Arc::new(Scheduler::new());
///
/// let s = Arc::clone(&scheduler);
/// let action = AsyncAction::new(async move {
///     s.schedule().await;
///     // From here on the action runs on the event loop thread.
///     s.stop();
/// });
///
/// let event_loop = {
///     let scheduler = Arc::clone(&scheduler);
///     thread::spawn(move || scheduler.process_events())
/// };
/// action.wait();
/// assert_eq!(event_loop.join().unwrap(), 1);
/// ```
pub struct Scheduler {
    name: String,
    operations: TransferStack<oneshot::Sender<()>>,
    stopped: AtomicBool,
    notified: Mutex<bool>,
    wakeup: Condvar,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a [`Builder`] for configuring a scheduler.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Returns the scheduler's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a schedule point.
    ///
    /// Awaiting it always suspends the current computation and queues it on
    /// this scheduler; it continues once the event loop resumes it.
    pub fn schedule(&self) -> Schedule<'_> {
        Schedule {
            scheduler: self,
            slot: None,
        }
    }

    /// Requests the event loop to stop.
    ///
    /// A loop blocked waiting for work wakes up and returns. A loop in the
    /// middle of resuming a batch finishes that batch first. Operations still
    /// queued stay queued and are not resumed by the stopping loop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify(true);
        tracing::debug!(scheduler = %self.name, "stop requested");
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Returns `true` if schedule operations are waiting.
    ///
    /// This is a snapshot; concurrent calls may change it immediately.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.withdraw_dropped();
        !self.operations.is_empty()
    }

    /// Runs the event loop on the current thread until the scheduler is
    /// stopped, and returns the number of operations it resumed.
    ///
    /// While no operation is queued the thread is parked. Each wakeup takes
    /// the whole current batch and resumes all of it before checking the stop
    /// flag again.
    pub fn process_events(&self) -> usize {
        let span = tracing::debug_span!("process_events", scheduler = %self.name);
        let _enter = span.enter();
        tracing::debug!("event loop running");

        let mut resumed = 0;
        while !self.is_stopped() {
            if self.park() {
                resumed += self.run_once();
            }
        }

        tracing::debug!(resumed, "event loop stopped");
        resumed
    }

    /// Resumes the operations queued right now, without blocking, and
    /// returns how many were resumed.
    ///
    /// Operations scheduled while this runs are left for the next call.
    pub fn run_once(&self) -> usize {
        let mut resumed = 0;
        for operation in self.operations.take_all() {
            // A dropped `Schedule` has nobody left to resume.
            if operation.send(()).is_ok() {
                resumed += 1;
            }
        }
        tracing::trace!(scheduler = %self.name, resumed, "Scheduler::run_once");
        resumed
    }

    fn withdraw_dropped(&self) {
        let removed = self.operations.retain(|operation| !operation.is_canceled());
        if removed > 0 {
            tracing::trace!(scheduler = %self.name, removed, "unlinked dropped operations");
        }
    }

    // Blocks until there is work or a stop request. Returns `true` if there
    // is work to run.
    fn park(&self) -> bool {
        let mut notified = self
            .notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*notified && self.operations.is_empty() && !self.is_stopped() {
            notified = self
                .wakeup
                .wait(notified)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *notified = false;
        !self.is_stopped()
    }

    fn notify(&self, all: bool) {
        let mut notified = self
            .notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *notified = true;
        if all {
            self.wakeup.notify_all();
        } else {
            self.wakeup.notify_one();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

/// A schedule point, returned by [`Scheduler::schedule`].
///
/// Dropping a queued `Schedule` withdraws it: its node is unlinked from the
/// scheduler, and a loop racing with the drop skips it without counting it as
/// resumed.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Schedule<'s> {
    scheduler: &'s Scheduler,
    slot: Option<oneshot::Receiver<()>>,
}

impl Future for Schedule<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(slot) = this.slot.as_mut() else {
            let (operation, mut slot) = oneshot::channel();
            // The waker must be in place before the loop can see the node.
            let registered = slot.poll_unpin(cx);
            debug_assert!(registered.is_pending());
            let scheduler = this.scheduler;
            if scheduler.operations.push(operation) {
                tracing::trace!(scheduler = %scheduler.name, "Schedule::poll -> first in batch");
            }
            scheduler.notify(false);
            this.slot = Some(slot);
            return Poll::Pending;
        };

        match slot.poll_unpin(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // Only the scheduler's destructor drops an operation unsent, and
            // the scheduler outlives this borrow.
            Poll::Ready(Err(Canceled)) => {
                debug_assert!(false, "operation dropped while its scheduler is alive");
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Schedule<'_> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        // Resumed already: the loop took the node.
        if slot.is_terminated() {
            return;
        }
        drop(slot);
        self.scheduler.withdraw_dropped();
    }
}

impl fmt::Debug for Schedule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("scheduler", &self.scheduler.name)
            .field("queued", &self.slot.is_some())
            .finish()
    }
}
