//! Self-driving frames.
//!
//! A [`Frame`] owns a boxed future and acts as its own executor: its
//! [`Waker`](std::task::Waker) polls the future on whichever thread wakes it.
//! Resuming a suspended computation therefore happens in the caller's stack,
//! be it a producer calling [`AsyncQueue::enqueue`](crate::AsyncQueue::enqueue)
//! or a thread driving [`Scheduler::process_events`](crate::Scheduler::process_events).

use futures::{
    future::BoxFuture,
    task::{self, ArcWake},
};
use std::{
    fmt,
    sync::{Arc, PoisonError},
    task::Context,
};

use crate::loom::sync::{
    Mutex,
    atomic::{AtomicU8, Ordering::*},
};

// Frame run states. A frame is polled by at most one thread at a time; a
// wake-up that lands while it is running is recorded as `NOTIFIED` and
// serviced by the running poller before it lets go.
const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const NOTIFIED: u8 = 2;
const FINISHED: u8 = 3;

pub(crate) struct Frame {
    state: AtomicU8,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl Frame {
    /// Allocates a frame for `future` and runs it until its first suspension.
    pub(crate) fn start(future: BoxFuture<'static, ()>) -> Arc<Self> {
        let frame = Arc::new(Self {
            state: AtomicU8::new(IDLE),
            future: Mutex::new(Some(future)),
        });
        frame.resume();
        frame
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.state.load(Acquire) == FINISHED
    }

    fn resume(self: &Arc<Self>) {
        let mut state = self.state.load(Acquire);
        loop {
            let next = match state {
                IDLE => RUNNING,
                RUNNING => NOTIFIED,
                NOTIFIED => return,
                _ => {
                    tracing::trace!(frame = ?Arc::as_ptr(self), "resume after finish ignored");
                    return;
                }
            };
            match self
                .state
                .compare_exchange_weak(state, next, AcqRel, Acquire)
            {
                Ok(_) if next == NOTIFIED => return,
                Ok(_) => break,
                Err(actual) => state = actual,
            }
        }
        self.run();
    }

    fn run(self: &Arc<Self>) {
        let waker = task::waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        loop {
            tracing::trace!(frame = ?Arc::as_ptr(self), "Frame::run");
            let poll = {
                let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(future) = slot.as_mut() else {
                    debug_assert!(false, "a running frame must still own its future");
                    return;
                };
                let poll = future.as_mut().poll(&mut cx);
                if poll.is_ready() {
                    *slot = None;
                }
                poll
            };

            if poll.is_ready() {
                self.state.store(FINISHED, Release);
                tracing::trace!(frame = ?Arc::as_ptr(self), "frame finished");
                return;
            }

            match self.state.compare_exchange(RUNNING, IDLE, AcqRel, Acquire) {
                Ok(_) => return,
                Err(NOTIFIED) => self.state.store(RUNNING, Release),
                Err(state) => {
                    debug_assert!(false, "unexpected frame state {state} while running");
                    return;
                }
            }
        }
    }
}

impl ArcWake for Frame {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.resume();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Acquire) {
            IDLE => "idle",
            RUNNING => "running",
            NOTIFIED => "notified",
            _ => "finished",
        };
        f.debug_struct("Frame").field("state", &state).finish_non_exhaustive()
    }
}
