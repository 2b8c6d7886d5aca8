//! Defines `AsyncQueue`, a channel whose consumers suspend until a producer
//! hands them a value.
//!
//! The queue does not buffer values. Each pending [`Dequeue`] is a waiter
//! node on a stack with lock-free pushes, and [`AsyncQueue::enqueue`] pops one waiter and
//! delivers the value straight into it, resuming the consumer on the
//! producer's thread. A value enqueued while nobody waits is dropped.
//!
//! Waiters are served last-in, first-out: of all consumers currently
//! waiting, the one that registered most recently receives the next value.
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    FutureExt,
    channel::oneshot::{self, Canceled},
    future::FusedFuture,
};

use crate::stack::TransferStack;

/// A multi-producer queue whose consumers wait for values to be handed to
/// them.
///
/// Any number of threads may call [`enqueue`](Self::enqueue) and any number
/// of computations may await [`dequeue`](Self::dequeue) concurrently.
///
/// # Example
/// ```
/// # use coroloop::{AsyncAction, AsyncQueue};
/// # use std::sync::{Arc, Mutex};
/// let queue = Arc::new(AsyncQueue::new());
/// let received = Arc::new(Mutex::new(Vec::new()));
///
/// let (q, r) = (Arc::clone(&queue), Arc::clone(&received));
/// let consumer = AsyncAction::new(async move {
///     for _ in 0..2 {
///         let line: String = q.dequeue().await;
///         r.lock().unwrap().push(line);
///     }
/// });
///
/// queue.enqueue("first".to_string());
/// queue.enqueue("second".to_string());
/// consumer.wait();
/// assert_eq!(*received.lock().unwrap(), ["first", "second"]);
/// ```
pub struct AsyncQueue<T> {
    waiters: TransferStack<oneshot::Sender<T>>,
}

impl<T> AsyncQueue<T> {
    /// Creates an empty queue with no waiters.
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            waiters: TransferStack::new(),
        }
    }

    /// Creates an empty queue with no waiters.
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: TransferStack::new(),
        }
    }

    /// Returns a future that resolves with the next value delivered to it.
    ///
    /// The first poll always suspends: it registers the waiter with the
    /// queue. Only values enqueued after that point can reach it.
    pub fn dequeue(&self) -> Dequeue<'_, T> {
        Dequeue {
            queue: self,
            slot: None,
        }
    }

    /// Hands `value` to one waiting consumer and resumes it on this thread.
    ///
    /// The most recently registered waiter is chosen. Waiters whose
    /// [`Dequeue`] future was dropped are skipped. If no consumer is waiting,
    /// the value is dropped and `false` is returned; this is not an error.
    pub fn enqueue(&self, value: T) -> bool {
        let mut value = value;
        while let Some(waiter) = self.waiters.pop() {
            match waiter.send(value) {
                Ok(()) => {
                    tracing::trace!("AsyncQueue::enqueue -> delivered");
                    return true;
                }
                Err(returned) => {
                    tracing::trace!("AsyncQueue::enqueue -> waiter gone, trying the next one");
                    value = returned;
                }
            }
        }
        tracing::trace!("AsyncQueue::enqueue -> no waiters, value dropped");
        false
    }

    /// Returns `true` if at least one consumer is waiting.
    ///
    /// This is a snapshot; concurrent calls may change it immediately.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        self.withdraw_dropped();
        !self.waiters.is_empty()
    }

    fn withdraw_dropped(&self) {
        let removed = self.waiters.retain(|waiter| !waiter.is_canceled());
        if removed > 0 {
            tracing::trace!(removed, "AsyncQueue: unlinked dropped waiters");
        }
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueue")
            .field("waiters", &self.waiters)
            .finish()
    }
}

/// A pending dequeue operation, returned by [`AsyncQueue::dequeue`].
///
/// Dropping a registered `Dequeue` withdraws it: its node is unlinked from
/// the queue, and a producer racing with the drop skips it.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Dequeue<'q, T> {
    queue: &'q AsyncQueue<T>,
    slot: Option<oneshot::Receiver<T>>,
}

impl<T> Future for Dequeue<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        let Some(slot) = this.slot.as_mut() else {
            let (waiter, mut slot) = oneshot::channel();
            // Register the waker before the node is published; a producer may
            // pop it and deliver the moment it is pushed.
            let registered = slot.poll_unpin(cx);
            debug_assert!(registered.is_pending());
            this.queue.waiters.push(waiter);
            this.slot = Some(slot);
            tracing::trace!("Dequeue::poll -> registered");
            return Poll::Pending;
        };

        match slot.poll_unpin(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            // Only the queue's destructor drops a waiter unsent, and the queue
            // outlives this borrow.
            Poll::Ready(Err(Canceled)) => {
                debug_assert!(false, "waiter dropped while its queue is alive");
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Dequeue<'_, T> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        // A delivered value means the producer already took the node.
        if slot.is_terminated() {
            return;
        }
        drop(slot);
        self.queue.withdraw_dropped();
    }
}

impl<T> fmt::Debug for Dequeue<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dequeue")
            .field("registered", &self.slot.is_some())
            .finish()
    }
}
