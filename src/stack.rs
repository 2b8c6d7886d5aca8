//! A singly linked stack of heap nodes with lock-free pushes.
//!
//! Both the [`AsyncQueue`](crate::AsyncQueue) waiter list and the
//! [`Scheduler`](crate::Scheduler) run list are built on [`TransferStack`].
//! Each node carries its own `next` link, and ownership of a node moves
//! explicitly: [`TransferStack::push`] hands it to the stack, while
//! [`TransferStack::pop`] and [`TransferStack::take_all`] hand it to the
//! caller. A node taken out of the stack is never visited by the stack again.
//!
//! Pushing is a plain compare-and-swap loop and never waits. Removal is
//! **not** lock-free: [`pop`](TransferStack::pop),
//! [`take_all`](TransferStack::take_all) and
//! [`retain`](TransferStack::retain) take a short spin lock shared by all
//! removers. A remover reads `head.next` before swinging `head`, and with only
//! one remover at a time the node it read can neither be freed nor re-linked
//! under it. Interior links are only ever written by the lock holder, so
//! pushers, which touch nothing but `head`, never race with them.

use std::{fmt, marker::PhantomData, ptr};

use crate::loom::{
    hint,
    sync::atomic::{AtomicBool, AtomicPtr, Ordering::*},
};

struct Node<T> {
    next: *mut Node<T>,
    item: T,
}

pub(crate) struct TransferStack<T> {
    head: AtomicPtr<Node<T>>,
    removing: AtomicBool,
}

/// The nodes taken out of a [`TransferStack`] by a single
/// [`take_all`](TransferStack::take_all), most recently pushed first.
pub(crate) struct Drain<T> {
    head: *mut Node<T>,
    _owns: PhantomData<Box<Node<T>>>,
}

struct RemovalGuard<'a>(&'a AtomicBool);

// SAFETY: the stack owns its nodes like a `Box<T>` would, and every access to
// a linked node goes through the atomic head.
unsafe impl<T: Send> Send for TransferStack<T> {}
// SAFETY: see above; shared access only pushes or removes whole nodes.
unsafe impl<T: Send> Sync for TransferStack<T> {}
// SAFETY: a `Drain` exclusively owns the nodes it holds.
unsafe impl<T: Send> Send for Drain<T> {}

// === impl TransferStack ===

impl<T> TransferStack<T> {
    #[cfg(not(loom))]
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            removing: AtomicBool::new(false),
        }
    }

    #[cfg(loom)]
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            removing: AtomicBool::new(false),
        }
    }

    /// Pushes `item` onto the top of the stack. Returns `true` if the stack
    /// was empty before the push.
    pub(crate) fn push(&self, item: T) -> bool {
        let node = Box::into_raw(Box::new(Node {
            next: ptr::null_mut(),
            item,
        }));

        let mut head = self.head.load(Relaxed);
        loop {
            // SAFETY: `node` is not reachable by any other thread until the
            // compare-and-swap below publishes it.
            unsafe { (*node).next = head };

            match self
                .head
                .compare_exchange_weak(head, node, AcqRel, Acquire)
            {
                Ok(old) => {
                    tracing::trace!(?node, was_empty = old.is_null(), "TransferStack::push");
                    return old.is_null();
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Removes the most recently pushed item, if any.
    pub(crate) fn pop(&self) -> Option<T> {
        let _guard = self.lock_removal();
        let mut head = self.head.load(Acquire);
        loop {
            if head.is_null() {
                return None;
            }

            // SAFETY: only the holder of the removal guard unlinks nodes, so
            // `head` is still owned by the stack, and its `next` was written
            // before the node was published.
            let next = unsafe { (*head).next };
            match self
                .head
                .compare_exchange_weak(head, next, AcqRel, Acquire)
            {
                Ok(_) => {
                    tracing::trace!(node = ?head, "TransferStack::pop");
                    // SAFETY: the node is unlinked and was allocated by `push`.
                    let node = unsafe { Box::from_raw(head) };
                    return Some(node.item);
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically takes every node currently in the stack. Nodes pushed after
    /// this returns are not part of the returned [`Drain`].
    #[must_use]
    pub(crate) fn take_all(&self) -> Drain<T> {
        let _guard = self.lock_removal();
        let head = self.head.swap(ptr::null_mut(), AcqRel);
        Drain {
            head,
            _owns: PhantomData,
        }
    }

    /// Unlinks and drops every item for which `keep` returns `false`, and
    /// returns how many were dropped.
    ///
    /// Items pushed while this runs may or may not be visited.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let _guard = self.lock_removal();
        let mut removed = 0;

        // The head can move under concurrent pushes, so it is unlinked with
        // a compare-and-swap.
        let mut prev = self.head.load(Acquire);
        loop {
            if prev.is_null() {
                tracing::trace!(removed, "TransferStack::retain");
                return removed;
            }
            // SAFETY: only the holder of the removal guard unlinks nodes.
            if keep(unsafe { &(*prev).item }) {
                break;
            }
            let next = unsafe { (*prev).next };
            match self
                .head
                .compare_exchange_weak(prev, next, AcqRel, Acquire)
            {
                Ok(_) => {
                    // SAFETY: the node is unlinked and was allocated by `push`.
                    drop(unsafe { Box::from_raw(prev) });
                    removed += 1;
                    prev = next;
                }
                Err(actual) => prev = actual,
            }
        }

        // Below a kept node only removers write links, and we are the only
        // remover.
        // SAFETY: `prev` and every node reachable from it are owned by the
        // stack and cannot be unlinked by anyone else while the guard is held.
        unsafe {
            let mut cur = (*prev).next;
            while !cur.is_null() {
                if keep(&(*cur).item) {
                    prev = cur;
                } else {
                    (*prev).next = (*cur).next;
                    drop(Box::from_raw(cur));
                    removed += 1;
                }
                cur = (*prev).next;
            }
        }

        tracing::trace!(removed, "TransferStack::retain");
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let _guard = self.lock_removal();
        let mut len = 0;
        let mut cur = self.head.load(Acquire);
        while !cur.is_null() {
            len += 1;
            // SAFETY: nodes cannot be unlinked while the guard is held.
            cur = unsafe { (*cur).next };
        }
        len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Acquire).is_null()
    }

    fn lock_removal(&self) -> RemovalGuard<'_> {
        while self
            .removing
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        RemovalGuard(&self.removing)
    }
}

impl<T> Drop for TransferStack<T> {
    fn drop(&mut self) {
        // Items still linked are dropped with the stack.
        drop(self.take_all());
    }
}

impl<T> fmt::Debug for TransferStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferStack")
            .field("head", &self.head.load(Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for RemovalGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Release);
    }
}

// === impl Drain ===

impl<T> Iterator for Drain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.head.is_null() {
            return None;
        }
        // SAFETY: the drain owns every node reachable from `head`.
        let node = unsafe { Box::from_raw(self.head) };
        // Read the link before the item leaves; the consumer may drop it.
        self.head = node.next;
        Some(node.item)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn pop_is_lifo() {
        let stack = TransferStack::new();
        assert!(stack.push(1));
        assert!(!stack.push(2));
        stack.push(3);

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn take_all_snapshots_current_nodes() {
        let stack = TransferStack::new();
        stack.push("a");
        stack.push("b");

        let batch = stack.take_all();
        stack.push("c");

        assert_eq!(batch.collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(stack.take_all().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn dropping_releases_linked_items() {
        let item = Arc::new(());
        let stack = TransferStack::new();
        stack.push(Arc::clone(&item));
        stack.push(Arc::clone(&item));

        let mut batch = stack.take_all();
        assert!(batch.next().is_some());
        drop(batch);
        stack.push(Arc::clone(&item));
        drop(stack);

        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn concurrent_push_and_pop_lose_nothing() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 1_000;

        let stack = Arc::new(TransferStack::new());
        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        stack.push(t * PER_THREAD + i);
                    }
                })
            })
            .collect();

        let mut popped = Vec::new();
        while popped.len() < THREADS * PER_THREAD / 2 {
            if let Some(item) = stack.pop() {
                popped.push(item);
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }
        popped.extend(stack.take_all());

        popped.sort_unstable();
        assert_eq!(popped, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
    }
}
