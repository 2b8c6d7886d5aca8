use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use coroloop::{AsyncAction, AsyncQueue};
use futures::executor::ThreadPool;
use futures_lite::future::poll_once;

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_dequeue_always_suspends_first() {
    trace_init();
    let queue = AsyncQueue::new();
    let mut dequeue = queue.dequeue();

    assert!(!queue.has_waiters(), "Creating the future registers nothing");
    assert_eq!(poll_once(&mut dequeue).await, None, "First poll suspends");
    assert!(queue.has_waiters(), "First poll registers the waiter");

    assert!(queue.enqueue(2), "Value should reach the waiter");
    assert!(!queue.has_waiters());
    assert_eq!(dequeue.await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_enqueue_without_waiters_drops_value() {
    let queue = AsyncQueue::new();

    assert!(!queue.enqueue(1), "Nobody is waiting, value is dropped");

    let mut dequeue = queue.dequeue();
    assert_eq!(
        poll_once(&mut dequeue).await,
        None,
        "The dropped value must not be delivered later"
    );
    queue.enqueue(2);
    assert_eq!(dequeue.await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_serves_latest_waiter_first() {
    let queue = AsyncQueue::new();
    let mut first = queue.dequeue();
    let mut second = queue.dequeue();
    assert_eq!(poll_once(&mut first).await, None);
    assert_eq!(poll_once(&mut second).await, None);

    assert!(queue.enqueue("a"));
    assert_eq!(
        poll_once(&mut second).await,
        Some("a"),
        "The most recent waiter should receive the value"
    );
    assert_eq!(
        poll_once(&mut first).await,
        None,
        "The older waiter should still wait"
    );

    assert!(queue.enqueue("b"));
    assert_eq!(first.await, "b");
}

#[test]
fn queue_lifo_order_across_actions() {
    let queue = Arc::new(AsyncQueue::new());
    let received = Arc::new(Mutex::new(Vec::new()));

    let consumer = |name: &'static str| {
        let queue = Arc::clone(&queue);
        let received = Arc::clone(&received);
        AsyncAction::new(async move {
            let value: u32 = queue.dequeue().await;
            received.lock().unwrap().push((name, value));
        })
    };
    let a = consumer("a");
    let b = consumer("b");
    let c = consumer("c");

    for value in 1..=3 {
        assert!(queue.enqueue(value));
    }

    assert!(a.is_finished() && b.is_finished() && c.is_finished());
    assert_eq!(
        *received.lock().unwrap(),
        [("c", 1), ("b", 2), ("a", 3)],
        "Waiters should be served last registered first"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_skips_dropped_waiters() {
    let queue = AsyncQueue::new();
    let mut kept = queue.dequeue();
    let mut dropped = queue.dequeue();
    assert_eq!(poll_once(&mut kept).await, None);
    assert_eq!(poll_once(&mut dropped).await, None);
    drop(dropped);

    assert!(queue.enqueue(10), "The live waiter should get the value");
    assert_eq!(kept.await, 10);
    assert!(!queue.has_waiters());
}

#[test]
fn queue_resumes_consumer_on_producer_thread() {
    let queue = Arc::new(AsyncQueue::new());
    let resumed_on = Arc::new(Mutex::new(None));

    let (q, r) = (Arc::clone(&queue), Arc::clone(&resumed_on));
    let consumer = AsyncAction::new(async move {
        let () = q.dequeue().await;
        *r.lock().unwrap() = Some(thread::current().id());
    });

    let producer = thread::spawn(move || {
        queue.enqueue(());
        thread::current().id()
    })
    .join()
    .unwrap();

    assert!(consumer.is_finished());
    assert_eq!(*resumed_on.lock().unwrap(), Some(producer));
}

#[test]
fn queue_concurrent_producers_reach_every_waiter() {
    trace_init();
    const CONSUMERS: usize = 32;

    let queue = Arc::new(AsyncQueue::new());
    let total = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let total = Arc::clone(&total);
            AsyncAction::new(async move {
                let value: usize = queue.dequeue().await;
                total.fetch_add(value, Ordering::Relaxed);
            })
        })
        .collect();
    let all = AsyncAction::when_all(consumers);

    let delivered = Arc::new(AtomicUsize::new(0));
    let pool = ThreadPool::new().unwrap();
    for value in 1..=CONSUMERS {
        let queue = Arc::clone(&queue);
        let delivered = Arc::clone(&delivered);
        pool.spawn_ok(async move {
            if queue.enqueue(value) {
                delivered.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    all.wait();
    assert_eq!(delivered.load(Ordering::Relaxed), CONSUMERS);
    assert_eq!(
        total.load(Ordering::Relaxed),
        CONSUMERS * (CONSUMERS + 1) / 2,
        "Every value should reach exactly one consumer"
    );
    assert!(!queue.has_waiters());
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_dropped_waiters_do_not_pile_up() {
    trace_init();
    let queue = AsyncQueue::new();

    for _ in 0..10_000 {
        let mut dequeue = queue.dequeue();
        assert_eq!(poll_once(&mut dequeue).await, None);
    }
    assert!(
        !queue.has_waiters(),
        "Dropped waiters should be unlinked, not left for producers"
    );
    assert!(!queue.enqueue(1), "Nobody is waiting");

    let mut live = queue.dequeue();
    assert_eq!(poll_once(&mut live).await, None);
    let mut gone: Vec<_> = (0..100).map(|_| queue.dequeue()).collect();
    for dequeue in &mut gone {
        assert_eq!(poll_once(dequeue).await, None);
    }
    drop(gone);

    assert!(queue.has_waiters(), "The live waiter is still registered");
    assert!(queue.enqueue(2));
    assert_eq!(live.await, 2);
    assert!(!queue.has_waiters());
}
