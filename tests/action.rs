use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use coroloop::{AsyncAction, AsyncQueue, when_all};

#[test]
fn action_starts_eagerly() {
    let ran = Arc::new(AtomicBool::new(false));
    let ran_cl = Arc::clone(&ran);

    let action = AsyncAction::new(async move {
        ran_cl.store(true, Ordering::Relaxed);
    });

    assert!(ran.load(Ordering::Relaxed), "Body should run on construction");
    assert!(action.is_finished(), "Action without suspension finishes at once");
}

#[tokio::test(flavor = "multi_thread")]
async fn action_awaited_right_away_does_not_deadlock() {
    AsyncAction::new(async {}).await;

    let finished = AsyncAction::new(async {});
    finished.wait();
    finished.await;
}

#[test]
fn action_wait_blocks_until_finished() {
    let queue = Arc::new(AsyncQueue::new());
    let q = Arc::clone(&queue);
    let action = AsyncAction::new(async move {
        let () = q.dequeue().await;
    });
    assert!(!action.is_finished(), "Action should wait on the queue");

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        queue.enqueue(());
    });

    action.wait();
    assert!(action.is_finished());
    producer.join().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn action_await_suspends_until_finished() {
    let queue = Arc::new(AsyncQueue::new());
    let q = Arc::clone(&queue);
    let action = AsyncAction::new(async move {
        let _: u8 = q.dequeue().await;
    });

    let producer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(1)
    });

    action.await;
    assert!(producer.await.unwrap(), "The action should have been waiting");
}

#[test]
fn action_panic_is_swallowed() {
    let action = AsyncAction::new(async { panic!("nobody sees this") });

    assert!(action.is_finished(), "A panicked action still finishes");
    action.wait();
}

#[test]
fn action_when_all_waits_for_every_action() {
    let queues: Vec<_> = (0..3).map(|_| Arc::new(AsyncQueue::new())).collect();
    let action = |queue: &Arc<AsyncQueue<()>>| {
        let queue = Arc::clone(queue);
        AsyncAction::new(async move { queue.dequeue().await })
    };
    let (a, b, c) = (action(&queues[0]), action(&queues[1]), action(&queues[2]));

    let all = when_all!(a, b, c);

    // Finish out of argument order.
    for i in [2, 0] {
        queues[i].enqueue(());
        assert!(!all.is_finished(), "Still waiting on one action");
    }
    queues[1].enqueue(());
    assert!(all.is_finished(), "All three have finished");
}

#[test]
fn action_when_all_of_nothing_finishes() {
    assert!(AsyncAction::when_all([]).is_finished());
}

#[test]
fn action_awaits_another_action() {
    let queue = Arc::new(AsyncQueue::new());
    let q = Arc::clone(&queue);
    let first = AsyncAction::new(async move {
        let _: i64 = q.dequeue().await;
    });
    let second = AsyncAction::new(async move {
        first.await;
    });
    assert!(!second.is_finished());

    queue.enqueue(-1);
    assert!(second.is_finished(), "Finishing the first resumes the second");
}
