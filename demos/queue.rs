use coroloop::{AsyncAction, AsyncQueue};
use std::{sync::Arc, thread, time::Duration};

fn main() {
    let queue = Arc::new(AsyncQueue::new());

    // Nobody is waiting yet, so this value is lost.
    let delivered = queue.enqueue("too early".to_string());
    println!("Delivered before any consumer: {delivered}");

    let consumers: Vec<_> = (0..3)
        .map(|id| {
            let queue = Arc::clone(&queue);
            AsyncAction::new(async move {
                let message: String = queue.dequeue().await;
                println!(
                    "Consumer {id} got {message:?} on {:?}",
                    thread::current().name()
                );
            })
        })
        .collect();

    // The most recently registered consumer is served first.
    let producer = {
        let queue = Arc::clone(&queue);
        thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                for n in 0..3 {
                    thread::sleep(Duration::from_millis(10));
                    queue.enqueue(format!("message {n}"));
                }
            })
            .unwrap()
    };

    AsyncAction::when_all(consumers).wait();
    producer.join().unwrap();
}
