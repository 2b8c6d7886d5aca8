use coroloop::{AsyncQueue, Task};
use macro_rules_attribute::apply;
use smol::Timer;
use smol_macros::{Executor, main};
use std::{sync::Arc, time::Duration};

#[apply(main!)]
async fn main(ex: &Executor<'_>) {
    let queue = Arc::new(AsyncQueue::new());

    let q = Arc::clone(&queue);
    let consumer = ex.spawn(async move {
        let task = Task::new(async move {
            let n: u32 = q.dequeue().await;
            n * 2
        });
        task.await
    });

    // Give the consumer a chance to register before producing.
    while !queue.has_waiters() {
        Timer::after(Duration::from_millis(1)).await;
    }
    queue.enqueue(21);

    match consumer.await {
        Ok(value) => println!("Task finished with {value}"),
        Err(e) => eprintln!("Task failed: {e}"),
    }
}
