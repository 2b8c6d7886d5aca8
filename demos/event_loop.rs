use coroloop::{AsyncAction, Scheduler, Task, when_all};
use std::{sync::Arc, thread};

async fn step(scheduler: &Scheduler, name: &str, rounds: usize) -> usize {
    for round in 0..rounds {
        scheduler.schedule().await;
        println!("{name}: round {round} on {:?}", thread::current().name());
    }
    rounds
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let scheduler = Arc::new(Scheduler::builder().name("demo").build());

    let workers: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let scheduler = Arc::clone(&scheduler);
            AsyncAction::new(async move {
                let task = Task::new(step(&scheduler, name, i + 1));
                let rounds = task.await.unwrap();
                println!("{name} finished after {rounds} rounds");
            })
        })
        .collect();

    let s = Arc::clone(&scheduler);
    let event_loop = thread::Builder::new()
        .name("event-loop".into())
        .spawn(move || s.process_events())
        .unwrap();

    let [a, b, c] = <[AsyncAction; 3]>::try_from(workers).unwrap();
    when_all!(a, b, c).wait();
    scheduler.stop();

    let resumed = event_loop.join().unwrap();
    println!("Event loop resumed {resumed} operations");
}
