//! Cooperative scheduling primitives for chains of suspendable computations.
//!
//! `coroloop` provides a handful of small building blocks for code that runs
//! as futures resumed by the application itself rather than by OS threads or
//! a hidden runtime. Resumption order is explicit: a computation continues
//! on the thread that completes what it was waiting for.
//!
//! Features include:
//! - [`Task`], a lazily started computation with a single result slot.
//!   Awaiting a task drives it inline, and panics inside it are captured and
//!   reported through [`TaskError`]
//! - [`AsyncAction`], an eagerly started fire-and-forget computation that can
//!   be awaited or waited on from a plain thread, and joined with
//!   [`when_all!`]
//! - [`AsyncQueue`], a lock-free channel whose producers hand values directly
//!   to waiting consumers and resume them in place
//! - [`Scheduler`], a user-driven event loop that resumes everything that
//!   scheduled itself onto it, one batch at a time
//!
//! `Task`, [`queue::Dequeue`] and [`scheduler::Schedule`] are plain futures,
//! so they also work on any executor. The crate never spawns threads, has no
//! timers and no cancellation.

mod frame;
mod loom;
mod stack;

pub mod action;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use action::AsyncAction;
pub use queue::AsyncQueue;
pub use scheduler::Scheduler;
pub use task::{Task, TaskError};
