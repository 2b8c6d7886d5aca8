//! Synchronization primitives that are swapped for [`loom`]'s checked
//! versions when the crate is built with `--cfg loom`.
//!
//! Run the model checks with:
//!
//! ```text
//! RUSTFLAGS="--cfg loom" cargo test --lib --release loom
//! ```
//!
//! [`loom`]: https://docs.rs/loom
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(unused_imports)]

    pub(crate) mod atomic {
        pub use core::sync::atomic::Ordering;
        pub use loom::sync::atomic::*;
    }

    pub(crate) use loom::{hint, model, sync, thread};
}

#[cfg(not(loom))]
mod inner {
    #![allow(unused_imports, dead_code)]

    pub(crate) use std::{hint, sync, sync::atomic, thread};

    /// Runs `f` once, on real threads.
    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .without_time()
            .with_thread_ids(true)
            .try_init();
        f()
    }
}
