//! Shared worker pool used by the remoting runtime.
//!
//! Work is classified by [`TaskClass`] so trace output can tell apart
//! asynchronous dispatch, cross-domain call-outs and synchronization
//! domain hand-offs. Blocking work lands on the blocking pool of one lazily
//! built process-wide tokio runtime; hand-offs that must not wait for a free
//! pool thread get a dedicated thread through [`spawn_thread`].

mod class;
mod spawn;

pub use class::TaskClass;
pub use spawn::{pool_available, spawn_blocking, spawn_thread};
