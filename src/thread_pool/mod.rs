//! Thread pools that run the session handlers, one job per accepted connection.
//!
//! - [`NaiveThreadPool`] starts a new thread for every connection
//! - [`SharedQueueThreadPool`] runs at most a fixed number of sessions at once, further
//! connections wait in a queue until a session ends
use crate::Result;

/// A trait for a pool of threads that jobs can be spawned into
pub trait ThreadPool {
    /// creates a new thread pool, immediately spawning the specified number of threads.
    ///
    /// # Errors
    /// returns an error if any thread fails to spawn. All previously-spawned threads are
    /// terminated.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// spawns a function into the thread pool.
    ///
    /// Spawning always succeeds, but if the function panics the threadpool continues to
    /// operate with the same number of threads. A panicking job does not shrink or
    /// invalidate the pool.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod naive;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
