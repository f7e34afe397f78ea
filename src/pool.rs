//! Worker pools for codec calls.
//!
//! A [`WorkerPool`] is attached for one unit of work and released when it is
//! dropped. Region decompressors bind their state to the thread that started
//! them, and host tile requests can arrive on any thread, so pools are never
//! cached or shared between requests.

use crate::constants::{CONCURRENCY_ENV, MAX_THREADS};
use crate::error::{BridgeError, Result};
use crate::message::messages;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

// 0 means "not set, ask the environment".
static CONCURRENCY: AtomicUsize = AtomicUsize::new(0);
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Override the process-wide concurrency. Zero restores the default.
pub fn set_concurrency(threads: usize) {
    CONCURRENCY.store(threads, Ordering::Relaxed);
}

/// Process-wide concurrency: the override, else `J2K_CONCURRENCY`, else the
/// number of available cores.
pub fn concurrency() -> usize {
    let set = CONCURRENCY.load(Ordering::Relaxed);
    if set > 0 {
        return set;
    }
    if let Some(n) = std::env::var(CONCURRENCY_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
    {
        return n;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Number of workers a pool gets for a requested concurrency.
pub fn pool_threads(requested: usize) -> usize {
    requested.clamp(1, MAX_THREADS)
}

pub struct WorkerPool {
    pool: ThreadPool,
    id: u64,
    threads: usize,
    workers: Vec<ThreadId>,
}

impl WorkerPool {
    /// Attach `min(concurrency, 16)` workers.
    pub fn attach(concurrency: usize) -> Result<Self> {
        let threads = pool_threads(concurrency);
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("j2k-pool-{id}-{i}"))
            .build()
            .map_err(|e| BridgeError::ThreadAttach {
                requested: threads,
                reason: e.to_string(),
            })?;
        let workers = pool.broadcast(|_| thread::current().id());
        trace!(id, threads, "worker pool attached");
        Ok(Self {
            pool,
            id,
            threads,
            workers,
        })
    }

    /// Unique for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `op` inside the pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // The threads exit with the pool, so their unflushed fragments would
        // never be claimed.
        let dropped = messages().forget_threads(&self.workers);
        debug!(id = self.id, dropped, "worker pool released");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.id)
            .field("threads", &self.threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_is_capped() {
        assert_eq!(pool_threads(0), 1);
        assert_eq!(pool_threads(4), 4);
        assert_eq!(pool_threads(64), MAX_THREADS);
    }

    #[test]
    fn pools_get_distinct_ids() {
        let a = WorkerPool::attach(2).unwrap();
        let b = WorkerPool::attach(2).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.threads(), 2);
    }

    #[test]
    fn install_runs_on_pool_threads() {
        let pool = WorkerPool::attach(3).unwrap();
        let inside = pool.install(rayon::current_thread_index);
        assert!(inside.is_some());
    }

    #[test]
    fn release_drops_worker_fragments() {
        let pool = WorkerPool::attach(2).unwrap();
        let worker = pool.install(|| {
            messages().warning.put_text("left over");
            thread::current().id()
        });
        assert!(messages().warning.has_pending(worker));
        drop(pool);
        assert!(!messages().warning.has_pending(worker));
    }
}
