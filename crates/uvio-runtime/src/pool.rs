//! Worker pool for blocking requests.
//!
//! Filesystem calls, stat polling and address resolution block, so the loop
//! hands them to a fixed set of OS threads. Workers pop work from a bounded
//! lock-free queue, run it, push the output to a lock-free result queue and
//! wake the loop through the [`Notifier`]. Workers never run user callbacks;
//! the loop drains results on its own thread.
//!
//! Once a work item is queued it runs to completion. Shutdown lets workers
//! finish the queue before exiting.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_queue::{ArrayQueue, SegQueue};
use uvio_core::{log_debug, log_error, ErrorCode, RequestId};

use crate::dns::AddrInfo;
use crate::fs::{FileStat, FsRaw};
use crate::notifier::Notifier;

/// What a work item produces
pub(crate) enum WorkOutput {
    Fs(FsRaw),
    Stat(Result<FileStat, ErrorCode>),
    Resolve(Result<Vec<AddrInfo>, ErrorCode>),
    /// The work item panicked; the request completes with `EIO`
    Panicked,
}

pub(crate) type Work = Box<dyn FnOnce() -> WorkOutput + Send>;

struct WorkItem {
    req: RequestId,
    work: Work,
}

/// Finished work, ready for the loop
pub(crate) struct Completion {
    pub req: RequestId,
    pub output: WorkOutput,
}

/// Shared state between the loop and workers.
struct PoolInner {
    /// Work queue: loop → workers.
    work_queue: ArrayQueue<WorkItem>,
    /// Result queue: workers → loop. Unbounded so a result is never dropped.
    result_queue: SegQueue<Completion>,
    /// Workers currently running an item.
    active: AtomicUsize,
    shutdown: AtomicBool,
    notifier: Arc<Notifier>,
    park: Duration,
}

pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
    handles: Vec<thread::JoinHandle<()>>,
    next_wake: usize,
}

impl WorkerPool {
    /// Spawn `n` workers sharing a queue of `queue_depth` items.
    pub(crate) fn new(
        n: usize,
        queue_depth: usize,
        notifier: Arc<Notifier>,
        park: Duration,
    ) -> std::io::Result<Self> {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            work_queue: ArrayQueue::new(queue_depth.max(1)),
            result_queue: SegQueue::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            notifier,
            park,
        });

        let mut pool = WorkerPool {
            inner,
            handles: Vec::with_capacity(n),
            next_wake: 0,
        };
        for worker_id in 0..n {
            let inner = Arc::clone(&pool.inner);
            let handle = thread::Builder::new()
                .name(format!("uvio-worker-{}", worker_id))
                .spawn(move || worker_loop(inner, worker_id));
            match handle {
                Ok(h) => pool.handles.push(h),
                Err(e) => {
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        log_debug!("worker pool started: {} workers, queue depth {}", n, queue_depth);
        Ok(pool)
    }

    /// Queue `work` for `req`. A full queue hands the item back.
    pub(crate) fn submit(&mut self, req: RequestId, work: Work) -> Result<(), (RequestId, Work)> {
        self.inner
            .work_queue
            .push(WorkItem { req, work })
            .map_err(|item| (item.req, item.work))?;
        // Wake one parked worker, round-robin
        if !self.handles.is_empty() {
            self.handles[self.next_wake % self.handles.len()].thread().unpark();
            self.next_wake = self.next_wake.wrapping_add(1);
        }
        Ok(())
    }

    pub(crate) fn pop_completion(&self) -> Option<Completion> {
        self.inner.result_queue.pop()
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub(crate) fn total_workers(&self) -> usize {
        self.handles.len()
    }

    /// Stop accepting work, let workers drain the queue, join them.
    pub(crate) fn shutdown(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for h in &self.handles {
            h.thread().unpark();
        }
        for h in self.handles.drain(..) {
            if h.join().is_err() {
                log_error!("worker thread exited by panic");
            }
        }
        log_debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    loop {
        match inner.work_queue.pop() {
            Some(item) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let output = panic::catch_unwind(AssertUnwindSafe(item.work)).unwrap_or_else(|_| {
                    log_error!("worker {}: request {} panicked", worker_id, item.req);
                    WorkOutput::Panicked
                });
                inner.active.fetch_sub(1, Ordering::Relaxed);
                inner.result_queue.push(Completion {
                    req: item.req,
                    output,
                });
                if let Err(code) = inner.notifier.notify() {
                    log_error!("worker {}: loop wakeup failed: {}", worker_id, code);
                }
            }
            None => {
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                thread::park_timeout(inner.park);
            }
        }
    }
}
