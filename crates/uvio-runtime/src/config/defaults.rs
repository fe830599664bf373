//! Library defaults for [`LoopConfig`](super::LoopConfig)

/// Worker threads for filesystem and resolver requests (libuv uses 4)
pub const THREADPOOL_SIZE: usize = 4;

/// Upper bound on worker threads
pub const MAX_THREADPOOL_SIZE: usize = 128;

/// Pending work items before submissions spill into the loop's backlog
pub const POOL_QUEUE_DEPTH: usize = 1024;

/// Readiness events fetched per poll call
pub const EVENTS_CAPACITY: usize = 1024;

/// Suggested size passed to buffer providers on stream reads
pub const READ_SIZE: usize = 64 * 1024;

/// Idle worker park timeout in microseconds
pub const WORKER_PARK_US: u64 = 1000;

/// Reads attempted per readiness event before yielding to other handles
pub const READS_PER_EVENT: usize = 32;
