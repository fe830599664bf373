//! # uvio-runtime
//!
//! Single-threaded event loop for asynchronous I/O on Unix.
//!
//! This crate provides:
//! - The [`Loop`]: handle and request registries, the iteration phases, run modes
//! - Readiness pollers (epoll on Linux, poll(2) everywhere)
//! - A worker pool for blocking filesystem calls and address resolution
//! - Handles: timers, idle/prepare/check, async wakeups, signals, poll,
//!   fs events, fs polling, UDP and child processes
//! - Streams: TCP, pipes and terminals
//! - Filesystem requests and address resolution
//!
//! Handles are small `Copy` ids. Every operation takes the loop explicitly,
//! and callbacks receive `&mut Loop` so they can keep driving it.

#[cfg(not(unix))]
compile_error!("uvio-runtime supports Unix targets only");

pub mod config;
pub mod poller;
pub mod handles;
pub mod stream;
pub mod fs;
pub mod dns;

mod sys;
mod notifier;
mod pool;
mod timer;
mod handle;
mod request;
mod event_loop;

// Re-exports
pub use config::{ConfigError, LoopConfig, PollerKind};
pub use event_loop::{Loop, LoopStats, RunMode};
pub use handle::{Handle, HandleState};
pub use timer::TimerStats;
pub use poller::{Interest, PollEvent, Poller};

pub use handles::{
    Async, AsyncSender, Check, FsEvent, FsEventKind, FsPoll, Idle, Poll, PollEvents, Prepare,
    Process, ProcessOptions, Signal, StdioSpec, Timer, Udp,
};
pub use stream::{Pipe, Stream, Tcp, Tty, TtyMode};
pub use fs::{DirEntry, DirEntryKind, FileStat, FsOp, FsOutcome, FsSubmission, Timespec};
pub use dns::{AddrHints, AddrInfo, Resolver, SystemResolver};

pub use uvio_core::{
    Buffer, BufferProvider, ErrorCode, FsType, HandleId, HandleKind, HeapBuffers, HostBridge,
    RequestId, RequestKind, ResourceToken, UvError, UvResult,
};
