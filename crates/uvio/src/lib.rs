//! # uvio - asynchronous I/O event loop
//!
//! A single-threaded reactor in the libuv mould: one [`Loop`] multiplexes
//! sockets, pipes, terminals, timers, signals, child processes and
//! filesystem requests, and runs callbacks in a fixed phase order.
//!
//! ## Features
//!
//! - **Handles**: timers, idle/prepare/check, async wakeups, signals, fd polling,
//!   fs events (inotify), stat polling, UDP, child processes
//! - **Streams**: TCP, pipes (including relayed host descriptors), terminals
//! - **Requests**: filesystem operations on a worker pool, address resolution,
//!   writes, shutdowns, connects
//! - **Buffers**: callers own what they hand in; reads come from a pluggable provider
//!
//! ## Quick Start
//!
//! ```ignore
//! use uvio::prelude::*;
//!
//! fn main() -> UvResult<()> {
//!     let mut lp = Loop::init()?;
//!
//!     let timer = Timer::init(&mut lp)?;
//!     timer.start(&mut lp, |lp, t| {
//!         println!("tick");
//!         t.close(lp).ok();
//!     }, 100, 0)?;
//!
//!     lp.run(RunMode::Default);
//!     lp.close()
//! }
//! ```
//!
//! ## Iteration
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ update time  │──▶│  timers  │──▶│ completions │──▶│ prepare  │
//! └──────────────┘   └──────────┘   └─────────────┘   └──────────┘
//!        ▲                                                  │
//!        │                                                  ▼
//! ┌──────────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ close cbs    │◀──│   idle   │◀──│    check    │◀──│   poll   │
//! └──────────────┘   └──────────┘   └─────────────┘   └──────────┘
//! ```

// Re-export core types
pub use uvio_core::{
    Buffer, BufferProvider, ErrorCode, FsType, HandleId, HandleKind, HeapBuffers, HostBridge,
    DescriptorTable, RequestId, RequestKind, ResourceToken, UvError, UvResult,
};

// Re-export logging macros
pub use uvio_core::{log_debug, log_error, log_info, log_trace, log_warn};
pub use uvio_core::log::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use uvio_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use uvio_runtime::{
    config, dns, fs, handles, poller, stream, AddrHints, AddrInfo, Async, AsyncSender, Check,
    ConfigError, FsEvent, FsEventKind, FsPoll, Handle, HandleState, Idle, Loop, LoopConfig,
    LoopStats, Pipe, Poll, PollEvents, PollerKind, Prepare, Process, ProcessOptions, Resolver,
    RunMode, Signal, StdioSpec, Stream, SystemResolver, Tcp, Timer, TimerStats, Tty, TtyMode,
    Udp,
};

/// Everything a typical program needs
pub mod prelude {
    pub use crate::{
        Buffer, ErrorCode, Handle, Loop, LoopConfig, Pipe, RunMode, Stream, Tcp, Timer, Tty,
        UvError, UvResult,
    };
}

/// Run the process-wide default loop until it has nothing left to do.
///
/// Returns whether the loop is still alive, as [`Loop::run`] does.
pub fn run_default(mode: RunMode) -> UvResult<bool> {
    Loop::with_default(|lp| lp.run(mode))
}
