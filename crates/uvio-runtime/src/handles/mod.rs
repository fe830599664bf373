//! Non-stream handle kinds
//!
//! Each kind is a `Copy` newtype over its [`HandleId`](uvio_core::HandleId)
//! plus an `impl Loop` block holding the kind's start/stop/close plumbing.
//! Streams (Tcp, Pipe, Tty) live in [`crate::stream`].

pub mod async_handle;
pub mod fs_event;
pub mod fs_poll;
pub mod phase;
pub mod poll;
pub mod process;
pub mod signal;
pub mod timer;
pub mod udp;

pub use async_handle::{Async, AsyncSender};
pub use fs_event::{FsEvent, FsEventKind};
pub use fs_poll::FsPoll;
pub use phase::{Check, Idle, Prepare};
pub use poll::{Poll, PollEvents};
pub use process::{Process, ProcessOptions, StdioSpec};
pub use signal::Signal;
pub use timer::Timer;
pub use udp::Udp;
