//! # uvio-core
//!
//! Core types for the uvio event loop.
//!
//! This crate is platform-agnostic apart from raw descriptor types and errno
//! values. Pollers, sockets, signals and the loop itself live in
//! `uvio-runtime`.
//!
//! ## Modules
//!
//! - `id` - Generation-checked handle and request identifiers
//! - `slot` - Slot table backing the handle and request registries
//! - `error` - `ErrorCode` (negative OS codes) and `UvError`
//! - `buffer` - Owned byte buffers and the allocation seam
//! - `kind` - Handle, request and filesystem operation kinds
//! - `host` - Descriptor bridge for embedding hosts
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod slot;
pub mod error;
pub mod buffer;
pub mod kind;
pub mod host;
pub mod log;
pub mod env;

// Re-exports for convenience
pub use id::{HandleId, RequestId, SlotId};
pub use slot::SlotTable;
pub use error::{ErrorCode, UvError, UvResult};
pub use buffer::{Buffer, BufferProvider, HeapBuffers};
pub use kind::{FsType, HandleKind, RequestKind};
pub use host::{DescriptorTable, HostBridge, ResourceToken};
pub use log::LogLevel;
pub use env::{env_get, env_get_bool, env_get_opt, EnvSource, ProcessEnv};
