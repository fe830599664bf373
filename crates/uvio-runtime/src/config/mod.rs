//! Loop configuration
//!
//! Compile-time defaults with environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use uvio_runtime::config::LoopConfig;
//!
//! let config = LoopConfig::from_env().threadpool_size(8);
//! let lp = Loop::with_config(config)?;
//! ```

pub mod defaults;

use std::fmt;
use std::time::Duration;

use uvio_core::env::{env_get, EnvSource, ProcessEnv};

/// Readiness backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerKind {
    /// Best backend for the platform (epoll on Linux, poll(2) elsewhere)
    Auto,
    /// Portable poll(2) backend, available everywhere
    Poll,
}

impl PollerKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "epoll" => Some(PollerKind::Auto),
            "poll" => Some(PollerKind::Poll),
            _ => None,
        }
    }
}

/// Event loop configuration with builder methods.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Worker threads for filesystem and resolver requests
    pub threadpool_size: usize,
    /// Bounded work queue depth
    pub pool_queue_depth: usize,
    /// Readiness events fetched per poll call
    pub events_capacity: usize,
    /// Suggested size handed to buffer providers
    pub read_size: usize,
    /// Idle worker park timeout
    pub worker_park: Duration,
    /// Reads per readiness event before moving on
    pub reads_per_event: usize,
    /// Readiness backend
    pub poller: PollerKind,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoopConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `UVIO_THREADPOOL_SIZE` - Worker threads
    /// - `UVIO_POOL_QUEUE_DEPTH` - Pending work before backlog spill
    /// - `UVIO_EVENTS_CAPACITY` - Events per poll call
    /// - `UVIO_READ_SIZE` - Suggested read size in bytes
    /// - `UVIO_WORKER_PARK_US` - Idle worker park timeout
    /// - `UVIO_POLLER` - `auto` or `poll`
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    /// Defaults with overrides read from `env`
    pub fn from_source<E: EnvSource + ?Sized>(env: &E) -> Self {
        Self {
            threadpool_size: env_get(env, "UVIO_THREADPOOL_SIZE", defaults::THREADPOOL_SIZE),
            pool_queue_depth: env_get(env, "UVIO_POOL_QUEUE_DEPTH", defaults::POOL_QUEUE_DEPTH),
            events_capacity: env_get(env, "UVIO_EVENTS_CAPACITY", defaults::EVENTS_CAPACITY),
            read_size: env_get(env, "UVIO_READ_SIZE", defaults::READ_SIZE),
            worker_park: Duration::from_micros(env_get(
                env,
                "UVIO_WORKER_PARK_US",
                defaults::WORKER_PARK_US,
            )),
            reads_per_event: defaults::READS_PER_EVENT,
            poller: env
                .var("UVIO_POLLER")
                .and_then(|v| PollerKind::parse(&v))
                .unwrap_or(PollerKind::Auto),
        }
    }

    /// Library defaults only (no env override)
    pub fn new() -> Self {
        Self {
            threadpool_size: defaults::THREADPOOL_SIZE,
            pool_queue_depth: defaults::POOL_QUEUE_DEPTH,
            events_capacity: defaults::EVENTS_CAPACITY,
            read_size: defaults::READ_SIZE,
            worker_park: Duration::from_micros(defaults::WORKER_PARK_US),
            reads_per_event: defaults::READS_PER_EVENT,
            poller: PollerKind::Auto,
        }
    }

    // Builder methods

    pub fn threadpool_size(mut self, n: usize) -> Self {
        self.threadpool_size = n;
        self
    }

    pub fn pool_queue_depth(mut self, n: usize) -> Self {
        self.pool_queue_depth = n;
        self
    }

    pub fn events_capacity(mut self, n: usize) -> Self {
        self.events_capacity = n;
        self
    }

    pub fn read_size(mut self, n: usize) -> Self {
        self.read_size = n;
        self
    }

    pub fn worker_park(mut self, d: Duration) -> Self {
        self.worker_park = d;
        self
    }

    pub fn reads_per_event(mut self, n: usize) -> Self {
        self.reads_per_event = n;
        self
    }

    pub fn poller(mut self, kind: PollerKind) -> Self {
        self.poller = kind;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threadpool_size == 0 {
            return Err(ConfigError::InvalidValue("threadpool_size must be > 0"));
        }
        if self.threadpool_size > defaults::MAX_THREADPOOL_SIZE {
            return Err(ConfigError::InvalidValue("threadpool_size must be <= 128"));
        }
        if self.pool_queue_depth == 0 {
            return Err(ConfigError::InvalidValue("pool_queue_depth must be > 0"));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::InvalidValue("events_capacity must be > 0"));
        }
        if self.read_size == 0 {
            return Err(ConfigError::InvalidValue("read_size must be > 0"));
        }
        if self.reads_per_event == 0 {
            return Err(ConfigError::InvalidValue("reads_per_event must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        uvio_core::log_println!("uvio loop configuration:");
        uvio_core::log_println!("  threadpool_size:  {}", self.threadpool_size);
        uvio_core::log_println!("  pool_queue_depth: {}", self.pool_queue_depth);
        uvio_core::log_println!("  events_capacity:  {}", self.events_capacity);
        uvio_core::log_println!("  read_size:        {} bytes", self.read_size);
        uvio_core::log_println!("  worker_park:      {:?}", self.worker_park);
        uvio_core::log_println!("  reads_per_event:  {}", self.reads_per_event);
        uvio_core::log_println!("  poller:           {:?}", self.poller);
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoopConfig::new();
        assert_eq!(config.threadpool_size, defaults::THREADPOOL_SIZE);
        assert_eq!(config.read_size, defaults::READ_SIZE);
        assert_eq!(config.poller, PollerKind::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: &[(&str, &str)] = &[
            ("UVIO_THREADPOOL_SIZE", "2"),
            ("UVIO_READ_SIZE", "4096"),
            ("UVIO_POLLER", "poll"),
            ("UVIO_EVENTS_CAPACITY", "not-a-number"),
        ];
        let config = LoopConfig::from_source(env);
        assert_eq!(config.threadpool_size, 2);
        assert_eq!(config.read_size, 4096);
        assert_eq!(config.poller, PollerKind::Poll);
        assert_eq!(config.events_capacity, defaults::EVENTS_CAPACITY);
    }

    #[test]
    fn test_builder() {
        let config = LoopConfig::new()
            .threadpool_size(8)
            .read_size(1024)
            .worker_park(Duration::from_micros(50));
        assert_eq!(config.threadpool_size, 8);
        assert_eq!(config.read_size, 1024);
        assert_eq!(config.worker_park, Duration::from_micros(50));
    }

    #[test]
    fn test_validation() {
        assert!(LoopConfig::new().threadpool_size(0).validate().is_err());
        assert!(LoopConfig::new().threadpool_size(500).validate().is_err());
        assert!(LoopConfig::new().read_size(0).validate().is_err());
        assert_eq!(
            LoopConfig::new().events_capacity(0).validate(),
            Err(ConfigError::InvalidValue("events_capacity must be > 0"))
        );
    }
}
