//! Readiness polling
//!
//! The loop registers every descriptor-backed handle with a [`Poller`] under
//! a 64-bit token and blocks in [`Poller::wait`] during the poll phase.
//! Registrations are level-triggered: a descriptor keeps reporting ready
//! until it is drained or its interest is dropped.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::config::PollerKind;

/// Readiness interest bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(2);
    pub const BOTH: Interest = Interest(3);

    #[inline]
    pub const fn is_readable(self) -> bool {
        self.0 & 1 != 0
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & 2 != 0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// `self` plus `other` when `cond` holds
    #[inline]
    pub const fn add_if(self, cond: bool, other: Interest) -> Interest {
        if cond {
            Interest(self.0 | other.0)
        } else {
            self
        }
    }
}

/// One readiness report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up (POLLHUP / EPOLLHUP / EPOLLRDHUP)
    pub hangup: bool,
    /// Error condition pending on the descriptor
    pub error: bool,
}

/// Readiness multiplexer
///
/// # Contract
///
/// - `register` fails with `EEXIST` for a descriptor already registered;
///   `reregister` and `deregister` fail with `ENOENT` for unknown ones.
/// - `wait` appends at most its capacity of events to `events` and returns
///   the number appended. `None` blocks until an event arrives; an
///   interrupted wait returns `Ok(0)`.
pub trait Poller {
    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;

    fn reregister(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;

    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    fn wait(&mut self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}

/// Round a timeout up to whole milliseconds (-1 = infinite)
pub(crate) fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_nanos().div_ceil(1_000_000);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

mod poll_fallback;
pub use poll_fallback::PollPoller;

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll_linux;
        pub use epoll_linux::EpollPoller as PlatformPoller;
    } else {
        pub use poll_fallback::PollPoller as PlatformPoller;
    }
}

/// Create the poller selected by `kind`
pub fn new_poller(kind: PollerKind, capacity: usize) -> io::Result<Box<dyn Poller>> {
    match kind {
        PollerKind::Auto => Ok(Box::new(PlatformPoller::new(capacity)?)),
        PollerKind::Poll => Ok(Box::new(PollPoller::new(capacity)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    fn exercise(mut poller: Box<dyn Poller>) {
        let (r, w) = crate::sys::pipe(true).unwrap();
        poller.register(r.as_raw_fd(), 7, Interest::READABLE).unwrap();

        let mut events = Vec::new();
        let n = poller.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(n, 0, "{}: empty pipe reported ready", poller.name());

        crate::sys::write_all_fd(w.as_raw_fd(), b"x").unwrap();
        let n = poller.wait(&mut events, Some(Duration::from_millis(500))).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].token, 7);
        assert!(events[0].readable);

        poller.reregister(r.as_raw_fd(), 7, Interest::NONE).unwrap();
        events.clear();
        let n = poller.wait(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(n, 0);

        poller.deregister(r.as_raw_fd()).unwrap();
        assert!(poller.deregister(r.as_raw_fd()).is_err());
    }

    #[test]
    fn test_platform_poller() {
        exercise(new_poller(PollerKind::Auto, 64).unwrap());
    }

    #[test]
    fn test_poll_fallback() {
        exercise(new_poller(PollerKind::Poll, 64).unwrap());
    }

    #[test]
    fn test_timeout_rounding() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(15))), 15);
    }
}
