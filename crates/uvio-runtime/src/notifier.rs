//! Cross-thread loop wakeup.
//!
//! Worker threads and `AsyncSender`s call [`Notifier::notify`]; the loop
//! registers [`Notifier::fd`] for readability and calls [`Notifier::drain`]
//! when it fires. Notifications coalesce: many `notify()` calls before a
//! drain produce one wakeup.
//!
//! Linux uses an eventfd; other platforms a non-blocking self-pipe.

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use uvio_core::ErrorCode;

pub struct Notifier {
    read: OwnedFd,
    /// Separate write end (self-pipe); `None` for eventfd
    write: Option<OwnedFd>,
}

impl Notifier {
    pub fn new() -> io::Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                use std::os::unix::io::FromRawFd;
                // SAFETY: plain eventfd(2)
                let fd = crate::sys::cvt(unsafe {
                    libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC)
                })?;
                Ok(Notifier {
                    // SAFETY: fresh descriptor from the kernel
                    read: unsafe { OwnedFd::from_raw_fd(fd) },
                    write: None,
                })
            } else {
                let (read, write) = crate::sys::pipe(true)?;
                Ok(Notifier { read, write: Some(write) })
            }
        }
    }

    /// Descriptor to poll for readability
    pub fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Wake the loop. Safe to call from any thread.
    pub fn notify(&self) -> Result<(), ErrorCode> {
        let val: u64 = 1;
        let fd = self.write.as_ref().unwrap_or(&self.read).as_raw_fd();
        let len = if self.write.is_some() {
            1
        } else {
            std::mem::size_of::<u64>()
        };
        // SAFETY: val outlives the call and len <= size_of::<u64>()
        let ret = unsafe { libc::write(fd, (&val as *const u64).cast(), len) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated or pipe full: a wakeup is already pending
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(ErrorCode::from_io(&err));
        }
        Ok(())
    }

    /// Consume pending wakeups
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: buf is valid for its length (>= 8 for eventfd)
            let n = unsafe { libc::read(self.read.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            // eventfd returns the whole counter in one read
            if n <= 0 || self.write.is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn readable(fd: RawFd, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        unsafe { libc::poll(&mut pfd, 1, timeout_ms) == 1 }
    }

    #[test]
    fn test_notify_coalesces() {
        let n = Notifier::new().unwrap();
        assert!(!readable(n.fd(), 0));
        n.notify().unwrap();
        n.notify().unwrap();
        assert!(readable(n.fd(), 0));
        n.drain();
        assert!(!readable(n.fd(), 0));
    }

    #[test]
    fn test_notify_from_thread() {
        let n = Arc::new(Notifier::new().unwrap());
        let n2 = Arc::clone(&n);
        thread::spawn(move || n2.notify().unwrap()).join().unwrap();
        assert!(readable(n.fd(), 1000));
    }
}
