//! poll(2) backend
//!
//! Portable fallback: rebuilds the pollfd array on every wait, so it is
//! O(registered descriptors) per iteration.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_ms, Interest, PollEvent, Poller};

struct Registration {
    fd: RawFd,
    token: u64,
    interest: Interest,
}

pub struct PollPoller {
    regs: Vec<Registration>,
    pollfds: Vec<libc::pollfd>,
    capacity: usize,
}

impl PollPoller {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(PollPoller {
            regs: Vec::new(),
            pollfds: Vec::new(),
            capacity: capacity.max(1),
        })
    }

    fn find(&self, fd: RawFd) -> Option<usize> {
        self.regs.iter().position(|r| r.fd == fd)
    }
}

impl Poller for PollPoller {
    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        if self.find(fd).is_some() {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        self.regs.push(Registration { fd, token, interest });
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let idx = self
            .find(fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.regs[idx].token = token;
        self.regs[idx].interest = interest;
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let idx = self
            .find(fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.regs.swap_remove(idx);
        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> io::Result<usize> {
        self.pollfds.clear();
        for reg in &self.regs {
            if reg.interest.is_none() {
                continue;
            }
            let mut mask = 0;
            if reg.interest.is_readable() {
                mask |= libc::POLLIN;
            }
            if reg.interest.is_writable() {
                mask |= libc::POLLOUT;
            }
            self.pollfds.push(libc::pollfd {
                fd: reg.fd,
                events: mask,
                revents: 0,
            });
        }

        // SAFETY: pollfds holds `len` initialized entries
        let n = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let mut count = 0;
        for pfd in &self.pollfds {
            if pfd.revents == 0 || count >= self.capacity {
                continue;
            }
            let Some(reg) = self.regs.iter().find(|r| r.fd == pfd.fd) else {
                continue;
            };
            events.push(PollEvent {
                token: reg.token,
                readable: pfd.revents & libc::POLLIN != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                hangup: pfd.revents & libc::POLLHUP != 0,
                error: pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            });
            count += 1;
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
