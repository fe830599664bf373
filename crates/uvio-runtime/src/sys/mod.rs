//! Thin wrappers over raw descriptor syscalls

pub(crate) mod signal;
pub(crate) mod socket;

use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

use uvio_core::ErrorCode;

/// Convert a `-1`-on-error return into `io::Result`
#[inline]
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Same as [`cvt`] for `ssize_t` returns
#[inline]
pub(crate) fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

pub(crate) fn set_nonblocking(fd: RawFd, on: bool) -> io::Result<()> {
    // SAFETY: fcntl on a caller-owned descriptor
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    let wanted = if on {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if wanted != flags {
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, wanted) })?;
    }
    Ok(())
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-owned descriptor
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    if flags & libc::FD_CLOEXEC == 0 {
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    }
    Ok(())
}

/// Anonymous pipe as `(read end, write end)`, both close-on-exec.
pub(crate) fn pipe(nonblocking: bool) -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds has room for the two descriptors pipe(2) writes
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: pipe(2) succeeded, both descriptors are fresh and ours
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [fds[0], fds[1]] {
        set_cloexec(fd)?;
        if nonblocking {
            set_nonblocking(fd, true)?;
        }
    }
    Ok((read, write))
}

/// Duplicate a descriptor the caller does not own
pub(crate) fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    // SAFETY: F_DUPFD_CLOEXEC returns a new descriptor or -1
    let new = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })?;
    // SAFETY: fresh descriptor from the kernel
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

/// Write all of `data` to a descriptor we do not own, retrying on EINTR/EAGAIN.
pub(crate) fn write_all_fd(fd: RawFd, mut data: &[u8]) -> Result<(), ErrorCode> {
    while !data.is_empty() {
        // SAFETY: data is a valid readable slice for its length
        let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => {
                    wait_writable(fd);
                    continue;
                }
                _ => return Err(ErrorCode::from_io(&err)),
            }
        }
        data = &data[n as usize..];
    }
    Ok(())
}

fn wait_writable(fd: RawFd) {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    // SAFETY: single valid pollfd
    unsafe {
        libc::poll(&mut pfd, 1, -1);
    }
}

/// Thread-local errno pointer, for code that must preserve errno
/// (the signal handler).
pub(crate) fn errno_location() -> *mut libc::c_int {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            unsafe { libc::__errno_location() }
        } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
            unsafe { libc::__error() }
        } else {
            unsafe { libc::__errno() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_pipe_nonblocking_empty_read() {
        let (r, _w) = pipe(true).unwrap();
        let mut byte = 0u8;
        let n = unsafe { libc::read(r.as_raw_fd(), (&mut byte as *mut u8).cast(), 1) };
        assert_eq!(n, -1);
        assert_eq!(io::Error::last_os_error().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_write_all_fd() {
        let (r, w) = pipe(false).unwrap();
        write_all_fd(w.as_raw_fd(), b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = unsafe { libc::read(r.as_raw_fd(), buf.as_mut_ptr().cast(), 4) };
        assert_eq!(n, 4);
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_dup_bad_fd() {
        assert!(dup(-1).is_err());
    }
}
