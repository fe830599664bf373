//! Socket setup the standard library does not expose: non-blocking connect,
//! bind and listen as separate steps, explicit listen backlogs.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::sys::socket::{SockaddrLike, SockaddrStorage, UnixAddr};

use super::{cvt, set_cloexec, set_nonblocking};

fn new_socket(domain: libc::c_int, ty: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call
    let fd = cvt(unsafe { libc::socket(domain, ty, 0) })?;
    // SAFETY: fresh descriptor from the kernel
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    set_cloexec(fd)?;
    set_nonblocking(fd, true)?;
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        let one: libc::c_int = 1;
        // SAFETY: option value points at a live c_int
        cvt(unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_NOSIGPIPE,
                (&one as *const libc::c_int).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;
    }
    Ok(owned)
}

fn domain_of(addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}

fn bind_raw(fd: RawFd, addr: &dyn SockaddrLike) -> io::Result<()> {
    // SAFETY: addr provides a valid sockaddr pointer and length
    cvt(unsafe { libc::bind(fd, addr.as_ptr(), addr.len()) }).map(|_| ())
}

/// Bound, non-blocking TCP socket; call [`listen`] to accept on it
pub(crate) fn tcp_bind(addr: SocketAddr) -> io::Result<OwnedFd> {
    let sock = new_socket(domain_of(&addr), libc::SOCK_STREAM)?;
    let one: libc::c_int = 1;
    // SAFETY: option value points at a live c_int
    cvt(unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&one as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })?;
    bind_raw(sock.as_raw_fd(), &SockaddrStorage::from(addr))?;
    Ok(sock)
}

/// Start accepting on a bound socket
pub(crate) fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    // SAFETY: plain listen(2) on an owned socket
    cvt(unsafe { libc::listen(fd, backlog) }).map(|_| ())
}

/// Outcome of starting a non-blocking connect
pub(crate) enum ConnectStart {
    /// Connected immediately (common for loopback)
    Done(OwnedFd),
    /// Wait for writability, then check [`take_error`]
    InProgress(OwnedFd),
}

pub(crate) fn tcp_connect(addr: SocketAddr) -> io::Result<ConnectStart> {
    connect_fd(new_socket(domain_of(&addr), libc::SOCK_STREAM)?, addr)
}

/// Connect an existing (possibly bound) socket
pub(crate) fn connect_fd(sock: OwnedFd, addr: SocketAddr) -> io::Result<ConnectStart> {
    let sa = SockaddrStorage::from(addr);
    // SAFETY: sa provides a valid sockaddr pointer and length
    let ret = unsafe { libc::connect(sock.as_raw_fd(), sa.as_ptr(), sa.len()) };
    if ret == 0 {
        return Ok(ConnectStart::Done(sock));
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EINTR) => Ok(ConnectStart::InProgress(sock)),
        _ => Err(err),
    }
}

/// Pending socket error (SO_ERROR), cleared by the read
pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value/len describe a live c_int
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    })?;
    Ok(if value == 0 {
        None
    } else {
        Some(io::Error::from_raw_os_error(value))
    })
}

/// Bound, non-blocking Unix-domain socket
pub(crate) fn unix_bind(path: &Path) -> io::Result<OwnedFd> {
    let sock = new_socket(libc::AF_UNIX, libc::SOCK_STREAM)?;
    let addr = UnixAddr::new(path).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    bind_raw(sock.as_raw_fd(), &addr)?;
    Ok(sock)
}

/// Whether `fd` refers to a socket
pub(crate) fn is_socket(fd: RawFd) -> io::Result<bool> {
    // SAFETY: zeroed stat is a valid out-parameter
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: st is a live, writable stat
    cvt(unsafe { libc::fstat(fd, &mut st) })?;
    Ok(st.st_mode & libc::S_IFMT == libc::S_IFSOCK)
}

pub(crate) fn set_nodelay(fd: RawFd, on: bool) -> io::Result<()> {
    let value: libc::c_int = on as libc::c_int;
    // SAFETY: option value points at a live c_int
    cvt(unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(|_| ())
}
