//! Handle, request and filesystem operation kinds

use core::fmt;

use crate::error::UvError;

/// Kind tag of a handle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Async = 1,
    Check = 2,
    FsEvent = 3,
    FsPoll = 4,
    Idle = 6,
    Pipe = 7,
    Poll = 8,
    Prepare = 9,
    Process = 10,
    Tcp = 12,
    Timer = 13,
    Tty = 14,
    Udp = 15,
    Signal = 16,
}

impl HandleKind {
    /// Lowercase name, as used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Async => "async",
            HandleKind::Check => "check",
            HandleKind::FsEvent => "fs_event",
            HandleKind::FsPoll => "fs_poll",
            HandleKind::Idle => "idle",
            HandleKind::Pipe => "pipe",
            HandleKind::Poll => "poll",
            HandleKind::Prepare => "prepare",
            HandleKind::Process => "process",
            HandleKind::Tcp => "tcp",
            HandleKind::Timer => "timer",
            HandleKind::Tty => "tty",
            HandleKind::Udp => "udp",
            HandleKind::Signal => "signal",
        }
    }

    /// Tcp, Pipe and Tty share the stream machinery
    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, HandleKind::Tcp | HandleKind::Pipe | HandleKind::Tty)
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filesystem operation kind.
///
/// Discriminants follow libuv's `uv_fs_type` so hosts passing raw op codes
/// can use [`FsType::from_code`].
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsType {
    Open = 1,
    Close = 2,
    Read = 3,
    Write = 4,
    Sendfile = 5,
    Stat = 6,
    Lstat = 7,
    Fstat = 8,
    Ftruncate = 9,
    Utime = 10,
    Futime = 11,
    Chmod = 13,
    Fchmod = 14,
    Fsync = 15,
    Fdatasync = 16,
    Unlink = 17,
    Rmdir = 18,
    Mkdir = 19,
    Rename = 21,
    Scandir = 22,
    Link = 23,
    Symlink = 24,
    Readlink = 25,
    Chown = 26,
    Fchown = 27,
}

impl FsType {
    /// Resolve a libuv `UV_FS_*` code.
    ///
    /// Codes libuv defines but this loop has no completion mapping for
    /// (access, mkdtemp, realpath, copyfile, ...) are rejected with
    /// `UnsupportedOperation`, as are unknown codes.
    pub fn from_code(code: i32) -> Result<FsType, UvError> {
        let kind = match code {
            1 => FsType::Open,
            2 => FsType::Close,
            3 => FsType::Read,
            4 => FsType::Write,
            5 => FsType::Sendfile,
            6 => FsType::Stat,
            7 => FsType::Lstat,
            8 => FsType::Fstat,
            9 => FsType::Ftruncate,
            10 => FsType::Utime,
            11 => FsType::Futime,
            13 => FsType::Chmod,
            14 => FsType::Fchmod,
            15 => FsType::Fsync,
            16 => FsType::Fdatasync,
            17 => FsType::Unlink,
            18 => FsType::Rmdir,
            19 => FsType::Mkdir,
            21 => FsType::Rename,
            22 => FsType::Scandir,
            23 => FsType::Link,
            24 => FsType::Symlink,
            25 => FsType::Readlink,
            26 => FsType::Chown,
            27 => FsType::Fchown,
            12 => return Err(UvError::UnsupportedOperation("fs access")),
            20 => return Err(UvError::UnsupportedOperation("fs mkdtemp")),
            28 => return Err(UvError::UnsupportedOperation("fs realpath")),
            29 => return Err(UvError::UnsupportedOperation("fs copyfile")),
            30..=36 => return Err(UvError::UnsupportedOperation("fs operation")),
            _ => return Err(UvError::UnsupportedOperation("unknown fs type")),
        };
        Ok(kind)
    }

    /// libuv `UV_FS_*` code
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            FsType::Open => "open",
            FsType::Close => "close",
            FsType::Read => "read",
            FsType::Write => "write",
            FsType::Sendfile => "sendfile",
            FsType::Stat => "stat",
            FsType::Lstat => "lstat",
            FsType::Fstat => "fstat",
            FsType::Ftruncate => "ftruncate",
            FsType::Utime => "utime",
            FsType::Futime => "futime",
            FsType::Chmod => "chmod",
            FsType::Fchmod => "fchmod",
            FsType::Fsync => "fsync",
            FsType::Fdatasync => "fdatasync",
            FsType::Unlink => "unlink",
            FsType::Rmdir => "rmdir",
            FsType::Mkdir => "mkdir",
            FsType::Rename => "rename",
            FsType::Scandir => "scandir",
            FsType::Link => "link",
            FsType::Symlink => "symlink",
            FsType::Readlink => "readlink",
            FsType::Chown => "chown",
            FsType::Fchown => "fchown",
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind tag of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Fs(FsType),
    Write,
    Shutdown,
    Connect,
    UdpSend,
    GetAddrinfo,
    /// Internal stat issued by a polling file watcher
    FsPollStat,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Fs(t) => write!(f, "fs:{}", t),
            RequestKind::Write => f.write_str("write"),
            RequestKind::Shutdown => f.write_str("shutdown"),
            RequestKind::Connect => f.write_str("connect"),
            RequestKind::UdpSend => f.write_str("udp_send"),
            RequestKind::GetAddrinfo => f.write_str("getaddrinfo"),
            RequestKind::FsPollStat => f.write_str("fs_poll_stat"),
        }
    }
}
