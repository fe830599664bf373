//! Error types for the uvio event loop
//!
//! Two layers:
//! - [`ErrorCode`] is the negative integer code delivered to callbacks.
//!   OS errors are passed through verbatim as `-errno`; end-of-stream and
//!   resolver failures use libuv's numbering.
//! - [`UvError`] is returned synchronously by construction and arming calls.

use core::fmt;
use std::io;

/// Result type for loop operations
pub type UvResult<T> = Result<T, UvError>;

/// Negative status code as delivered to completion callbacks.
///
/// Never positive: constructors normalize an errno into `-errno`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// End of stream. Distinct from every errno value.
    pub const EOF: ErrorCode = ErrorCode(-4095);

    pub const EAGAIN: ErrorCode = ErrorCode(-libc::EAGAIN);
    pub const EALREADY: ErrorCode = ErrorCode(-libc::EALREADY);
    pub const EBADF: ErrorCode = ErrorCode(-libc::EBADF);
    pub const EBUSY: ErrorCode = ErrorCode(-libc::EBUSY);
    pub const ECANCELED: ErrorCode = ErrorCode(-libc::ECANCELED);
    pub const EEXIST: ErrorCode = ErrorCode(-libc::EEXIST);
    pub const EINVAL: ErrorCode = ErrorCode(-libc::EINVAL);
    pub const EIO: ErrorCode = ErrorCode(-libc::EIO);
    pub const ENOBUFS: ErrorCode = ErrorCode(-libc::ENOBUFS);
    pub const ENOENT: ErrorCode = ErrorCode(-libc::ENOENT);
    pub const ENOMEM: ErrorCode = ErrorCode(-libc::ENOMEM);
    pub const ENOSYS: ErrorCode = ErrorCode(-libc::ENOSYS);
    pub const ENOTCONN: ErrorCode = ErrorCode(-libc::ENOTCONN);
    pub const ENOTSUP: ErrorCode = ErrorCode(-libc::ENOTSUP);
    pub const EPIPE: ErrorCode = ErrorCode(-libc::EPIPE);

    // Resolver failures (getaddrinfo), libuv numbering
    pub const EAI_ADDRFAMILY: ErrorCode = ErrorCode(-3000);
    pub const EAI_AGAIN: ErrorCode = ErrorCode(-3001);
    pub const EAI_BADFLAGS: ErrorCode = ErrorCode(-3002);
    pub const EAI_CANCELED: ErrorCode = ErrorCode(-3003);
    pub const EAI_FAIL: ErrorCode = ErrorCode(-3004);
    pub const EAI_FAMILY: ErrorCode = ErrorCode(-3005);
    pub const EAI_MEMORY: ErrorCode = ErrorCode(-3006);
    pub const EAI_NODATA: ErrorCode = ErrorCode(-3007);
    pub const EAI_NONAME: ErrorCode = ErrorCode(-3008);
    pub const EAI_OVERFLOW: ErrorCode = ErrorCode(-3009);
    pub const EAI_SERVICE: ErrorCode = ErrorCode(-3010);
    pub const EAI_SOCKTYPE: ErrorCode = ErrorCode(-3011);

    /// Build from a raw status; positive values are treated as errno.
    #[inline]
    pub const fn from_raw(code: i32) -> Self {
        if code > 0 {
            ErrorCode(-code)
        } else {
            ErrorCode(code)
        }
    }

    /// Build from a positive errno value
    #[inline]
    pub const fn from_errno(errno: i32) -> Self {
        Self::from_raw(errno)
    }

    /// Capture the calling thread's errno
    pub fn last_os_error() -> Self {
        Self::from_io(&io::Error::last_os_error())
    }

    /// Map an `io::Error`, preferring its raw OS code
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(errno) = err.raw_os_error() {
            return Self::from_errno(errno);
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EOF,
            io::ErrorKind::WouldBlock => Self::EAGAIN,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Self::EINVAL,
            io::ErrorKind::NotFound => Self::ENOENT,
            io::ErrorKind::AlreadyExists => Self::EEXIST,
            io::ErrorKind::BrokenPipe => Self::EPIPE,
            io::ErrorKind::NotConnected => Self::ENOTCONN,
            io::ErrorKind::OutOfMemory => Self::ENOMEM,
            io::ErrorKind::Unsupported => Self::ENOSYS,
            _ => Self::EIO,
        }
    }

    /// Raw negative value
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Check for the end-of-stream sentinel
    #[inline]
    pub const fn is_eof(self) -> bool {
        self.0 == Self::EOF.0
    }

    /// Check for a resolver (getaddrinfo) failure
    #[inline]
    pub const fn is_resolver(self) -> bool {
        self.0 <= -3000 && self.0 >= -3014
    }

    /// Symbolic name, e.g. `"EEXIST"`
    pub fn name(self) -> &'static str {
        if self.is_eof() {
            return "EOF";
        }
        match self.0 {
            -3000 => return "EAI_ADDRFAMILY",
            -3001 => return "EAI_AGAIN",
            -3002 => return "EAI_BADFLAGS",
            -3003 => return "EAI_CANCELED",
            -3004 => return "EAI_FAIL",
            -3005 => return "EAI_FAMILY",
            -3006 => return "EAI_MEMORY",
            -3007 => return "EAI_NODATA",
            -3008 => return "EAI_NONAME",
            -3009 => return "EAI_OVERFLOW",
            -3010 => return "EAI_SERVICE",
            -3011 => return "EAI_SOCKTYPE",
            _ => {}
        }
        match -self.0 {
            libc::EACCES => "EACCES",
            libc::EADDRINUSE => "EADDRINUSE",
            libc::EAGAIN => "EAGAIN",
            libc::EALREADY => "EALREADY",
            libc::EBADF => "EBADF",
            libc::EBUSY => "EBUSY",
            libc::ECANCELED => "ECANCELED",
            libc::ECONNREFUSED => "ECONNREFUSED",
            libc::ECONNRESET => "ECONNRESET",
            libc::EEXIST => "EEXIST",
            libc::EINVAL => "EINVAL",
            libc::EIO => "EIO",
            libc::EISDIR => "EISDIR",
            libc::ENOBUFS => "ENOBUFS",
            libc::ENOENT => "ENOENT",
            libc::ENOMEM => "ENOMEM",
            libc::ENOSYS => "ENOSYS",
            libc::ENOTCONN => "ENOTCONN",
            libc::ENOTDIR => "ENOTDIR",
            libc::ENOTEMPTY => "ENOTEMPTY",
            libc::ENOTSUP => "ENOTSUP",
            libc::EPERM => "EPERM",
            libc::EPIPE => "EPIPE",
            libc::ETIMEDOUT => "ETIMEDOUT",
            _ => "UNKNOWN",
        }
    }

    /// Human-readable message
    pub fn message(self) -> String {
        if self.is_eof() {
            return "end of file".to_string();
        }
        if self.is_resolver() {
            let text = match self.0 {
                -3000 => "address family not supported",
                -3001 => "temporary failure",
                -3002 => "bad ai_flags value",
                -3003 => "request canceled",
                -3004 => "permanent failure",
                -3005 => "ai_family not supported",
                -3006 => "out of memory",
                -3007 => "no address",
                -3008 => "unknown node or service",
                -3009 => "argument buffer overflow",
                -3010 => "service not available for socket type",
                -3011 => "socket type not supported",
                _ => "resolver failure",
            };
            return text.to_string();
        }
        io::Error::from_raw_os_error(-self.0).to_string()
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({}, {})", self.0, self.name())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl std::error::Error for ErrorCode {}

impl From<io::Error> for ErrorCode {
    fn from(err: io::Error) -> Self {
        ErrorCode::from_io(&err)
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Errors returned synchronously by loop, handle and request calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UvError {
    /// Loop or OS context could not be created
    InitFailed(ErrorCode),

    /// Handle id is stale, or the handle is closing or closed
    HandleClosed,

    /// Duplicate read or start registration
    AlreadyActive,

    /// OS failure, code passed through verbatim
    Os(ErrorCode),

    /// Operation kind with no implementation on this build
    UnsupportedOperation(&'static str),
}

impl UvError {
    /// Negative status code equivalent, for hosts that want a single integer
    pub fn code(&self) -> ErrorCode {
        match self {
            UvError::InitFailed(code) | UvError::Os(code) => *code,
            UvError::HandleClosed => ErrorCode::EBADF,
            UvError::AlreadyActive => ErrorCode::EALREADY,
            UvError::UnsupportedOperation(_) => ErrorCode::ENOTSUP,
        }
    }
}

impl fmt::Display for UvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UvError::InitFailed(code) => write!(f, "initialization failed: {}", code),
            UvError::HandleClosed => write!(f, "handle closed"),
            UvError::AlreadyActive => write!(f, "already active"),
            UvError::Os(code) => write!(f, "os error: {}", code),
            UvError::UnsupportedOperation(what) => write!(f, "unsupported operation: {}", what),
        }
    }
}

impl std::error::Error for UvError {}

impl From<ErrorCode> for UvError {
    fn from(code: ErrorCode) -> Self {
        UvError::Os(code)
    }
}

impl From<io::Error> for UvError {
    fn from(err: io::Error) -> Self {
        UvError::Os(ErrorCode::from_io(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_normalized_negative() {
        assert_eq!(ErrorCode::from_errno(libc::EEXIST).raw(), -libc::EEXIST);
        assert_eq!(ErrorCode::from_raw(-libc::EEXIST), ErrorCode::EEXIST);
    }

    #[test]
    fn test_eof_distinct() {
        assert!(ErrorCode::EOF.is_eof());
        assert!(!ErrorCode::EAGAIN.is_eof());
        assert_eq!(ErrorCode::EOF.raw(), -4095);
        assert_eq!(ErrorCode::EOF.name(), "EOF");
    }

    #[test]
    fn test_from_io() {
        let err = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::ENOENT);

        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::EOF);
    }

    #[test]
    fn test_names() {
        assert_eq!(ErrorCode::EEXIST.name(), "EEXIST");
        assert_eq!(ErrorCode::EAI_NONAME.name(), "EAI_NONAME");
        assert!(ErrorCode::EAI_NONAME.is_resolver());
        assert!(!ErrorCode::EEXIST.is_resolver());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", UvError::HandleClosed), "handle closed");
        assert_eq!(format!("{}", UvError::AlreadyActive), "already active");
        assert!(format!("{}", UvError::Os(ErrorCode::EEXIST)).starts_with("os error: EEXIST"));
        assert_eq!(
            format!("{}", UvError::UnsupportedOperation("fs event")),
            "unsupported operation: fs event"
        );
    }

    #[test]
    fn test_uv_error_code() {
        assert_eq!(UvError::Os(ErrorCode::EPIPE).code(), ErrorCode::EPIPE);
        assert_eq!(UvError::HandleClosed.code(), ErrorCode::EBADF);
    }
}
