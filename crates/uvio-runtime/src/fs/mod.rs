//! Filesystem requests
//!
//! Every operation is described by an [`FsOp`] and submitted through
//! [`dispatch`]. Without a callback it runs synchronously on the loop thread
//! and the outcome is returned; with one it runs on the worker pool and the
//! callback fires exactly once on the loop thread. Both paths register a
//! request so the loop's bookkeeping is identical.
//!
//! # Result mapping
//!
//! The raw syscall result (negative code on failure) is turned into an
//! [`FsOutcome`] by one match over the op kind. Opened descriptors are handed
//! to the loop's [`HostBridge`](uvio_core::HostBridge) while the request
//! is still registered; closed ones are removed from it.
//!
//! Partial writes are reported as the byte count written, not retried.

mod ops;

use std::fmt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use uvio_core::{
    log_error, Buffer, ErrorCode, FsType, RequestId, RequestKind, ResourceToken, UvError, UvResult,
};

use crate::event_loop::Loop;
use crate::pool::WorkOutput;
use crate::request::RequestData;

pub(crate) use ops::stat_path;

/// One filesystem operation with its arguments.
///
/// Offsets of -1 mean "current file position".
#[derive(Debug)]
pub enum FsOp {
    Open { path: PathBuf, flags: i32, mode: u32 },
    Close { fd: RawFd },
    Read { fd: RawFd, len: usize, offset: i64 },
    Write { fd: RawFd, buf: Buffer, offset: i64 },
    Sendfile { out_fd: RawFd, in_fd: RawFd, offset: i64, len: usize },
    Stat { path: PathBuf },
    Lstat { path: PathBuf },
    Fstat { fd: RawFd },
    Ftruncate { fd: RawFd, len: i64 },
    Utime { path: PathBuf, atime: f64, mtime: f64 },
    Futime { fd: RawFd, atime: f64, mtime: f64 },
    Chmod { path: PathBuf, mode: u32 },
    Fchmod { fd: RawFd, mode: u32 },
    Fsync { fd: RawFd },
    Fdatasync { fd: RawFd },
    Unlink { path: PathBuf },
    Rmdir { path: PathBuf },
    Mkdir { path: PathBuf, mode: u32 },
    Rename { from: PathBuf, to: PathBuf },
    Scandir { path: PathBuf },
    Link { from: PathBuf, to: PathBuf },
    Symlink { target: PathBuf, link: PathBuf },
    Readlink { path: PathBuf },
    Chown { path: PathBuf, uid: u32, gid: u32 },
    Fchown { fd: RawFd, uid: u32, gid: u32 },
}

impl FsOp {
    pub fn kind(&self) -> FsType {
        match self {
            FsOp::Open { .. } => FsType::Open,
            FsOp::Close { .. } => FsType::Close,
            FsOp::Read { .. } => FsType::Read,
            FsOp::Write { .. } => FsType::Write,
            FsOp::Sendfile { .. } => FsType::Sendfile,
            FsOp::Stat { .. } => FsType::Stat,
            FsOp::Lstat { .. } => FsType::Lstat,
            FsOp::Fstat { .. } => FsType::Fstat,
            FsOp::Ftruncate { .. } => FsType::Ftruncate,
            FsOp::Utime { .. } => FsType::Utime,
            FsOp::Futime { .. } => FsType::Futime,
            FsOp::Chmod { .. } => FsType::Chmod,
            FsOp::Fchmod { .. } => FsType::Fchmod,
            FsOp::Fsync { .. } => FsType::Fsync,
            FsOp::Fdatasync { .. } => FsType::Fdatasync,
            FsOp::Unlink { .. } => FsType::Unlink,
            FsOp::Rmdir { .. } => FsType::Rmdir,
            FsOp::Mkdir { .. } => FsType::Mkdir,
            FsOp::Rename { .. } => FsType::Rename,
            FsOp::Scandir { .. } => FsType::Scandir,
            FsOp::Link { .. } => FsType::Link,
            FsOp::Symlink { .. } => FsType::Symlink,
            FsOp::Readlink { .. } => FsType::Readlink,
            FsOp::Chown { .. } => FsType::Chown,
            FsOp::Fchown { .. } => FsType::Fchown,
        }
    }

    fn close_fd(&self) -> Option<RawFd> {
        match self {
            FsOp::Close { fd } => Some(*fd),
            _ => None,
        }
    }
}

/// Resolve a raw `UV_FS_*` code, logging codes with no mapping
pub fn kind_from_code(code: i32) -> UvResult<FsType> {
    FsType::from_code(code).inspect_err(|e| log_error!("fs op code {}: {}", code, e))
}

/// Timestamp with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

/// Result of stat/lstat/fstat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

impl FileStat {
    pub fn is_file(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }
}

/// Type of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    File,
    Dir,
    Link,
    Fifo,
    Socket,
    Char,
    Block,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryKind,
}

/// Directory listing from a scandir request: name-sorted, single pass
#[derive(Debug)]
pub struct ScandirIter {
    entries: std::vec::IntoIter<DirEntry>,
}

impl Iterator for ScandirIter {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for ScandirIter {}

/// Successful result of a filesystem request
#[derive(Debug)]
pub enum FsOutcome {
    /// Open: the descriptor and the host's token for it
    Opened { fd: RawFd, token: ResourceToken },
    Closed,
    /// Bytes read; length 0 at end of file
    Read(Buffer),
    Written(usize),
    Sent(usize),
    /// Operations with no payload
    Done,
    Entries(ScandirIter),
    Link(PathBuf),
    Stat(FileStat),
}

impl fmt::Display for FsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsOutcome::Opened { fd, .. } => write!(f, "opened fd {}", fd),
            FsOutcome::Closed => write!(f, "closed"),
            FsOutcome::Read(buf) => write!(f, "read {} bytes", buf.len()),
            FsOutcome::Written(n) => write!(f, "wrote {} bytes", n),
            FsOutcome::Sent(n) => write!(f, "sent {} bytes", n),
            FsOutcome::Done => write!(f, "done"),
            FsOutcome::Entries(it) => write!(f, "{} entries", it.len()),
            FsOutcome::Link(p) => write!(f, "link to {}", p.display()),
            FsOutcome::Stat(st) => write!(f, "stat ({} bytes)", st.size),
        }
    }
}

/// What the worker hands back: the raw result plus any payload
pub(crate) struct FsRaw {
    pub(crate) result: i64,
    pub(crate) payload: FsPayload,
}

pub(crate) enum FsPayload {
    None,
    Buffer(Buffer),
    Entries(Vec<DirEntry>),
    Link(PathBuf),
    Stat(FileStat),
}

impl FsRaw {
    pub(crate) fn result(result: i64) -> Self {
        FsRaw {
            result,
            payload: FsPayload::None,
        }
    }

    pub(crate) fn with(result: i64, payload: FsPayload) -> Self {
        FsRaw { result, payload }
    }
}

pub type FsCallback = Box<dyn FnOnce(&mut Loop, Result<FsOutcome, ErrorCode>)>;

/// Loop-side half of a filesystem request
pub(crate) struct FsReq {
    kind: FsType,
    close_fd: Option<RawFd>,
    cb: Option<FsCallback>,
}

/// Result of [`dispatch`]
#[derive(Debug)]
pub enum FsSubmission {
    /// Ran synchronously
    Completed(FsOutcome),
    /// Queued; the callback will fire
    Queued(RequestId),
}

/// Submit `op`. No callback: run now and return the outcome (failure as
/// `Os(code)`). Callback: queue to the worker pool.
pub fn dispatch(lp: &mut Loop, op: FsOp, cb: Option<FsCallback>) -> UvResult<FsSubmission> {
    let kind = op.kind();
    let req = FsReq {
        kind,
        close_fd: op.close_fd(),
        cb,
    };
    let has_cb = req.cb.is_some();
    let rid = lp.submit_request(RequestKind::Fs(kind), None, RequestData::Fs(req))?;

    if has_cb {
        let work = Box::new(move || WorkOutput::Fs(ops::execute(op)));
        if let Err(e) = lp.queue_work(rid, work) {
            lp.finish_request(rid);
            return Err(e);
        }
        return Ok(FsSubmission::Queued(rid));
    }

    let raw = ops::execute(op);
    let (_, result, held) = settle(lp, rid, raw).ok_or(UvError::Os(ErrorCode::EINVAL))?;
    drop(held);
    result.map(FsSubmission::Completed).map_err(UvError::Os)
}

/// Queue `op` on the worker pool
pub fn submit<F>(lp: &mut Loop, op: FsOp, cb: F) -> UvResult<RequestId>
where
    F: FnOnce(&mut Loop, Result<FsOutcome, ErrorCode>) + 'static,
{
    match dispatch(lp, op, Some(Box::new(cb)))? {
        FsSubmission::Queued(rid) => Ok(rid),
        FsSubmission::Completed(_) => Err(UvError::Os(ErrorCode::EINVAL)),
    }
}

/// Run `op` on the calling thread
pub fn submit_sync(lp: &mut Loop, op: FsOp) -> UvResult<FsOutcome> {
    match dispatch(lp, op, None)? {
        FsSubmission::Completed(outcome) => Ok(outcome),
        FsSubmission::Queued(_) => Err(UvError::Os(ErrorCode::EINVAL)),
    }
}

/// Worker output for an async request: map, run the callback, then release
/// whatever buffer the request still held.
pub(crate) fn complete(lp: &mut Loop, rid: RequestId, output: WorkOutput) {
    let raw = match output {
        WorkOutput::Fs(raw) => raw,
        WorkOutput::Panicked => FsRaw::result(ErrorCode::EIO.raw() as i64),
        _ => {
            log_error!("fs request {} got a foreign completion", rid);
            FsRaw::result(ErrorCode::EIO.raw() as i64)
        }
    };
    let Some((cb, result, held)) = settle(lp, rid, raw) else {
        return;
    };
    if let Some(cb) = cb {
        cb(lp, result);
    }
    drop(held);
}

type Settled = (Option<FsCallback>, Result<FsOutcome, ErrorCode>, Option<Buffer>);

/// Host bookkeeping, request release and result mapping
fn settle(lp: &mut Loop, rid: RequestId, raw: FsRaw) -> Option<Settled> {
    let kind = match lp.request_mut(rid)?.kind {
        RequestKind::Fs(kind) => kind,
        other => {
            log_error!("request {} is {}, not fs", rid, other);
            return None;
        }
    };

    // The open request stays registered until the host has wrapped the fd
    let token = if kind == FsType::Open && raw.result >= 0 {
        Some(lp.host.wrap_descriptor(raw.result as RawFd, rid))
    } else {
        None
    };

    let req = match lp.finish_request(rid)? {
        (_, RequestData::Fs(req)) => req,
        _ => return None,
    };
    debug_assert_eq!(req.kind, kind);
    if let Some(fd) = req.close_fd {
        lp.host.remove_descriptor(fd);
    }

    let (result, held) = map_result(kind, raw, token);
    Some((req.cb, result, held))
}

fn map_result(
    kind: FsType,
    raw: FsRaw,
    token: Option<ResourceToken>,
) -> (Result<FsOutcome, ErrorCode>, Option<Buffer>) {
    let FsRaw { result, payload } = raw;
    if result < 0 {
        let held = match payload {
            FsPayload::Buffer(buf) => Some(buf),
            _ => None,
        };
        return (Err(ErrorCode::from_raw(result as i32)), held);
    }

    let mut held = None;
    let outcome = match (kind, payload) {
        (FsType::Open, _) => FsOutcome::Opened {
            fd: result as RawFd,
            token: token.unwrap_or(ResourceToken(result as u64)),
        },
        (FsType::Close, _) => FsOutcome::Closed,
        (FsType::Read, FsPayload::Buffer(buf)) => FsOutcome::Read(buf),
        (FsType::Read, _) => FsOutcome::Read(Buffer::empty()),
        (FsType::Write, payload) => {
            if let FsPayload::Buffer(buf) = payload {
                held = Some(buf);
            }
            FsOutcome::Written(result as usize)
        }
        (FsType::Sendfile, _) => FsOutcome::Sent(result as usize),
        (FsType::Scandir, FsPayload::Entries(entries)) => FsOutcome::Entries(ScandirIter {
            entries: entries.into_iter(),
        }),
        (FsType::Scandir, _) => FsOutcome::Entries(ScandirIter {
            entries: Vec::new().into_iter(),
        }),
        (FsType::Readlink, FsPayload::Link(path)) => FsOutcome::Link(path),
        (FsType::Stat | FsType::Lstat | FsType::Fstat, FsPayload::Stat(st)) => FsOutcome::Stat(st),
        (
            FsType::Unlink
            | FsType::Mkdir
            | FsType::Rmdir
            | FsType::Rename
            | FsType::Chmod
            | FsType::Chown
            | FsType::Utime
            | FsType::Link
            | FsType::Symlink
            | FsType::Fchmod
            | FsType::Fchown
            | FsType::Ftruncate
            | FsType::Fsync
            | FsType::Fdatasync
            | FsType::Futime,
            _,
        ) => FsOutcome::Done,
        (kind, _) => {
            log_error!("fs {}: result {} without payload", kind, result);
            return (Err(ErrorCode::EIO), held);
        }
    };
    (Ok(outcome), held)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunMode;
    use std::cell::{Cell, RefCell};
    use std::path::Path;
    use std::rc::Rc;
    use uvio_core::HostBridge;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("uvio-fs-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[derive(Default)]
    struct Recording {
        wrapped: Vec<(RawFd, RequestId)>,
        removed: Vec<RawFd>,
    }

    struct RecordingHost(Rc<RefCell<Recording>>);

    impl HostBridge for RecordingHost {
        fn wrap_descriptor(&mut self, fd: RawFd, request: RequestId) -> ResourceToken {
            self.0.borrow_mut().wrapped.push((fd, request));
            ResourceToken(1000 + fd as u64)
        }

        fn remove_descriptor(&mut self, fd: RawFd) {
            self.0.borrow_mut().removed.push(fd);
        }
    }

    fn open_rw(lp: &mut Loop, path: &Path) -> RawFd {
        let op = FsOp::Open {
            path: path.to_path_buf(),
            flags: libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
            mode: 0o644,
        };
        match submit_sync(lp, op).unwrap() {
            FsOutcome::Opened { fd, .. } => fd,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sync_write_returns_count() {
        let dir = scratch("sync-write");
        let mut lp = Loop::init().unwrap();
        let rec = Rc::new(RefCell::new(Recording::default()));
        lp.set_host_bridge(Box::new(RecordingHost(Rc::clone(&rec))));

        let fd = open_rw(&mut lp, &dir.join("a.txt"));
        assert_eq!(rec.borrow().wrapped.len(), 1);
        assert_eq!(rec.borrow().wrapped[0].0, fd);

        let written = submit_sync(
            &mut lp,
            FsOp::Write {
                fd,
                buf: Buffer::from("hello"),
                offset: -1,
            },
        )
        .unwrap();
        assert!(matches!(written, FsOutcome::Written(5)));
        assert_eq!(lp.active_requests(), 0);

        match submit_sync(&mut lp, FsOp::Read { fd, len: 16, offset: 0 }).unwrap() {
            FsOutcome::Read(buf) => assert_eq!(buf.as_slice(), b"hello"),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            submit_sync(&mut lp, FsOp::Close { fd }).unwrap(),
            FsOutcome::Closed
        ));
        assert_eq!(rec.borrow().removed, vec![fd]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_async_callback_exactly_once() {
        let dir = scratch("async-read");
        std::fs::write(dir.join("data"), b"0123456789").unwrap();
        let mut lp = Loop::init().unwrap();

        let fd = {
            let op = FsOp::Open {
                path: dir.join("data"),
                flags: libc::O_RDONLY,
                mode: 0,
            };
            match submit_sync(&mut lp, op).unwrap() {
                FsOutcome::Opened { fd, .. } => fd,
                other => panic!("unexpected {:?}", other),
            }
        };

        let calls = Rc::new(Cell::new(0));
        let got = Rc::new(RefCell::new(Vec::new()));
        let (c, g) = (Rc::clone(&calls), Rc::clone(&got));
        submit(&mut lp, FsOp::Read { fd, len: 4, offset: 2 }, move |_, res| {
            c.set(c.get() + 1);
            if let Ok(FsOutcome::Read(buf)) = res {
                g.borrow_mut().extend_from_slice(buf.as_slice());
            }
        })
        .unwrap();
        assert_eq!(lp.active_requests(), 1);
        assert_eq!(calls.get(), 0);

        assert!(!lp.run(RunMode::Default));
        assert_eq!(calls.get(), 1);
        assert_eq!(got.borrow().as_slice(), b"2345");
        assert_eq!(lp.active_requests(), 0);

        submit_sync(&mut lp, FsOp::Close { fd }).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_async_write_lands_on_disk() {
        let dir = scratch("async-write");
        let target = dir.join("out");
        let mut lp = Loop::init().unwrap();
        let fd = open_rw(&mut lp, &target);

        let calls = Rc::new(Cell::new(0));
        let written = Rc::new(Cell::new(None));
        let (c, w) = (Rc::clone(&calls), Rc::clone(&written));
        let op = FsOp::Write {
            fd,
            buf: Buffer::from("async payload"),
            offset: 0,
        };
        submit(&mut lp, op, move |_, res| {
            c.set(c.get() + 1);
            if let Ok(FsOutcome::Written(n)) = res {
                w.set(Some(n));
            }
        })
        .unwrap();
        assert_eq!(calls.get(), 0);

        assert!(!lp.run(RunMode::Default));
        assert_eq!(calls.get(), 1);
        assert_eq!(written.get(), Some(13));
        assert_eq!(lp.active_requests(), 0);

        submit_sync(&mut lp, FsOp::Close { fd }).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"async payload");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_mkdir_existing_path() {
        let dir = scratch("mkdir-exists");
        let mut lp = Loop::init().unwrap();
        let target = dir.join("sub");
        std::fs::create_dir(&target).unwrap();

        let status = Rc::new(RefCell::new(None));
        let s = Rc::clone(&status);
        submit(
            &mut lp,
            FsOp::Mkdir {
                path: target.clone(),
                mode: 0o755,
            },
            move |_, res| *s.borrow_mut() = Some(res.map(|_| ())),
        )
        .unwrap();
        lp.run(RunMode::Default);
        assert_eq!(*status.borrow(), Some(Err(ErrorCode::EEXIST)));
        assert_eq!(lp.active_requests(), 0);

        let err = submit_sync(&mut lp, FsOp::Mkdir { path: target, mode: 0o755 }).unwrap_err();
        assert_eq!(err, UvError::Os(ErrorCode::EEXIST));
        assert_eq!(lp.active_requests(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_scandir_sorted() {
        let dir = scratch("scandir");
        for name in ["b", "c", "a"] {
            std::fs::write(dir.join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.join("d")).unwrap();
        let mut lp = Loop::init().unwrap();

        let entries = match submit_sync(&mut lp, FsOp::Scandir { path: dir.clone() }).unwrap() {
            FsOutcome::Entries(it) => it.collect::<Vec<_>>(),
            other => panic!("unexpected {:?}", other),
        };
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(entries[3].kind, DirEntryKind::Dir);
        assert_eq!(entries[0].kind, DirEntryKind::File);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stat_and_links() {
        let dir = scratch("stat");
        let file = dir.join("f");
        std::fs::write(&file, b"abc").unwrap();
        let mut lp = Loop::init().unwrap();

        match submit_sync(&mut lp, FsOp::Stat { path: file.clone() }).unwrap() {
            FsOutcome::Stat(st) => {
                assert_eq!(st.size, 3);
                assert!(st.is_file());
            }
            other => panic!("unexpected {:?}", other),
        }

        let link = dir.join("l");
        submit_sync(
            &mut lp,
            FsOp::Symlink {
                target: file.clone(),
                link: link.clone(),
            },
        )
        .unwrap();
        match submit_sync(&mut lp, FsOp::Readlink { path: link.clone() }).unwrap() {
            FsOutcome::Link(p) => assert_eq!(p, file),
            other => panic!("unexpected {:?}", other),
        }
        match submit_sync(&mut lp, FsOp::Lstat { path: link }).unwrap() {
            FsOutcome::Stat(st) => assert!(st.is_symlink()),
            other => panic!("unexpected {:?}", other),
        }

        let missing = submit_sync(&mut lp, FsOp::Stat { path: dir.join("nope") }).unwrap_err();
        assert_eq!(missing, UvError::Os(ErrorCode::ENOENT));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rename_unlink_rmdir() {
        let dir = scratch("rename");
        std::fs::write(dir.join("x"), b"1").unwrap();
        let mut lp = Loop::init().unwrap();

        submit_sync(
            &mut lp,
            FsOp::Rename {
                from: dir.join("x"),
                to: dir.join("y"),
            },
        )
        .unwrap();
        assert!(dir.join("y").exists());
        assert!(matches!(
            submit_sync(&mut lp, FsOp::Unlink { path: dir.join("y") }).unwrap(),
            FsOutcome::Done
        ));
        submit_sync(&mut lp, FsOp::Rmdir { path: dir.clone() }).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_many_async_requests_drain() {
        let dir = scratch("many");
        let mut lp = Loop::with_config(
            crate::LoopConfig::new().threadpool_size(2).pool_queue_depth(2),
        )
        .unwrap();
        let done = Rc::new(Cell::new(0));
        for i in 0..16 {
            let d = Rc::clone(&done);
            submit(
                &mut lp,
                FsOp::Mkdir {
                    path: dir.join(format!("d{}", i)),
                    mode: 0o755,
                },
                move |_, res| {
                    assert!(res.is_ok());
                    d.set(d.get() + 1);
                },
            )
            .unwrap();
        }
        lp.run(RunMode::Default);
        assert_eq!(done.get(), 16);
        assert_eq!(lp.active_requests(), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_kind_from_code() {
        assert_eq!(kind_from_code(19).unwrap(), FsType::Mkdir);
        assert!(matches!(kind_from_code(12), Err(UvError::UnsupportedOperation(_))));
    }
}
