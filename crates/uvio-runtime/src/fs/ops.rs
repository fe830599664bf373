//! Blocking execution of filesystem operations.
//!
//! Runs on a worker thread (or the loop thread for synchronous requests).
//! Every function returns the raw result: a non-negative value on success,
//! the negated errno on failure. Arguments are consumed here, so paths and
//! C strings are gone before the request completes.

use std::ffi::{CString, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use uvio_core::{Buffer, ErrorCode};

use super::{DirEntry, DirEntryKind, FileStat, FsOp, FsPayload, FsRaw, Timespec};

fn errno_result() -> i64 {
    ErrorCode::last_os_error().raw() as i64
}

fn check(ret: i64) -> i64 {
    if ret < 0 {
        errno_result()
    } else {
        ret
    }
}

fn c_path(path: &Path) -> Result<CString, i64> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| ErrorCode::EINVAL.raw() as i64)
}

/// Run `f` with `path` as a C string
fn with_path<F>(path: &Path, f: F) -> i64
where
    F: FnOnce(&CString) -> libc::c_int,
{
    match c_path(path) {
        Ok(p) => check(f(&p) as i64),
        Err(code) => code,
    }
}

fn with_paths<F>(a: &Path, b: &Path, f: F) -> i64
where
    F: FnOnce(&CString, &CString) -> libc::c_int,
{
    match (c_path(a), c_path(b)) {
        (Ok(a), Ok(b)) => check(f(&a, &b) as i64),
        (Err(code), _) | (_, Err(code)) => code,
    }
}

fn timespec(secs: f64) -> libc::timespec {
    libc::timespec {
        tv_sec: secs.trunc() as libc::time_t,
        tv_nsec: (secs.fract() * 1e9) as libc::c_long,
    }
}

fn convert_stat(st: &libc::stat) -> FileStat {
    FileStat {
        dev: st.st_dev as u64,
        ino: st.st_ino as u64,
        mode: st.st_mode as u32,
        nlink: st.st_nlink as u64,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u64,
        size: st.st_size as u64,
        blksize: st.st_blksize as u64,
        blocks: st.st_blocks as u64,
        atime: Timespec {
            sec: st.st_atime as i64,
            nsec: st.st_atime_nsec as i64,
        },
        mtime: Timespec {
            sec: st.st_mtime as i64,
            nsec: st.st_mtime_nsec as i64,
        },
        ctime: Timespec {
            sec: st.st_ctime as i64,
            nsec: st.st_ctime_nsec as i64,
        },
    }
}

fn stat_raw<F>(f: F) -> FsRaw
where
    F: FnOnce(*mut libc::stat) -> i64,
{
    // SAFETY: all-zero is a valid libc::stat
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let ret = f(&mut st);
    if ret < 0 {
        FsRaw::result(ret)
    } else {
        FsRaw::with(0, FsPayload::Stat(convert_stat(&st)))
    }
}

/// stat(2) used by polling watchers
pub(crate) fn stat_path(path: &Path) -> Result<FileStat, ErrorCode> {
    // SAFETY: p is NUL-terminated, st is valid for writes
    let raw = stat_raw(|st| with_path(path, |p| unsafe { libc::stat(p.as_ptr(), st) }));
    match raw.payload {
        FsPayload::Stat(st) => Ok(st),
        _ => Err(ErrorCode::from_raw(raw.result as i32)),
    }
}

fn read(fd: RawFd, len: usize, offset: i64) -> FsRaw {
    let mut buf = Buffer::with_capacity(len);
    let target = &mut buf.read_target()[..len];
    // SAFETY: target is valid for len bytes of writes
    let ret = unsafe {
        if offset < 0 {
            libc::read(fd, target.as_mut_ptr().cast(), len)
        } else {
            libc::pread(fd, target.as_mut_ptr().cast(), len, offset as libc::off_t)
        }
    };
    let ret = check(ret as i64);
    if ret < 0 {
        return FsRaw::result(ret);
    }
    buf.truncate(ret as usize);
    FsRaw::with(ret, FsPayload::Buffer(buf))
}

fn write(fd: RawFd, buf: Buffer, offset: i64) -> FsRaw {
    let data = buf.as_slice();
    // SAFETY: data is valid for data.len() bytes of reads
    let ret = unsafe {
        if offset < 0 {
            libc::write(fd, data.as_ptr().cast(), data.len())
        } else {
            libc::pwrite(fd, data.as_ptr().cast(), data.len(), offset as libc::off_t)
        }
    };
    // The buffer goes back so it is released after the callback
    FsRaw::with(check(ret as i64), FsPayload::Buffer(buf))
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        fn sendfile(out_fd: RawFd, in_fd: RawFd, offset: i64, len: usize) -> FsRaw {
            let mut off = offset as libc::off_t;
            let off_ptr = if offset < 0 { std::ptr::null_mut() } else { &mut off as *mut libc::off_t };
            // SAFETY: off_ptr is null or points at a live off_t
            let ret = unsafe { libc::sendfile(out_fd, in_fd, off_ptr, len) };
            FsRaw::result(check(ret as i64))
        }

        fn fdatasync(fd: RawFd) -> libc::c_int {
            // SAFETY: plain syscall on a caller-provided descriptor
            unsafe { libc::fdatasync(fd) }
        }
    } else {
        /// Copy through a bounce buffer where sendfile(2) differs
        fn sendfile(out_fd: RawFd, in_fd: RawFd, offset: i64, len: usize) -> FsRaw {
            let chunk = read(in_fd, len, offset);
            let FsPayload::Buffer(buf) = chunk.payload else {
                return FsRaw::result(chunk.result);
            };
            let written = write(out_fd, buf, -1);
            FsRaw::result(written.result)
        }

        fn fdatasync(fd: RawFd) -> libc::c_int {
            // SAFETY: plain syscall on a caller-provided descriptor
            unsafe { libc::fsync(fd) }
        }
    }
}

fn entry_kind(ft: std::fs::FileType) -> DirEntryKind {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_file() {
        DirEntryKind::File
    } else if ft.is_dir() {
        DirEntryKind::Dir
    } else if ft.is_symlink() {
        DirEntryKind::Link
    } else if ft.is_fifo() {
        DirEntryKind::Fifo
    } else if ft.is_socket() {
        DirEntryKind::Socket
    } else if ft.is_char_device() {
        DirEntryKind::Char
    } else if ft.is_block_device() {
        DirEntryKind::Block
    } else {
        DirEntryKind::Unknown
    }
}

fn scandir(path: &Path) -> FsRaw {
    let dir = match std::fs::read_dir(path) {
        Ok(dir) => dir,
        Err(e) => return FsRaw::result(ErrorCode::from_io(&e).raw() as i64),
    };
    let mut entries = Vec::new();
    for item in dir {
        let item = match item {
            Ok(item) => item,
            Err(e) => return FsRaw::result(ErrorCode::from_io(&e).raw() as i64),
        };
        let kind = item
            .file_type()
            .map(entry_kind)
            .unwrap_or(DirEntryKind::Unknown);
        entries.push(DirEntry {
            name: item.file_name().to_string_lossy().into_owned(),
            kind,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    FsRaw::with(entries.len() as i64, FsPayload::Entries(entries))
}

fn readlink(path: &Path) -> FsRaw {
    let p = match c_path(path) {
        Ok(p) => p,
        Err(code) => return FsRaw::result(code),
    };
    let mut buf = vec![0u8; libc::PATH_MAX as usize];
    // SAFETY: buf is valid for buf.len() bytes of writes
    let ret = unsafe { libc::readlink(p.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
    let ret = check(ret as i64);
    if ret < 0 {
        return FsRaw::result(ret);
    }
    buf.truncate(ret as usize);
    FsRaw::with(0, FsPayload::Link(PathBuf::from(OsString::from_vec(buf))))
}

/// Execute `op`, consuming its arguments
pub(super) fn execute(op: FsOp) -> FsRaw {
    // SAFETY (all arms): C strings are NUL-terminated and live for the call;
    // descriptors are caller-provided and only passed through to the kernel.
    match op {
        FsOp::Open { path, flags, mode } => FsRaw::result(with_path(&path, |p| unsafe {
            libc::open(p.as_ptr(), flags | libc::O_CLOEXEC, mode as libc::c_uint)
        })),
        FsOp::Close { fd } => FsRaw::result(check(unsafe { libc::close(fd) } as i64)),
        FsOp::Read { fd, len, offset } => read(fd, len, offset),
        FsOp::Write { fd, buf, offset } => write(fd, buf, offset),
        FsOp::Sendfile {
            out_fd,
            in_fd,
            offset,
            len,
        } => sendfile(out_fd, in_fd, offset, len),
        FsOp::Stat { path } => stat_raw(|st| with_path(&path, |p| unsafe { libc::stat(p.as_ptr(), st) })),
        FsOp::Lstat { path } => stat_raw(|st| with_path(&path, |p| unsafe { libc::lstat(p.as_ptr(), st) })),
        FsOp::Fstat { fd } => stat_raw(|st| check(unsafe { libc::fstat(fd, st) } as i64)),
        FsOp::Ftruncate { fd, len } => {
            FsRaw::result(check(unsafe { libc::ftruncate(fd, len as libc::off_t) } as i64))
        }
        FsOp::Utime { path, atime, mtime } => {
            let times = [timespec(atime), timespec(mtime)];
            FsRaw::result(with_path(&path, |p| unsafe {
                libc::utimensat(libc::AT_FDCWD, p.as_ptr(), times.as_ptr(), 0)
            }))
        }
        FsOp::Futime { fd, atime, mtime } => {
            let times = [timespec(atime), timespec(mtime)];
            FsRaw::result(check(unsafe { libc::futimens(fd, times.as_ptr()) } as i64))
        }
        FsOp::Chmod { path, mode } => FsRaw::result(with_path(&path, |p| unsafe {
            libc::chmod(p.as_ptr(), mode as libc::mode_t)
        })),
        FsOp::Fchmod { fd, mode } => {
            FsRaw::result(check(unsafe { libc::fchmod(fd, mode as libc::mode_t) } as i64))
        }
        FsOp::Fsync { fd } => FsRaw::result(check(unsafe { libc::fsync(fd) } as i64)),
        FsOp::Fdatasync { fd } => FsRaw::result(check(fdatasync(fd) as i64)),
        FsOp::Unlink { path } => FsRaw::result(with_path(&path, |p| unsafe { libc::unlink(p.as_ptr()) })),
        FsOp::Rmdir { path } => FsRaw::result(with_path(&path, |p| unsafe { libc::rmdir(p.as_ptr()) })),
        FsOp::Mkdir { path, mode } => FsRaw::result(with_path(&path, |p| unsafe {
            libc::mkdir(p.as_ptr(), mode as libc::mode_t)
        })),
        FsOp::Rename { from, to } => FsRaw::result(with_paths(&from, &to, |a, b| unsafe {
            libc::rename(a.as_ptr(), b.as_ptr())
        })),
        FsOp::Scandir { path } => scandir(&path),
        FsOp::Link { from, to } => FsRaw::result(with_paths(&from, &to, |a, b| unsafe {
            libc::link(a.as_ptr(), b.as_ptr())
        })),
        FsOp::Symlink { target, link } => FsRaw::result(with_paths(&target, &link, |a, b| unsafe {
            libc::symlink(a.as_ptr(), b.as_ptr())
        })),
        FsOp::Readlink { path } => readlink(&path),
        FsOp::Chown { path, uid, gid } => FsRaw::result(with_path(&path, |p| unsafe {
            libc::chown(p.as_ptr(), uid as libc::uid_t, gid as libc::gid_t)
        })),
        FsOp::Fchown { fd, uid, gid } => FsRaw::result(check(unsafe {
            libc::fchown(fd, uid as libc::uid_t, gid as libc::gid_t)
        } as i64)),
    }
}
