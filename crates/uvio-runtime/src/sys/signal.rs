//! Process-wide signal fan-out
//!
//! One async-signal-safe handler serves every loop in the process. Each loop
//! that watches signals owns a [`SignalSink`]: a non-blocking pipe whose write
//! end is published in a fixed slot table. The handler writes the signal
//! number as one byte into every published pipe; the loop reads the bytes
//! back on its own thread and dispatches them.
//! A dropped sink is unpublished and its pipe retired to a reuse list rather
//! than closed, so a late handler never writes to a closed or recycled fd.
//!
//! Dispositions are reference counted per signal number. The handler is
//! installed on the first watch and the previous disposition restored on the
//! last unwatch.

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use uvio_core::{log_debug, log_warn, ErrorCode};

/// Maximum loops with signal watchers at the same time
const MAX_SINKS: usize = 64;

static SINKS: [AtomicI32; MAX_SINKS] = [const { AtomicI32::new(-1) }; MAX_SINKS];

struct Installed {
    signum: i32,
    refs: usize,
    previous: SigAction,
}

static INSTALLED: Mutex<Vec<Installed>> = Mutex::new(Vec::new());

extern "C" fn on_signal(signum: libc::c_int) {
    let errno = super::errno_location();
    // SAFETY: errno_location points at this thread's errno
    let saved = unsafe { *errno };
    let byte = signum as u8;
    for sink in SINKS.iter() {
        let fd = sink.load(Ordering::Acquire);
        if fd >= 0 {
            // SAFETY: write(2) is async-signal-safe; a full pipe drops the byte
            unsafe {
                libc::write(fd, (&byte as *const u8).cast(), 1);
            }
        }
    }
    unsafe { *errno = saved };
}

/// Per-loop receiving end of the fan-out
pub(crate) struct SignalSink {
    // Taken only in drop
    ends: Option<(OwnedFd, OwnedFd)>,
    read: RawFd,
    slot: usize,
}

/// Unpublished pipes, kept open because a handler running on another thread
/// may still hold their write end
static RETIRED: Mutex<Vec<(OwnedFd, OwnedFd)>> = Mutex::new(Vec::new());

fn drain_fd(fd: RawFd, out: &mut Vec<i32>) {
    let mut buf = [0u8; 64];
    loop {
        // SAFETY: buf is valid for its length
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend(buf[..n as usize].iter().map(|b| *b as i32));
    }
}

impl SignalSink {
    pub(crate) fn open() -> io::Result<Self> {
        let reused = RETIRED.lock().unwrap_or_else(|e| e.into_inner()).pop();
        let (read, write) = match reused {
            Some(ends) => {
                // Bytes written after the previous owner unpublished
                drain_fd(ends.0.as_raw_fd(), &mut Vec::new());
                ends
            }
            None => super::pipe(true)?,
        };
        let raw = write.as_raw_fd();
        let Some(slot) = SINKS.iter().position(|s| {
            s.compare_exchange(-1, raw, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        }) else {
            RETIRED.lock().unwrap_or_else(|e| e.into_inner()).push((read, write));
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        };
        log_debug!("signal sink {} published (fd {})", slot, raw);
        Ok(SignalSink {
            read: read.as_raw_fd(),
            ends: Some((read, write)),
            slot,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.read
    }

    /// Read every pending signal number
    pub(crate) fn drain(&self, out: &mut Vec<i32>) {
        drain_fd(self.read, out);
    }
}

impl Drop for SignalSink {
    fn drop(&mut self) {
        SINKS[self.slot].store(-1, Ordering::Release);
        if let Some(ends) = self.ends.take() {
            RETIRED.lock().unwrap_or_else(|e| e.into_inner()).push(ends);
        }
    }
}

fn to_signal(signum: i32) -> Result<Signal, ErrorCode> {
    if signum == libc::SIGKILL || signum == libc::SIGSTOP {
        return Err(ErrorCode::EINVAL);
    }
    Signal::try_from(signum).map_err(|_| ErrorCode::EINVAL)
}

/// Start routing `signum` to sinks, installing the handler if needed
pub(crate) fn watch(signum: i32) -> Result<(), ErrorCode> {
    let signal = to_signal(signum)?;
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = installed.iter_mut().find(|e| e.signum == signum) {
        entry.refs += 1;
        return Ok(());
    }

    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: on_signal only performs async-signal-safe operations
    let previous = unsafe { sigaction(signal, &action) }
        .map_err(|e| ErrorCode::from_errno(e as i32))?;
    log_debug!("installed handler for signal {}", signum);
    installed.push(Installed {
        signum,
        refs: 1,
        previous,
    });
    Ok(())
}

/// Drop one watch of `signum`, restoring the old disposition on the last one
pub(crate) fn unwatch(signum: i32) {
    let Ok(signal) = to_signal(signum) else {
        return;
    };
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    let Some(pos) = installed.iter().position(|e| e.signum == signum) else {
        return;
    };
    installed[pos].refs -= 1;
    if installed[pos].refs > 0 {
        return;
    }
    let entry = installed.swap_remove(pos);
    // SAFETY: restoring the disposition that was in place before watch()
    if let Err(e) = unsafe { sigaction(signal, &entry.previous) } {
        log_warn!("restoring disposition of signal {} failed: {}", signum, e);
    } else {
        log_debug!("restored disposition of signal {}", signum);
    }
}
