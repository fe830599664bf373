//! Terminal streams
//!
//! A tty handle works on a duplicate of the caller's descriptor, so closing
//! the handle never closes the caller's terminal. The terminal mode in
//! force before the first `set_mode` comes back when the handle closes.

use std::fs::File;
use std::os::unix::io::RawFd;

use uvio_core::{log_warn, ErrorCode, HandleId, HandleKind, UvError, UvResult};

use super::StreamIo;
use crate::event_loop::Loop;
use crate::handle::handle_type;
use crate::sys;

handle_type!(
    /// Terminal attached to a descriptor.
    Tty,
    HandleKind::Tty
);

/// Line discipline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyMode {
    /// Whatever the terminal had before the handle changed it
    Normal,
    /// Character-at-a-time input, no echo, no signal keys; output processing kept
    Raw,
    /// Fully raw in both directions (binary-safe)
    Io,
}

/// Terminal settings to restore on close
pub(crate) struct TtySaved {
    orig: libc::termios,
}

fn get_attr(fd: RawFd) -> UvResult<libc::termios> {
    // SAFETY: zeroed termios is a valid out-parameter
    let mut t: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: t is a live termios
    sys::cvt(unsafe { libc::tcgetattr(fd, &mut t) })?;
    Ok(t)
}

fn set_attr(fd: RawFd, t: &libc::termios) -> UvResult<()> {
    // SAFETY: t is a live termios
    sys::cvt(unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, t) })?;
    Ok(())
}

/// Put back the settings captured before the first mode change
pub(crate) fn restore(fd: RawFd, saved: &TtySaved) {
    if let Err(e) = set_attr(fd, &saved.orig) {
        log_warn!("tty fd {}: restoring mode failed: {}", fd, e);
    }
}

fn raw_from(orig: &libc::termios, mode: TtyMode) -> libc::termios {
    let mut t = *orig;
    match mode {
        TtyMode::Normal => {}
        TtyMode::Raw => {
            t.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);
            t.c_oflag |= libc::ONLCR;
            t.c_cflag |= libc::CS8;
            t.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);
            t.c_cc[libc::VMIN] = 1;
            t.c_cc[libc::VTIME] = 0;
        }
        TtyMode::Io => {
            // SAFETY: t is a live termios
            unsafe { libc::cfmakeraw(&mut t) };
        }
    }
    t
}

impl Tty {
    /// Wrap terminal `fd`. `readable` selects whether reads are allowed.
    /// `ENOTTY` if `fd` is not a terminal.
    pub fn init(lp: &mut Loop, fd: RawFd, readable: bool) -> UvResult<Tty> {
        // SAFETY: isatty only inspects the descriptor
        if unsafe { libc::isatty(fd) } != 1 {
            return Err(UvError::Os(ErrorCode::from_errno(libc::ENOTTY)));
        }
        let own = sys::dup(fd)?;
        let id = lp.stream_init(HandleKind::Tty)?;
        if let Err(e) = lp.stream_attach(id, StreamIo::File(File::from(own))) {
            let _ = lp.close_handle(id, None);
            return Err(e);
        }
        let state = lp.stream_state(id)?;
        state.readable = readable;
        state.writable = true;
        Ok(Tty(id))
    }

    /// Switch the line discipline. The original settings are captured on
    /// the first call and restored by `Normal` and by close.
    pub fn set_mode(&self, lp: &mut Loop, mode: TtyMode) -> UvResult<()> {
        lp.tty_set_mode(self.0, mode)
    }

    /// `(columns, rows)`
    pub fn winsize(&self, lp: &mut Loop) -> UvResult<(u16, u16)> {
        let fd = lp.tty_fd(self.0)?;
        // SAFETY: zeroed winsize is a valid out-parameter
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        // SAFETY: TIOCGWINSZ writes one winsize
        sys::cvt(unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws) })?;
        Ok((ws.ws_col, ws.ws_row))
    }
}

impl Loop {
    fn tty_fd(&mut self, id: HandleId) -> UvResult<RawFd> {
        match self.stream_state(id)?.io.as_ref() {
            Some(io) => Ok(io.fd()),
            None => Err(UvError::Os(ErrorCode::EBADF)),
        }
    }

    fn tty_set_mode(&mut self, id: HandleId, mode: TtyMode) -> UvResult<()> {
        let fd = self.tty_fd(id)?;
        let state = self.stream_state(id)?;
        let orig = match &state.tty {
            Some(saved) => saved.orig,
            None if mode == TtyMode::Normal => return Ok(()),
            None => get_attr(fd)?,
        };
        set_attr(fd, &raw_from(&orig, mode))?;
        state.tty = if mode == TtyMode::Normal {
            None
        } else {
            Some(TtySaved { orig })
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use crate::{Handle, RunMode};
    use std::ffi::CStr;
    use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};

    /// Pseudo-terminal as `(master, slave)`
    fn pty() -> (OwnedFd, OwnedFd) {
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0);
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let name = CStr::from_ptr(libc::ptsname(master)).to_owned();
            let slave = libc::open(name.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
            assert!(slave >= 0);
            (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave))
        }
    }

    #[test]
    fn test_not_a_tty() {
        let mut lp = Loop::init().unwrap();
        let (r, _w) = sys::pipe(false).unwrap();
        assert_eq!(
            Tty::init(&mut lp, r.as_raw_fd(), true),
            Err(UvError::Os(ErrorCode::from_errno(libc::ENOTTY)))
        );
    }

    #[test]
    fn test_mode_restored_on_close() {
        let (_master, slave) = pty();
        let before = get_attr(slave.as_raw_fd()).unwrap();
        assert_ne!(before.c_lflag & libc::ICANON, 0);

        let mut lp = Loop::init().unwrap();
        let tty = Tty::init(&mut lp, slave.as_raw_fd(), true).unwrap();
        assert!(tty.is_readable(&lp) && tty.is_writable(&lp));
        tty.set_mode(&mut lp, TtyMode::Raw).unwrap();
        let raw = get_attr(slave.as_raw_fd()).unwrap();
        assert_eq!(raw.c_lflag & (libc::ICANON | libc::ECHO), 0);

        tty.set_mode(&mut lp, TtyMode::Io).unwrap();
        tty.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
        let after = get_attr(slave.as_raw_fd()).unwrap();
        assert_eq!(after.c_lflag, before.c_lflag);
        assert_eq!(after.c_iflag, before.c_iflag);
    }

    #[test]
    fn test_winsize() {
        let (master, slave) = pty();
        let ws = libc::winsize {
            ws_row: 24,
            ws_col: 80,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        unsafe {
            assert_eq!(libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &ws), 0);
        }
        let mut lp = Loop::init().unwrap();
        let tty = Tty::init(&mut lp, slave.as_raw_fd(), false).unwrap();
        assert_eq!(tty.winsize(&mut lp).unwrap(), (80, 24));
        assert!(!tty.is_readable(&lp));
        tty.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
