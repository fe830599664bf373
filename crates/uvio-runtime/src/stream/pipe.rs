//! Pipes: OS pipes, Unix-domain sockets and forwarded pipes
//!
//! A forwarded pipe gives the caller a writable pipe whose bytes end up in
//! some other descriptor (`target`). A hidden relay pipe reads the other
//! end and copies everything into `target`. The pair is tied together by a
//! [`ForwardLink`]:
//!
//! ```text
//!   Active ──(user closes pipe)──▶ Draining ──(relay EOF)──▶ Closed
//!     └──────────(relay EOF/error, or relay closed)──────────▶ Closed
//! ```
//!
//! Entering `Closed` stops the relay read, closes both handles and removes
//! `target` from the host bridge. It happens once however it is reached.

use std::fs::File;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use uvio_core::{log_debug, log_warn, ErrorCode, HandleId, HandleKind, RequestId, RequestKind, SlotId, UvError, UvResult};

use super::{ConnectReq, StatusCb, StreamIo};
use crate::event_loop::Loop;
use crate::handle::handle_type;
use crate::request::RequestData;
use crate::sys::{self, socket};

handle_type!(
    /// Pipe or Unix-domain stream.
    Pipe,
    HandleKind::Pipe
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardPhase {
    Active,
    Draining,
    Closed,
}

/// Ties a forwarded pipe to its relay
pub(crate) struct ForwardLink {
    primary: HandleId,
    relay: HandleId,
    target: RawFd,
    phase: ForwardPhase,
}

impl Pipe {
    pub fn init(lp: &mut Loop) -> UvResult<Pipe> {
        lp.stream_init(HandleKind::Pipe).map(Pipe)
    }

    /// Adopt a descriptor: a Unix socket or a pipe end. The descriptor is
    /// switched to non-blocking mode.
    pub fn open(&self, lp: &mut Loop, fd: OwnedFd) -> UvResult<()> {
        let io = if socket::is_socket(fd.as_raw_fd())? {
            StreamIo::Unix(UnixStream::from(fd))
        } else {
            StreamIo::File(File::from(fd))
        };
        lp.stream_attach(self.0, io)
    }

    /// New OS pipe as `(read end, write end)`
    pub fn pair(lp: &mut Loop) -> UvResult<(Pipe, Pipe)> {
        let (read, write) = sys::pipe(true)?;
        Pipe::adopt_pair(lp, read, write)
    }

    /// Connected pair of Unix-domain sockets
    pub fn socket_pair(lp: &mut Loop) -> UvResult<(Pipe, Pipe)> {
        let (a, b) = UnixStream::pair()?;
        Pipe::adopt_pair(lp, OwnedFd::from(a), OwnedFd::from(b))
    }

    fn adopt_pair(lp: &mut Loop, a: OwnedFd, b: OwnedFd) -> UvResult<(Pipe, Pipe)> {
        let first = Pipe::init(lp)?;
        let second = Pipe::init(lp)?;
        first.open(lp, a)?;
        second.open(lp, b)?;
        Ok((first, second))
    }

    /// Bind to a filesystem path. `EALREADY` if already bound or open.
    pub fn bind<P: AsRef<Path>>(&self, lp: &mut Loop, path: P) -> UvResult<()> {
        if lp.stream_state(self.0)?.io.is_some() {
            return Err(UvError::Os(ErrorCode::EALREADY));
        }
        let fd = socket::unix_bind(path.as_ref())?;
        lp.stream_attach(self.0, StreamIo::Bound(fd))
    }

    /// Connect to a listening socket at `path`; `cb` reports the outcome.
    pub fn connect<P, F>(&self, lp: &mut Loop, path: P, cb: F) -> UvResult<RequestId>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut Loop, Pipe, Result<(), ErrorCode>) + 'static,
    {
        let cb: StatusCb = Box::new(move |lp: &mut Loop, id: HandleId, status| cb(lp, Pipe(id), status));
        lp.pipe_connect(self.0, path.as_ref(), cb)
    }

    /// Turn this unopened pipe into the write side of a relay into `target`.
    ///
    /// Bytes written to the pipe are copied into `target` by a hidden relay
    /// handle. `target` is not closed; it is removed from the host bridge
    /// when the relay shuts down.
    pub fn open_forwarded(&self, lp: &mut Loop, target: RawFd) -> UvResult<()> {
        lp.pipe_open_forwarded(self.0, target)
    }
}

impl Loop {
    /// `EBUSY` unless `id` is a pipe without a descriptor yet
    pub(crate) fn pipe_check_unopened(&mut self, id: HandleId) -> UvResult<()> {
        if self.live_entry(id)?.kind != HandleKind::Pipe {
            return Err(UvError::Os(ErrorCode::EINVAL));
        }
        if self.stream_state(id)?.io.is_some() {
            return Err(UvError::Os(ErrorCode::EBUSY));
        }
        Ok(())
    }

    fn pipe_connect(&mut self, id: HandleId, path: &Path, cb: StatusCb) -> UvResult<RequestId> {
        if self.stream_state(id)?.io.is_some() {
            return Err(UvError::Os(ErrorCode::from_errno(libc::EISCONN)));
        }
        let req = ConnectReq { handle: id, cb: Some(cb) };
        let rid = self.submit_request(RequestKind::Connect, Some(id), RequestData::Connect(req))?;
        // Unix-domain connects resolve immediately
        let status = match UnixStream::connect(path) {
            Ok(sock) => self.stream_attach(id, StreamIo::Unix(sock)).map_err(|e| e.code()),
            Err(e) => Err(ErrorCode::from_io(&e)),
        };
        self.defer_completion(rid, status);
        Ok(rid)
    }

    fn pipe_open_forwarded(&mut self, id: HandleId, target: RawFd) -> UvResult<()> {
        self.pipe_check_unopened(id)?;
        if target < 0 {
            return Err(UvError::Os(ErrorCode::EBADF));
        }
        let (read, write) = sys::pipe(true)?;
        let relay = self.stream_init(HandleKind::Pipe)?;
        let wired = self
            .stream_attach(relay, StreamIo::File(File::from(read)))
            .and_then(|()| self.stream_attach(id, StreamIo::File(File::from(write))));
        if let Err(e) = wired {
            let _ = self.close_handle(relay, None);
            return Err(e);
        }

        let link = self
            .forwards
            .insert(ForwardLink {
                primary: id,
                relay,
                target,
                phase: ForwardPhase::Active,
            })
            .ok_or(UvError::Os(ErrorCode::ENOMEM))?;
        for end in [id, relay] {
            self.stream_state(end)?.forward = Some(link);
        }

        // Only the caller's pipe keeps the loop alive while it is open
        self.set_referenced(relay, false)?;
        let cb: super::ReadCb = Box::new(move |lp: &mut Loop, _relay: HandleId, res| match res {
            Ok(buf) => {
                if let Err(code) = sys::write_all_fd(target, &buf) {
                    log_warn!("forwarded pipe: write to fd {} failed: {}", target, code);
                    lp.forward_teardown(link);
                }
            }
            Err(code) => {
                if !code.is_eof() {
                    log_warn!("forwarded pipe: relay read failed: {}", code);
                }
                lp.forward_teardown(link);
            }
        });
        self.stream_read_start(relay, Box::new(uvio_core::HeapBuffers::default()), cb)?;
        log_debug!("pipe {} forwarded to fd {} via relay {}", id, target, relay);
        Ok(())
    }

    /// A stream belonging to `link` is closing
    pub(crate) fn forward_on_close(&mut self, link: SlotId, id: HandleId) {
        let Some(fwd) = self.forwards.get_mut(link) else {
            return;
        };
        if id == fwd.primary && fwd.phase == ForwardPhase::Active {
            // The write end goes away with the pipe; let the relay drain
            fwd.phase = ForwardPhase::Draining;
            let relay = fwd.relay;
            if let Some(entry) = self.handles.get_mut(relay.slot()) {
                entry.referenced = true;
            }
        } else if id == fwd.relay {
            self.forward_teardown(link);
        }
    }

    /// Stop the relay, close both ends and release `target`. Runs once.
    pub(crate) fn forward_teardown(&mut self, link: SlotId) {
        let Some(fwd) = self.forwards.get_mut(link) else {
            return;
        };
        if fwd.phase == ForwardPhase::Closed {
            return;
        }
        fwd.phase = ForwardPhase::Closed;
        let (primary, relay, target) = (fwd.primary, fwd.relay, fwd.target);

        if self.is_live(relay) {
            let _ = self.stream_read_stop(relay);
            let _ = self.close_handle(relay, None);
        }
        if self.is_live(primary) {
            let _ = self.close_handle(primary, None);
        }
        self.host.remove_descriptor(target);
        self.forwards.remove(link);
        log_debug!("forwarded pipe {} torn down", primary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use crate::{Handle, RunMode};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use uvio_core::{Buffer, HostBridge, ResourceToken};

    struct RemovalLog(Rc<RefCell<Vec<RawFd>>>);

    impl HostBridge for RemovalLog {
        fn wrap_descriptor(&mut self, _fd: RawFd, _request: RequestId) -> ResourceToken {
            ResourceToken(0)
        }

        fn remove_descriptor(&mut self, fd: RawFd) {
            self.0.borrow_mut().push(fd);
        }
    }

    #[test]
    fn test_unix_socket_listen_connect() {
        let path = std::env::temp_dir().join(format!("uvio-pipe-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut lp = Loop::init().unwrap();

        let server = Pipe::init(&mut lp).unwrap();
        server.bind(&mut lp, &path).unwrap();
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = Rc::clone(&got);
        server
            .listen(&mut lp, 4, move |lp, server, status| {
                status.unwrap();
                let conn = Pipe::init(lp).unwrap();
                server.accept(lp, conn).unwrap();
                let g = Rc::clone(&g);
                conn.read_start(lp, move |lp, conn, res| match res {
                    Ok(buf) => g.borrow_mut().extend_from_slice(&buf),
                    Err(_) => {
                        conn.close(lp).unwrap();
                        server.close(lp).unwrap();
                    }
                })
                .unwrap();
            })
            .unwrap();

        let client = Pipe::init(&mut lp).unwrap();
        client
            .connect(&mut lp, &path, |lp, client, status| {
                status.unwrap();
                client.write(lp, Buffer::from("over unix"), |lp, client, st| {
                    st.unwrap();
                    client.close(lp).unwrap();
                })
                .unwrap();
            })
            .unwrap();

        lp.run(RunMode::Default);
        assert_eq!(got.borrow().as_slice(), b"over unix");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_connect_missing_path() {
        let mut lp = Loop::init().unwrap();
        let got = Rc::new(Cell::new(None));
        let g = Rc::clone(&got);
        let client = Pipe::init(&mut lp).unwrap();
        client
            .connect(&mut lp, "/no/such/uvio.sock", move |lp, client, status| {
                g.set(Some(status));
                client.close(lp).unwrap();
            })
            .unwrap();
        assert_eq!(got.get(), None);
        lp.run(RunMode::Default);
        assert_eq!(got.get(), Some(Err(ErrorCode::ENOENT)));
    }

    #[test]
    fn test_open_twice() {
        let mut lp = Loop::init().unwrap();
        let (r, w) = sys::pipe(true).unwrap();
        let pipe = Pipe::init(&mut lp).unwrap();
        pipe.open(&mut lp, r).unwrap();
        assert_eq!(pipe.open(&mut lp, w), Err(UvError::Os(ErrorCode::EBUSY)));
        pipe.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    /// Forwarded pipe into the write end of an OS pipe we read back
    fn forwarded(lp: &mut Loop) -> (Pipe, OwnedFd, OwnedFd, Rc<RefCell<Vec<RawFd>>>) {
        let removed = Rc::new(RefCell::new(Vec::new()));
        lp.set_host_bridge(Box::new(RemovalLog(Rc::clone(&removed))));
        let (sink_read, sink_write) = sys::pipe(false).unwrap();
        let pipe = Pipe::init(lp).unwrap();
        pipe.open_forwarded(lp, sink_write.as_raw_fd()).unwrap();
        (pipe, sink_read, sink_write, removed)
    }

    fn read_all(fd: &OwnedFd, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut got = 0;
        while got < len {
            let n = unsafe { libc::read(fd.as_raw_fd(), out[got..].as_mut_ptr().cast(), len - got) };
            assert!(n > 0);
            got += n as usize;
        }
        out
    }

    #[test]
    fn test_forwarded_pipe_user_close() {
        let mut lp = Loop::init().unwrap();
        let (pipe, sink_read, sink_write, removed) = forwarded(&mut lp);
        assert!(pipe.is_writable(&lp));
        assert_eq!(
            pipe.open_forwarded(&mut lp, sink_write.as_raw_fd()),
            Err(UvError::Os(ErrorCode::EBUSY))
        );

        pipe.write(&mut lp, Buffer::from("relayed"), |lp, pipe, st| {
            st.unwrap();
            pipe.close(lp).unwrap();
        })
        .unwrap();

        // The relay drains after the user close, then tears down once
        lp.run(RunMode::Default);
        assert_eq!(read_all(&sink_read, 7), b"relayed");
        assert_eq!(*removed.borrow(), vec![sink_write.as_raw_fd()]);
        let mut handles = 0;
        lp.walk(|_, _| handles += 1);
        assert_eq!(handles, 0);
    }

    #[test]
    fn test_forwarded_pipe_relay_error() {
        let mut lp = Loop::init().unwrap();
        let (pipe, sink_read, sink_write, removed) = forwarded(&mut lp);
        // Nobody reads the target any more: the relay's write fails
        drop(sink_read);

        let closed = Rc::new(Cell::new(0));
        let c = Rc::clone(&closed);
        pipe.write(&mut lp, Buffer::from("dropped"), |_, _, st| st.unwrap())
            .unwrap();
        let timer = crate::handles::Timer::init(&mut lp).unwrap();
        timer
            .start(
                &mut lp,
                move |lp, t| {
                    // Teardown already closed the pipe; closing again fails
                    assert!(pipe.is_closing(lp) || pipe.state(lp).is_err());
                    c.set(c.get() + 1);
                    t.close(lp).unwrap();
                },
                20,
                0,
            )
            .unwrap();

        lp.run(RunMode::Default);
        assert_eq!(closed.get(), 1);
        assert_eq!(*removed.borrow(), vec![sink_write.as_raw_fd()]);
    }
}
