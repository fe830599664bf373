//! Byte streams: TCP sockets, pipes and terminals
//!
//! The three kinds share one state type and one I/O path. A stream's
//! descriptor is registered with the poller only while something wants it:
//! reading (or listening with no unaccepted connection) wants READABLE,
//! queued writes or an in-progress connect want WRITABLE.
//!
//! # Reads
//!
//! Two-phase: on readiness the buffer provider is asked for a buffer of the
//! configured suggested size, the read fills it and the callback receives
//! the buffer truncated to the byte count. EOF and errors end the read
//! registration; the stream is never closed on the caller's behalf.
//!
//! # Writes
//!
//! Writes complete in submission order. A write submitted to an empty queue
//! is attempted immediately; whatever is left waits for WRITABLE. The
//! callback never runs inside `write`. A write error fails every queued
//! write with the same code. A pending shutdown runs once the queue drains.

pub mod pipe;
pub mod tcp;
pub mod tty;

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use uvio_core::{
    log_debug, log_warn, Buffer, BufferProvider, ErrorCode, HandleId, HandleKind, HeapBuffers,
    RequestId, RequestKind, SlotId, UvError, UvResult,
};

use crate::event_loop::Loop;
use crate::handle::{Handle, HandleData};
use crate::poller::{Interest, PollEvent};
use crate::request::{RequestData, RequestEntry};
use crate::sys;

pub use pipe::Pipe;
pub use tcp::Tcp;
pub use tty::{Tty, TtyMode};

pub(crate) type ReadCb = Box<dyn FnMut(&mut Loop, HandleId, Result<Buffer, ErrorCode>)>;
pub(crate) type StatusCb = Box<dyn FnOnce(&mut Loop, HandleId, Result<(), ErrorCode>)>;
pub(crate) type ConnectionCb = Box<dyn FnMut(&mut Loop, HandleId, Result<(), ErrorCode>)>;

/// The descriptor behind a stream
pub(crate) enum StreamIo {
    Tcp(TcpStream),
    TcpListener(TcpListener),
    Unix(UnixStream),
    UnixListener(UnixListener),
    /// Pipe end or terminal
    File(File),
    /// Bound socket, not yet listening
    Bound(OwnedFd),
}

impl StreamIo {
    pub(crate) fn fd(&self) -> RawFd {
        match self {
            StreamIo::Tcp(s) => s.as_raw_fd(),
            StreamIo::TcpListener(l) => l.as_raw_fd(),
            StreamIo::Unix(s) => s.as_raw_fd(),
            StreamIo::UnixListener(l) => l.as_raw_fd(),
            StreamIo::File(f) => f.as_raw_fd(),
            StreamIo::Bound(fd) => fd.as_raw_fd(),
        }
    }

    fn is_connection(&self) -> bool {
        matches!(self, StreamIo::Tcp(_) | StreamIo::Unix(_) | StreamIo::File(_))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamIo::Tcp(s) => s.read(buf),
            StreamIo::Unix(s) => s.read(buf),
            StreamIo::File(f) => f.read(buf),
            _ => Err(io::Error::from_raw_os_error(libc::ENOTCONN)),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            StreamIo::Tcp(s) => s.write(data),
            StreamIo::Unix(s) => s.write(data),
            StreamIo::File(f) => f.write(data),
            _ => Err(io::Error::from_raw_os_error(libc::ENOTCONN)),
        }
    }

    /// Half-close. Pipe ends and terminals have no write side to shut.
    fn shutdown_write(&self) -> io::Result<()> {
        match self {
            StreamIo::Tcp(s) => s.shutdown(Shutdown::Write),
            StreamIo::Unix(s) => s.shutdown(Shutdown::Write),
            StreamIo::File(_) => Ok(()),
            _ => Err(io::Error::from_raw_os_error(libc::ENOTCONN)),
        }
    }

    /// Accept one connection, non-blocking
    fn accept(&self) -> io::Result<StreamIo> {
        match self {
            StreamIo::TcpListener(l) => {
                let (s, _) = l.accept()?;
                s.set_nonblocking(true)?;
                Ok(StreamIo::Tcp(s))
            }
            StreamIo::UnixListener(l) => {
                let (s, _) = l.accept()?;
                s.set_nonblocking(true)?;
                Ok(StreamIo::Unix(s))
            }
            _ => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }
}

/// Readable/writable sides of a file descriptor from its access mode
fn access_of(fd: RawFd) -> (bool, bool) {
    // SAFETY: fcntl on a descriptor the caller owns
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return (false, false);
    }
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => (true, false),
        libc::O_WRONLY => (false, true),
        _ => (true, true),
    }
}

struct ReadState {
    provider: Box<dyn BufferProvider>,
    cb: Option<ReadCb>,
}

struct ListenState {
    cb: Option<ConnectionCb>,
    /// Accepted connection waiting for `accept`
    pending: Option<StreamIo>,
}

pub(crate) struct StreamState {
    pub(crate) io: Option<StreamIo>,
    readable: bool,
    writable: bool,
    interest: Interest,
    read: Option<ReadState>,
    reading: bool,
    write_queue: VecDeque<RequestId>,
    shutdown: Option<RequestId>,
    shut: bool,
    connect: Option<RequestId>,
    listen: Option<ListenState>,
    pub(crate) tty: Option<tty::TtySaved>,
    /// Forwarding link this stream belongs to
    pub(crate) forward: Option<SlotId>,
}

impl StreamState {
    pub(crate) fn new() -> Self {
        StreamState {
            io: None,
            readable: false,
            writable: false,
            interest: Interest::NONE,
            read: None,
            reading: false,
            write_queue: VecDeque::new(),
            shutdown: None,
            shut: false,
            connect: None,
            listen: None,
            tty: None,
            forward: None,
        }
    }
}

pub(crate) struct WriteReq {
    handle: HandleId,
    buf: Buffer,
    written: usize,
    cb: Option<StatusCb>,
}

impl WriteReq {
    pub(crate) fn complete(self, lp: &mut Loop, status: Result<(), ErrorCode>) {
        let WriteReq { handle, buf, cb, .. } = self;
        if let Some(cb) = cb {
            cb(lp, handle, status);
        }
        // Released only after the callback has seen the result
        drop(buf);
    }
}

pub(crate) struct ShutdownReq {
    handle: HandleId,
    cb: Option<StatusCb>,
}

impl ShutdownReq {
    pub(crate) fn complete(self, lp: &mut Loop, status: Result<(), ErrorCode>) {
        if let Some(cb) = self.cb {
            cb(lp, self.handle, status);
        }
    }
}

pub(crate) struct ConnectReq {
    handle: HandleId,
    cb: Option<StatusCb>,
}

impl ConnectReq {
    pub(crate) fn complete(self, lp: &mut Loop, status: Result<(), ErrorCode>) {
        if let Some(cb) = self.cb {
            cb(lp, self.handle, status);
        }
    }
}

/// Operations shared by [`Tcp`], [`Pipe`] and [`Tty`].
pub trait Stream: Handle {
    /// Start reading into fresh heap buffers of the configured read size
    fn read_start<F>(&self, lp: &mut Loop, cb: F) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Self, Result<Buffer, ErrorCode>) + 'static,
    {
        self.read_start_with(lp, HeapBuffers::default(), cb)
    }

    /// Start reading; `provider` supplies the buffer for every read.
    ///
    /// `cb` gets `Ok(data)`, `Err(EOF)` at end of stream, or the read
    /// error. `AlreadyActive` if already reading.
    fn read_start_with<P, F>(&self, lp: &mut Loop, provider: P, mut cb: F) -> UvResult<()>
    where
        P: BufferProvider + 'static,
        F: FnMut(&mut Loop, Self, Result<Buffer, ErrorCode>) + 'static,
    {
        lp.stream_read_start(
            self.id(),
            Box::new(provider),
            Box::new(move |lp: &mut Loop, id: HandleId, res| cb(lp, Self::from_id(id), res)),
        )
    }

    /// Stop reading. Idempotent.
    fn read_stop(&self, lp: &mut Loop) -> UvResult<()> {
        lp.stream_read_stop(self.id())
    }

    /// Queue `buf` for writing; `cb` reports the outcome.
    fn write<F>(&self, lp: &mut Loop, buf: Buffer, cb: F) -> UvResult<RequestId>
    where
        F: FnOnce(&mut Loop, Self, Result<(), ErrorCode>) + 'static,
    {
        let cb: StatusCb = Box::new(move |lp: &mut Loop, id: HandleId, status| cb(lp, Self::from_id(id), status));
        lp.stream_write(self.id(), buf, Some(cb))
    }

    /// Queue `buf` for writing without a completion callback
    fn queue_write(&self, lp: &mut Loop, buf: Buffer) -> UvResult<RequestId> {
        lp.stream_write(self.id(), buf, None)
    }

    /// Write what the descriptor accepts right now.
    ///
    /// `EAGAIN` when writes are queued or nothing could be written.
    fn try_write(&self, lp: &mut Loop, data: &[u8]) -> UvResult<usize> {
        lp.stream_try_write(self.id(), data)
    }

    /// Shut down the write side once queued writes are flushed
    fn shutdown<F>(&self, lp: &mut Loop, cb: F) -> UvResult<RequestId>
    where
        F: FnOnce(&mut Loop, Self, Result<(), ErrorCode>) + 'static,
    {
        let cb: StatusCb = Box::new(move |lp: &mut Loop, id: HandleId, status| cb(lp, Self::from_id(id), status));
        lp.stream_shutdown(self.id(), cb)
    }

    /// Listen on a bound stream. `cb` runs for each incoming connection;
    /// take it with [`accept`](Stream::accept).
    fn listen<F>(&self, lp: &mut Loop, backlog: i32, mut cb: F) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Self, Result<(), ErrorCode>) + 'static,
    {
        lp.stream_listen(
            self.id(),
            backlog,
            Box::new(move |lp: &mut Loop, id: HandleId, status| cb(lp, Self::from_id(id), status)),
        )
    }

    /// Move the pending connection onto `client`, an unopened stream of the
    /// same kind. `EAGAIN` if nothing is pending.
    fn accept(&self, lp: &mut Loop, client: Self) -> UvResult<()> {
        lp.stream_accept(self.id(), client.id())
    }

    fn is_readable(&self, lp: &Loop) -> bool {
        lp.stream_ref(self.id()).map_or(false, |s| s.readable)
    }

    fn is_writable(&self, lp: &Loop) -> bool {
        lp.stream_ref(self.id()).map_or(false, |s| s.writable && !s.shut)
    }

    /// Writes submitted but not yet completed
    fn write_queue_size(&self, lp: &Loop) -> usize {
        lp.stream_ref(self.id()).map_or(0, |s| s.write_queue.len())
    }
}

impl Stream for Tcp {}
impl Stream for Pipe {}
impl Stream for Tty {}

impl Loop {
    pub(crate) fn stream_state(&mut self, id: HandleId) -> UvResult<&mut StreamState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Stream(s) => Ok(s),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn stream_ref(&self, id: HandleId) -> Option<&StreamState> {
        match self.handles.get(id.slot()) {
            Some(e) if !e.closing => match &e.data {
                HandleData::Stream(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn stream_init(&mut self, kind: HandleKind) -> UvResult<HandleId> {
        self.insert_handle(kind, HandleData::Stream(StreamState::new()))
    }

    /// Give a stream its descriptor. `EBUSY` if it already has one.
    pub(crate) fn stream_attach(&mut self, id: HandleId, io: StreamIo) -> UvResult<()> {
        let state = self.stream_state(id)?;
        if state.io.is_some() {
            return Err(UvError::Os(ErrorCode::EBUSY));
        }
        sys::set_nonblocking(io.fd(), true)?;
        let (readable, writable) = match &io {
            StreamIo::File(f) => access_of(f.as_raw_fd()),
            other => {
                let c = other.is_connection();
                (c, c)
            }
        };
        state.readable = readable;
        state.writable = writable;
        state.io = Some(io);
        Ok(())
    }

    /// Recompute poller interest and the active flag
    pub(crate) fn stream_sync(&mut self, id: HandleId) {
        let Some(entry) = self.handles.get_mut(id.slot()) else {
            return;
        };
        let HandleData::Stream(state) = &mut entry.data else {
            return;
        };
        let listening = state.listen.as_ref().map(|l| l.pending.is_none());
        let want = Interest::NONE
            .add_if(state.reading || listening == Some(true), Interest::READABLE)
            .add_if(
                !state.write_queue.is_empty() || state.connect.is_some(),
                Interest::WRITABLE,
            );
        let want = if entry.closing { Interest::NONE } else { want };
        if let Some(fd) = state.io.as_ref().map(StreamIo::fd) {
            match Loop::apply_interest(self.poller.as_mut(), fd, id, state.interest, want) {
                Ok(()) => state.interest = want,
                Err(e) => log_warn!("stream {}: interest update failed: {}", id, e),
            }
        }
        entry.active = !entry.closing
            && (state.reading
                || listening.is_some()
                || !state.write_queue.is_empty()
                || state.connect.is_some()
                || state.shutdown.is_some());
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    pub(crate) fn stream_read_start(
        &mut self,
        id: HandleId,
        provider: Box<dyn BufferProvider>,
        cb: ReadCb,
    ) -> UvResult<()> {
        let state = self.stream_state(id)?;
        if state.reading {
            return Err(UvError::AlreadyActive);
        }
        if !state.io.as_ref().map_or(false, StreamIo::is_connection) || !state.readable {
            return Err(UvError::Os(ErrorCode::ENOTCONN));
        }
        state.reading = true;
        state.read = Some(ReadState {
            provider,
            cb: Some(cb),
        });
        self.stream_sync(id);
        Ok(())
    }

    pub(crate) fn stream_read_stop(&mut self, id: HandleId) -> UvResult<()> {
        let state = self.stream_state(id)?;
        state.reading = false;
        state.read = None;
        self.stream_sync(id);
        Ok(())
    }

    fn stream_read(&mut self, id: HandleId) -> usize {
        let suggested = self.config.read_size;
        let mut ran = 0;
        for _ in 0..self.config.reads_per_event {
            let (mut cb, result) = {
                let Ok(state) = self.stream_state(id) else {
                    break;
                };
                if !state.reading {
                    break;
                }
                let (Some(io), Some(read)) = (state.io.as_mut(), state.read.as_mut()) else {
                    break;
                };
                let Some(cb) = read.cb.take() else {
                    break;
                };
                let mut buf = read.provider.acquire(suggested);
                let result = if buf.capacity() == 0 {
                    Err(ErrorCode::ENOBUFS)
                } else {
                    loop {
                        match io.read(buf.read_target()) {
                            Ok(0) => break Err(ErrorCode::EOF),
                            Ok(n) => {
                                buf.truncate(n);
                                break Ok(buf);
                            }
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                read.cb = Some(cb);
                                return ran;
                            }
                            Err(e) => break Err(ErrorCode::from_io(&e)),
                        }
                    }
                };
                if result.is_err() {
                    // EOF and errors end the read registration
                    state.reading = false;
                    state.read = None;
                }
                (cb, result)
            };
            let stop = result.is_err();
            if stop {
                self.stream_sync(id);
            }
            cb(self, id, result);
            ran += 1;
            if let Ok(state) = self.stream_state(id) {
                if state.reading {
                    if let Some(read) = state.read.as_mut() {
                        read.cb.get_or_insert(cb);
                    }
                }
            }
            if stop {
                break;
            }
        }
        ran
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    pub(crate) fn stream_write(&mut self, id: HandleId, buf: Buffer, cb: Option<StatusCb>) -> UvResult<RequestId> {
        let state = self.stream_state(id)?;
        if !state.io.as_ref().map_or(false, StreamIo::is_connection) || state.connect.is_some() {
            return Err(UvError::Os(ErrorCode::ENOTCONN));
        }
        if !state.writable || state.shut || state.shutdown.is_some() {
            return Err(UvError::Os(ErrorCode::EPIPE));
        }
        let req = WriteReq {
            handle: id,
            buf,
            written: 0,
            cb,
        };
        let rid = self.submit_request(RequestKind::Write, Some(id), RequestData::Write(req))?;
        let state = self.stream_state(id)?;
        state.write_queue.push_back(rid);
        if state.write_queue.len() == 1 {
            self.stream_flush(id, false);
        }
        self.stream_sync(id);
        Ok(rid)
    }

    pub(crate) fn stream_try_write(&mut self, id: HandleId, data: &[u8]) -> UvResult<usize> {
        let state = self.stream_state(id)?;
        if !state.write_queue.is_empty() {
            return Err(UvError::Os(ErrorCode::EAGAIN));
        }
        if !state.writable || state.shut {
            return Err(UvError::Os(ErrorCode::EPIPE));
        }
        let Some(io) = state.io.as_mut().filter(|io| io.is_connection()) else {
            return Err(UvError::Os(ErrorCode::ENOTCONN));
        };
        loop {
            match io.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(UvError::Os(ErrorCode::EAGAIN))
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn stream_shutdown(&mut self, id: HandleId, cb: StatusCb) -> UvResult<RequestId> {
        let state = self.stream_state(id)?;
        if !state.io.as_ref().map_or(false, StreamIo::is_connection) || state.connect.is_some() {
            return Err(UvError::Os(ErrorCode::ENOTCONN));
        }
        if state.shut || state.shutdown.is_some() {
            return Err(UvError::Os(ErrorCode::EALREADY));
        }
        let req = ShutdownReq { handle: id, cb: Some(cb) };
        let rid = self.submit_request(RequestKind::Shutdown, Some(id), RequestData::Shutdown(req))?;
        let state = self.stream_state(id)?;
        state.shutdown = Some(rid);
        if state.write_queue.is_empty() {
            self.stream_flush(id, false);
        }
        self.stream_sync(id);
        Ok(rid)
    }

    /// Write queued data until the descriptor would block, then run a
    /// pending shutdown if the queue drained.
    ///
    /// `direct` completes requests right away (I/O phase); otherwise the
    /// completions go through the pending queue. Returns the number of
    /// completions.
    fn stream_flush(&mut self, id: HandleId, direct: bool) -> usize {
        let mut done: Vec<(RequestId, Result<(), ErrorCode>)> = Vec::new();
        {
            let Some(HandleData::Stream(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
                return 0;
            };
            let Some(io) = state.io.as_mut() else {
                return 0;
            };
            let mut failed = None;
            while let Some(&rid) = state.write_queue.front() {
                let Some(RequestEntry {
                    data: RequestData::Write(req),
                    ..
                }) = self.requests.get_mut(rid.slot())
                else {
                    state.write_queue.pop_front();
                    continue;
                };
                if req.written >= req.buf.len() {
                    state.write_queue.pop_front();
                    done.push((rid, Ok(())));
                    continue;
                }
                match io.write(&req.buf[req.written..]) {
                    Ok(n) => req.written += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        failed = Some(ErrorCode::from_io(&e));
                        break;
                    }
                }
            }
            if let Some(code) = failed {
                log_debug!("stream {}: write failed: {}", id, code);
                done.extend(state.write_queue.drain(..).map(|rid| (rid, Err(code))));
            }
            if state.write_queue.is_empty() {
                if let Some(rid) = state.shutdown.take() {
                    state.shut = true;
                    let status = io.shutdown_write().map_err(|e| ErrorCode::from_io(&e));
                    done.push((rid, status));
                }
            }
        }
        let count = done.len();
        for (rid, status) in done {
            if direct {
                self.complete_request(rid, status);
            } else {
                self.defer_completion(rid, status);
            }
        }
        count
    }

    // ------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------

    pub(crate) fn stream_listen(&mut self, id: HandleId, backlog: i32, cb: ConnectionCb) -> UvResult<()> {
        let entry = self.live_entry(id)?;
        let kind = entry.kind;
        let HandleData::Stream(state) = &mut entry.data else {
            return Err(UvError::HandleClosed);
        };
        if state.listen.is_some() {
            return Err(UvError::AlreadyActive);
        }
        let io = match state.io.take() {
            Some(StreamIo::Bound(fd)) => {
                if let Err(e) = sys::socket::listen(fd.as_raw_fd(), backlog) {
                    state.io = Some(StreamIo::Bound(fd));
                    return Err(e.into());
                }
                match kind {
                    HandleKind::Tcp => StreamIo::TcpListener(TcpListener::from(fd)),
                    _ => StreamIo::UnixListener(UnixListener::from(fd)),
                }
            }
            other => {
                state.io = other;
                return Err(UvError::Os(ErrorCode::EINVAL));
            }
        };
        state.io = Some(io);
        state.listen = Some(ListenState {
            cb: Some(cb),
            pending: None,
        });
        self.stream_sync(id);
        Ok(())
    }

    fn stream_accept_ready(&mut self, id: HandleId) -> usize {
        let (mut cb, status) = {
            let Ok(state) = self.stream_state(id) else {
                return 0;
            };
            let (Some(io), Some(listen)) = (state.io.as_ref(), state.listen.as_mut()) else {
                return 0;
            };
            if listen.pending.is_some() {
                return 0;
            }
            let Some(cb) = listen.cb.take() else {
                return 0;
            };
            let status = match io.accept() {
                Ok(conn) => {
                    listen.pending = Some(conn);
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
                    listen.cb = Some(cb);
                    return 0;
                }
                Err(e) => Err(ErrorCode::from_io(&e)),
            };
            (cb, status)
        };
        self.stream_sync(id);
        cb(self, id, status);
        if let Ok(state) = self.stream_state(id) {
            if let Some(listen) = state.listen.as_mut() {
                listen.cb.get_or_insert(cb);
            }
        }
        1
    }

    pub(crate) fn stream_accept(&mut self, server: HandleId, client: HandleId) -> UvResult<()> {
        let server_kind = self.live_entry(server)?.kind;
        let client_entry = self.live_entry(client)?;
        if client_entry.kind != server_kind {
            return Err(UvError::Os(ErrorCode::EINVAL));
        }
        if matches!(&client_entry.data, HandleData::Stream(s) if s.io.is_some()) {
            return Err(UvError::Os(ErrorCode::EBUSY));
        }
        let conn = match self.stream_state(server)?.listen.as_mut() {
            Some(listen) => listen.pending.take(),
            None => return Err(UvError::Os(ErrorCode::EINVAL)),
        };
        let Some(conn) = conn else {
            return Err(UvError::Os(ErrorCode::EAGAIN));
        };
        self.stream_attach(client, conn)?;
        self.stream_sync(server);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Readiness and close
    // ------------------------------------------------------------------

    pub(crate) fn stream_io(&mut self, id: HandleId, ev: PollEvent) -> usize {
        let (connecting, listening) = match self.stream_state(id) {
            Ok(s) => (s.connect.is_some(), s.listen.is_some()),
            Err(_) => return 0,
        };
        let mut ran = 0;
        if connecting && (ev.writable || ev.error || ev.hangup) {
            ran += self.stream_connect_done(id);
        }
        if ev.readable || ev.hangup || ev.error {
            ran += if listening {
                self.stream_accept_ready(id)
            } else {
                self.stream_read(id)
            };
        }
        if ev.writable || ev.error || ev.hangup {
            ran += self.stream_flush(id, true);
        }
        self.stream_sync(id);
        ran
    }

    fn stream_connect_done(&mut self, id: HandleId) -> usize {
        let (rid, status) = {
            let Ok(state) = self.stream_state(id) else {
                return 0;
            };
            let Some(rid) = state.connect.take() else {
                return 0;
            };
            let status = match state.io.as_ref().map(|io| sys::socket::take_error(io.fd())) {
                Some(Ok(None)) => Ok(()),
                Some(Ok(Some(err))) | Some(Err(err)) => Err(ErrorCode::from_io(&err)),
                None => Err(ErrorCode::ENOTCONN),
            };
            state.readable = status.is_ok();
            state.writable = status.is_ok();
            (rid, status)
        };
        self.stream_sync(id);
        self.complete_request(rid, status);
        1
    }

    pub(crate) fn stream_on_close(&mut self, id: HandleId) {
        let (cancelled, forward) = {
            let Some(HandleData::Stream(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
                return;
            };
            state.reading = false;
            state.read = None;
            state.listen = None;
            let mut cancelled: Vec<RequestId> = state.write_queue.drain(..).collect();
            cancelled.extend(state.shutdown.take());
            cancelled.extend(state.connect.take());
            if let Some(io) = state.io.as_ref() {
                if !state.interest.is_none() {
                    if let Err(e) = self.poller.deregister(io.fd()) {
                        log_warn!("stream {}: deregister failed: {}", id, e);
                    }
                    state.interest = Interest::NONE;
                }
                if let Some(saved) = state.tty.take() {
                    tty::restore(io.fd(), &saved);
                }
            }
            (cancelled, state.forward)
        };
        for rid in cancelled {
            self.defer_completion(rid, Err(ErrorCode::ECANCELED));
        }
        if let Some(link) = forward {
            self.forward_on_close(link, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoopConfig, RunMode};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn round_trip(len: usize) {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        assert!(reader.is_readable(&lp) && !reader.is_writable(&lp));
        assert!(writer.is_writable(&lp) && !writer.is_readable(&lp));

        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let received = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&received);
        reader
            .read_start(&mut lp, move |lp, pipe, res| match res {
                Ok(buf) => r.borrow_mut().extend_from_slice(&buf),
                Err(e) => {
                    assert_eq!(e, ErrorCode::EOF);
                    pipe.close(lp).unwrap();
                }
            })
            .unwrap();

        let status = Rc::new(Cell::new(None));
        let s = Rc::clone(&status);
        writer
            .write(&mut lp, Buffer::from(payload.clone()), move |lp, pipe, st| {
                s.set(Some(st));
                pipe.close(lp).unwrap();
            })
            .unwrap();
        assert_eq!(status.get(), None);

        lp.run(RunMode::Default);
        assert_eq!(status.get(), Some(Ok(())));
        assert_eq!(*received.borrow(), payload);
        assert_eq!(lp.active_requests(), 0);
    }

    #[test]
    fn test_pipe_round_trip_empty() {
        round_trip(0);
    }

    #[test]
    fn test_pipe_round_trip_one_byte() {
        round_trip(1);
    }

    #[test]
    fn test_pipe_round_trip_64k() {
        round_trip(65536);
    }

    #[test]
    fn test_provider_called_before_each_delivery() {
        let mut lp = Loop::with_config(LoopConfig::new().read_size(4)).unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();

        let acquired = Rc::new(Cell::new(0usize));
        let delivered = Rc::new(Cell::new(0usize));
        let a = Rc::clone(&acquired);
        let d = Rc::clone(&delivered);
        let provider = move |suggested: usize| {
            assert_eq!(suggested, 4);
            a.set(a.get() + 1);
            Buffer::with_capacity(suggested)
        };
        let a = Rc::clone(&acquired);
        reader
            .read_start_with(&mut lp, provider, move |lp, pipe, res| {
                // every delivery, EOF included, follows its own acquire;
                // a read that would block acquires without delivering
                d.set(d.get() + 1);
                assert!(a.get() >= d.get());
                match res {
                    Ok(buf) => assert!(buf.len() <= 4),
                    Err(_) => pipe.close(lp).unwrap(),
                }
            })
            .unwrap();
        writer.queue_write(&mut lp, Buffer::from("0123456789")).unwrap();
        writer.close(&mut lp).unwrap();

        lp.run(RunMode::Default);
        // 10 bytes in 4-byte reads, then EOF
        assert_eq!(delivered.get(), 4);
        assert!(acquired.get() >= 4);
    }

    #[test]
    fn test_empty_provider_buffer() {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        let got = Rc::new(Cell::new(None));
        let g = Rc::clone(&got);
        reader
            .read_start_with(&mut lp, |_: usize| Buffer::empty(), move |lp, pipe, res| {
                g.set(Some(res.map(|b| b.len())));
                pipe.close(lp).unwrap();
            })
            .unwrap();
        writer.queue_write(&mut lp, Buffer::from("x")).unwrap();
        writer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
        assert_eq!(got.get(), Some(Err(ErrorCode::ENOBUFS)));
    }

    #[test]
    fn test_writes_complete_in_order() {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let o = Rc::clone(&order);
            writer
                .write(&mut lp, Buffer::from(vec![b'a'; 100]), move |_, _, st| {
                    st.unwrap();
                    o.borrow_mut().push(i);
                })
                .unwrap();
        }
        assert_eq!(writer.write_queue_size(&lp), 0);
        lp.run(RunMode::Default);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        reader.close(&mut lp).unwrap();
        writer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_close_cancels_queued_writes() {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        let statuses = Rc::new(RefCell::new(Vec::new()));
        // Far more than a pipe buffer holds, with nobody reading
        for _ in 0..2 {
            let s = Rc::clone(&statuses);
            writer
                .write(&mut lp, Buffer::from(vec![0u8; 4 << 20]), move |_, _, st| {
                    s.borrow_mut().push(st)
                })
                .unwrap();
        }
        assert!(writer.write_queue_size(&lp) >= 1);
        assert_eq!(
            writer.try_write(&mut lp, b"x"),
            Err(UvError::Os(ErrorCode::EAGAIN))
        );

        writer.close(&mut lp).unwrap();
        reader.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
        assert_eq!(
            *statuses.borrow(),
            vec![Err(ErrorCode::ECANCELED), Err(ErrorCode::ECANCELED)]
        );
        assert_eq!(lp.active_requests(), 0);
    }

    #[test]
    fn test_write_to_closed_reader_fails() {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        reader.close(&mut lp).unwrap();
        lp.run(RunMode::Default);

        let got = Rc::new(Cell::new(None));
        let g = Rc::clone(&got);
        writer
            .write(&mut lp, Buffer::from("lost"), move |lp, pipe, st| {
                g.set(Some(st));
                pipe.close(lp).unwrap();
            })
            .unwrap();
        lp.run(RunMode::Default);
        assert_eq!(got.get(), Some(Err(ErrorCode::EPIPE)));
    }

    #[test]
    fn test_read_start_twice_and_stop_idempotent() {
        let mut lp = Loop::init().unwrap();
        let (reader, writer) = Pipe::pair(&mut lp).unwrap();
        reader.read_start(&mut lp, |_, _, _| {}).unwrap();
        assert!(reader.is_active(&lp));
        assert_eq!(
            reader.read_start(&mut lp, |_, _, _| {}),
            Err(UvError::AlreadyActive)
        );
        reader.read_stop(&mut lp).unwrap();
        reader.read_stop(&mut lp).unwrap();
        assert!(!reader.is_active(&lp));
        assert_eq!(
            writer.read_start(&mut lp, |_, _, _| {}),
            Err(UvError::Os(ErrorCode::ENOTCONN))
        );
        reader.close(&mut lp).unwrap();
        writer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_shutdown_after_writes() {
        let mut lp = Loop::init().unwrap();
        let (a, b) = Pipe::socket_pair(&mut lp).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));

        let e = Rc::clone(&events);
        a.write(&mut lp, Buffer::from("bye"), move |_, _, st| {
            st.unwrap();
            e.borrow_mut().push("write");
        })
        .unwrap();
        let e = Rc::clone(&events);
        a.shutdown(&mut lp, move |_, _, st| {
            st.unwrap();
            e.borrow_mut().push("shutdown");
        })
        .unwrap();
        assert_eq!(
            a.write(&mut lp, Buffer::from("late"), |_, _, _| {}),
            Err(UvError::Os(ErrorCode::EPIPE))
        );

        let e = Rc::clone(&events);
        b.read_start(&mut lp, move |lp, pipe, res| match res {
            Ok(buf) => assert_eq!(buf.as_slice(), b"bye"),
            Err(code) => {
                assert!(code.is_eof());
                e.borrow_mut().push("eof");
                pipe.close(lp).unwrap();
            }
        })
        .unwrap();

        lp.run(RunMode::Default);
        assert_eq!(*events.borrow(), vec!["write", "shutdown", "eof"]);
        a.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
