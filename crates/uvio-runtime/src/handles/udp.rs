//! UDP handles
//!
//! Datagram sends are attempted at submission; a send that would block is
//! queued and retried when the socket turns writable. Either way the
//! callback runs from the loop, never inside `send`.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;

use uvio_core::{
    log_warn, Buffer, BufferProvider, ErrorCode, HandleId, HandleKind, RequestId, RequestKind,
    UvError, UvResult,
};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};
use crate::poller::{Interest, PollEvent};
use crate::request::{RequestData, RequestEntry};

pub(crate) type RecvCb = Box<dyn FnMut(&mut Loop, Udp, Result<(Buffer, SocketAddr), ErrorCode>)>;
pub(crate) type UdpSendCb = Box<dyn FnOnce(&mut Loop, Udp, Result<(), ErrorCode>)>;

struct RecvState {
    provider: Box<dyn BufferProvider>,
    cb: Option<RecvCb>,
}

pub(crate) struct UdpState {
    sock: Option<UdpSocket>,
    interest: Interest,
    recv: Option<RecvState>,
    receiving: bool,
    send_queue: VecDeque<RequestId>,
}

pub(crate) struct UdpSendReq {
    handle: HandleId,
    buf: Buffer,
    addr: SocketAddr,
    cb: Option<UdpSendCb>,
}

impl UdpSendReq {
    pub(crate) fn complete(self, lp: &mut Loop, status: Result<(), ErrorCode>) {
        let UdpSendReq { handle, buf, cb, .. } = self;
        if let Some(cb) = cb {
            cb(lp, Udp(handle), status);
        }
        drop(buf);
    }
}

handle_type!(
    /// Datagram socket.
    Udp,
    HandleKind::Udp
);

impl Udp {
    pub fn init(lp: &mut Loop) -> UvResult<Udp> {
        let state = UdpState {
            sock: None,
            interest: Interest::NONE,
            recv: None,
            receiving: false,
            send_queue: VecDeque::new(),
        };
        lp.insert_handle(HandleKind::Udp, HandleData::Udp(state))
            .map(Udp)
    }

    /// Bind to `addr`. `EALREADY` if the socket is already bound.
    pub fn bind(&self, lp: &mut Loop, addr: SocketAddr) -> UvResult<()> {
        let state = lp.udp_state(self.0)?;
        if state.sock.is_some() {
            return Err(UvError::Os(ErrorCode::EALREADY));
        }
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        state.sock = Some(sock);
        Ok(())
    }

    pub fn local_addr(&self, lp: &mut Loop) -> UvResult<SocketAddr> {
        match &lp.udp_state(self.0)?.sock {
            Some(sock) => Ok(sock.local_addr()?),
            None => Err(UvError::Os(ErrorCode::EBADF)),
        }
    }

    /// Send one datagram. An unbound socket is bound to the wildcard address
    /// of `addr`'s family first.
    pub fn send<F>(&self, lp: &mut Loop, buf: Buffer, addr: SocketAddr, cb: F) -> UvResult<RequestId>
    where
        F: FnOnce(&mut Loop, Udp, Result<(), ErrorCode>) + 'static,
    {
        lp.udp_send(self.0, buf, addr, Some(Box::new(cb)))
    }

    /// Immediate send; `EAGAIN` when sends are queued or the socket is full
    pub fn try_send(&self, lp: &mut Loop, data: &[u8], addr: SocketAddr) -> UvResult<usize> {
        lp.udp_autobind(self.0, addr)?;
        let state = lp.udp_state(self.0)?;
        if !state.send_queue.is_empty() {
            return Err(UvError::Os(ErrorCode::EAGAIN));
        }
        match &state.sock {
            Some(sock) => Ok(sock.send_to(data, addr)?),
            None => Err(UvError::Os(ErrorCode::EBADF)),
        }
    }

    /// Deliver incoming datagrams, each in a buffer from `provider`
    pub fn recv_start<P, F>(&self, lp: &mut Loop, provider: P, cb: F) -> UvResult<()>
    where
        P: BufferProvider + 'static,
        F: FnMut(&mut Loop, Udp, Result<(Buffer, SocketAddr), ErrorCode>) + 'static,
    {
        let state = lp.udp_state(self.0)?;
        if state.receiving {
            return Err(UvError::AlreadyActive);
        }
        if state.sock.is_none() {
            return Err(UvError::Os(ErrorCode::EBADF));
        }
        state.receiving = true;
        state.recv = Some(RecvState {
            provider: Box::new(provider),
            cb: Some(Box::new(cb)),
        });
        lp.udp_sync(self.0);
        Ok(())
    }

    pub fn recv_stop(&self, lp: &mut Loop) -> UvResult<()> {
        let state = lp.udp_state(self.0)?;
        state.receiving = false;
        state.recv = None;
        lp.udp_sync(self.0);
        Ok(())
    }
}

impl Loop {
    fn udp_state(&mut self, id: HandleId) -> UvResult<&mut UdpState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Udp(u) => Ok(u),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn udp_autobind(&mut self, id: HandleId, peer: SocketAddr) -> UvResult<()> {
        let state = self.udp_state(id)?;
        if state.sock.is_some() {
            return Ok(());
        }
        let any: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let sock = UdpSocket::bind(any)?;
        sock.set_nonblocking(true)?;
        state.sock = Some(sock);
        Ok(())
    }

    fn udp_send(
        &mut self,
        id: HandleId,
        buf: Buffer,
        addr: SocketAddr,
        cb: Option<UdpSendCb>,
    ) -> UvResult<RequestId> {
        self.udp_autobind(id, addr)?;
        let req = UdpSendReq {
            handle: id,
            buf,
            addr,
            cb,
        };
        let rid = self.submit_request(RequestKind::UdpSend, Some(id), RequestData::UdpSend(req))?;
        self.udp_state(id)?.send_queue.push_back(rid);
        if self.udp_state(id)?.send_queue.len() == 1 {
            self.udp_flush(id, false);
        }
        self.udp_sync(id);
        Ok(rid)
    }

    /// Send queued datagrams until the socket would block.
    ///
    /// `direct` completes requests right away (I/O phase); otherwise the
    /// completions go through the pending queue.
    fn udp_flush(&mut self, id: HandleId, direct: bool) -> usize {
        let mut done = Vec::new();
        {
            let Some(HandleData::Udp(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
                return 0;
            };
            let Some(sock) = state.sock.as_ref() else {
                return 0;
            };
            while let Some(&rid) = state.send_queue.front() {
                let result = match self.requests.get(rid.slot()) {
                    Some(RequestEntry {
                        data: RequestData::UdpSend(req),
                        ..
                    }) => sock.send_to(&req.buf, req.addr),
                    _ => {
                        state.send_queue.pop_front();
                        continue;
                    }
                };
                let status = match result {
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => Err(ErrorCode::from_io(&e)),
                };
                state.send_queue.pop_front();
                done.push((rid, status));
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

    fn udp_sync(&mut self, id: HandleId) {
        let Some(entry) = self.handles.get_mut(id.slot()) else {
            return;
        };
        let HandleData::Udp(state) = &mut entry.data else {
            return;
        };
        let Some(fd) = state.sock.as_ref().map(|s| s.as_raw_fd()) else {
            return;
        };
        let want = Interest::NONE
            .add_if(state.receiving, Interest::READABLE)
            .add_if(!state.send_queue.is_empty(), Interest::WRITABLE);
        match Loop::apply_interest(self.poller.as_mut(), fd, id, state.interest, want) {
            Ok(()) => state.interest = want,
            Err(e) => log_warn!("udp {}: interest update failed: {}", id, e),
        }
        entry.active = !entry.closing && (state.receiving || !state.send_queue.is_empty());
    }

    pub(crate) fn udp_io(&mut self, id: HandleId, ev: PollEvent) -> usize {
        let mut ran = 0;
        if ev.readable || ev.error {
            ran += self.udp_recv(id);
        }
        if ev.writable || ev.error {
            ran += self.udp_flush(id, true);
        }
        self.udp_sync(id);
        ran
    }

    fn udp_recv(&mut self, id: HandleId) -> usize {
        let suggested = self.config.read_size;
        let mut ran = 0;
        for _ in 0..self.config.reads_per_event {
            let (mut cb, result) = {
                let Ok(state) = self.udp_state(id) else {
                    break;
                };
                if !state.receiving {
                    break;
                }
                let (Some(sock), Some(recv)) = (state.sock.as_ref(), state.recv.as_mut()) else {
                    break;
                };
                let Some(cb) = recv.cb.take() else {
                    break;
                };
                let mut buf = recv.provider.acquire(suggested);
                let result = if buf.capacity() == 0 {
                    Err(ErrorCode::ENOBUFS)
                } else {
                    match sock.recv_from(buf.read_target()) {
                        Ok((n, from)) => {
                            buf.truncate(n);
                            Ok((buf, from))
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            recv.cb = Some(cb);
                            break;
                        }
                        Err(e) => Err(ErrorCode::from_io(&e)),
                    }
                };
                (cb, result)
            };
            let stop = result.is_err();
            cb(self, Udp(id), result);
            ran += 1;
            if let Ok(state) = self.udp_state(id) {
                if let Some(recv) = state.recv.as_mut() {
                    recv.cb.get_or_insert(cb);
                }
            }
            if stop {
                break;
            }
        }
        ran
    }

    pub(crate) fn udp_on_close(&mut self, id: HandleId) {
        let queued: Vec<RequestId> = match self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            Some(HandleData::Udp(state)) => {
                state.receiving = false;
                state.recv = None;
                state.send_queue.drain(..).collect()
            }
            _ => return,
        };
        for rid in queued {
            self.defer_completion(rid, Err(ErrorCode::ECANCELED));
        }
        let Some(HandleData::Udp(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
            return;
        };
        if let Some(fd) = state.sock.as_ref().map(|s| s.as_raw_fd()) {
            if !state.interest.is_none() {
                if let Err(e) = self.poller.deregister(fd) {
                    log_warn!("udp {}: deregister failed: {}", id, e);
                }
                state.interest = Interest::NONE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handle, RunMode};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_send_and_receive() {
        let mut lp = Loop::init().unwrap();
        let server = Udp::init(&mut lp).unwrap();
        server.bind(&mut lp, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr(&mut lp).unwrap();

        let got = Rc::new(RefCell::new(Vec::new()));
        let g = Rc::clone(&got);
        server
            .recv_start(&mut lp, |n: usize| Buffer::with_capacity(n), move |lp, h, res| {
                let (buf, _from) = res.unwrap();
                g.borrow_mut().push(buf.to_string_lossy(None));
                h.close(lp).unwrap();
            })
            .unwrap();

        let client = Udp::init(&mut lp).unwrap();
        let sent = Rc::new(RefCell::new(None));
        let s = Rc::clone(&sent);
        client
            .send(&mut lp, Buffer::from("ping"), addr, move |lp, h, status| {
                *s.borrow_mut() = Some(status);
                h.close(lp).unwrap();
            })
            .unwrap();
        // callback never runs inside send
        assert!(sent.borrow().is_none());

        lp.run(RunMode::Default);
        assert_eq!(*sent.borrow(), Some(Ok(())));
        assert_eq!(*got.borrow(), vec!["ping".to_string()]);
        assert_eq!(lp.active_requests(), 0);
    }

    #[test]
    fn test_double_bind() {
        let mut lp = Loop::init().unwrap();
        let udp = Udp::init(&mut lp).unwrap();
        assert_eq!(udp.local_addr(&mut lp), Err(UvError::Os(ErrorCode::EBADF)));
        udp.bind(&mut lp, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(
            udp.bind(&mut lp, "127.0.0.1:0".parse().unwrap()),
            Err(UvError::Os(ErrorCode::EALREADY))
        );
        udp.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
