//! TCP streams

use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::OwnedFd;

use uvio_core::{ErrorCode, HandleId, HandleKind, RequestId, RequestKind, UvError, UvResult};

use super::{ConnectReq, StatusCb, StreamIo};
use crate::event_loop::Loop;
use crate::handle::handle_type;
use crate::request::RequestData;
use crate::sys::socket::{self, ConnectStart};

handle_type!(
    /// TCP socket: listener or connection.
    Tcp,
    HandleKind::Tcp
);

impl Tcp {
    pub fn init(lp: &mut Loop) -> UvResult<Tcp> {
        lp.stream_init(HandleKind::Tcp).map(Tcp)
    }

    /// Adopt a connected socket
    pub fn open(&self, lp: &mut Loop, sock: OwnedFd) -> UvResult<()> {
        lp.stream_attach(self.0, StreamIo::Tcp(TcpStream::from(sock)))
    }

    /// Bind to `addr`. `EALREADY` if the socket already has an address.
    pub fn bind(&self, lp: &mut Loop, addr: SocketAddr) -> UvResult<()> {
        if lp.stream_state(self.0)?.io.is_some() {
            return Err(UvError::Os(ErrorCode::EALREADY));
        }
        let fd = socket::tcp_bind(addr)?;
        lp.stream_attach(self.0, StreamIo::Bound(fd))
    }

    /// Start a non-blocking connect. `cb` reports the outcome, including
    /// immediate failures such as a refused loopback connect.
    pub fn connect<F>(&self, lp: &mut Loop, addr: SocketAddr, cb: F) -> UvResult<RequestId>
    where
        F: FnOnce(&mut Loop, Tcp, Result<(), ErrorCode>) + 'static,
    {
        let cb: StatusCb = Box::new(move |lp: &mut Loop, id: HandleId, status| cb(lp, Tcp(id), status));
        lp.tcp_connect(self.0, addr, cb)
    }

    /// Disable Nagle's algorithm
    pub fn nodelay(&self, lp: &mut Loop, on: bool) -> UvResult<()> {
        let fd = lp.tcp_fd(self.0)?;
        socket::set_nodelay(fd, on)?;
        Ok(())
    }

    pub fn local_addr(&self, lp: &mut Loop) -> UvResult<SocketAddr> {
        match lp.stream_state(self.0)?.io.as_ref() {
            Some(StreamIo::Tcp(s)) => Ok(s.local_addr()?),
            Some(StreamIo::TcpListener(l)) => Ok(l.local_addr()?),
            Some(StreamIo::Bound(fd)) => {
                let fd = fd.try_clone()?;
                let addr = std::net::TcpListener::from(fd).local_addr()?;
                Ok(addr)
            }
            _ => Err(UvError::Os(ErrorCode::EBADF)),
        }
    }

    pub fn peer_addr(&self, lp: &mut Loop) -> UvResult<SocketAddr> {
        match lp.stream_state(self.0)?.io.as_ref() {
            Some(StreamIo::Tcp(s)) => Ok(s.peer_addr()?),
            _ => Err(UvError::Os(ErrorCode::ENOTCONN)),
        }
    }
}

impl Loop {
    fn tcp_fd(&mut self, id: HandleId) -> UvResult<std::os::unix::io::RawFd> {
        match self.stream_state(id)?.io.as_ref() {
            Some(io) => Ok(io.fd()),
            None => Err(UvError::Os(ErrorCode::EBADF)),
        }
    }

    fn tcp_connect(&mut self, id: HandleId, addr: SocketAddr, cb: StatusCb) -> UvResult<RequestId> {
        let state = self.stream_state(id)?;
        if state.connect.is_some() {
            return Err(UvError::Os(ErrorCode::EALREADY));
        }
        let bound = match state.io.take() {
            None => None,
            Some(StreamIo::Bound(fd)) => Some(fd),
            Some(other) => {
                state.io = Some(other);
                return Err(UvError::Os(ErrorCode::from_errno(libc::EISCONN)));
            }
        };

        let req = ConnectReq { handle: id, cb: Some(cb) };
        let rid = self.submit_request(RequestKind::Connect, Some(id), RequestData::Connect(req))?;
        let started = match bound {
            Some(fd) => socket::connect_fd(fd, addr),
            None => socket::tcp_connect(addr),
        };
        match started {
            Ok(ConnectStart::Done(fd)) => {
                let status = self
                    .stream_attach(id, StreamIo::Tcp(TcpStream::from(fd)))
                    .map_err(|e| e.code());
                self.defer_completion(rid, status);
            }
            Ok(ConnectStart::InProgress(fd)) => {
                match self.stream_attach(id, StreamIo::Tcp(TcpStream::from(fd))) {
                    Ok(()) => {
                        if let Ok(state) = self.stream_state(id) {
                            state.connect = Some(rid);
                            // Not usable until the connect resolves
                            state.readable = false;
                            state.writable = false;
                        }
                    }
                    Err(e) => self.defer_completion(rid, Err(e.code())),
                }
            }
            Err(e) => self.defer_completion(rid, Err(ErrorCode::from_io(&e))),
        }
        self.stream_sync(id);
        Ok(rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;
    use crate::{Handle, RunMode};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use uvio_core::Buffer;

    #[test]
    fn test_echo() {
        let mut lp = Loop::init().unwrap();
        let server = Tcp::init(&mut lp).unwrap();
        server.bind(&mut lp, "127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr(&mut lp).unwrap();
        assert_eq!(
            server.bind(&mut lp, addr),
            Err(UvError::Os(ErrorCode::EALREADY))
        );

        server
            .listen(&mut lp, 16, |lp, server, status| {
                status.unwrap();
                let conn = Tcp::init(lp).unwrap();
                server.accept(lp, conn).unwrap();
                assert_eq!(server.accept(lp, conn), Err(UvError::Os(ErrorCode::EBUSY)));
                conn.read_start(lp, move |lp, conn, res| match res {
                    Ok(buf) => {
                        conn.write(lp, buf, |_, _, st| st.unwrap()).unwrap();
                    }
                    Err(_) => {
                        conn.close(lp).unwrap();
                        server.close(lp).unwrap();
                    }
                })
                .unwrap();
            })
            .unwrap();

        let echoed = Rc::new(RefCell::new(Vec::new()));
        let connected = Rc::new(Cell::new(false));
        let client = Tcp::init(&mut lp).unwrap();
        let (e, c) = (Rc::clone(&echoed), Rc::clone(&connected));
        client
            .connect(&mut lp, addr, move |lp, client, status| {
                status.unwrap();
                c.set(true);
                client.nodelay(lp, true).unwrap();
                assert_eq!(client.peer_addr(lp).unwrap(), addr);
                client.write(lp, Buffer::from("ping"), |_, _, st| st.unwrap()).unwrap();
                client
                    .read_start(lp, move |lp, client, res| {
                        e.borrow_mut().extend_from_slice(&res.unwrap());
                        if e.borrow().len() == 4 {
                            client.close(lp).unwrap();
                        }
                    })
                    .unwrap();
            })
            .unwrap();
        assert!(!connected.get());

        lp.run(RunMode::Default);
        assert!(connected.get());
        assert_eq!(echoed.borrow().as_slice(), b"ping");
        assert_eq!(lp.active_requests(), 0);
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let mut lp = Loop::init().unwrap();
        let got = Rc::new(Cell::new(None));
        let g = Rc::clone(&got);
        let client = Tcp::init(&mut lp).unwrap();
        client
            .connect(&mut lp, addr, move |lp, client, status| {
                g.set(Some(status));
                client.close(lp).unwrap();
            })
            .unwrap();
        assert_eq!(got.get(), None);
        lp.run(RunMode::Default);
        assert_eq!(
            got.get(),
            Some(Err(ErrorCode::from_errno(libc::ECONNREFUSED)))
        );
    }

    #[test]
    fn test_unconnected_operations() {
        let mut lp = Loop::init().unwrap();
        let tcp = Tcp::init(&mut lp).unwrap();
        assert_eq!(tcp.local_addr(&mut lp), Err(UvError::Os(ErrorCode::EBADF)));
        assert_eq!(tcp.peer_addr(&mut lp), Err(UvError::Os(ErrorCode::ENOTCONN)));
        assert_eq!(
            tcp.write(&mut lp, Buffer::from("x"), |_, _, _| {}),
            Err(UvError::Os(ErrorCode::ENOTCONN))
        );
        assert_eq!(
            tcp.listen(&mut lp, 8, |_, _, _| {}),
            Err(UvError::Os(ErrorCode::EINVAL))
        );
        // not listening
        assert_eq!(tcp.accept(&mut lp, tcp), Err(UvError::Os(ErrorCode::EINVAL)));
        tcp.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
