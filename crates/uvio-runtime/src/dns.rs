//! Address resolution
//!
//! Lookups block, so they run on the worker pool through a [`Resolver`].
//! The loop owns one resolver, the system `getaddrinfo` unless replaced
//! with [`Loop::set_resolver`]. Completion hands the callback every IPv4
//! address in result order followed by every IPv6 address in result order.
//!
//! [`SystemResolver`] copies the native `addrinfo` list into owned
//! [`AddrInfo`] values and frees it on the worker, before the callback runs.
//! The owned list is what the loop holds, and it is dropped only after the
//! callback returns.

use std::ffi::{CStr, CString};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use uvio_core::{log_error, log_trace, ErrorCode, RequestId, RequestKind, UvResult};

use crate::event_loop::Loop;
use crate::pool::WorkOutput;
use crate::request::RequestData;

/// Lookup filters, mirroring `struct addrinfo` hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddrHints {
    /// `AF_INET`, `AF_INET6` or 0 for either
    pub family: i32,
    pub socktype: i32,
    pub protocol: i32,
    /// `AI_*` flags
    pub flags: i32,
}

/// One resolved address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrInfo {
    pub addr: SocketAddr,
    pub socktype: i32,
    pub protocol: i32,
}

/// Blocking name lookup, run on a worker thread
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: Option<&AddrHints>,
    ) -> Result<Vec<AddrInfo>, ErrorCode>;
}

/// `getaddrinfo(3)`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

fn gai_code(ret: libc::c_int) -> ErrorCode {
    match ret {
        libc::EAI_AGAIN => ErrorCode::EAI_AGAIN,
        libc::EAI_BADFLAGS => ErrorCode::EAI_BADFLAGS,
        libc::EAI_FAIL => ErrorCode::EAI_FAIL,
        libc::EAI_FAMILY => ErrorCode::EAI_FAMILY,
        libc::EAI_MEMORY => ErrorCode::EAI_MEMORY,
        libc::EAI_NONAME => ErrorCode::EAI_NONAME,
        libc::EAI_SERVICE => ErrorCode::EAI_SERVICE,
        libc::EAI_SOCKTYPE => ErrorCode::EAI_SOCKTYPE,
        libc::EAI_SYSTEM => ErrorCode::last_os_error(),
        _ => ErrorCode::EAI_FAIL,
    }
}

fn c_arg(s: Option<&str>) -> Result<Option<CString>, ErrorCode> {
    s.map(|s| CString::new(s).map_err(|_| ErrorCode::EAI_NONAME))
        .transpose()
}

/// # Safety
/// `ai` must come from a successful `getaddrinfo`.
unsafe fn convert(ai: &libc::addrinfo) -> Option<AddrInfo> {
    if ai.ai_addr.is_null() {
        return None;
    }
    let addr = match ai.ai_family {
        libc::AF_INET => {
            let sin = &*(ai.ai_addr as *const libc::sockaddr_in);
            SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                u16::from_be(sin.sin_port),
            ))
        }
        libc::AF_INET6 => {
            let sin6 = &*(ai.ai_addr as *const libc::sockaddr_in6);
            SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            ))
        }
        _ => return None,
    };
    Some(AddrInfo {
        addr,
        socktype: ai.ai_socktype,
        protocol: ai.ai_protocol,
    })
}

impl Resolver for SystemResolver {
    fn resolve(
        &self,
        node: Option<&str>,
        service: Option<&str>,
        hints: Option<&AddrHints>,
    ) -> Result<Vec<AddrInfo>, ErrorCode> {
        let node = c_arg(node)?;
        let service = c_arg(service)?;
        if node.is_none() && service.is_none() {
            return Err(ErrorCode::EAI_NONAME);
        }

        // SAFETY: zeroed addrinfo is the documented empty hint
        let mut raw_hints: libc::addrinfo = unsafe { std::mem::zeroed() };
        if let Some(h) = hints {
            raw_hints.ai_family = h.family;
            raw_hints.ai_socktype = h.socktype;
            raw_hints.ai_protocol = h.protocol;
            raw_hints.ai_flags = h.flags;
        }

        let mut list: *mut libc::addrinfo = std::ptr::null_mut();
        // SAFETY: every pointer is either null or a live C string / struct
        let ret = unsafe {
            libc::getaddrinfo(
                node.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
                service.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
                if hints.is_some() {
                    &raw_hints as *const libc::addrinfo
                } else {
                    std::ptr::null()
                },
                &mut list,
            )
        };
        if ret != 0 {
            return Err(gai_code(ret));
        }

        let mut out = Vec::new();
        let mut cur = list;
        while !cur.is_null() {
            // SAFETY: cur walks the list getaddrinfo returned
            let ai = unsafe { &*cur };
            if let Some(info) = unsafe { convert(ai) } {
                out.push(info);
            }
            cur = ai.ai_next;
        }
        // SAFETY: list came from getaddrinfo and is freed once
        unsafe { libc::freeaddrinfo(list) };
        Ok(out)
    }
}

type ResolveCb = Box<dyn FnOnce(&mut Loop, Result<Vec<SocketAddr>, ErrorCode>)>;

/// Pending lookup
pub(crate) struct AddrReq {
    cb: Option<ResolveCb>,
}

/// IPv4 first, then IPv6, each in result order
fn order(list: &[AddrInfo]) -> Vec<SocketAddr> {
    let v4 = list.iter().filter(|a| a.addr.is_ipv4());
    let v6 = list.iter().filter(|a| a.addr.is_ipv6());
    v4.chain(v6).map(|a| a.addr).collect()
}

/// Resolve `node`/`service` on the worker pool. `cb` gets the ordered
/// addresses or the resolver's error code.
pub fn resolve<F>(
    lp: &mut Loop,
    cb: F,
    node: Option<&str>,
    service: Option<&str>,
    hints: Option<AddrHints>,
) -> UvResult<RequestId>
where
    F: FnOnce(&mut Loop, Result<Vec<SocketAddr>, ErrorCode>) + 'static,
{
    let req = AddrReq {
        cb: Some(Box::new(cb)),
    };
    let rid = lp.submit_request(RequestKind::GetAddrinfo, None, RequestData::GetAddrinfo(req))?;

    let resolver = Arc::clone(&lp.resolver);
    let node = node.map(str::to_owned);
    let service = service.map(str::to_owned);
    let work = Box::new(move || {
        WorkOutput::Resolve(resolver.resolve(node.as_deref(), service.as_deref(), hints.as_ref()))
    });
    if let Err(e) = lp.queue_work(rid, work) {
        lp.finish_request(rid);
        return Err(e);
    }
    Ok(rid)
}

pub(crate) fn complete(lp: &mut Loop, rid: RequestId, output: WorkOutput) {
    let result = match output {
        WorkOutput::Resolve(r) => r,
        WorkOutput::Panicked => Err(ErrorCode::EAI_FAIL),
        _ => {
            log_error!("resolve request {} got a foreign completion", rid);
            Err(ErrorCode::EAI_FAIL)
        }
    };
    let Some((_, RequestData::GetAddrinfo(mut req))) = lp.finish_request(rid) else {
        return;
    };
    let ordered = result.as_deref().map(order).map_err(|&code| code);
    log_trace!("resolve request {} done: {:?}", rid, ordered.as_ref().map(Vec::len));
    if let Some(cb) = req.cb.take() {
        cb(lp, ordered);
    }
    drop(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunMode;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixed(Result<Vec<AddrInfo>, ErrorCode>);

    impl Resolver for Fixed {
        fn resolve(
            &self,
            node: Option<&str>,
            service: Option<&str>,
            _hints: Option<&AddrHints>,
        ) -> Result<Vec<AddrInfo>, ErrorCode> {
            assert_eq!(node, Some("example.test"));
            assert_eq!(service, Some("80"));
            self.0.clone()
        }
    }

    fn info(s: &str) -> AddrInfo {
        AddrInfo {
            addr: s.parse().unwrap(),
            socktype: libc::SOCK_STREAM,
            protocol: 0,
        }
    }

    fn run_lookup(lp: &mut Loop) -> Result<Vec<String>, ErrorCode> {
        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        resolve(
            lp,
            move |_, res| {
                *g.borrow_mut() = Some(res.map(|v| v.iter().map(|a| a.ip().to_string()).collect()));
            },
            Some("example.test"),
            Some("80"),
            None,
        )
        .unwrap();
        assert!(got.borrow().is_none());
        lp.run(RunMode::Default);
        assert_eq!(lp.active_requests(), 0);
        let out = got.borrow_mut().take().unwrap();
        out
    }

    #[test]
    fn test_ipv4_before_ipv6() {
        let mut lp = Loop::init().unwrap();
        lp.set_resolver(Arc::new(Fixed(Ok(vec![
            info("[2606:2800:220:1:248:1893:25c8:1946]:80"),
            info("93.184.216.34:80"),
            info("[::1]:80"),
            info("10.0.0.1:80"),
        ]))));
        assert_eq!(
            run_lookup(&mut lp).unwrap(),
            vec![
                "93.184.216.34",
                "10.0.0.1",
                "2606:2800:220:1:248:1893:25c8:1946",
                "::1"
            ]
        );
    }

    #[test]
    fn test_failure_code_passed_through() {
        let mut lp = Loop::init().unwrap();
        lp.set_resolver(Arc::new(Fixed(Err(ErrorCode::EAI_NONAME))));
        assert_eq!(run_lookup(&mut lp), Err(ErrorCode::EAI_NONAME));
    }

    #[test]
    fn test_system_numeric_host() {
        let hints = AddrHints {
            socktype: libc::SOCK_STREAM,
            flags: libc::AI_NUMERICHOST | libc::AI_NUMERICSERV,
            ..AddrHints::default()
        };
        let got = SystemResolver
            .resolve(Some("127.0.0.1"), Some("8080"), Some(&hints))
            .unwrap();
        assert_eq!(got[0].addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(
            SystemResolver.resolve(None, None, None),
            Err(ErrorCode::EAI_NONAME)
        );
        assert_eq!(
            SystemResolver.resolve(Some("not an address"), None, Some(&hints)),
            Err(ErrorCode::EAI_NONAME)
        );
    }
}
