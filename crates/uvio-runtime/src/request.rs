//! In-flight request registry
//!
//! A request is created by a submission call, lives in the loop's request
//! table until its completion runs, and is removed by exactly one path:
//! [`Loop::finish_request`]. A request bound to a handle owns a
//! [`HandleRef`], taken at submission; `finish_request` is the only place
//! that gives it back, so a handle's in-flight count cannot drift.

use uvio_core::{ErrorCode, HandleId, RequestId, RequestKind, UvError, UvResult};

use crate::dns::AddrReq;
use crate::event_loop::Loop;
use crate::fs::FsReq;
use crate::handles::udp::UdpSendReq;
use crate::stream::{ConnectReq, ShutdownReq, WriteReq};

/// Logical reference from a request to the handle it operates on.
///
/// Not `Clone`: one token per increment of the handle's in-flight count.
#[derive(Debug)]
pub(crate) struct HandleRef {
    id: HandleId,
}

impl HandleRef {
    pub(crate) fn id(&self) -> HandleId {
        self.id
    }
}

pub(crate) enum RequestData {
    Write(WriteReq),
    Shutdown(ShutdownReq),
    Connect(ConnectReq),
    UdpSend(UdpSendReq),
    Fs(FsReq),
    GetAddrinfo(AddrReq),
    FsPollStat,
}

pub(crate) struct RequestEntry {
    pub(crate) kind: RequestKind,
    pub(crate) owner: Option<HandleRef>,
    pub(crate) data: RequestData,
}

impl Loop {
    /// Register a request, taking a reference on `owner` if given.
    ///
    /// A closing or stale owner fails with `HandleClosed`.
    pub(crate) fn submit_request(
        &mut self,
        kind: RequestKind,
        owner: Option<HandleId>,
        data: RequestData,
    ) -> UvResult<RequestId> {
        let owner = match owner {
            Some(id) => {
                self.live_entry(id)?.inflight += 1;
                Some(HandleRef { id })
            }
            None => None,
        };
        match self.requests.insert(RequestEntry { kind, owner, data }) {
            Some(slot) => Ok(RequestId::new(slot)),
            None => Err(UvError::Os(ErrorCode::ENOMEM)),
        }
    }

    /// Remove a request and drop its handle reference.
    ///
    /// Returns the request's data for the completion path, or `None` if the
    /// request already finished.
    pub(crate) fn finish_request(&mut self, rid: RequestId) -> Option<(Option<HandleId>, RequestData)> {
        let entry = self.requests.remove(rid.slot())?;
        let owner = entry.owner.map(|r| {
            let id = r.id();
            if let Some(handle) = self.handles.get_mut(id.slot()) {
                debug_assert!(handle.inflight > 0);
                handle.inflight = handle.inflight.saturating_sub(1);
            }
            id
        });
        Some((owner, entry.data))
    }

    pub(crate) fn request_mut(&mut self, rid: RequestId) -> Option<&mut RequestEntry> {
        self.requests.get_mut(rid.slot())
    }

    /// Queue a status-only completion for the pending phase
    pub(crate) fn defer_completion(&mut self, rid: RequestId, status: Result<(), ErrorCode>) {
        self.pending.push_back((rid, status));
    }

    /// Finish a status-only request and run its callback now
    pub(crate) fn complete_request(&mut self, rid: RequestId, status: Result<(), ErrorCode>) {
        let Some((_, data)) = self.finish_request(rid) else {
            return;
        };
        match data {
            RequestData::Write(req) => req.complete(self, status),
            RequestData::Shutdown(req) => req.complete(self, status),
            RequestData::Connect(req) => req.complete(self, status),
            RequestData::UdpSend(req) => req.complete(self, status),
            RequestData::Fs(_) | RequestData::GetAddrinfo(_) | RequestData::FsPollStat => {
                uvio_core::log_error!("request {} is not status-only", rid);
            }
        }
    }

    /// Run deferred completions. Returns whether any ran.
    pub(crate) fn run_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let batch: Vec<_> = self.pending.drain(..).collect();
        for (rid, status) in batch {
            self.complete_request(rid, status);
        }
        true
    }
}
