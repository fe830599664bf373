//! Poll handles: readiness of an external descriptor
//!
//! The handle does not own the descriptor; closing it only stops watching.

use std::os::unix::io::RawFd;

use uvio_core::{log_warn, ErrorCode, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};
use crate::poller::{Interest, PollEvent};

/// Event mask for [`Poll::start`] and its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollEvents(u32);

impl PollEvents {
    pub const READABLE: PollEvents = PollEvents(1);
    pub const WRITABLE: PollEvents = PollEvents(2);
    pub const DISCONNECT: PollEvents = PollEvents(4);

    pub const fn empty() -> Self {
        PollEvents(0)
    }

    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !7 == 0 {
            Some(PollEvents(bits))
        } else {
            None
        }
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PollEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn interest(self) -> Interest {
        Interest::NONE
            .add_if(self.0 & (1 | 4) != 0, Interest::READABLE)
            .add_if(self.0 & 2 != 0, Interest::WRITABLE)
    }
}

impl std::ops::BitOr for PollEvents {
    type Output = PollEvents;

    fn bitor(self, rhs: PollEvents) -> PollEvents {
        PollEvents(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: PollEvents) {
        self.0 |= rhs.0;
    }
}

pub(crate) type PollCb = Box<dyn FnMut(&mut Loop, Poll, Result<PollEvents, ErrorCode>)>;

pub(crate) struct PollState {
    fd: RawFd,
    events: PollEvents,
    interest: Interest,
    cb: Option<PollCb>,
}

handle_type!(
    /// Watches a descriptor the caller owns.
    Poll,
    HandleKind::Poll
);

impl Poll {
    /// Watch `fd`. The descriptor is switched to non-blocking mode.
    pub fn init(lp: &mut Loop, fd: RawFd) -> UvResult<Poll> {
        crate::sys::set_nonblocking(fd, true)?;
        let state = PollState {
            fd,
            events: PollEvents::empty(),
            interest: Interest::NONE,
            cb: None,
        };
        lp.insert_handle(HandleKind::Poll, HandleData::Poll(state))
            .map(Poll)
    }

    /// Start watching for `events`, or change the mask of an active handle.
    ///
    /// An empty mask stops the handle.
    pub fn start<F>(&self, lp: &mut Loop, events: PollEvents, cb: F) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Poll, Result<PollEvents, ErrorCode>) + 'static,
    {
        lp.poll_state(self.0)?.cb = Some(Box::new(cb));
        if events.is_empty() {
            return self.stop(lp);
        }
        lp.poll_set_events(self.0, events)?;
        lp.set_active(self.0, true);
        Ok(())
    }

    pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
        lp.poll_set_events(self.0, PollEvents::empty())?;
        lp.set_active(self.0, false);
        Ok(())
    }

    pub fn fd(&self, lp: &mut Loop) -> UvResult<RawFd> {
        Ok(lp.poll_state(self.0)?.fd)
    }
}

impl Loop {
    fn poll_state(&mut self, id: HandleId) -> UvResult<&mut PollState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Poll(p) => Ok(p),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn poll_set_events(&mut self, id: HandleId, events: PollEvents) -> UvResult<()> {
        let Some(HandleData::Poll(p)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
            return Err(UvError::HandleClosed);
        };
        let want = events.interest();
        Loop::apply_interest(self.poller.as_mut(), p.fd, id, p.interest, want)?;
        p.interest = want;
        p.events = events;
        Ok(())
    }

    pub(crate) fn poll_on_close(&mut self, id: HandleId) {
        if let Err(e) = self.poll_set_events(id, PollEvents::empty()) {
            log_warn!("poll {}: deregister failed: {}", id, e);
        }
    }

    pub(crate) fn poll_event(&mut self, id: HandleId, ev: PollEvent) -> usize {
        let (cb, ready) = {
            let Ok(p) = self.poll_state(id) else {
                return 0;
            };
            let mut ready = PollEvents::empty();
            // An error condition wakes every direction the caller asked for
            if (ev.readable || ev.error) && p.events.contains(PollEvents::READABLE) {
                ready |= PollEvents::READABLE;
            }
            if (ev.writable || ev.error) && p.events.contains(PollEvents::WRITABLE) {
                ready |= PollEvents::WRITABLE;
            }
            if ev.hangup && p.events.contains(PollEvents::DISCONNECT) {
                ready |= PollEvents::DISCONNECT;
            }
            if ready.is_empty() {
                return 0;
            }
            (p.cb.take(), ready)
        };
        let Some(mut cb) = cb else {
            return 0;
        };
        cb(self, Poll(id), Ok(ready));
        if let Ok(p) = self.poll_state(id) {
            p.cb.get_or_insert(cb);
        }
        1
    }
}
