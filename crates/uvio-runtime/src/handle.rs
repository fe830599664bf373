//! Handle registry entries and the common handle API
//!
//! Every handle kind is a `Copy` newtype over a [`HandleId`]; the state lives
//! in the loop's slot table as a [`HandleEntry`]. Kind-specific state is one
//! variant of the closed [`HandleData`] enum, so dispatch is a `match`.
//!
//! Lifecycle: `init` → Active ⇄ Stopped → Closing → freed. A closing handle
//! stays in the table while its in-flight count is non-zero (requests that
//! reference it hold a [`HandleRef`](crate::request::HandleRef)); the close
//! callback runs once the slot is actually released.

use uvio_core::{HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handles::async_handle::AsyncState;
use crate::handles::fs_event::FsEventState;
use crate::handles::fs_poll::FsPollState;
use crate::handles::phase::PhaseState;
use crate::handles::poll::PollState;
use crate::handles::process::ProcessState;
use crate::handles::signal::SignalState;
use crate::handles::timer::TimerState;
use crate::handles::udp::UdpState;
use crate::stream::StreamState;

pub(crate) type CloseCb = Box<dyn FnOnce(&mut Loop)>;

/// Kind-specific state
pub(crate) enum HandleData {
    Timer(TimerState),
    Idle(PhaseState),
    Prepare(PhaseState),
    Check(PhaseState),
    Async(AsyncState),
    Signal(SignalState),
    Poll(PollState),
    Stream(StreamState),
    Udp(UdpState),
    FsEvent(FsEventState),
    FsPoll(FsPollState),
    Process(ProcessState),
}

pub(crate) struct HandleEntry {
    pub(crate) kind: HandleKind,
    pub(crate) data: HandleData,
    pub(crate) active: bool,
    pub(crate) closing: bool,
    pub(crate) referenced: bool,
    /// Requests currently holding a reference to this handle
    pub(crate) inflight: u32,
    pub(crate) close_cb: Option<CloseCb>,
}

impl HandleEntry {
    pub(crate) fn new(kind: HandleKind, data: HandleData) -> Self {
        HandleEntry {
            kind,
            data,
            active: false,
            closing: false,
            referenced: true,
            inflight: 0,
            close_cb: None,
        }
    }

    /// Counts toward loop liveness
    #[inline]
    pub(crate) fn keeps_alive(&self) -> bool {
        self.active && self.referenced && !self.closing
    }
}

/// Observable handle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    Stopped,
    Closing,
}

/// Operations shared by every handle kind.
pub trait Handle: Copy + 'static {
    const KIND: HandleKind;

    fn id(&self) -> HandleId;

    #[doc(hidden)]
    fn from_id(id: HandleId) -> Self;

    /// Start closing. Pending writes complete with `ECANCELED` first.
    fn close(&self, lp: &mut Loop) -> UvResult<()> {
        lp.close_handle(self.id(), None)
    }

    /// Start closing; `cb` runs once the handle is released.
    fn close_with<F>(&self, lp: &mut Loop, cb: F) -> UvResult<()>
    where
        F: FnOnce(&mut Loop, Self) + 'static,
    {
        let handle = *self;
        lp.close_handle(self.id(), Some(Box::new(move |lp: &mut Loop| cb(lp, handle))))
    }

    fn state(&self, lp: &Loop) -> UvResult<HandleState> {
        lp.handle_state(self.id())
    }

    fn is_active(&self, lp: &Loop) -> bool {
        matches!(lp.handle_state(self.id()), Ok(HandleState::Active))
    }

    fn is_closing(&self, lp: &Loop) -> bool {
        matches!(lp.handle_state(self.id()), Ok(HandleState::Closing))
    }

    /// Make the handle keep the loop alive while active (the default)
    fn ref_handle(&self, lp: &mut Loop) -> UvResult<()> {
        lp.set_referenced(self.id(), true)
    }

    /// Let the loop exit even while this handle is active
    fn unref(&self, lp: &mut Loop) -> UvResult<()> {
        lp.set_referenced(self.id(), false)
    }

    fn has_ref(&self, lp: &Loop) -> bool {
        lp.handles
            .get(self.id().slot())
            .map(|e| e.referenced)
            .unwrap_or(false)
    }
}

/// Declare a typed handle newtype
macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(uvio_core::HandleId);

        impl $crate::handle::Handle for $name {
            const KIND: uvio_core::HandleKind = $kind;

            #[inline]
            fn id(&self) -> uvio_core::HandleId {
                self.0
            }

            #[inline]
            fn from_id(id: uvio_core::HandleId) -> Self {
                $name(id)
            }
        }
    };
}
pub(crate) use handle_type;

impl Loop {
    /// Store a new handle in the Stopped state
    pub(crate) fn insert_handle(&mut self, kind: HandleKind, data: HandleData) -> UvResult<HandleId> {
        self.handles
            .insert(HandleEntry::new(kind, data))
            .map(HandleId::new)
            .ok_or(UvError::Os(uvio_core::ErrorCode::ENOMEM))
    }

    /// Entry for an open (not closing) handle
    pub(crate) fn live_entry(&mut self, id: HandleId) -> UvResult<&mut HandleEntry> {
        match self.handles.get_mut(id.slot()) {
            Some(entry) if !entry.closing => Ok(entry),
            _ => Err(UvError::HandleClosed),
        }
    }

    pub(crate) fn is_live(&self, id: HandleId) -> bool {
        self.handles
            .get(id.slot())
            .map(|e| !e.closing)
            .unwrap_or(false)
    }

    pub(crate) fn set_active(&mut self, id: HandleId, active: bool) {
        if let Some(entry) = self.handles.get_mut(id.slot()) {
            entry.active = active && !entry.closing;
        }
    }

    pub(crate) fn handle_state(&self, id: HandleId) -> UvResult<HandleState> {
        let entry = self.handles.get(id.slot()).ok_or(UvError::HandleClosed)?;
        Ok(if entry.closing {
            HandleState::Closing
        } else if entry.active {
            HandleState::Active
        } else {
            HandleState::Stopped
        })
    }

    pub(crate) fn set_referenced(&mut self, id: HandleId, referenced: bool) -> UvResult<()> {
        self.live_entry(id)?.referenced = referenced;
        Ok(())
    }

    /// Begin closing `id`.
    ///
    /// Disarms the handle, cancels its queued requests and schedules the
    /// release. Closing twice fails with `HandleClosed`.
    pub(crate) fn close_handle(&mut self, id: HandleId, cb: Option<CloseCb>) -> UvResult<()> {
        let entry = self.live_entry(id)?;
        let kind = entry.kind;
        entry.closing = true;
        entry.active = false;
        entry.close_cb = cb;

        match kind {
            HandleKind::Timer => self.timer_on_close(id),
            HandleKind::Idle | HandleKind::Prepare | HandleKind::Check => self.phase_on_close(id, kind),
            HandleKind::Async => {}
            HandleKind::Signal => self.signal_on_close(id),
            HandleKind::Poll => self.poll_on_close(id),
            HandleKind::Tcp | HandleKind::Pipe | HandleKind::Tty => self.stream_on_close(id),
            HandleKind::Udp => self.udp_on_close(id),
            HandleKind::FsEvent => self.fs_event_on_close(id),
            HandleKind::FsPoll => self.fs_poll_on_close(id),
            HandleKind::Process => self.process_on_close(id),
        }

        self.closing.push_back(id);
        Ok(())
    }

    /// Release closing handles whose in-flight count reached zero.
    ///
    /// Busy handles are retried on the next iteration.
    pub(crate) fn run_closing_handles(&mut self) -> usize {
        let mut released = 0;
        let batch: Vec<HandleId> = self.closing.drain(..).collect();
        for id in batch {
            let busy = self
                .handles
                .get(id.slot())
                .map(|e| e.inflight > 0)
                .unwrap_or(false);
            if busy {
                self.closing.push_back(id);
                continue;
            }
            if let Some(mut entry) = self.handles.remove(id.slot()) {
                let cb = entry.close_cb.take();
                uvio_core::log_trace!("released {} handle {}", entry.kind, id);
                // OS resources close here
                drop(entry);
                released += 1;
                if let Some(cb) = cb {
                    cb(self);
                }
            }
        }
        released
    }

    /// Some closing handle can be released right now
    pub(crate) fn closing_ready(&self) -> bool {
        self.closing.iter().any(|id| {
            self.handles
                .get(id.slot())
                .map(|e| e.inflight == 0)
                .unwrap_or(true)
        })
    }
}
