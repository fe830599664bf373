//! Signal handles
//!
//! Signals reach the loop through a per-loop [`SignalSink`] registered with
//! the poller under a reserved token. The process-wide handler is installed
//! on the first watch of a signal number and the previous disposition comes
//! back when the last watcher goes away (see `sys::signal`).

use uvio_core::{log_trace, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::{Loop, SIGNAL_TOKEN};
use crate::handle::{handle_type, HandleData};
use crate::poller::Interest;
use crate::sys::signal::{self, SignalSink};

pub(crate) type SignalCb = Box<dyn FnMut(&mut Loop, Signal, i32)>;

pub(crate) struct SignalState {
    signum: Option<i32>,
    oneshot: bool,
    cb: Option<SignalCb>,
}

handle_type!(
    /// Delivers a Unix signal as a loop callback.
    Signal,
    HandleKind::Signal
);

impl Signal {
    pub fn init(lp: &mut Loop) -> UvResult<Signal> {
        let state = SignalState {
            signum: None,
            oneshot: false,
            cb: None,
        };
        lp.insert_handle(HandleKind::Signal, HandleData::Signal(state))
            .map(Signal)
    }

    /// Call `cb` every time `signum` arrives.
    ///
    /// `EINVAL` for invalid numbers and for SIGKILL/SIGSTOP.
    pub fn start<F>(&self, lp: &mut Loop, cb: F, signum: i32) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Signal, i32) + 'static,
    {
        lp.signal_start(self.0, Box::new(cb), signum, false)
    }

    /// Like `start`, but the handle stops itself before the first callback
    pub fn start_oneshot<F>(&self, lp: &mut Loop, cb: F, signum: i32) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Signal, i32) + 'static,
    {
        lp.signal_start(self.0, Box::new(cb), signum, true)
    }

    pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
        lp.signal_state(self.0)?;
        lp.signal_disarm(self.0);
        Ok(())
    }

    /// Signal number being watched, if started
    pub fn signum(&self, lp: &mut Loop) -> UvResult<Option<i32>> {
        Ok(lp.signal_state(self.0)?.signum)
    }
}

impl Loop {
    fn signal_state(&mut self, id: HandleId) -> UvResult<&mut SignalState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Signal(s) => Ok(s),
            _ => Err(UvError::HandleClosed),
        }
    }

    /// Open the signal sink on first use
    pub(crate) fn ensure_signal_sink(&mut self) -> UvResult<()> {
        if self.signal_sink.is_some() {
            return Ok(());
        }
        let sink = SignalSink::open()?;
        self.poller
            .register(sink.fd(), SIGNAL_TOKEN, Interest::READABLE)?;
        self.signal_sink = Some(sink);
        Ok(())
    }

    fn signal_start(&mut self, id: HandleId, cb: SignalCb, signum: i32, oneshot: bool) -> UvResult<()> {
        if self.signal_state(id)?.signum.is_some() {
            return Err(UvError::AlreadyActive);
        }
        self.ensure_signal_sink()?;
        signal::watch(signum)?;
        let state = self.signal_state(id)?;
        state.signum = Some(signum);
        state.oneshot = oneshot;
        state.cb = Some(cb);
        self.set_active(id, true);
        Ok(())
    }

    fn signal_disarm(&mut self, id: HandleId) {
        let signum = match self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            Some(HandleData::Signal(s)) => s.signum.take(),
            _ => None,
        };
        if let Some(signum) = signum {
            signal::unwatch(signum);
        }
        self.set_active(id, false);
    }

    pub(crate) fn signal_on_close(&mut self, id: HandleId) {
        self.signal_disarm(id);
    }

    /// Drain the sink and deliver to every watching handle
    pub(crate) fn dispatch_signals(&mut self) -> usize {
        let mut signals = Vec::new();
        match &self.signal_sink {
            Some(sink) => sink.drain(&mut signals),
            None => return 0,
        }

        let mut ran = 0;
        for signum in signals {
            log_trace!("signal {} delivered", signum);
            if signum == libc::SIGCHLD {
                ran += self.reap_children();
            }
            let watchers: Vec<HandleId> = self
                .handles
                .iter()
                .filter_map(|(slot, e)| match &e.data {
                    HandleData::Signal(s) if !e.closing && s.signum == Some(signum) => {
                        Some(HandleId::new(slot))
                    }
                    _ => None,
                })
                .collect();
            for id in watchers {
                if self.signal_deliver(id, signum) {
                    ran += 1;
                }
            }
        }
        ran
    }

    fn signal_deliver(&mut self, id: HandleId, signum: i32) -> bool {
        let (cb, oneshot) = match self.signal_state(id) {
            Ok(s) if s.signum == Some(signum) => (s.cb.take(), s.oneshot),
            _ => return false,
        };
        let Some(mut cb) = cb else {
            return false;
        };
        if oneshot {
            self.signal_disarm(id);
        }
        cb(self, Signal(id), signum);
        if let Ok(state) = self.signal_state(id) {
            state.cb.get_or_insert(cb);
        }
        true
    }
}
