//! Idle, Prepare and Check handles
//!
//! Per-iteration hooks. Prepare runs right before the loop polls, Check right
//! after. Idle runs only on iterations where nothing else was dispatched,
//! and while any idle handle is active the poll does not block.

use uvio_core::{HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};

pub(crate) type PhaseCb = Box<dyn FnMut(&mut Loop, HandleId)>;

pub(crate) struct PhaseState {
    cb: Option<PhaseCb>,
}

/// Active handles per phase, in start order
#[derive(Default)]
pub(crate) struct PhaseLists {
    pub(crate) idle: Vec<HandleId>,
    pub(crate) prepare: Vec<HandleId>,
    pub(crate) check: Vec<HandleId>,
}

impl PhaseLists {
    fn list_mut(&mut self, kind: HandleKind) -> Option<&mut Vec<HandleId>> {
        match kind {
            HandleKind::Idle => Some(&mut self.idle),
            HandleKind::Prepare => Some(&mut self.prepare),
            HandleKind::Check => Some(&mut self.check),
            _ => None,
        }
    }
}

macro_rules! phase_handle {
    ($(#[$meta:meta])* $name:ident, $variant:ident) => {
        handle_type!($(#[$meta])* $name, HandleKind::$variant);

        impl $name {
            pub fn init(lp: &mut Loop) -> UvResult<$name> {
                lp.insert_handle(HandleKind::$variant, HandleData::$variant(PhaseState { cb: None }))
                    .map($name)
            }

            /// Run `cb` once per loop iteration. `AlreadyActive` if started.
            pub fn start<F>(&self, lp: &mut Loop, mut cb: F) -> UvResult<()>
            where
                F: FnMut(&mut Loop, $name) + 'static,
            {
                lp.phase_start(
                    self.0,
                    HandleKind::$variant,
                    Box::new(move |lp: &mut Loop, id: HandleId| cb(lp, $name(id))),
                )
            }

            /// Stopping a stopped handle is a no-op
            pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
                lp.phase_stop(self.0, HandleKind::$variant)
            }
        }
    };
}

phase_handle!(
    /// Runs when an iteration has nothing else to do
    Idle,
    Idle
);
phase_handle!(
    /// Runs before each poll
    Prepare,
    Prepare
);
phase_handle!(
    /// Runs after each poll
    Check,
    Check
);

fn phase_state(data: &mut HandleData) -> Option<&mut PhaseState> {
    match data {
        HandleData::Idle(s) | HandleData::Prepare(s) | HandleData::Check(s) => Some(s),
        _ => None,
    }
}

impl Loop {
    fn phase_start(&mut self, id: HandleId, kind: HandleKind, cb: PhaseCb) -> UvResult<()> {
        let entry = self.live_entry(id)?;
        if entry.active {
            return Err(UvError::AlreadyActive);
        }
        let state = phase_state(&mut entry.data).ok_or(UvError::HandleClosed)?;
        state.cb = Some(cb);
        entry.active = true;
        if let Some(list) = self.phases.list_mut(kind) {
            list.push(id);
        }
        Ok(())
    }

    fn phase_stop(&mut self, id: HandleId, kind: HandleKind) -> UvResult<()> {
        let entry = self.live_entry(id)?;
        if !entry.active {
            return Ok(());
        }
        entry.active = false;
        if let Some(state) = phase_state(&mut entry.data) {
            state.cb = None;
        }
        if let Some(list) = self.phases.list_mut(kind) {
            list.retain(|h| *h != id);
        }
        Ok(())
    }

    pub(crate) fn phase_on_close(&mut self, id: HandleId, kind: HandleKind) {
        if let Some(list) = self.phases.list_mut(kind) {
            list.retain(|h| *h != id);
        }
    }

    /// Run every handle active in `kind`'s phase. Handles started by a
    /// callback first run on the next iteration.
    pub(crate) fn run_phase(&mut self, kind: HandleKind) -> usize {
        let snapshot = match self.phases.list_mut(kind) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return 0,
        };
        let mut ran = 0;
        for id in snapshot {
            let cb = match self.handles.get_mut(id.slot()) {
                Some(e) if e.active && !e.closing => phase_state(&mut e.data).and_then(|s| s.cb.take()),
                _ => None,
            };
            let Some(mut cb) = cb else {
                continue;
            };
            cb(self, id);
            ran += 1;
            if let Some(e) = self.handles.get_mut(id.slot()) {
                if e.active && !e.closing {
                    if let Some(state) = phase_state(&mut e.data) {
                        state.cb.get_or_insert(cb);
                    }
                }
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handle, RunMode};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_start_twice_is_already_active() {
        let mut lp = Loop::init().unwrap();
        let idle = Idle::init(&mut lp).unwrap();
        idle.start(&mut lp, |_, _| {}).unwrap();
        assert_eq!(idle.start(&mut lp, |_, _| {}), Err(UvError::AlreadyActive));
        idle.stop(&mut lp).unwrap();
        idle.stop(&mut lp).unwrap();
        idle.start(&mut lp, |_, _| {}).unwrap();
        idle.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_idle_keeps_loop_spinning() {
        let mut lp = Loop::init().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let idle = Idle::init(&mut lp).unwrap();
        idle.start(&mut lp, move |lp, h| {
            c.set(c.get() + 1);
            if c.get() == 10 {
                h.close(lp).unwrap();
            }
        })
        .unwrap();
        assert_eq!(lp.backend_timeout(), Some(std::time::Duration::ZERO));
        assert!(!lp.run(RunMode::Default));
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn test_stop_inside_callback() {
        let mut lp = Loop::init().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let check = Check::init(&mut lp).unwrap();
        check.start(&mut lp, move |lp, h| {
            c.set(c.get() + 1);
            h.stop(lp).unwrap();
        })
        .unwrap();
        lp.run(RunMode::NoWait);
        lp.run(RunMode::NoWait);
        assert_eq!(count.get(), 1);
        assert!(!check.is_active(&lp));
        check.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_prepare_runs_each_iteration() {
        let mut lp = Loop::init().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let prepare = Prepare::init(&mut lp).unwrap();
        prepare.start(&mut lp, move |_, _| c.set(c.get() + 1)).unwrap();
        lp.run(RunMode::NoWait);
        lp.run(RunMode::NoWait);
        lp.run(RunMode::NoWait);
        assert_eq!(count.get(), 3);
        prepare.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
