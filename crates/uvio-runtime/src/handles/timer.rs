//! Timer handles
//!
//! One-shot or repeating callbacks driven by the loop's [`TimerHeap`]
//! (crate::timer). Deadlines are computed from the loop's cached time, so a
//! timer started inside a callback counts from the start of the iteration.

use std::time::{Duration, Instant};

use uvio_core::{ErrorCode, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};

pub(crate) type TimerCb = Box<dyn FnMut(&mut Loop, Timer)>;

pub(crate) struct TimerState {
    cb: Option<TimerCb>,
    timeout: u64,
    repeat: u64,
    /// Sequence of the live heap entry, if armed
    pub(crate) armed: Option<u64>,
    deadline: Option<Instant>,
}

handle_type!(
    /// Fires a callback after a timeout, optionally repeating.
    Timer,
    HandleKind::Timer
);

impl Timer {
    pub fn init(lp: &mut Loop) -> UvResult<Timer> {
        let state = TimerState {
            cb: None,
            timeout: 0,
            repeat: 0,
            armed: None,
            deadline: None,
        };
        lp.insert_handle(HandleKind::Timer, HandleData::Timer(state))
            .map(Timer)
    }

    /// Arm the timer: first fire after `timeout_ms`, then every `repeat_ms`
    /// (0 = one-shot). Starting an active timer restarts it.
    pub fn start<F>(&self, lp: &mut Loop, cb: F, timeout_ms: u64, repeat_ms: u64) -> UvResult<()>
    where
        F: FnMut(&mut Loop, Timer) + 'static,
    {
        {
            let state = lp.timer_state(self.0)?;
            state.cb = Some(Box::new(cb));
            state.timeout = timeout_ms;
            state.repeat = repeat_ms;
        }
        lp.timer_arm(self.0, timeout_ms);
        Ok(())
    }

    /// Disarm. Stopping a stopped timer is a no-op.
    pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
        lp.timer_state(self.0)?.armed = None;
        lp.set_active(self.0, false);
        Ok(())
    }

    /// Restart a repeating timer with its repeat interval as timeout.
    ///
    /// `EINVAL` if the timer was never started; a no-op when the repeat is 0.
    pub fn again(&self, lp: &mut Loop) -> UvResult<()> {
        let state = lp.timer_state(self.0)?;
        if state.cb.is_none() {
            return Err(UvError::Os(ErrorCode::EINVAL));
        }
        let repeat = state.repeat;
        if repeat > 0 {
            lp.timer_arm(self.0, repeat);
        }
        Ok(())
    }

    /// Takes effect at the next (re)arm
    pub fn set_repeat(&self, lp: &mut Loop, repeat_ms: u64) -> UvResult<()> {
        lp.timer_state(self.0)?.repeat = repeat_ms;
        Ok(())
    }

    pub fn repeat(&self, lp: &mut Loop) -> UvResult<u64> {
        Ok(lp.timer_state(self.0)?.repeat)
    }

    /// Milliseconds until the next fire, 0 when not armed or overdue
    pub fn due_in(&self, lp: &mut Loop) -> UvResult<u64> {
        let now = lp.now_instant();
        let state = lp.timer_state(self.0)?;
        Ok(match (state.armed, state.deadline) {
            (Some(_), Some(deadline)) => deadline.saturating_duration_since(now).as_millis() as u64,
            _ => 0,
        })
    }
}

impl Loop {
    fn timer_state(&mut self, id: HandleId) -> UvResult<&mut TimerState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Timer(t) => Ok(t),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn timer_arm(&mut self, id: HandleId, after_ms: u64) {
        let deadline = self.now_instant() + Duration::from_millis(after_ms);
        let seq = self.timers.arm(id, deadline);
        if let Some(entry) = self.handles.get_mut(id.slot()) {
            if let HandleData::Timer(t) = &mut entry.data {
                t.armed = Some(seq);
                t.deadline = Some(deadline);
            }
            entry.active = !entry.closing;
        }
    }

    /// Run the timer for heap entry `seq`. Returns whether a callback ran.
    pub(crate) fn timer_fire(&mut self, id: HandleId, seq: u64) -> bool {
        let (cb, repeat) = {
            let Some(entry) = self.handles.get_mut(id.slot()) else {
                return false;
            };
            if entry.closing {
                return false;
            }
            let HandleData::Timer(t) = &mut entry.data else {
                return false;
            };
            if t.armed != Some(seq) {
                return false;
            }
            t.armed = None;
            t.deadline = None;
            if t.repeat == 0 {
                entry.active = false;
            }
            (t.cb.take(), t.repeat)
        };
        if repeat > 0 {
            self.timer_arm(id, repeat);
        }

        let Some(mut cb) = cb else {
            return false;
        };
        cb(self, Timer(id));

        // Keep the callback unless the handle closed or got a new one
        if let Ok(state) = self.timer_state(id) {
            if state.cb.is_none() {
                state.cb = Some(cb);
            }
        }
        true
    }

    pub(crate) fn timer_on_close(&mut self, id: HandleId) {
        if let Some(HandleData::Timer(t)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            t.armed = None;
            t.deadline = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handle, RunMode};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn test_one_shot() {
        let mut lp = Loop::init().unwrap();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let timer = Timer::init(&mut lp).unwrap();
        timer.start(&mut lp, move |_, _| f.set(f.get() + 1), 1, 0).unwrap();
        assert!(timer.is_active(&lp));

        assert!(!lp.run(RunMode::Default));
        assert_eq!(fired.get(), 1);
        assert!(!timer.is_active(&lp));
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_repeat_until_stopped() {
        let mut lp = Loop::init().unwrap();
        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        let timer = Timer::init(&mut lp).unwrap();
        timer
            .start(
                &mut lp,
                move |lp, t| {
                    f.set(f.get() + 1);
                    if f.get() == 3 {
                        t.stop(lp).unwrap();
                    }
                },
                1,
                1,
            )
            .unwrap();
        assert_eq!(timer.repeat(&mut lp).unwrap(), 1);
        lp.run(RunMode::Default);
        assert_eq!(fired.get(), 3);
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_fire_order_by_deadline() {
        let mut lp = Loop::init().unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (name, ms) in [("c", 30u64), ("a", 1), ("b", 15)] {
            let o = Rc::clone(&order);
            let t = Timer::init(&mut lp).unwrap();
            t.start(
                &mut lp,
                move |lp, t| {
                    o.borrow_mut().push(name);
                    t.close(lp).unwrap();
                },
                ms,
                0,
            )
            .unwrap();
        }
        lp.run(RunMode::Default);
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_restart_replaces_deadline() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        timer.start(&mut lp, |_, _| {}, 60_000, 0).unwrap();
        assert!(timer.due_in(&mut lp).unwrap() > 50_000);
        timer.start(&mut lp, |lp, _| lp.stop(), 1, 0).unwrap();
        assert!(timer.due_in(&mut lp).unwrap() <= 1);
        lp.run(RunMode::Default);
        assert_eq!(timer.due_in(&mut lp).unwrap(), 0);
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_again() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        assert_eq!(timer.again(&mut lp), Err(UvError::Os(ErrorCode::EINVAL)));

        timer.start(&mut lp, |_, _| {}, 60_000, 0).unwrap();
        timer.set_repeat(&mut lp, 5).unwrap();
        timer.again(&mut lp).unwrap();
        assert!(timer.due_in(&mut lp).unwrap() <= 5);
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        assert!(timer.stop(&mut lp).is_ok());
        timer.start(&mut lp, |_, _| {}, 10, 0).unwrap();
        assert!(timer.stop(&mut lp).is_ok());
        assert!(timer.stop(&mut lp).is_ok());
        assert!(!lp.alive());
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
