//! Stat-polling file watchers
//!
//! Each tick stats the path on the worker pool. The first successful stat
//! only records a baseline; later ones call back when anything but the
//! access time changed. Errors are reported once per distinct error code.
//! The next tick is armed after the stat completes, so ticks never overlap.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uvio_core::{log_error, ErrorCode, HandleId, HandleKind, RequestId, RequestKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::fs::{stat_path, FileStat};
use crate::handle::{handle_type, HandleData};
use crate::pool::WorkOutput;
use crate::request::RequestData;

pub(crate) type FsPollCb = Box<dyn FnMut(&mut Loop, FsPoll, Result<(FileStat, FileStat), ErrorCode>)>;

pub(crate) struct FsPollState {
    path: PathBuf,
    interval: Duration,
    /// Sequence of the armed tick
    pub(crate) armed: Option<u64>,
    prev: Option<FileStat>,
    last_error: Option<ErrorCode>,
    in_flight: bool,
    /// Cleared by `stop`; `cb` is also empty while the callback runs
    started: bool,
    cb: Option<FsPollCb>,
}

handle_type!(
    /// Watches a path by periodic stat.
    FsPoll,
    HandleKind::FsPoll
);

fn changed(a: &FileStat, b: &FileStat) -> bool {
    a.size != b.size
        || a.mode != b.mode
        || a.mtime != b.mtime
        || a.ctime != b.ctime
        || a.ino != b.ino
        || a.dev != b.dev
        || a.uid != b.uid
        || a.gid != b.gid
        || a.nlink != b.nlink
}

impl FsPoll {
    pub fn init(lp: &mut Loop) -> UvResult<FsPoll> {
        let state = FsPollState {
            path: PathBuf::new(),
            interval: Duration::ZERO,
            armed: None,
            prev: None,
            last_error: None,
            in_flight: false,
            started: false,
            cb: None,
        };
        lp.insert_handle(HandleKind::FsPoll, HandleData::FsPoll(state))
            .map(FsPoll)
    }

    /// Stat `path` every `interval_ms` and report changes as
    /// `(previous, current)`.
    pub fn start<F, P>(&self, lp: &mut Loop, cb: F, path: P, interval_ms: u64) -> UvResult<()>
    where
        F: FnMut(&mut Loop, FsPoll, Result<(FileStat, FileStat), ErrorCode>) + 'static,
        P: AsRef<Path>,
    {
        {
            let state = lp.fs_poll_state(self.0)?;
            if state.started {
                return Err(UvError::AlreadyActive);
            }
            state.path = path.as_ref().to_path_buf();
            state.interval = Duration::from_millis(interval_ms.max(1));
            state.prev = None;
            state.last_error = None;
            state.started = true;
            state.cb = Some(Box::new(cb));
        }
        lp.set_active(self.0, true);
        if !lp.fs_poll_state(self.0)?.in_flight {
            lp.fs_poll_submit(self.0)?;
        }
        Ok(())
    }

    pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
        let state = lp.fs_poll_state(self.0)?;
        state.armed = None;
        state.started = false;
        state.cb = None;
        lp.set_active(self.0, false);
        Ok(())
    }

    pub fn path(&self, lp: &mut Loop) -> UvResult<PathBuf> {
        Ok(lp.fs_poll_state(self.0)?.path.clone())
    }
}

impl Loop {
    fn fs_poll_state(&mut self, id: HandleId) -> UvResult<&mut FsPollState> {
        match &mut self.live_entry(id)?.data {
            HandleData::FsPoll(s) => Ok(s),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn fs_poll_submit(&mut self, id: HandleId) -> UvResult<()> {
        let path = self.fs_poll_state(id)?.path.clone();
        let rid = self.submit_request(RequestKind::FsPollStat, Some(id), RequestData::FsPollStat)?;
        let work = Box::new(move || WorkOutput::Stat(stat_path(&path)));
        if let Err(e) = self.queue_work(rid, work) {
            self.finish_request(rid);
            return Err(e);
        }
        self.fs_poll_state(id)?.in_flight = true;
        Ok(())
    }

    /// Timer tick for `id`. Returns whether a stat was issued.
    pub(crate) fn fs_poll_tick(&mut self, id: HandleId, seq: u64) -> bool {
        match self.fs_poll_state(id) {
            Ok(state) if state.armed == Some(seq) => state.armed = None,
            _ => return false,
        }
        match self.fs_poll_submit(id) {
            Ok(()) => true,
            Err(e) => {
                log_error!("fs poll {}: stat submit failed: {}", id, e);
                false
            }
        }
    }

    pub(crate) fn fs_poll_stat_done(&mut self, rid: RequestId, output: WorkOutput) {
        let Some((Some(id), _)) = self.finish_request(rid) else {
            return;
        };
        let result = match output {
            WorkOutput::Stat(result) => result,
            _ => Err(ErrorCode::EIO),
        };

        let report = {
            let Ok(state) = self.fs_poll_state(id) else {
                return;
            };
            state.in_flight = false;
            if !state.started {
                return;
            }
            match result {
                Ok(curr) => {
                    let report = match state.prev {
                        Some(prev) if changed(&prev, &curr) => Some(Ok((prev, curr))),
                        Some(_) => None,
                        // Recovering from an error is a change; a first stat is not
                        None if state.last_error.is_some() => Some(Ok((FileStat::default(), curr))),
                        None => None,
                    };
                    state.prev = Some(curr);
                    state.last_error = None;
                    report
                }
                Err(code) => {
                    state.prev = None;
                    if state.last_error == Some(code) {
                        None
                    } else {
                        state.last_error = Some(code);
                        Some(Err(code))
                    }
                }
            }
        };

        if let Some(report) = report {
            let cb = self.fs_poll_state(id).ok().and_then(|s| s.cb.take());
            if let Some(mut cb) = cb {
                cb(self, FsPoll(id), report);
                // A stop inside the callback drops it; a restart installed a new one
                if let Ok(state) = self.fs_poll_state(id) {
                    if state.started {
                        state.cb.get_or_insert(cb);
                    }
                }
            }
        }

        // Re-arm unless stopped or closed meanwhile
        let interval = match self.fs_poll_state(id) {
            Ok(state) if state.started && state.armed.is_none() && !state.in_flight => state.interval,
            _ => return,
        };
        let deadline = self.now_instant() + interval;
        let seq = self.timers.arm(id, deadline);
        if let Ok(state) = self.fs_poll_state(id) {
            state.armed = Some(seq);
        }
    }

    pub(crate) fn fs_poll_on_close(&mut self, id: HandleId) {
        if let Some(HandleData::FsPoll(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            state.armed = None;
            state.started = false;
            state.cb = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::timer::Timer;
    use crate::{Handle, RunMode};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_reports_change() {
        let path = std::env::temp_dir().join(format!("uvio-fspoll-{}", std::process::id()));
        std::fs::write(&path, b"one").unwrap();
        let mut lp = Loop::init().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let poll = FsPoll::init(&mut lp).unwrap();
        poll.start(
            &mut lp,
            move |lp, h, res| {
                let (prev, curr) = res.unwrap();
                s.borrow_mut().push((prev.size, curr.size));
                h.close(lp).unwrap();
            },
            &path,
            5,
        )
        .unwrap();
        assert_eq!(poll.path(&mut lp).unwrap(), path);

        // Change the file once the baseline stat has been taken
        let p = path.clone();
        let writer = Timer::init(&mut lp).unwrap();
        writer
            .start(
                &mut lp,
                move |lp, t| {
                    std::fs::write(&p, b"three").unwrap();
                    t.close(lp).unwrap();
                },
                50,
                0,
            )
            .unwrap();

        lp.run(RunMode::Default);
        assert_eq!(*seen.borrow(), vec![(3, 5)]);
        assert_eq!(lp.active_requests(), 0);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_path_reported_once() {
        let path = std::env::temp_dir().join(format!("uvio-fspoll-missing-{}", std::process::id()));
        let mut lp = Loop::init().unwrap();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        let poll = FsPoll::init(&mut lp).unwrap();
        poll.start(&mut lp, move |_, _, res| e.borrow_mut().push(res.unwrap_err()), &path, 2)
            .unwrap();

        let stopper = Timer::init(&mut lp).unwrap();
        stopper
            .start(
                &mut lp,
                move |lp, t| {
                    poll.close(lp).unwrap();
                    t.close(lp).unwrap();
                },
                40,
                0,
            )
            .unwrap();
        lp.run(RunMode::Default);
        assert_eq!(*errors.borrow(), vec![ErrorCode::ENOENT]);
    }

    #[test]
    fn test_stop_inside_callback() {
        let path = std::env::temp_dir().join(format!("uvio-fspoll-stop-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut lp = Loop::init().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let c = Rc::clone(&calls);
        let poll = FsPoll::init(&mut lp).unwrap();
        poll.start(
            &mut lp,
            move |lp, h, _| {
                *c.borrow_mut() += 1;
                h.stop(lp).unwrap();
            },
            &path,
            2,
        )
        .unwrap();

        // Creating the path would be a change if polling continued
        let p = path.clone();
        let writer = Timer::init(&mut lp).unwrap();
        writer
            .start(
                &mut lp,
                move |lp, t| {
                    std::fs::write(&p, b"x").unwrap();
                    t.close(lp).unwrap();
                },
                30,
                0,
            )
            .unwrap();
        let idle = Timer::init(&mut lp).unwrap();
        idle.start(&mut lp, |lp, t| t.close(lp).unwrap(), 80, 0).unwrap();

        lp.run(RunMode::Default);
        assert_eq!(*calls.borrow(), 1);
        assert!(!poll.is_active(&lp));
        assert_eq!(lp.active_requests(), 0);

        poll.start(&mut lp, |_, _, _| {}, &path, 2).unwrap();
        assert!(poll.is_active(&lp));
        poll.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
        std::fs::remove_file(&path).unwrap();
    }
}
