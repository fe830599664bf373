//! Filesystem event handles
//!
//! Backed by inotify on Linux. Other platforms report
//! `UnsupportedOperation` from `start`; `FsPoll` works everywhere.

use std::path::{Path, PathBuf};

use uvio_core::{log_warn, ErrorCode, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};
use crate::poller::Interest;

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// Created, deleted or moved
    Rename = 1,
    /// Contents or attributes modified
    Change = 2,
}

pub(crate) type FsEventCb =
    Box<dyn FnMut(&mut Loop, FsEvent, Result<(Option<String>, FsEventKind), ErrorCode>)>;

pub(crate) struct FsEventState {
    backend: Option<backend::Watch>,
    path: PathBuf,
    cb: Option<FsEventCb>,
}

handle_type!(
    /// Reports changes to a file or directory.
    FsEvent,
    HandleKind::FsEvent
);

impl FsEvent {
    pub fn init(lp: &mut Loop) -> UvResult<FsEvent> {
        let state = FsEventState {
            backend: None,
            path: PathBuf::new(),
            cb: None,
        };
        lp.insert_handle(HandleKind::FsEvent, HandleData::FsEvent(state))
            .map(FsEvent)
    }

    /// Watch `path`. Events carry the affected file name when the kernel
    /// reports one (entries inside a watched directory).
    pub fn start<F, P>(&self, lp: &mut Loop, cb: F, path: P) -> UvResult<()>
    where
        F: FnMut(&mut Loop, FsEvent, Result<(Option<String>, FsEventKind), ErrorCode>) + 'static,
        P: AsRef<Path>,
    {
        let id = self.0;
        if lp.fs_event_state(id)?.backend.is_some() {
            return Err(UvError::AlreadyActive);
        }
        let watch = backend::Watch::new(path.as_ref())?;
        let fd = watch.fd();
        lp.poller.register(fd, id.slot().to_u64(), Interest::READABLE)?;

        let state = lp.fs_event_state(id)?;
        state.backend = Some(watch);
        state.path = path.as_ref().to_path_buf();
        state.cb = Some(Box::new(cb));
        lp.set_active(id, true);
        Ok(())
    }

    pub fn stop(&self, lp: &mut Loop) -> UvResult<()> {
        lp.fs_event_state(self.0)?;
        lp.fs_event_disarm(self.0);
        Ok(())
    }

    /// Path being watched (empty if never started)
    pub fn path(&self, lp: &mut Loop) -> UvResult<PathBuf> {
        Ok(lp.fs_event_state(self.0)?.path.clone())
    }
}

impl Loop {
    fn fs_event_state(&mut self, id: HandleId) -> UvResult<&mut FsEventState> {
        match &mut self.live_entry(id)?.data {
            HandleData::FsEvent(s) => Ok(s),
            _ => Err(UvError::HandleClosed),
        }
    }

    fn fs_event_disarm(&mut self, id: HandleId) {
        let watch = match self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            Some(HandleData::FsEvent(s)) => {
                s.cb = None;
                s.backend.take()
            }
            _ => None,
        };
        if let Some(watch) = watch {
            if let Err(e) = self.poller.deregister(watch.fd()) {
                log_warn!("fs event {}: deregister failed: {}", id, e);
            }
        }
        self.set_active(id, false);
    }

    pub(crate) fn fs_event_on_close(&mut self, id: HandleId) {
        self.fs_event_disarm(id);
    }

    pub(crate) fn fs_event_io(&mut self, id: HandleId) -> usize {
        let (events, basename) = {
            let Ok(state) = self.fs_event_state(id) else {
                return 0;
            };
            let Some(watch) = state.backend.as_ref() else {
                return 0;
            };
            let basename = state
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            (watch.read(), basename)
        };

        let mut ran = 0;
        for event in events {
            let report = event.map(|(name, kind)| (name.or_else(|| basename.clone()), kind));
            let cb = self.fs_event_state(id).ok().and_then(|s| s.cb.take());
            let Some(mut cb) = cb else {
                break;
            };
            cb(self, FsEvent(id), report);
            ran += 1;
            match self.fs_event_state(id) {
                Ok(state) if state.backend.is_some() => {
                    state.cb.get_or_insert(cb);
                }
                _ => break,
            }
        }
        ran
    }
}

#[cfg(all(any(target_os = "linux", target_os = "android"), feature = "inotify"))]
mod backend {
    use std::os::unix::io::{AsFd, AsRawFd, RawFd};
    use std::path::Path;

    use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
    use uvio_core::{ErrorCode, UvResult};

    use super::FsEventKind;

    pub(crate) struct Watch {
        inotify: Inotify,
    }

    impl Watch {
        pub(crate) fn new(path: &Path) -> UvResult<Watch> {
            let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
                .map_err(|e| ErrorCode::from_errno(e as i32))?;
            let mask = AddWatchFlags::IN_ATTRIB
                | AddWatchFlags::IN_CREATE
                | AddWatchFlags::IN_MODIFY
                | AddWatchFlags::IN_DELETE
                | AddWatchFlags::IN_DELETE_SELF
                | AddWatchFlags::IN_MOVE_SELF
                | AddWatchFlags::IN_MOVED_FROM
                | AddWatchFlags::IN_MOVED_TO;
            inotify
                .add_watch(path, mask)
                .map_err(|e| ErrorCode::from_errno(e as i32))?;
            Ok(Watch { inotify })
        }

        pub(crate) fn fd(&self) -> RawFd {
            self.inotify.as_fd().as_raw_fd()
        }

        /// Pending events, drained without blocking
        pub(crate) fn read(&self) -> Vec<Result<(Option<String>, FsEventKind), ErrorCode>> {
            let mut out = Vec::new();
            loop {
                match self.inotify.read_events() {
                    Ok(events) if events.is_empty() => break,
                    Ok(events) => {
                        for ev in events {
                            let kind = if ev
                                .mask
                                .intersects(AddWatchFlags::IN_ATTRIB | AddWatchFlags::IN_MODIFY)
                            {
                                FsEventKind::Change
                            } else {
                                FsEventKind::Rename
                            };
                            let name = ev.name.map(|n| n.to_string_lossy().into_owned());
                            out.push(Ok((name, kind)));
                        }
                    }
                    Err(nix::errno::Errno::EAGAIN) => break,
                    Err(e) => {
                        out.push(Err(ErrorCode::from_errno(e as i32)));
                        break;
                    }
                }
            }
            out
        }
    }
}

#[cfg(not(all(any(target_os = "linux", target_os = "android"), feature = "inotify")))]
mod backend {
    use std::os::unix::io::RawFd;
    use std::path::Path;

    use uvio_core::{log_error, ErrorCode, UvError, UvResult};

    use super::FsEventKind;

    pub(crate) struct Watch;

    impl Watch {
        pub(crate) fn new(_path: &Path) -> UvResult<Watch> {
            log_error!("fs events need the inotify backend");
            Err(UvError::UnsupportedOperation("fs events"))
        }

        pub(crate) fn fd(&self) -> RawFd {
            -1
        }

        pub(crate) fn read(&self) -> Vec<Result<(Option<String>, FsEventKind), ErrorCode>> {
            Vec::new()
        }
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android"), feature = "inotify"))]
mod tests {
    use super::*;
    use crate::{Handle, RunMode};
    use crate::handles::timer::Timer;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_file_created_in_directory() {
        let dir = std::env::temp_dir().join(format!("uvio-fsevent-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let mut lp = Loop::init().unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let watcher = FsEvent::init(&mut lp).unwrap();
        watcher
            .start(
                &mut lp,
                move |lp, h, res| {
                    s.borrow_mut().push(res.unwrap());
                    h.close(lp).unwrap();
                },
                &dir,
            )
            .unwrap();
        assert_eq!(
            watcher.start(&mut lp, |_, _, _| {}, &dir),
            Err(UvError::AlreadyActive)
        );

        let target = dir.join("new-file");
        let touch = Timer::init(&mut lp).unwrap();
        touch
            .start(
                &mut lp,
                move |lp, t| {
                    std::fs::write(&target, b"x").unwrap();
                    t.close(lp).unwrap();
                },
                1,
                0,
            )
            .unwrap();

        lp.run(RunMode::Default);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Some("new-file".to_string()), FsEventKind::Rename));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_path() {
        let mut lp = Loop::init().unwrap();
        let watcher = FsEvent::init(&mut lp).unwrap();
        let err = watcher
            .start(&mut lp, |_, _, _| {}, "/no/such/uvio/path")
            .unwrap_err();
        assert_eq!(err, UvError::Os(ErrorCode::ENOENT));
        assert!(!watcher.is_active(&lp));
        watcher.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
