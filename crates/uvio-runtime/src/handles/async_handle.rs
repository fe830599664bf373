//! Async handles: cross-thread wakeups
//!
//! An [`AsyncSender`] is the only loop object that may be used from another
//! thread. `send` sets the handle's pending flag and pokes the loop's
//! notifier; several sends before the loop gets to run the callback coalesce
//! into one call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uvio_core::{ErrorCode, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, HandleData};
use crate::notifier::Notifier;

pub(crate) type AsyncCb = Box<dyn FnMut(&mut Loop, Async)>;

pub(crate) struct AsyncState {
    pending: Arc<AtomicBool>,
    cb: Option<AsyncCb>,
}

handle_type!(
    /// Wakes the loop from another thread.
    Async,
    HandleKind::Async
);

/// Thread-safe trigger for an [`Async`] handle
#[derive(Clone)]
pub struct AsyncSender {
    pending: Arc<AtomicBool>,
    notifier: Arc<Notifier>,
}

impl AsyncSender {
    /// Schedule the handle's callback. Safe from any thread.
    pub fn send(&self) -> Result<(), ErrorCode> {
        if self.pending.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.notifier.notify()
    }
}

impl std::fmt::Debug for AsyncSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSender")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl Async {
    /// Create an async handle. It is active (keeps the loop alive) until
    /// closed or unreferenced.
    pub fn init<F>(lp: &mut Loop, cb: F) -> UvResult<Async>
    where
        F: FnMut(&mut Loop, Async) + 'static,
    {
        let state = AsyncState {
            pending: Arc::new(AtomicBool::new(false)),
            cb: Some(Box::new(cb)),
        };
        let id = lp.insert_handle(HandleKind::Async, HandleData::Async(state))?;
        lp.set_active(id, true);
        Ok(Async(id))
    }

    pub fn sender(&self, lp: &mut Loop) -> UvResult<AsyncSender> {
        let pending = match &lp.live_entry(self.0)?.data {
            HandleData::Async(a) => Arc::clone(&a.pending),
            _ => return Err(UvError::HandleClosed),
        };
        Ok(AsyncSender {
            pending,
            notifier: Arc::clone(&lp.notifier),
        })
    }

    /// Same as `sender(lp)?.send()`, from the loop thread
    pub fn send(&self, lp: &mut Loop) -> UvResult<()> {
        self.sender(lp)?.send().map_err(UvError::Os)
    }
}

impl Loop {
    /// Run callbacks of async handles with a pending send
    pub(crate) fn run_async(&mut self) -> usize {
        let fired: Vec<HandleId> = self
            .handles
            .iter()
            .filter_map(|(slot, e)| match &e.data {
                HandleData::Async(a) if !e.closing && a.pending.swap(false, Ordering::AcqRel) => {
                    Some(HandleId::new(slot))
                }
                _ => None,
            })
            .collect();

        let mut ran = 0;
        for id in fired {
            let cb = match self.handles.get_mut(id.slot()) {
                Some(e) if !e.closing => match &mut e.data {
                    HandleData::Async(a) => a.cb.take(),
                    _ => None,
                },
                _ => None,
            };
            let Some(mut cb) = cb else {
                continue;
            };
            cb(self, Async(id));
            ran += 1;
            if let Some(HandleData::Async(a)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
                a.cb.get_or_insert(cb);
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
    use std::thread;

    #[test]
    fn test_send_from_thread() {
        let mut lp = Loop::init().unwrap();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let handle = Async::init(&mut lp, move |lp, h| {
            c.set(c.get() + 1);
            h.close(lp).unwrap();
        })
        .unwrap();
        let sender = handle.sender(&mut lp).unwrap();

        let t = thread::spawn(move || {
            sender.send().unwrap();
            sender.send().unwrap();
        });
        t.join().unwrap();

        assert!(!lp.run(RunMode::Default));
        // both sends landed before the loop ran, so they coalesce
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_closed_async_never_fires() {
        let mut lp = Loop::init().unwrap();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let handle = Async::init(&mut lp, move |_, _| c.set(c.get() + 1)).unwrap();
        let sender = handle.sender(&mut lp).unwrap();
        handle.close(&mut lp).unwrap();
        sender.send().unwrap();
        lp.run(RunMode::Default);
        assert_eq!(calls.get(), 0);
        assert_eq!(handle.sender(&mut lp).unwrap_err(), UvError::HandleClosed);
    }

    #[test]
    fn test_unref_async_does_not_block_exit() {
        let mut lp = Loop::init().unwrap();
        let handle = Async::init(&mut lp, |_, _| {}).unwrap();
        assert!(lp.alive());
        handle.unref(&mut lp).unwrap();
        assert!(!lp.run(RunMode::Default));
        handle.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }
}
