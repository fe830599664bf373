//! The event loop
//!
//! A [`Loop`] owns every handle and request bound to it, the readiness
//! poller, the timer heap and (lazily) the worker pool. All callbacks run on
//! the thread that calls [`Loop::run`], with `&mut Loop` so they can start,
//! stop and close handles or submit new requests.
//!
//! # Iteration order
//!
//! 1. update cached time
//! 2. expired timers
//! 3. pending completions (writes finished at submission, cancellations)
//! 4. prepare handles
//! 5. poll: I/O readiness, worker completions, async wakeups and signals,
//!    in readiness order
//! 6. check handles
//! 7. idle handles, only if nothing else was dispatched this iteration
//! 8. release closing handles
//!
//! Active idle handles, pending completions and releasable closing handles
//! make the poll non-blocking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use uvio_core::{
    log_debug, log_error, log_trace, log_warn, DescriptorTable, ErrorCode, HandleId, HandleKind,
    HostBridge, RequestId, RequestKind, SlotId, SlotTable, UvError, UvResult,
};

use crate::config::LoopConfig;
use crate::dns::{Resolver, SystemResolver};
use crate::handle::{HandleData, HandleEntry};
use crate::handles::phase::PhaseLists;
use crate::notifier::Notifier;
use crate::poller::{new_poller, Interest, PollEvent, Poller};
use crate::pool::{Work, WorkOutput, WorkerPool};
use crate::request::RequestEntry;
use crate::stream::pipe::ForwardLink;
use crate::sys::signal::SignalSink;
use crate::timer::{TimerHeap, TimerStats};

pub(crate) const WAKER_TOKEN: u64 = u64::MAX;
pub(crate) const SIGNAL_TOKEN: u64 = u64::MAX - 1;

/// How long [`Loop::run`] keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Until no active, referenced handles or requests remain, or `stop()`
    Default,
    /// One iteration, blocking for events if none are ready
    Once,
    /// One iteration without blocking
    NoWait,
}

/// Snapshot of loop counters
#[derive(Debug, Clone)]
pub struct LoopStats {
    pub handles: usize,
    pub active_handles: usize,
    pub requests: usize,
    pub closing: usize,
    pub iterations: u64,
    pub pool_workers: usize,
    pub pool_busy: usize,
    pub pool_backlog: usize,
    pub timers: TimerStats,
    pub poller: &'static str,
}

pub struct Loop {
    pub(crate) config: LoopConfig,
    pub(crate) handles: SlotTable<HandleEntry>,
    pub(crate) requests: SlotTable<RequestEntry>,
    pub(crate) poller: Box<dyn Poller>,
    events: Vec<PollEvent>,
    pub(crate) notifier: Arc<Notifier>,
    pool: Option<WorkerPool>,
    backlog: VecDeque<(RequestId, Work)>,
    pub(crate) timers: TimerHeap,
    pub(crate) phases: PhaseLists,
    pub(crate) pending: VecDeque<(RequestId, Result<(), ErrorCode>)>,
    pub(crate) closing: VecDeque<HandleId>,
    pub(crate) signal_sink: Option<SignalSink>,
    pub(crate) forwards: SlotTable<ForwardLink>,
    pub(crate) host: Box<dyn HostBridge>,
    pub(crate) resolver: Arc<dyn Resolver>,
    start: Instant,
    pub(crate) now: Instant,
    stop_flag: bool,
    closed: bool,
    torn_down: bool,
    is_default: bool,
    iterations: u64,
}

static DEFAULT_OWNER: OnceLock<ThreadId> = OnceLock::new();

thread_local! {
    static DEFAULT_LOOP: RefCell<Option<Loop>> = const { RefCell::new(None) };
}

fn init_err(err: std::io::Error) -> UvError {
    UvError::InitFailed(ErrorCode::from_io(&err))
}

impl Loop {
    /// New loop configured from the environment
    pub fn init() -> UvResult<Loop> {
        Self::with_config(LoopConfig::from_env())
    }

    /// New loop with an explicit configuration
    pub fn with_config(config: LoopConfig) -> UvResult<Loop> {
        if let Err(e) = config.validate() {
            log_error!("loop init: {}", e);
            return Err(UvError::InitFailed(ErrorCode::EINVAL));
        }
        let mut poller = new_poller(config.poller, config.events_capacity).map_err(init_err)?;
        let notifier = Arc::new(Notifier::new().map_err(init_err)?);
        poller
            .register(notifier.fd(), WAKER_TOKEN, Interest::READABLE)
            .map_err(init_err)?;
        log_debug!("loop created ({} poller)", poller.name());

        let now = Instant::now();
        Ok(Loop {
            events: Vec::with_capacity(config.events_capacity),
            config,
            handles: SlotTable::with_capacity(64),
            requests: SlotTable::with_capacity(64),
            poller,
            notifier,
            pool: None,
            backlog: VecDeque::new(),
            timers: TimerHeap::new(),
            phases: PhaseLists::default(),
            pending: VecDeque::new(),
            closing: VecDeque::new(),
            signal_sink: None,
            forwards: SlotTable::new(),
            host: Box::new(DescriptorTable::new()),
            resolver: Arc::new(SystemResolver),
            start: now,
            now,
            stop_flag: false,
            closed: false,
            torn_down: false,
            is_default: false,
            iterations: 0,
        })
    }

    /// Run `f` against the process-wide default loop.
    ///
    /// The default loop is created on first use and belongs to the thread
    /// that first asked for it; other threads get `InitFailed(EBUSY)`.
    /// Re-entering from inside `f` fails with `AlreadyActive`.
    pub fn with_default<R, F>(f: F) -> UvResult<R>
    where
        F: FnOnce(&mut Loop) -> R,
    {
        let me = thread::current().id();
        if *DEFAULT_OWNER.get_or_init(|| me) != me {
            return Err(UvError::InitFailed(ErrorCode::EBUSY));
        }
        DEFAULT_LOOP.with(|cell| {
            let mut slot = cell.try_borrow_mut().map_err(|_| UvError::AlreadyActive)?;
            let lp = match slot.as_mut() {
                Some(lp) => lp,
                None => {
                    let mut lp = Loop::init()?;
                    lp.is_default = true;
                    slot.insert(lp)
                }
            };
            Ok(f(lp))
        })
    }

    /// Whether this is the process-wide default loop
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Replace the descriptor bridge used for opened files
    pub fn set_host_bridge(&mut self, host: Box<dyn HostBridge>) {
        self.host = host;
    }

    pub fn host_bridge(&mut self) -> &mut dyn HostBridge {
        self.host.as_mut()
    }

    /// Replace the resolver used by address resolution requests
    pub fn set_resolver(&mut self, resolver: Arc<dyn Resolver>) {
        self.resolver = resolver;
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Milliseconds since the loop was created, as of the last time update
    pub fn now(&self) -> u64 {
        self.now.duration_since(self.start).as_millis() as u64
    }

    pub(crate) fn now_instant(&self) -> Instant {
        self.now
    }

    pub fn update_time(&mut self) {
        self.now = Instant::now();
    }

    // ------------------------------------------------------------------
    // Liveness
    // ------------------------------------------------------------------

    pub(crate) fn has_active_handles(&self) -> bool {
        self.handles.iter().any(|(_, e)| e.keeps_alive())
    }

    /// Active referenced handles, in-flight requests or closing handles remain
    pub fn alive(&self) -> bool {
        self.has_active_handles() || !self.requests.is_empty() || !self.closing.is_empty()
    }

    /// Ask `run` to return after the current iteration. Idempotent.
    pub fn stop(&mut self) {
        self.stop_flag = true;
    }

    /// How long the next poll would block; `None` means indefinitely
    pub fn backend_timeout(&mut self) -> Option<Duration> {
        if self.stop_flag || (!self.has_active_handles() && self.requests.is_empty()) {
            return Some(Duration::ZERO);
        }
        if !self.phases.idle.is_empty() || !self.pending.is_empty() || self.closing_ready() {
            return Some(Duration::ZERO);
        }
        let handles = &self.handles;
        self.timers
            .prune(|h, seq| armed_seq(handles, h) == Some(seq));
        self.timers
            .next_deadline()
            .map(|d| d.saturating_duration_since(self.now))
    }

    // ------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------

    /// Drive the loop. Returns whether it is still alive.
    ///
    /// Per-iteration OS failures are logged, not returned. A panicking
    /// callback unwinds out of `run`.
    pub fn run(&mut self, mode: RunMode) -> bool {
        if self.closed {
            return false;
        }
        let mut alive = self.alive();
        if !alive {
            self.update_time();
        }

        while alive && !self.stop_flag {
            self.iterations += 1;
            self.update_time();
            let fired = self.run_timers();
            let ran_pending = self.run_pending();
            self.run_phase(HandleKind::Prepare);

            let timeout = if (mode == RunMode::Once && !ran_pending) || mode == RunMode::Default {
                self.backend_timeout()
            } else {
                Some(Duration::ZERO)
            };
            let dispatched = self.poll_io(timeout);

            self.run_phase(HandleKind::Check);
            if fired == 0 && !ran_pending && dispatched == 0 {
                self.run_phase(HandleKind::Idle);
            }
            self.run_closing_handles();

            if mode == RunMode::Once {
                self.update_time();
                self.run_timers();
            }

            alive = self.alive();
            if mode != RunMode::Default {
                break;
            }
        }

        self.stop_flag = false;
        alive
    }

    fn run_timers(&mut self) -> usize {
        let mut fired = 0;
        while let Some(exp) = self.timers.pop_expired(self.now) {
            let kind = self
                .handles
                .get(exp.handle.slot())
                .filter(|e| !e.closing)
                .map(|e| e.kind);
            let ran = match kind {
                Some(HandleKind::Timer) => self.timer_fire(exp.handle, exp.seq),
                Some(HandleKind::FsPoll) => self.fs_poll_tick(exp.handle, exp.seq),
                _ => false,
            };
            if ran {
                fired += 1;
            }
        }
        fired
    }

    fn poll_io(&mut self, timeout: Option<Duration>) -> usize {
        self.flush_backlog();
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        if let Err(e) = self.poller.wait(&mut events, timeout) {
            log_warn!("poll failed: {}", e);
            self.events = events;
            return 0;
        }
        self.update_time();

        let mut dispatched = 0;
        for ev in &events {
            dispatched += match ev.token {
                WAKER_TOKEN => {
                    self.notifier.drain();
                    self.drain_pool() + self.run_async()
                }
                SIGNAL_TOKEN => self.dispatch_signals(),
                token => self.dispatch_io(HandleId::new(SlotId::from_u64(token)), *ev),
            };
        }
        self.events = events;
        dispatched
    }

    fn dispatch_io(&mut self, id: HandleId, ev: PollEvent) -> usize {
        let kind = match self.handles.get(id.slot()) {
            Some(e) if !e.closing => e.kind,
            _ => return 0,
        };
        log_trace!("io event on {} {}: {:?}", kind, id, ev);
        match kind {
            HandleKind::Tcp | HandleKind::Pipe | HandleKind::Tty => self.stream_io(id, ev),
            HandleKind::Poll => self.poll_event(id, ev),
            HandleKind::Udp => self.udp_io(id, ev),
            HandleKind::FsEvent => self.fs_event_io(id),
            _ => 0,
        }
    }

    // ------------------------------------------------------------------
    // Descriptor registration
    // ------------------------------------------------------------------

    /// Move a handle's descriptor from `old` to `new` interest.
    ///
    /// `NONE` means not registered at all, so a silent descriptor never
    /// reports hangups the handle did not ask for.
    pub(crate) fn apply_interest(
        poller: &mut dyn Poller,
        fd: std::os::unix::io::RawFd,
        id: HandleId,
        old: Interest,
        new: Interest,
    ) -> std::io::Result<()> {
        let token = id.slot().to_u64();
        match (old.is_none(), new.is_none()) {
            _ if old == new => Ok(()),
            (true, false) => poller.register(fd, token, new),
            (false, true) => poller.deregister(fd),
            _ => poller.reregister(fd, token, new),
        }
    }

    // ------------------------------------------------------------------
    // Worker pool
    // ------------------------------------------------------------------

    /// Hand `work` for `rid` to the worker pool, starting it on first use.
    pub(crate) fn queue_work(&mut self, rid: RequestId, work: Work) -> UvResult<()> {
        if self.pool.is_none() {
            let pool = WorkerPool::new(
                self.config.threadpool_size,
                self.config.pool_queue_depth,
                Arc::clone(&self.notifier),
                self.config.worker_park,
            )?;
            self.pool = Some(pool);
        }
        if !self.backlog.is_empty() {
            self.backlog.push_back((rid, work));
            return Ok(());
        }
        if let Some(pool) = self.pool.as_mut() {
            if let Err(item) = pool.submit(rid, work) {
                log_trace!("pool queue full, request {} backlogged", rid);
                self.backlog.push_back(item);
            }
        }
        Ok(())
    }

    fn flush_backlog(&mut self) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };
        while let Some((rid, work)) = self.backlog.pop_front() {
            if let Err(item) = pool.submit(rid, work) {
                self.backlog.push_front(item);
                break;
            }
        }
    }

    /// Deliver finished pool work. Returns the number of completions.
    pub(crate) fn drain_pool(&mut self) -> usize {
        let mut count = 0;
        while let Some(done) = self.pool.as_ref().and_then(|p| p.pop_completion()) {
            self.complete_work(done.req, done.output);
            count += 1;
        }
        self.flush_backlog();
        count
    }

    fn complete_work(&mut self, rid: RequestId, output: WorkOutput) {
        let Some(kind) = self.requests.get(rid.slot()).map(|r| r.kind) else {
            log_error!("completion for unknown request {}", rid);
            return;
        };
        match kind {
            RequestKind::Fs(_) => crate::fs::complete(self, rid, output),
            RequestKind::GetAddrinfo => crate::dns::complete(self, rid, output),
            RequestKind::FsPollStat => self.fs_poll_stat_done(rid, output),
            other => log_error!("request {} ({}) does not run on the pool", rid, other),
        }
    }

    fn pool_requests_pending(&self) -> bool {
        self.requests.iter().any(|(_, r)| {
            matches!(
                r.kind,
                RequestKind::Fs(_) | RequestKind::GetAddrinfo | RequestKind::FsPollStat
            )
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Visit every handle, closing ones included
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(HandleId, HandleKind),
    {
        for (slot, entry) in self.handles.iter() {
            f(HandleId::new(slot), entry.kind);
        }
    }

    /// Requests submitted but not yet completed
    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            handles: self.handles.len(),
            active_handles: self.handles.iter().filter(|(_, e)| e.active).count(),
            requests: self.requests.len(),
            closing: self.closing.len(),
            iterations: self.iterations,
            pool_workers: self.pool.as_ref().map_or(0, |p| p.total_workers()),
            pool_busy: self.pool.as_ref().map_or(0, |p| p.active_workers()),
            pool_backlog: self.backlog.len(),
            timers: self.timers.stats(),
            poller: self.poller.name(),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release the loop's OS context.
    ///
    /// Fails with `EBUSY` while any handle is open or any request is in
    /// flight; close handles and run the loop first.
    pub fn close(&mut self) -> UvResult<()> {
        if !self.handles.is_empty() || !self.requests.is_empty() {
            return Err(UvError::Os(ErrorCode::EBUSY));
        }
        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        self.signal_sink = None;
        self.closed = true;
        log_debug!("loop closed after {} iterations", self.iterations);
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.stop();

        // Final pass: pool work cannot be cancelled, so wait for it and
        // deliver its completions before the pool goes away.
        while self.pool.is_some() && self.pool_requests_pending() {
            wait_readable(self.notifier.fd(), 50);
            self.notifier.drain();
            self.drain_pool();
        }
        self.run_pending();

        let leftover = self.handles.len();
        if leftover > 0 {
            log_debug!("loop teardown: force-releasing {} handles", leftover);
        }
        for slot in self.handles.ids() {
            let _ = self.close_handle(HandleId::new(slot), None);
        }
        self.run_pending();
        self.closing.clear();
        self.requests.drain();
        // Drop entries without running close callbacks
        self.handles.drain();

        if let Some(mut pool) = self.pool.take() {
            pool.shutdown();
        }
        self.backlog.clear();
        self.signal_sink = None;
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("handles", &self.handles.len())
            .field("requests", &self.requests.len())
            .field("poller", &self.poller.name())
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Sequence of the current arm of a timer-driven handle
fn armed_seq(handles: &SlotTable<HandleEntry>, id: HandleId) -> Option<u64> {
    match &handles.get(id.slot())?.data {
        HandleData::Timer(t) => t.armed,
        HandleData::FsPoll(p) => p.armed,
        _ => None,
    }
}

fn wait_readable(fd: std::os::unix::io::RawFd, timeout_ms: i32) {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: single valid pollfd
    unsafe {
        libc::poll(&mut pfd, 1, timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::phase::{Check, Idle, Prepare};
    use crate::handles::timer::Timer;
    use crate::Handle;
    use std::rc::Rc;

    #[test]
    fn test_empty_loop_returns_immediately() {
        let mut lp = Loop::init().unwrap();
        assert!(!lp.alive());
        assert!(!lp.run(RunMode::Default));
        assert!(!lp.run(RunMode::Once));
        assert!(!lp.run(RunMode::NoWait));
        assert!(lp.close().is_ok());
    }

    #[test]
    fn test_invalid_config_fails_init() {
        let err = Loop::with_config(LoopConfig::new().threadpool_size(0)).unwrap_err();
        assert_eq!(err, UvError::InitFailed(ErrorCode::EINVAL));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        timer
            .start(
                &mut lp,
                |lp, _| {
                    lp.stop();
                    lp.stop();
                },
                0,
                1,
            )
            .unwrap();
        assert!(lp.run(RunMode::Default));
        lp.stop();
        lp.stop();
        // a stop requested outside run only ends the next run early
        assert!(lp.run(RunMode::NoWait));
        timer.close(&mut lp).unwrap();
        assert!(!lp.run(RunMode::Default));
    }

    #[test]
    fn test_phase_order() {
        let mut lp = Loop::init().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let prepare = Prepare::init(&mut lp).unwrap();
        let l = Rc::clone(&log);
        prepare.start(&mut lp, move |_, _| l.borrow_mut().push("prepare")).unwrap();

        let check = Check::init(&mut lp).unwrap();
        let l = Rc::clone(&log);
        check.start(&mut lp, move |_, _| l.borrow_mut().push("check")).unwrap();

        let timer = Timer::init(&mut lp).unwrap();
        let l = Rc::clone(&log);
        timer.start(&mut lp, move |_, _| l.borrow_mut().push("timer"), 0, 0).unwrap();

        lp.update_time();
        std::thread::sleep(Duration::from_millis(2));
        lp.run(RunMode::NoWait);
        assert_eq!(*log.borrow(), vec!["timer", "prepare", "check"]);

        prepare.close(&mut lp).unwrap();
        check.close(&mut lp).unwrap();
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_idle_runs_only_when_nothing_else_ready() {
        let mut lp = Loop::init().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let idle = Idle::init(&mut lp).unwrap();
        let l = Rc::clone(&log);
        idle.start(&mut lp, move |lp, h| {
            l.borrow_mut().push("idle");
            if l.borrow().len() >= 3 {
                h.stop(lp).unwrap();
            }
        })
        .unwrap();

        let timer = Timer::init(&mut lp).unwrap();
        let l = Rc::clone(&log);
        timer.start(&mut lp, move |_, _| l.borrow_mut().push("timer"), 0, 0).unwrap();

        lp.update_time();
        std::thread::sleep(Duration::from_millis(2));
        lp.run(RunMode::Default);

        let log = log.borrow();
        assert_eq!(log[0], "timer");
        assert_eq!(log.iter().filter(|s| **s == "idle").count(), 2);
        idle.close(&mut lp).unwrap();
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_backend_timeout_follows_timer() {
        let mut lp = Loop::init().unwrap();
        assert_eq!(lp.backend_timeout(), Some(Duration::ZERO));
        let timer = Timer::init(&mut lp).unwrap();
        timer.start(&mut lp, |_, _| {}, 5_000, 0).unwrap();
        let t = lp.backend_timeout().unwrap();
        assert!(t > Duration::from_millis(4_000) && t <= Duration::from_millis(5_000));
        timer.stop(&mut lp).unwrap();
        assert_eq!(lp.backend_timeout(), Some(Duration::ZERO));
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
    }

    #[test]
    fn test_close_busy_loop() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        assert_eq!(lp.close(), Err(UvError::Os(ErrorCode::EBUSY)));
        timer.close(&mut lp).unwrap();
        lp.run(RunMode::Default);
        assert!(lp.close().is_ok());
        assert!(!lp.run(RunMode::Default));
    }

    #[test]
    fn test_default_loop_is_shared() {
        // Runs on its own thread so it can own the default loop
        std::thread::spawn(|| {
            let first = Loop::with_default(|lp| {
                assert!(lp.is_default());
                let timer = Timer::init(lp).unwrap();
                timer.id()
            })
            .unwrap();
            let seen = Loop::with_default(|lp| {
                let mut ids = Vec::new();
                lp.walk(|id, _| ids.push(id));
                ids
            })
            .unwrap();
            assert_eq!(seen, vec![first]);

            let nested = Loop::with_default(|_| Loop::with_default(|_| ())).unwrap();
            assert_eq!(nested, Err(UvError::AlreadyActive));
        })
        .join()
        .unwrap();

        // Any other thread is refused
        assert_eq!(
            Loop::with_default(|_| ()).unwrap_err(),
            UvError::InitFailed(ErrorCode::EBUSY)
        );
    }

    #[test]
    fn test_stats() {
        let mut lp = Loop::init().unwrap();
        let timer = Timer::init(&mut lp).unwrap();
        timer.start(&mut lp, |_, _| {}, 1_000, 0).unwrap();
        let stats = lp.stats();
        assert_eq!(stats.handles, 1);
        assert_eq!(stats.active_handles, 1);
        assert_eq!(stats.pool_workers, 0);
        timer.close(&mut lp).unwrap();
    }
}
