//! Child processes
//!
//! Exit is detected through SIGCHLD: every spawn watches the signal on the
//! loop's sink, and each delivery polls the loop's live children with a
//! non-blocking wait. A handle stays active until its child is reaped.

use std::ffi::OsString;
use std::os::unix::io::{OwnedFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use uvio_core::{log_debug, log_warn, ErrorCode, HandleId, HandleKind, UvError, UvResult};

use crate::event_loop::Loop;
use crate::handle::{handle_type, Handle, HandleData};
use crate::stream::pipe::Pipe;
use crate::sys::{self, signal};

pub(crate) type ExitCb = Box<dyn FnOnce(&mut Loop, Process, i64, i32)>;

/// Where a child's standard descriptor goes
#[derive(Debug)]
pub enum StdioSpec {
    /// `/dev/null`
    Ignore,
    /// Share the parent's descriptor
    Inherit,
    /// Duplicate this descriptor into the child
    InheritFd(RawFd),
    /// Connect to a new OS pipe and open it on this (unopened) pipe handle
    CreatePipe(Pipe),
}

/// What to run and how
#[derive(Debug)]
pub struct ProcessOptions {
    file: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    clear_env: bool,
    cwd: Option<PathBuf>,
    stdio: [StdioSpec; 3],
}

impl ProcessOptions {
    /// Run `file`, searched in `PATH` when it has no slash
    pub fn new<S: Into<OsString>>(file: S) -> Self {
        ProcessOptions {
            file: file.into(),
            args: Vec::new(),
            env: Vec::new(),
            clear_env: false,
            cwd: None,
            stdio: [StdioSpec::Ignore, StdioSpec::Ignore, StdioSpec::Ignore],
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<OsString>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Start from an empty environment instead of the parent's
    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn cwd<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, spec: StdioSpec) -> Self {
        self.stdio[0] = spec;
        self
    }

    pub fn stdout(mut self, spec: StdioSpec) -> Self {
        self.stdio[1] = spec;
        self
    }

    pub fn stderr(mut self, spec: StdioSpec) -> Self {
        self.stdio[2] = spec;
        self
    }
}

pub(crate) struct ProcessState {
    child: Option<Child>,
    pid: u32,
    exit_cb: Option<ExitCb>,
}

handle_type!(
    /// A spawned child process.
    Process,
    HandleKind::Process
);

fn stdio_for(spec: &StdioSpec) -> UvResult<Stdio> {
    Ok(match spec {
        StdioSpec::Ignore => Stdio::null(),
        StdioSpec::Inherit => Stdio::inherit(),
        StdioSpec::InheritFd(fd) => Stdio::from(sys::dup(*fd)?),
        StdioSpec::CreatePipe(_) => Stdio::piped(),
    })
}

/// `(exit status, terminating signal)`
fn exit_parts(status: ExitStatus) -> (i64, i32) {
    (
        status.code().map(i64::from).unwrap_or(0),
        status.signal().unwrap_or(0),
    )
}

impl Process {
    /// Spawn a child. `exit_cb` runs once, on the loop thread, after the
    /// child has been reaped.
    pub fn spawn<F>(lp: &mut Loop, options: ProcessOptions, exit_cb: F) -> UvResult<Process>
    where
        F: FnOnce(&mut Loop, Process, i64, i32) + 'static,
    {
        for spec in &options.stdio {
            if let StdioSpec::CreatePipe(pipe) = spec {
                lp.pipe_check_unopened(pipe.id())?;
            }
        }

        let mut cmd = Command::new(&options.file);
        cmd.args(&options.args);
        if options.clear_env {
            cmd.env_clear();
        }
        cmd.envs(options.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &options.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(stdio_for(&options.stdio[0])?)
            .stdout(stdio_for(&options.stdio[1])?)
            .stderr(stdio_for(&options.stdio[2])?);

        // Watch before the fork so an early exit is not missed
        lp.ensure_signal_sink()?;
        signal::watch(libc::SIGCHLD)?;
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                signal::unwatch(libc::SIGCHLD);
                return Err(e.into());
            }
        };
        let pid = child.id();
        log_debug!("spawned {:?} as pid {}", options.file, pid);

        let ends: [Option<OwnedFd>; 3] = [
            child.stdin.take().map(OwnedFd::from),
            child.stdout.take().map(OwnedFd::from),
            child.stderr.take().map(OwnedFd::from),
        ];

        let state = ProcessState {
            child: Some(child),
            pid,
            exit_cb: Some(Box::new(exit_cb)),
        };
        let id = match lp.insert_handle(HandleKind::Process, HandleData::Process(state)) {
            Ok(id) => id,
            Err(e) => {
                signal::unwatch(libc::SIGCHLD);
                return Err(e);
            }
        };
        lp.set_active(id, true);

        for (spec, end) in options.stdio.iter().zip(ends) {
            if let (StdioSpec::CreatePipe(pipe), Some(fd)) = (spec, end) {
                if let Err(e) = pipe.open(lp, fd) {
                    log_warn!("process {}: attaching stdio pipe failed: {}", pid, e);
                }
            }
        }

        Ok(Process(id))
    }

    /// OS process id
    pub fn pid(&self, lp: &mut Loop) -> UvResult<u32> {
        Ok(lp.process_state(self.0)?.pid)
    }

    /// Send `signum` to the child. `ESRCH` once it has been reaped.
    pub fn kill(&self, lp: &mut Loop, signum: i32) -> UvResult<()> {
        let state = lp.process_state(self.0)?;
        if state.child.is_none() {
            return Err(UvError::Os(ErrorCode::from_errno(libc::ESRCH)));
        }
        Process::kill_pid(state.pid, signum)
    }

    /// Send `signum` to an arbitrary pid
    pub fn kill_pid(pid: u32, signum: i32) -> UvResult<()> {
        // SAFETY: kill(2) has no memory-safety preconditions
        sys::cvt(unsafe { libc::kill(pid as libc::pid_t, signum) })?;
        Ok(())
    }
}

impl Loop {
    fn process_state(&mut self, id: HandleId) -> UvResult<&mut ProcessState> {
        match &mut self.live_entry(id)?.data {
            HandleData::Process(s) => Ok(s),
            _ => Err(UvError::HandleClosed),
        }
    }

    /// Reap exited children. Returns the number of exit callbacks run.
    pub(crate) fn reap_children(&mut self) -> usize {
        let running: Vec<HandleId> = self
            .handles
            .iter()
            .filter_map(|(slot, e)| match &e.data {
                HandleData::Process(p) if p.child.is_some() => Some(HandleId::new(slot)),
                _ => None,
            })
            .collect();

        let mut ran = 0;
        for id in running {
            let status = {
                let Some(HandleData::Process(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) else {
                    continue;
                };
                let Some(child) = state.child.as_mut() else {
                    continue;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        state.child = None;
                        status
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        log_warn!("process {}: wait failed: {}", state.pid, e);
                        continue;
                    }
                }
            };
            signal::unwatch(libc::SIGCHLD);
            self.set_active(id, false);

            let (exit_status, term_signal) = exit_parts(status);
            log_debug!("process {} exited ({}, signal {})", id, exit_status, term_signal);
            let cb = self.process_state(id).ok().and_then(|s| s.exit_cb.take());
            if let Some(cb) = cb {
                cb(self, Process(id), exit_status, term_signal);
                ran += 1;
            }
        }
        ran
    }

    pub(crate) fn process_on_close(&mut self, id: HandleId) {
        if let Some(HandleData::Process(state)) = self.handles.get_mut(id.slot()).map(|e| &mut e.data) {
            state.exit_cb = None;
            // Still running: stop watching, the child is left alone
            if state.child.take().is_some() {
                signal::unwatch(libc::SIGCHLD);
            }
        }
    }
}
