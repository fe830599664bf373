//! uvio End-to-End Smoke Test
//!
//! Drives one loop through every kind of work it supports:
//!   Part A: loop phases, timers, idle/prepare/check
//!   Part B: streams (pipe pair, TCP echo)
//!   Part C: filesystem requests on the worker pool
//!   Part D: signals, child processes, cross-thread wakeups
//!   Part E: UDP and address resolution
//!
//! Run: ./target/release/uvio-smoke
//! Set UVIO_LOG_LEVEL=debug to watch the loop.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;

use uvio::fs::{self, FsOp, FsOutcome};
use uvio::prelude::*;
use uvio::{Async, Check, HeapBuffers, Idle, Prepare, Process, ProcessOptions, Signal, StdioSpec, Udp};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    /// Record a setup step; returns the value on success
    fn step<T>(&mut self, name: &str, res: UvResult<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.fail(name, &e.to_string());
                None
            }
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

type Log = Rc<RefCell<Vec<String>>>;

fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("uvio-smoke-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

// ════════════════════════════════════════════════════════════
// Part A: Loop phases
// ════════════════════════════════════════════════════════════

fn test_phases(t: &mut TestRunner, lp: &mut Loop) {
    t.section("Part A: Loop phases and timers");

    let log = new_log();
    let setup = (|| -> UvResult<()> {
        for (name, ms) in [("t20", 20u64), ("t5", 5), ("t10", 10)] {
            let l = Rc::clone(&log);
            let timer = Timer::init(lp)?;
            timer.start(lp, move |lp, t| {
                l.borrow_mut().push(name.to_string());
                t.close(lp).ok();
            }, ms, 0)?;
        }

        let prepare = Prepare::init(lp)?;
        let check = Check::init(lp)?;
        let (lprep, lc) = (Rc::clone(&log), Rc::clone(&log));
        prepare.start(lp, move |lp, p| {
            lprep.borrow_mut().push("prepare".into());
            p.close(lp).ok();
        })?;
        check.start(lp, move |lp, c| {
            lc.borrow_mut().push("check".into());
            c.close(lp).ok();
        })?;

        let idle = Idle::init(lp)?;
        let li = Rc::clone(&log);
        idle.start(lp, move |lp, i| {
            li.borrow_mut().push("idle".into());
            i.close(lp).ok();
        })?;
        Ok(())
    })();
    if t.step("phase handles set up", setup).is_none() {
        return;
    }

    let alive = lp.run(RunMode::Default);
    t.check("run(Default) drains to not-alive", !alive, "loop still alive");

    let log = log.borrow();
    let pos = |s: &str| log.iter().position(|e| e == s);
    let ordered = matches!((pos("prepare"), pos("check")), (Some(p), Some(c)) if p < c);
    t.check("prepare runs before check", ordered, &format!("{:?}", log));
    let timers: Vec<&str> = log.iter().filter(|e| e.starts_with('t')).map(|s| s.as_str()).collect();
    t.check("timers fire in deadline order", timers == ["t5", "t10", "t20"], &format!("{:?}", timers));
    t.check("idle ran", pos("idle").is_some(), &format!("{:?}", log));
}

// ════════════════════════════════════════════════════════════
// Part B: Streams
// ════════════════════════════════════════════════════════════

fn test_streams(t: &mut TestRunner, lp: &mut Loop) {
    t.section("Part B: Streams");

    // B1: pipe pair round-trip
    let received = Rc::new(RefCell::new(Vec::new()));
    let eof = Rc::new(Cell::new(false));
    let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    let setup = (|| -> UvResult<()> {
        let (reader, writer) = Pipe::pair(lp)?;
        let (r, e) = (Rc::clone(&received), Rc::clone(&eof));
        reader.read_start(lp, move |lp, p, res| match res {
            Ok(buf) => r.borrow_mut().extend_from_slice(&buf),
            Err(code) => {
                e.set(code.is_eof());
                p.close(lp).ok();
            }
        })?;
        writer.write(lp, Buffer::from(payload.clone()), |lp, w, _| {
            w.close(lp).ok();
        })?;
        Ok(())
    })();
    if t.step("pipe pair set up", setup).is_some() {
        lp.run(RunMode::Default);
        t.check("pipe: 64 KiB arrives intact", *received.borrow() == payload,
            &format!("got {} bytes", received.borrow().len()));
        t.check("pipe: reader sees EOF", eof.get(), "no EOF");
    }

    // B2: TCP echo over loopback
    let echoed = Rc::new(RefCell::new(Vec::new()));
    let setup = (|| -> UvResult<()> {
        let server = Tcp::init(lp)?;
        server.bind(lp, loopback(0))?;
        let addr = server.local_addr(lp)?;
        server.listen(lp, 16, |lp, server, status| {
            if status.is_err() {
                return;
            }
            let Ok(conn) = Tcp::init(lp) else { return };
            if server.accept(lp, conn).is_err() {
                return;
            }
            conn.read_start(lp, move |lp, conn, res| match res {
                Ok(buf) => {
                    conn.write(lp, buf, |_, _, _| {}).ok();
                }
                Err(_) => {
                    conn.close(lp).ok();
                    server.close(lp).ok();
                }
            }).ok();
        })?;

        let client = Tcp::init(lp)?;
        let e = Rc::clone(&echoed);
        client.connect(lp, addr, move |lp, client, status| {
            if status.is_err() {
                client.close(lp).ok();
                return;
            }
            client.write(lp, Buffer::from("hello, loop"), |_, _, _| {}).ok();
            client.read_start(lp, move |lp, client, res| {
                if let Ok(buf) = res {
                    e.borrow_mut().extend_from_slice(&buf);
                }
                if e.borrow().len() >= 11 {
                    client.shutdown(lp, |lp, c, _| { c.close(lp).ok(); }).ok();
                }
            }).ok();
        })?;
        Ok(())
    })();
    if t.step("tcp echo set up", setup).is_some() {
        lp.run(RunMode::Default);
        t.check("tcp: echo round-trip", echoed.borrow().as_slice() == b"hello, loop",
            &String::from_utf8_lossy(&echoed.borrow()));
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Filesystem
// ════════════════════════════════════════════════════════════

fn test_fs(t: &mut TestRunner, lp: &mut Loop) {
    t.section("Part C: Filesystem requests");

    let dir = scratch_dir();
    let file = dir.join("data.txt");

    let made = fs::submit_sync(lp, FsOp::Mkdir { path: dir.clone(), mode: 0o755 });
    t.check("mkdir (sync)", made.is_ok(), &format!("{:?}", made.err()));
    let again = fs::submit_sync(lp, FsOp::Mkdir { path: dir.clone(), mode: 0o755 });
    t.check("mkdir existing -> EEXIST", again.err() == Some(UvError::Os(ErrorCode::EEXIST)), "expected EEXIST");

    let fd = match fs::submit_sync(lp, FsOp::Open {
        path: file.clone(),
        flags: libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
        mode: 0o644,
    }) {
        Ok(FsOutcome::Opened { fd, .. }) => { t.pass("open (sync)"); fd }
        other => { t.fail("open (sync)", &format!("{:?}", other)); return; }
    };

    let written = Rc::new(Cell::new(None));
    let read_back = Rc::new(RefCell::new(None));
    let w = Rc::clone(&written);
    let rb = Rc::clone(&read_back);
    let submitted = fs::submit(lp, FsOp::Write { fd, buf: Buffer::from("on the pool"), offset: 0 },
        move |lp, res| {
            w.set(match res { Ok(FsOutcome::Written(n)) => Some(n), _ => None });
            fs::submit(lp, FsOp::Read { fd, len: 64, offset: 0 }, move |lp, res| {
                if let Ok(FsOutcome::Read(buf)) = res {
                    *rb.borrow_mut() = Some(buf.to_string_lossy(None));
                }
                fs::submit(lp, FsOp::Close { fd }, |_, _| {}).ok();
            }).ok();
        });
    if t.step("write (async) submitted", submitted).is_some() {
        lp.run(RunMode::Default);
        t.check("write (async) reports 11 bytes", written.get() == Some(11), &format!("{:?}", written.get()));
        t.check("read (async) returns the data", read_back.borrow().as_deref() == Some("on the pool"),
            &format!("{:?}", read_back.borrow()));
    }

    match fs::submit_sync(lp, FsOp::Stat { path: file.clone() }) {
        Ok(FsOutcome::Stat(st)) => t.check("stat size", st.size == 11, &format!("size {}", st.size)),
        other => t.fail("stat size", &format!("{:?}", other)),
    }
    match fs::submit_sync(lp, FsOp::Scandir { path: dir.clone() }) {
        Ok(FsOutcome::Entries(it)) => {
            let names: Vec<String> = it.map(|e| e.name).collect();
            t.check("scandir lists the file", names == ["data.txt"], &format!("{:?}", names));
        }
        other => t.fail("scandir lists the file", &format!("{:?}", other)),
    }

    let ok = fs::submit_sync(lp, FsOp::Unlink { path: file }).is_ok()
        && fs::submit_sync(lp, FsOp::Rmdir { path: dir }).is_ok();
    t.check("unlink + rmdir", ok, "cleanup failed");
}

// ════════════════════════════════════════════════════════════
// Part D: Signals, processes, async
// ════════════════════════════════════════════════════════════

fn test_signals_processes(t: &mut TestRunner, lp: &mut Loop) {
    t.section("Part D: Signals, processes, async wakeups");

    // D1: SIGUSR1 delivered on the loop thread
    let got = Rc::new(Cell::new(0));
    let g = Rc::clone(&got);
    let setup = Signal::init(lp).and_then(|sig| {
        sig.start_oneshot(lp, move |lp, s, signum| {
            g.set(signum);
            s.close(lp).ok();
        }, libc::SIGUSR1)
    });
    if t.step("signal watch", setup).is_some() {
        // SAFETY: SIGUSR1 is routed to the loop's handler
        unsafe { libc::raise(libc::SIGUSR1) };
        lp.run(RunMode::Default);
        t.check("signal: SIGUSR1 callback", got.get() == libc::SIGUSR1, &format!("got {}", got.get()));
    }

    // D2: child exit status and stdout pipe
    let exit = Rc::new(Cell::new(None));
    let out = Rc::new(RefCell::new(String::new()));
    let setup = (|| -> UvResult<()> {
        let stdout = Pipe::init(lp)?;
        let opts = ProcessOptions::new("sh")
            .arg("-c")
            .arg("echo child; exit 3")
            .stdout(StdioSpec::CreatePipe(stdout));
        let e = Rc::clone(&exit);
        Process::spawn(lp, opts, move |lp, p, status, signal| {
            e.set(Some((status, signal)));
            p.close(lp).ok();
        })?;
        let o = Rc::clone(&out);
        stdout.read_start_with(lp, HeapBuffers::default(), move |lp, p, res| match res {
            Ok(buf) => o.borrow_mut().push_str(&buf.to_string_lossy(None)),
            Err(_) => { p.close(lp).ok(); }
        })?;
        Ok(())
    })();
    if t.step("spawn sh", setup).is_some() {
        lp.run(RunMode::Default);
        t.check("process: exit status 3", exit.get() == Some((3, 0)), &format!("{:?}", exit.get()));
        t.check("process: stdout captured", out.borrow().trim() == "child", &out.borrow());
    }

    // D3: wakeup from another thread
    let woke = Rc::new(Cell::new(false));
    let w = Rc::clone(&woke);
    let setup = Async::init(lp, move |lp, a| {
        w.set(true);
        a.close(lp).ok();
    }).and_then(|a| a.sender(lp));
    if let Some(sender) = t.step("async handle", setup) {
        let th = std::thread::spawn(move || sender.send());
        lp.run(RunMode::Default);
        let sent = th.join().map(|r| r.is_ok()).unwrap_or(false);
        t.check("async: send from thread wakes loop", woke.get() && sent, "callback did not run");
    }
}

// ════════════════════════════════════════════════════════════
// Part E: UDP and DNS
// ════════════════════════════════════════════════════════════

fn test_udp_dns(t: &mut TestRunner, lp: &mut Loop) {
    t.section("Part E: UDP and address resolution");

    let datagram = Rc::new(RefCell::new(None));
    let setup = (|| -> UvResult<()> {
        let rx = Udp::init(lp)?;
        rx.bind(lp, loopback(0))?;
        let to = rx.local_addr(lp)?;
        let d = Rc::clone(&datagram);
        rx.recv_start(lp, HeapBuffers::default(), move |lp, u, res| {
            if let Ok((buf, _from)) = res {
                *d.borrow_mut() = Some(buf.to_string_lossy(None));
            }
            u.close(lp).ok();
        })?;
        let tx = Udp::init(lp)?;
        tx.send(lp, Buffer::from("datagram"), to, |lp, u, _| { u.close(lp).ok(); })?;
        Ok(())
    })();
    if t.step("udp set up", setup).is_some() {
        lp.run(RunMode::Default);
        t.check("udp: loopback datagram", datagram.borrow().as_deref() == Some("datagram"),
            &format!("{:?}", datagram.borrow()));
    }

    let addrs = Rc::new(RefCell::new(None));
    let a = Rc::clone(&addrs);
    let hints = uvio::AddrHints {
        socktype: libc::SOCK_STREAM,
        flags: libc::AI_NUMERICHOST,
        ..Default::default()
    };
    let submitted = uvio::dns::resolve(lp, move |_, res| { *a.borrow_mut() = Some(res); },
        Some("127.0.0.1"), Some("80"), Some(hints));
    if t.step("resolve submitted", submitted).is_some() {
        lp.run(RunMode::Default);
        let ok = matches!(addrs.borrow().as_ref(), Some(Ok(v)) if v.first() == Some(&loopback(80)));
        t.check("dns: numeric host resolves", ok, &format!("{:?}", addrs.borrow()));
    }
}

// ════════════════════════════════════════════════════════════

fn main() {
    uvio::init_logging();
    println!("=== uvio End-to-End Smoke Test ===");

    let mut t = TestRunner::new();
    let mut lp = match Loop::with_config(LoopConfig::from_env()) {
        Ok(lp) => lp,
        Err(e) => {
            println!("\nFATAL: loop init failed: {}", e);
            std::process::exit(1);
        }
    };
    println!("    poller: {}", lp.stats().poller);

    test_phases(&mut t, &mut lp);
    test_streams(&mut t, &mut lp);
    test_fs(&mut t, &mut lp);
    test_signals_processes(&mut t, &mut lp);
    test_udp_dns(&mut t, &mut lp);

    t.section("Teardown");
    let stats = lp.stats();
    t.check("no handles or requests left", stats.handles == 0 && stats.requests == 0,
        &format!("{} handles, {} requests", stats.handles, stats.requests));
    let closed = lp.close();
    t.check("loop close", closed.is_ok(), &format!("{:?}", closed));

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
