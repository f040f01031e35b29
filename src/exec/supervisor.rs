//! Supervising loop: relay signals to the child until it completes.
//!
//! Two producers feed one consumer. A waiter thread blocks until the child
//! has exited and posts into a single-slot channel; the signal relay posts
//! every received signal. Only the completion slot ends the loop.
//!
//! The waiter observes the exit without reaping (`WNOWAIT`), so the child's
//! pid stays reserved as a zombie until the loop itself reaps it. A relayed
//! signal can therefore never reach a recycled pid.

use crate::config::types::{ParkerError, Result};
use crate::kernel::signal::forward_signal;
use crossbeam_channel::{bounded, never, select, Receiver, TryRecvError};
use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};

/// Exit code the launcher reports for a finished child: its own code, or
/// `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}

/// Block until `pid` has exited, leaving it unreaped.
fn wait_exited(pid: u32) -> nix::Result<()> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(Pid::from_raw(pid as i32)), flags) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

enum Event {
    Signal(libc::c_int),
    SignalsClosed,
    Exited(nix::Result<()>),
}

/// Block until `child` exits, forwarding everything that arrives on `signals`.
/// Returns the child's exit status once it has been reaped.
pub fn supervise(mut child: Child, signals: &Receiver<libc::c_int>) -> Result<ExitStatus> {
    let pid = child.id();
    let (done_tx, done_rx) = bounded(1);

    let waiter = std::thread::Builder::new()
        .name("parker-wait".to_string())
        .spawn(move || {
            let _ = done_tx.send(wait_exited(pid));
        })?;

    let mut signals_open = true;
    let exited = loop {
        let signal_rx = if signals_open {
            signals.clone()
        } else {
            never()
        };

        let event = select! {
            recv(signal_rx) -> msg => match msg {
                Ok(sig) => Event::Signal(sig),
                Err(_) => Event::SignalsClosed,
            },
            recv(done_rx) -> msg => Event::Exited(msg.unwrap_or(Err(Errno::ECHILD))),
        };

        match event {
            Event::Signal(sig) => {
                log::debug!("receive signal: {}", sig);
                // completion wins over a signal that arrived alongside it
                match done_rx.try_recv() {
                    Ok(result) => break result,
                    Err(TryRecvError::Disconnected) => break Err(Errno::ECHILD),
                    Err(TryRecvError::Empty) => {}
                }
                match forward_signal(pid, sig) {
                    Ok(()) => log::debug!("signal {} forwarded to {}", sig, pid),
                    // the child may already be gone
                    Err(e) => log::debug!("send signal {} to {} err: {}", sig, pid, e),
                }
            }
            Event::SignalsClosed => {
                log::debug!("signal source closed, waiting on child only");
                signals_open = false;
            }
            Event::Exited(result) => break result,
        }
    };

    let _ = waiter.join();
    if let Err(e) = exited {
        log::debug!("waiter for child {} failed: {}", pid, e);
    }

    match child.wait() {
        Ok(status) => {
            log::debug!("child {} done: {}", pid, status);
            Ok(status)
        }
        Err(e) => Err(ParkerError::AbortLaunch(format!(
            "failed to wait for child {}: {}",
            pid, e
        ))),
    }
}
