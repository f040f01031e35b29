//! Signal relay for the launcher supervisor.
//!
//! Signals delivered to the supervisor are collected on a background thread
//! and handed to the supervising loop over a channel. The handler itself
//! does no work beyond what signal-hook performs.

use crossbeam_channel::{unbounded, Receiver};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use signal_hook::consts::signal::{
    SIGALRM, SIGCONT, SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGWINCH,
};
use signal_hook::iterator::{Handle, Signals};
use std::thread::JoinHandle;

/// Signals the supervisor catches and forwards to the supervised child
pub const RELAYED_SIGNALS: &[libc::c_int] = &[
    SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2, SIGWINCH, SIGCONT, SIGALRM,
];

/// Background signal listener feeding a channel
pub struct SignalRelay {
    handle: Handle,
    receiver: Receiver<libc::c_int>,
    thread: Option<JoinHandle<()>>,
}

impl SignalRelay {
    /// Install handlers for [`RELAYED_SIGNALS`]
    pub fn install() -> std::io::Result<Self> {
        Self::install_for(RELAYED_SIGNALS)
    }

    /// Install handlers for an explicit signal set
    pub fn install_for(set: &[libc::c_int]) -> std::io::Result<Self> {
        let mut signals = Signals::new(set)?;
        let handle = signals.handle();
        let (tx, rx) = unbounded();

        let thread = std::thread::Builder::new()
            .name("parker-signals".to_string())
            .spawn(move || {
                for sig in signals.forever() {
                    if tx.send(sig).is_err() {
                        break;
                    }
                }
            })?;

        log::debug!("signal relay installed for {:?}", signals_names(set));
        Ok(Self {
            handle,
            receiver: rx,
            thread: Some(thread),
        })
    }

    /// Stream of received signal numbers
    pub fn receiver(&self) -> &Receiver<libc::c_int> {
        &self.receiver
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn signals_names(signals: &[libc::c_int]) -> Vec<String> {
    signals
        .iter()
        .map(|sig| match Signal::try_from(*sig) {
            Ok(s) => s.as_str().to_string(),
            Err(_) => sig.to_string(),
        })
        .collect()
}

/// Forward `sig` to the process group led by `pid`, or to `pid` alone when
/// no such group exists.
pub fn forward_signal(pid: u32, sig: libc::c_int) -> nix::Result<()> {
    let signal = Signal::try_from(sig)?;
    let pid = Pid::from_raw(pid as i32);

    match signal::killpg(pid, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => signal::kill(pid, signal),
        Err(e) => Err(e),
    }
}
