//! Shutdown signals
//!
//! SIGINT, SIGQUIT, SIGUSR1, SIGUSR2 and SIGTERM raise the process
//! [`StopFlag`]. The frame loop checks it between frames and a producer
//! blocked on a full queue gives up on it, so both threads wind down within
//! one queue wake. The fifth signal exits immediately with status 1 in case
//! the orderly path is stuck.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use spibus::StopFlag;

/// Signals that request shutdown.
pub const SHUTDOWN_SIGNALS: [libc::c_int; 5] = [libc::SIGINT, libc::SIGQUIT, libc::SIGUSR1, libc::SIGUSR2, libc::SIGTERM];

/// Signals after which the process exits without cleanup.
pub const FORCE_EXIT_AFTER: u32 = 5;

static STOP: OnceLock<StopFlag> = OnceLock::new();
static RECEIVED: AtomicU32 = AtomicU32::new(0);

extern "C" fn on_signal(_: libc::c_int) {
    // Only atomics in here.
    let count = RECEIVED.fetch_add(1, Ordering::SeqCst).saturating_add(1);
    if count >= FORCE_EXIT_AFTER {
        // SAFETY: `_exit` is async-signal-safe and never returns.
        unsafe { libc::_exit(1) };
    }
    if let Some(stop) = STOP.get() {
        stop.raise();
    }
}

/// Route the shutdown signals to `stop`. Can be called once per process.
pub fn install(stop: &StopFlag) -> io::Result<()> {
    STOP.set(stop.clone())
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "signal handlers already installed"))?;
    for signal in SHUTDOWN_SIGNALS {
        // SAFETY: `on_signal` only touches atomics and `_exit`, both
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, on_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    tracing::debug!(signals = SHUTDOWN_SIGNALS.len(), "signal handlers installed");
    Ok(())
}

/// Shutdown signals received so far.
pub fn received() -> u32 {
    RECEIVED.load(Ordering::SeqCst)
}
