//! Terminal resize handling so the child PTY tracks the controlling terminal.

use anyhow::{anyhow, Result};
use butterfish::log_debug;
use butterfish::pty_session::ShellSession;
use crossterm::terminal::size as terminal_size;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flag set by the SIGWINCH handler to trigger a resize on the next loop turn.
static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Signal handler for terminal resize events.
///
/// Only flips an atomic flag (async-signal-safe); the event loop polls it.
extern "C" fn handle_sigwinch(_: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::SeqCst);
}

pub(crate) fn install_sigwinch_handler() -> Result<()> {
    unsafe {
        // SAFETY: handle_sigwinch is an extern "C" handler with no side effects
        // beyond flipping an atomic flag.
        let handler = handle_sigwinch as *const () as libc::sighandler_t;
        if libc::signal(libc::SIGWINCH, handler) == libc::SIG_ERR {
            log_debug("failed to install SIGWINCH handler");
            return Err(anyhow!("failed to install SIGWINCH handler"));
        }
    }
    Ok(())
}

pub(crate) fn take_sigwinch() -> bool {
    SIGWINCH_RECEIVED.swap(false, Ordering::SeqCst)
}

/// Current terminal size with a conservative fallback.
pub(crate) fn current_size() -> (u16, u16) {
    terminal_size().unwrap_or((80, 24))
}

/// Propagate a resize to the child PTY; returns the new (cols, rows).
pub(crate) fn apply_winsize(session: &ShellSession) -> (u16, u16) {
    let (cols, rows) = current_size();
    if rows > 0 && cols > 0 {
        if let Err(err) = session.set_winsize(rows, cols) {
            log_debug(&format!("failed to propagate winsize: {err}"));
        }
    }
    (cols, rows)
}
