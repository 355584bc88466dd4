//! Raw-mode guard so the controlling terminal is restored on every exit path.

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use std::io::{self, Write};

use crate::log_debug;

/// Puts the controlling terminal into raw mode and restores it on drop.
///
/// Drop runs on unwind as well, so a panic inside the event loop still leaves
/// the user's terminal usable. Restoration also resets SGR attributes in case
/// a streamed response was interrupted mid-colour.
pub struct RawModeGuard {
    restored: bool,
}

impl RawModeGuard {
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to put terminal into raw mode")?;
        Ok(Self { restored: false })
    }

    /// Restore the terminal early, before the guard goes out of scope.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let mut stdout = io::stdout();
        let _ = stdout.write_all(b"\x1b[0m");
        let _ = stdout.flush();
        if let Err(err) = disable_raw_mode() {
            log_debug(&format!("failed to leave raw mode: {err}"));
        }
    }

    /// Whether the terminal is currently believed to be raw.
    pub fn is_active(&self) -> bool {
        !self.restored && is_raw_mode_enabled().unwrap_or(false)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}
