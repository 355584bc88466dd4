//! Child shell lifecycle: forkpty, window-size mirroring, and stream handles.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::thread;

use crate::config::WRAPPER_ENV_MARKER;
use crate::log_debug;

use super::io::{spawn_reader_thread, write_all};

/// Bound on queued child-output chunks; a full queue blocks the reader.
const OUTPUT_CHANNEL_CAP: usize = 1024;

/// A shell process attached to a fresh PTY.
///
/// The master fd is owned here and is the sole write path into the child.
/// Output arrives on `output_rx`; the channel disconnecting means the child
/// closed its side (normally: it exited).
pub struct ShellSession {
    master_fd: RawFd,
    child_pid: libc::pid_t,
    output_rx: Receiver<Vec<u8>>,
    reader: Option<thread::JoinHandle<()>>,
    exit_status: Option<i32>,
}

impl ShellSession {
    /// Spawn `argv` under a new PTY with the current environment plus the
    /// nested-wrapper marker, sized to the controlling terminal.
    pub fn spawn(argv: &[String], rows: u16, cols: u16) -> Result<Self> {
        if argv.is_empty() {
            return Err(anyhow!("empty shell command"));
        }
        let c_args: Vec<CString> = argv
            .iter()
            .map(|a| CString::new(a.as_str()).context("shell argument contains NUL"))
            .collect::<Result<_>>()?;
        let marker = CString::new(WRAPPER_ENV_MARKER).expect("static marker name");
        let marker_value = CString::new("1").expect("static marker value");

        let winsize = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let mut master_fd: libc::c_int = -1;
        // SAFETY: forkpty allocates the PTY pair and forks; the child branch
        // only calls async-signal-safe functions plus setenv/execvp, and no
        // other threads exist yet at spawn time.
        let pid = unsafe {
            libc::forkpty(
                &mut master_fd,
                std::ptr::null_mut(),
                std::ptr::null(),
                &winsize,
            )
        };
        if pid < 0 {
            return Err(anyhow!(
                "PTY allocation failed: {}",
                io::Error::last_os_error()
            ));
        }
        if pid == 0 {
            // Child: mark the environment and become the shell.
            unsafe {
                libc::setenv(marker.as_ptr(), marker_value.as_ptr(), 1);
                let mut exec_args: Vec<*const libc::c_char> =
                    c_args.iter().map(|a| a.as_ptr()).collect();
                exec_args.push(std::ptr::null());
                libc::execvp(c_args[0].as_ptr(), exec_args.as_ptr());
                libc::_exit(127);
            }
        }

        set_nonblocking(master_fd)?;
        let (tx, output_rx) = bounded(OUTPUT_CHANNEL_CAP);
        let reader = spawn_reader_thread(master_fd, tx);
        Ok(Self {
            master_fd,
            child_pid: pid,
            output_rx,
            reader: Some(reader),
            exit_status: None,
        })
    }

    pub fn output_rx(&self) -> &Receiver<Vec<u8>> {
        &self.output_rx
    }

    /// Write the whole buffer into the child's stdin.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        write_all(self.master_fd, data)
    }

    /// Mirror a terminal resize onto the child's PTY.
    pub fn set_winsize(&self, rows: u16, cols: u16) -> Result<()> {
        let winsize = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: master_fd is a valid PTY master owned by this session.
        let rc = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) };
        if rc != 0 {
            return Err(anyhow!(
                "TIOCSWINSZ failed: {}",
                io::Error::last_os_error()
            ));
        }
        Ok(())
    }

    /// Reap the child and report its exit status.
    ///
    /// Polls with WNOHANG under a bounded deadline; a child that ignores the
    /// session ending gets a SIGHUP nudge partway through. Returns None if it
    /// still refuses to exit (Drop makes a final attempt).
    pub fn wait_exit_status(&mut self) -> Option<i32> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        let start = std::time::Instant::now();
        let deadline = start + std::time::Duration::from_secs(2);
        let hangup_after = start + std::time::Duration::from_millis(250);
        let mut hangup_sent = false;
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: child_pid is the forked shell owned by this session.
            let rc = unsafe { libc::waitpid(self.child_pid, &mut status, libc::WNOHANG) };
            if rc == self.child_pid {
                self.exit_status = if libc::WIFEXITED(status) {
                    Some(libc::WEXITSTATUS(status))
                } else {
                    Some(128 + libc::WTERMSIG(status))
                };
                return self.exit_status;
            }
            if rc < 0 {
                return None;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            if !hangup_sent && now >= hangup_after {
                hangup_sent = true;
                self.hangup_child();
            }
            thread::sleep(std::time::Duration::from_millis(20));
        }
    }

    /// Best-effort SIGHUP so an unresponsive child does not outlive us.
    fn hangup_child(&self) {
        // SAFETY: signalling our own child pid.
        unsafe {
            libc::kill(self.child_pid, libc::SIGHUP);
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            self.hangup_child();
        }
        // Disconnect the channel first so a reader blocked on a full queue
        // can observe the hangup instead of waiting on the send forever.
        let (_tx, empty_rx) = bounded(1);
        drop(std::mem::replace(&mut self.output_rx, empty_rx));
        // SAFETY: master_fd is owned by this session and closed exactly once.
        unsafe {
            libc::close(self.master_fd);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if self.exit_status.is_none() {
            let mut status: libc::c_int = 0;
            // SAFETY: reaping our own child; WNOHANG keeps teardown prompt.
            unsafe {
                libc::waitpid(self.child_pid, &mut status, libc::WNOHANG);
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            log_debug("failed to set PTY master non-blocking");
            return Err(anyhow!(
                "failed to configure PTY master: {}",
                io::Error::last_os_error()
            ));
        }
    }
    Ok(())
}
