//! PTY read/write loops that keep stream forwarding robust under partial escapes.

use crate::log_debug;
use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::{Duration, Instant};

use crate::ansi::{find_csi_sequence, skip_osc_sequence};

/// How long a consumer write may spin on a full PTY buffer before giving up.
const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

pub(super) fn should_retry_read_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Split a trailing incomplete escape sequence off `buffer` so downstream
/// scanners only ever see whole sequences.
pub(super) fn split_incomplete_escape(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let esc_idx = buffer.iter().rposition(|b| *b == 0x1b)?;
    if esc_idx + 1 >= buffer.len() {
        return Some(buffer.split_off(esc_idx));
    }
    match buffer[esc_idx + 1] {
        b'[' => {
            if find_csi_sequence(buffer, esc_idx).is_none() {
                return Some(buffer.split_off(esc_idx));
            }
        }
        b']' => {
            if !osc_is_terminated(buffer, esc_idx + 2) {
                return Some(buffer.split_off(esc_idx));
            }
        }
        b'(' | b')' => {
            if esc_idx + 2 >= buffer.len() {
                return Some(buffer.split_off(esc_idx));
            }
        }
        _ => {}
    }
    None
}

fn osc_is_terminated(buffer: &[u8], payload_start: usize) -> bool {
    let end = skip_osc_sequence(buffer, payload_start);
    // skip_osc_sequence returns the buffer length when no terminator was seen.
    end < buffer.len()
        || buffer.last() == Some(&0x07)
        || buffer.ends_with(&[0x1b, b'\\'])
}

/// Continuously read from the PTY master and forward chunks to the consumer.
///
/// The channel is bounded; a full queue blocks this thread, which is the
/// backpressure path for child output. EOF or an unrecoverable error ends the
/// loop and drops the sender, signalling end-of-stream.
pub(super) fn spawn_reader_thread(master_fd: RawFd, tx: Sender<Vec<u8>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            // SAFETY: master_fd is a valid PTY fd owned by this thread, and buffer is writable.
            let n = unsafe {
                libc::read(
                    master_fd,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if n > 0 {
                let mut data = if pending.is_empty() {
                    buffer.get(..n as usize).unwrap_or(&[]).to_vec()
                } else {
                    let mut merged = pending;
                    merged.extend_from_slice(buffer.get(..n as usize).unwrap_or(&[]));
                    pending = Vec::new();
                    merged
                };
                if let Some(tail) = split_incomplete_escape(&mut data) {
                    pending = tail;
                }
                if data.is_empty() {
                    continue;
                }
                if tx.send(data).is_err() {
                    break;
                }
                continue;
            }
            if n == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if should_retry_read_error(&err) {
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            // EIO is the normal Linux signal that the slave side closed.
            if err.raw_os_error() != Some(libc::EIO) {
                log_debug(&format!("PTY read error: {err}"));
            }
            break;
        }
    })
}

/// Attempt to write a single chunk to the PTY master without retry loops.
pub(super) fn try_write(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    // SAFETY: fd is the PTY master and data is a live slice.
    let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    if written == 0 {
        return Err(io::Error::new(ErrorKind::WriteZero, "PTY write returned 0"));
    }
    Ok(written as usize)
}

/// Write the entire buffer to the PTY master, retrying short writes.
///
/// The master is non-blocking; WouldBlock spins under a short deadline so the
/// consumer never blocks indefinitely on a wedged child.
pub(super) fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    let deadline = Instant::now() + WRITE_TIMEOUT;
    while !data.is_empty() {
        let written = match try_write(fd, data) {
            Ok(written) => written,
            Err(err) => {
                if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                    if Instant::now() >= deadline {
                        return Err(anyhow!("PTY write timed out"));
                    }
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                if err.kind() == ErrorKind::WriteZero {
                    return Err(anyhow!("PTY write returned 0"));
                }
                return Err(anyhow!("PTY write failed: {err}"));
            }
        };
        data = if written <= data.len() {
            &data[written..]
        } else {
            &[]
        };
    }
    Ok(())
}
