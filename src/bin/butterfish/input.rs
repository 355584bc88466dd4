//! Input-thread bootstrap so stdin capture stays isolated from state-machine logic.

use butterfish::log_debug;
use crossbeam_channel::Sender;
use std::io::{self, Read};
use std::thread;

/// Raw keystroke bytes from the controlling terminal.
///
/// Multi-byte escape sequences are not decoded here; the state machine
/// inspects leading bytes itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputEvent {
    Bytes(Vec<u8>),
    Eof,
}

/// Read stdin in a blocking loop, forwarding chunks to the consumer.
///
/// The channel is bounded; a full queue blocks this thread, which is the
/// backpressure path for user input.
pub(crate) fn spawn_input_thread(tx: Sender<InputEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(InputEvent::Eof);
                    break;
                }
                Ok(n) => {
                    if tx.send(InputEvent::Bytes(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log_debug(&format!("stdin read error: {err}"));
                    let _ = tx.send(InputEvent::Eof);
                    break;
                }
            }
        }
    })
}
