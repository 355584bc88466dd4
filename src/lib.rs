//! Shared butterfish library exports that keep the wrapper binary aligned on common behavior.

pub mod ansi;
pub mod config;
pub mod history;
pub mod llm;
pub mod prompts;
pub mod pty_session;
mod telemetry;
pub mod terminal_restore;
pub mod utf8_safe;

pub use telemetry::{init_tracing, log_debug, log_error, log_file_path};
