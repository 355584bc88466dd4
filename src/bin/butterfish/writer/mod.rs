//! Consumer-owned stdout writer: SGR colour scheme and streamed-response rendering.

mod noop;
mod styler;

pub(crate) use noop::NoopFilter;
pub(crate) use styler::CodeBlockStyler;

use butterfish::log_debug;
use std::io::{self, Write};

pub(crate) const SGR_RESET: &str = "\x1b[0m";

/// SGR colour selections for a dark or light terminal background.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Theme {
    pub(crate) answer: &'static str,
    pub(crate) error: &'static str,
    pub(crate) dim: &'static str,
    pub(crate) code: &'static str,
    pub(crate) prompt: &'static str,
}

impl Theme {
    pub(crate) fn dark() -> Self {
        Self {
            answer: "\x1b[36m",
            error: "\x1b[31m",
            dim: "\x1b[90m",
            code: "\x1b[33m",
            prompt: "\x1b[35m",
        }
    }

    pub(crate) fn light() -> Self {
        Self {
            answer: "\x1b[34m",
            error: "\x1b[31m",
            dim: "\x1b[2m",
            code: "\x1b[35m",
            prompt: "\x1b[35m",
        }
    }
}

/// The single write path to the user's terminal; only the event loop holds it.
pub(crate) struct TermWriter {
    stdout: io::Stdout,
    pub(crate) theme: Theme,
}

impl TermWriter {
    pub(crate) fn new(theme: Theme) -> Self {
        Self {
            stdout: io::stdout(),
            theme,
        }
    }

    /// Forward child output untouched. A failed write is retried once, then
    /// logged and dropped.
    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        if self.stdout.write_all(bytes).is_err() {
            if let Err(err) = self.stdout.write_all(bytes) {
                log_debug(&format!("stdout write failed: {err}"));
                return;
            }
        }
        if let Err(err) = self.stdout.flush() {
            log_debug(&format!("stdout flush failed: {err}"));
        }
    }

    pub(crate) fn write_str(&mut self, text: &str) {
        self.write_raw(text.as_bytes());
    }

    /// Raw-mode-safe multi-line output (`\n` becomes `\r\n`).
    pub(crate) fn print_lines(&mut self, text: &str) {
        let normalized = text.replace('\n', "\r\n");
        self.write_str(&normalized);
    }

    pub(crate) fn print_error_line(&mut self, message: &str) {
        let error = self.theme.error;
        self.write_str(&format!("\r\n{error}{message}{SGR_RESET}\r\n"));
    }

    pub(crate) fn print_notice_line(&mut self, message: &str) {
        let dim = self.theme.dim;
        self.write_str(&format!("\r\n{dim}{message}{SGR_RESET}\r\n"));
    }

    /// Render a dim suggestion after the cursor, then park the cursor back on
    /// its anchor column so typing continues where the user left off.
    pub(crate) fn show_suggestion(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let dim = self.theme.dim;
        let cells = delta.chars().count();
        self.write_str(&format!("{dim}{delta}{SGR_RESET}\x1b[{cells}D"));
    }

    /// Erase a displayed suggestion (cursor sits on its anchor column).
    pub(crate) fn clear_suggestion(&mut self) {
        self.write_str("\x1b[0K");
    }
}

/// Per-request pipeline from raw stream chunks to styled terminal bytes.
pub(crate) struct StreamRenderer {
    noop: NoopFilter,
    styler: CodeBlockStyler,
    started: bool,
    answer_sgr: &'static str,
}

impl StreamRenderer {
    pub(crate) fn new(theme: Theme, width: u16) -> Self {
        Self {
            noop: NoopFilter::new(),
            styler: CodeBlockStyler::new(width, theme.code, theme.answer.to_string()),
            started: false,
            answer_sgr: theme.answer,
        }
    }

    pub(crate) fn set_width(&mut self, width: u16) {
        self.styler.set_width(width);
    }

    /// Convert a stream chunk into terminal bytes; empty until the NOOP
    /// suppressor decides the stream is real text.
    pub(crate) fn feed(&mut self, chunk: &str) -> String {
        let released = self.noop.feed(chunk);
        if released.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        if !self.started {
            self.started = true;
            out.push_str("\r\n");
            out.push_str(self.answer_sgr);
        }
        out.push_str(&self.styler.feed(&released));
        out
    }

    /// Flush holdbacks and reset colours at end of stream.
    pub(crate) fn finish(&mut self) -> String {
        let released = self.noop.finish();
        let mut out = String::new();
        if !released.is_empty() {
            if !self.started {
                self.started = true;
                out.push_str("\r\n");
                out.push_str(self.answer_sgr);
            }
            out.push_str(&self.styler.feed(&released));
        }
        if self.started {
            out.push_str(SGR_RESET);
            out.push_str("\r\n");
        }
        out
    }

    /// Whether anything was (or will be) shown to the user.
    pub(crate) fn produced_output(&self) -> bool {
        self.started
    }
}
