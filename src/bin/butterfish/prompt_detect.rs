//! Child prompt-return detection via a PS1-injected OSC marker, plus TUI heuristics.
//!
//! One hidden bootstrap command prepends `ESC ] 7770 ; $? BEL` to the child's
//! PS1. Every fresh prompt then carries the marker with the previous command's
//! exit status as payload; the scanner removes the marker bytes before they
//! reach the user's terminal.

use regex::Regex;
use std::sync::OnceLock;

/// OSC number claimed by the wrapper for its prompt marker.
const MARKER_PREFIX: &[u8] = b"\x1b]7770;";

/// Result of scanning one chunk of child output.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ScanResult {
    /// Chunk bytes with marker sequences removed.
    pub(crate) cleaned: Vec<u8>,
    /// Exit statuses from each prompt marker found, oldest first.
    pub(crate) prompts: Vec<Option<i32>>,
    /// Last alt-screen transition in the chunk, if any (true = entered).
    pub(crate) alt_screen: Option<bool>,
}

/// Scans child output for prompt markers and alt-screen transitions.
///
/// The PTY reader holds back incomplete trailing escape sequences, so each
/// chunk delivered here contains only whole sequences and per-chunk scanning
/// cannot split a marker.
#[derive(Debug, Default)]
pub(crate) struct MarkerScanner;

impl MarkerScanner {
    pub(crate) fn scan(&mut self, chunk: &[u8]) -> ScanResult {
        let mut result = ScanResult {
            cleaned: Vec::with_capacity(chunk.len()),
            ..ScanResult::default()
        };
        let mut idx = 0;
        while idx < chunk.len() {
            if chunk[idx..].starts_with(MARKER_PREFIX) {
                let payload_start = idx + MARKER_PREFIX.len();
                if let Some((status, end)) = parse_marker_payload(chunk, payload_start) {
                    result.prompts.push(status);
                    idx = end;
                    continue;
                }
            }
            if let Some(entered) = alt_screen_transition(&chunk[idx..]) {
                result.alt_screen = Some(entered);
            }
            result.cleaned.push(chunk[idx]);
            idx += 1;
        }
        result
    }
}

/// Parse `<digits> (BEL | ESC \)` starting at `start`; returns (status, end index).
fn parse_marker_payload(bytes: &[u8], start: usize) -> Option<(Option<i32>, usize)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    let terminator_len = if bytes.get(idx) == Some(&0x07) {
        1
    } else if bytes.get(idx) == Some(&0x1b) && bytes.get(idx + 1) == Some(&b'\\') {
        2
    } else {
        return None;
    };
    let status = std::str::from_utf8(&bytes[start..idx])
        .ok()
        .and_then(|s| s.parse::<i32>().ok());
    Some((status, idx + terminator_len))
}

fn alt_screen_transition(bytes: &[u8]) -> Option<bool> {
    for (code, entered) in [
        (&b"\x1b[?1049h"[..], true),
        (&b"\x1b[?1049l"[..], false),
        (&b"\x1b[?47h"[..], true),
        (&b"\x1b[?47l"[..], false),
    ] {
        if bytes.starts_with(code) {
            return Some(entered);
        }
    }
    None
}

/// The hidden PS1 bootstrap line for the given shell, or None when the shell
/// dialect is unknown (ChildBusy tracking then degrades gracefully).
pub(crate) fn bootstrap_command(shell_basename: &str, emoji: bool) -> Option<String> {
    let decor = if emoji { "\u{1f420} " } else { "" };
    // The marker is written as backslash escapes, so the echoed command line
    // never contains real ESC bytes and cannot trip the scanner.
    match shell_basename {
        "bash" | "sh" => Some(format!(
            " PS1='\\[\\e]7770;$?\\a\\]{decor}'\"$PS1\"\n"
        )),
        "zsh" => Some(format!(
            " PS1=$'%{{\\e]7770;%?\\a%}}{decor}'\"$PS1\"\n"
        )),
        _ => None,
    }
}

fn first_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([^\s;|&]+)").expect("static regex"))
}

/// Whether the submitted command line should switch the wrapper to passthrough.
pub(crate) fn command_enters_passthrough(line: &str, commands: &[String]) -> bool {
    let Some(captures) = first_word_regex().captures(line) else {
        return false;
    };
    let word = &captures[1];
    let basename = word.rsplit('/').next().unwrap_or(word);
    commands.iter().any(|c| c == basename)
}
