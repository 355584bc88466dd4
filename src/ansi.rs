//! ANSI and control-byte filtering applied to child output before history capture.

use strip_ansi_escapes::strip;

/// Strip escape sequences and non-printable bytes so captured output is plain text.
///
/// Carriage-return overwrites and backspaces are applied (the stored text reflects
/// what the terminal would have shown), CSI/OSC sequences are dropped, and the
/// remaining bytes are filtered down to printables plus `\n` and `\t`. Composing
/// this with itself is the identity on its own output.
pub fn strip_for_history(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let normalized = normalize_control_bytes(raw);
    let ansi_free = strip(&normalized);
    let text = String::from_utf8_lossy(&ansi_free);
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == '\n' || ch == '\t' || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}

/// Apply CR/LF and backspace semantics and skip escape sequences byte-by-byte.
fn normalize_control_bytes(raw: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(raw.len());
    let mut idx = 0;
    let mut line_start = 0usize;

    while idx < raw.len() {
        match raw[idx] {
            b'\r' => {
                if raw.get(idx + 1) == Some(&b'\n') {
                    output.push(b'\n');
                    idx += 2;
                    line_start = output.len();
                    continue;
                }
                output.truncate(line_start);
                idx += 1;
            }
            b'\n' => {
                output.push(b'\n');
                idx += 1;
                line_start = output.len();
            }
            b'\x08' => {
                idx += 1;
                if pop_last_codepoint(&mut output) {
                    line_start = current_line_start(&output);
                }
            }
            0 => {
                idx += 1;
            }
            0x1B => {
                if let Some(next) = raw.get(idx + 1) {
                    if *next == b']' {
                        idx = skip_osc_sequence(raw, idx + 2);
                        continue;
                    } else if *next == b'[' {
                        if let Some((end, _final_byte)) = find_csi_sequence(raw, idx) {
                            idx = end + 1;
                            continue;
                        }
                    } else if *next == b'(' || *next == b')' {
                        idx += 3;
                        continue;
                    } else if *next == b'>' || *next == b'=' {
                        idx += 2;
                        continue;
                    }
                }
                output.push(raw[idx]);
                idx += 1;
            }
            byte => {
                output.push(byte);
                idx += 1;
            }
        }
        if line_start > output.len() {
            line_start = current_line_start(&output);
        }
    }

    output
}

/// Remove the last code point; returns true when a newline was removed.
fn pop_last_codepoint(buf: &mut Vec<u8>) -> bool {
    if buf.is_empty() {
        return false;
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        return true;
    }
    while let Some(byte) = buf.pop() {
        if (byte & 0b1100_0000) != 0b1000_0000 {
            break;
        }
    }
    false
}

fn current_line_start(buf: &[u8]) -> usize {
    buf.iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0)
}

/// Index just past an OSC sequence starting at `cursor` (after `ESC ]`).
///
/// Terminated by BEL or ST (`ESC \`); an unterminated sequence consumes the rest
/// of the buffer.
pub fn skip_osc_sequence(bytes: &[u8], mut cursor: usize) -> usize {
    while cursor < bytes.len() {
        match bytes[cursor] {
            0x07 => return cursor + 1,
            0x1B if bytes.get(cursor + 1) == Some(&b'\\') => {
                return cursor + 2;
            }
            _ => {}
        }
        cursor += 1;
    }
    cursor
}

/// Locate the final byte of a CSI sequence beginning with `ESC [` at `start`.
pub fn find_csi_sequence(bytes: &[u8], start: usize) -> Option<(usize, u8)> {
    if bytes.get(start)? != &0x1B || bytes.get(start + 1)? != &b'[' {
        return None;
    }
    for (idx, b) in bytes.iter().enumerate().skip(start + 2) {
        if (0x40..=0x7E).contains(b) {
            return Some((idx, *b));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_for_history(b"ls -la\nfoo\tbar\n"), "ls -la\nfoo\tbar\n");
    }

    #[test]
    fn sgr_color_codes_are_removed() {
        assert_eq!(strip_for_history(b"\x1b[31mred\x1b[0m text"), "red text");
    }

    #[test]
    fn osc_title_sequences_are_removed() {
        assert_eq!(strip_for_history(b"\x1b]0;title\x07done"), "done");
        assert_eq!(strip_for_history(b"\x1b]7770;0\x1b\\prompt$ "), "prompt$ ");
    }

    #[test]
    fn bare_cr_overwrites_current_line() {
        assert_eq!(strip_for_history(b"progress 10%\rprogress 99%"), "progress 99%");
        assert_eq!(strip_for_history(b"line one\r\nline two"), "line one\nline two");
    }

    #[test]
    fn backspace_erases_previous_codepoint() {
        assert_eq!(strip_for_history(b"abd\x08c"), "abc");
        assert_eq!(strip_for_history("caf\u{00e9}\u{8}e".as_bytes()), "cafe");
    }

    #[test]
    fn control_bytes_other_than_newline_and_tab_are_filtered() {
        assert_eq!(strip_for_history(b"a\x07b\x0cc\x01d"), "abcd");
    }

    #[test]
    fn find_csi_sequence_reports_final_byte() {
        let bytes = b"\x1b[1;32m";
        assert_eq!(find_csi_sequence(bytes, 0), Some((6, b'm')));
        assert_eq!(find_csi_sequence(b"\x1b[12", 0), None);
    }

    #[test]
    fn skip_osc_sequence_handles_bel_and_st_terminators() {
        assert_eq!(skip_osc_sequence(b"0;title\x07rest", 0), 8);
        assert_eq!(skip_osc_sequence(b"0;t\x1b\\rest", 0), 5);
        assert_eq!(skip_osc_sequence(b"unterminated", 0), 12);
    }

    proptest! {
        #[test]
        fn stripper_composed_with_itself_is_itself(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let once = strip_for_history(&raw);
            let twice = strip_for_history(once.as_bytes());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn stripped_output_has_no_escape_or_control_bytes(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let out = strip_for_history(&raw);
            prop_assert!(out.chars().all(|c| c == '\n' || c == '\t' || !c.is_control()));
        }
    }
}
