//! Markdown code-block styling for streamed responses, rewriting lines in place.

/// Most rows an already-streamed line may span and still be rewritten; wider
/// lines are left unstyled rather than risk a misplaced cursor-up.
const MAX_REWRITE_ROWS: usize = 3;

/// Detects triple-backtick fences in streamed text and recolours each completed
/// code line with `\r` and cursor-up so only that line is redrawn.
///
/// Characters stream through unmodified as they arrive; the rewrite happens
/// when the line's newline is seen, so the user still watches tokens appear.
#[derive(Debug)]
pub(crate) struct CodeBlockStyler {
    width: u16,
    in_fence: bool,
    line: String,
    code_sgr: &'static str,
    restore_sgr: String,
}

impl CodeBlockStyler {
    pub(crate) fn new(width: u16, code_sgr: &'static str, restore_sgr: String) -> Self {
        Self {
            width: width.max(1),
            in_fence: false,
            line: String::new(),
            code_sgr,
            restore_sgr,
        }
    }

    /// Track terminal resizes so wrap heights stay correct.
    pub(crate) fn set_width(&mut self, width: u16) {
        self.width = width.max(1);
    }

    pub(crate) fn feed(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if ch != '\n' {
                self.line.push(ch);
                out.push(ch);
                continue;
            }
            let trimmed = self.line.trim_end();
            if trimmed.starts_with("```") {
                self.in_fence = !self.in_fence;
                out.push_str("\r\n");
            } else if self.in_fence {
                out.push_str(&self.rewrite_code_line());
            } else {
                out.push_str("\r\n");
            }
            self.line.clear();
        }
        out
    }

    /// Re-emit the just-completed code line in the code colour.
    fn rewrite_code_line(&self) -> String {
        let cells = self.line.chars().count();
        let rows_up = if cells == 0 {
            0
        } else {
            (cells - 1) / self.width as usize
        };
        if rows_up > MAX_REWRITE_ROWS {
            return "\r\n".to_string();
        }
        let mut out = String::new();
        out.push('\r');
        if rows_up > 0 {
            out.push_str(&format!("\x1b[{rows_up}A"));
        }
        out.push_str(self.code_sgr);
        out.push_str(&self.line);
        out.push_str("\x1b[0m");
        out.push_str(&self.restore_sgr);
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: &str = "\x1b[33m";

    fn styler(width: u16) -> CodeBlockStyler {
        CodeBlockStyler::new(width, CODE, "\x1b[36m".to_string())
    }

    #[test]
    fn plain_text_streams_through_with_crlf() {
        let mut s = styler(80);
        assert_eq!(s.feed("hello\nworld"), "hello\r\nworld");
    }

    #[test]
    fn fence_toggles_and_code_line_is_rewritten() {
        let mut s = styler(80);
        let out = s.feed("```\nls -la\n```\n");
        // The code line is streamed raw, then redrawn in the code colour.
        assert!(out.contains("ls -la\r"));
        assert!(out.contains(&format!("\r{CODE}ls -la\x1b[0m")));
        assert!(!s.in_fence);
    }

    #[test]
    fn fence_with_language_tag_still_toggles() {
        let mut s = styler(80);
        s.feed("```bash\n");
        assert!(s.in_fence);
    }

    #[test]
    fn wrapped_code_line_moves_cursor_up() {
        let mut s = styler(10);
        s.feed("```\n");
        let out = s.feed("0123456789abcde\n");
        // 15 cells at width 10 span 2 rows: one cursor-up before the redraw.
        assert!(out.contains("\r\x1b[1A"), "missing cursor-up in {out:?}");
    }

    #[test]
    fn overly_wrapped_line_skips_rewrite() {
        let mut s = styler(4);
        s.feed("```\n");
        let out = s.feed("aaaaaaaaaaaaaaaaaaaaaaaa\n");
        assert!(!out.contains(CODE));
        assert!(out.ends_with("\r\n"));
    }

    #[test]
    fn resize_changes_wrap_accounting() {
        let mut s = styler(4);
        s.set_width(80);
        s.feed("```\n");
        let out = s.feed("aaaaaaaa\n");
        assert!(out.contains(CODE));
    }

    #[test]
    fn restore_sgr_follows_each_rewrite() {
        let mut s = styler(80);
        s.feed("```\n");
        let out = s.feed("x\n");
        assert!(out.contains("\x1b[0m\x1b[36m"));
    }

    #[test]
    fn streaming_splits_inside_a_line_accumulate() {
        let mut s = styler(80);
        s.feed("```\n");
        s.feed("git ");
        let out = s.feed("log\n");
        assert!(out.contains(&format!("{CODE}git log\x1b[0m")));
    }
}
