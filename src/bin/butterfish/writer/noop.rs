//! Stream filter that swallows a response consisting solely of the NOOP token.

const NOOP_TOKEN: &str = "NOOP";

/// Holds back text while it could still turn out to be a bare `NOOP`.
///
/// For any partitioning of exactly `NOOP` across chunks the filtered output is
/// empty; any other byte sequence passes through unchanged, so the filter is
/// the identity elsewhere and idempotent over splits.
#[derive(Debug, Default)]
pub(crate) struct NoopFilter {
    held: String,
    passthrough: bool,
}

impl NoopFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the text that may be emitted now.
    pub(crate) fn feed(&mut self, text: &str) -> String {
        if self.passthrough {
            return text.to_string();
        }
        self.held.push_str(text);
        if self.held == NOOP_TOKEN || NOOP_TOKEN.starts_with(self.held.as_str()) {
            // Still a prefix of (or exactly) the token; keep holding.
            return String::new();
        }
        self.passthrough = true;
        std::mem::take(&mut self.held)
    }

    /// End of stream: flush the holdback unless it is exactly the token.
    pub(crate) fn finish(&mut self) -> String {
        if self.passthrough || self.held == NOOP_TOKEN {
            self.held.clear();
            return String::new();
        }
        std::mem::take(&mut self.held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run_filter(chunks: &[&str]) -> String {
        let mut filter = NoopFilter::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&filter.feed(chunk));
        }
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn bare_noop_is_swallowed() {
        assert_eq!(run_filter(&["NOOP"]), "");
    }

    #[test]
    fn noop_split_across_chunks_is_swallowed() {
        assert_eq!(run_filter(&["N", "O", "O", "P"]), "");
        assert_eq!(run_filter(&["NO", "OP"]), "");
        assert_eq!(run_filter(&["NOO", "P"]), "");
    }

    #[test]
    fn noop_with_trailing_text_passes_through() {
        assert_eq!(run_filter(&["NOOP", "!"]), "NOOP!");
        assert_eq!(run_filter(&["NOOPE"]), "NOOPE");
    }

    #[test]
    fn non_noop_text_is_identity() {
        assert_eq!(run_filter(&["git status"]), "git status");
        assert_eq!(run_filter(&["NO", "PE"]), "NOPE");
        assert_eq!(run_filter(&["N"]), "N");
    }

    #[test]
    fn empty_stream_emits_nothing() {
        assert_eq!(run_filter(&[]), "");
    }

    proptest! {
        #[test]
        fn any_partition_of_noop_is_swallowed(cut_a in 0usize..5, cut_b in 0usize..5) {
            let token = "NOOP";
            let a = cut_a.min(token.len());
            let b = cut_b.clamp(a, token.len());
            let chunks = [&token[..a], &token[a..b], &token[b..]];
            prop_assert_eq!(run_filter(&chunks), "");
        }

        #[test]
        fn other_streams_are_identity(text in "[A-Za-z !]{0,32}", cut in 0usize..32) {
            prop_assume!(text != "NOOP");
            let cut = cut.min(text.len());
            let out = run_filter(&[&text[..cut], &text[cut..]]);
            prop_assert_eq!(out, text);
        }
    }
}
