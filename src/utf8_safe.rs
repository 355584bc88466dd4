//! UTF-8 boundary helpers so history clipping and stream buffering never split a code point.

/// Length of the longest prefix of `bytes` that ends on a UTF-8 sequence boundary.
///
/// A trailing incomplete multi-byte sequence is excluded; everything before it is
/// returned verbatim, including any invalid bytes that can no longer become valid
/// (those are left for lossy decoding downstream).
pub fn complete_prefix_len(bytes: &[u8]) -> usize {
    let tail_start = bytes.len().saturating_sub(4);
    for idx in (tail_start..bytes.len()).rev() {
        let byte = bytes[idx];
        let needed = if byte >= 0xF0 {
            4
        } else if byte >= 0xE0 {
            3
        } else if byte >= 0xC0 {
            2
        } else {
            continue;
        };
        let have = bytes.len() - idx;
        return if have < needed { idx } else { bytes.len() };
    }
    bytes.len()
}

/// Split off a trailing incomplete UTF-8 sequence, leaving `buffer` decodable.
pub fn split_incomplete_utf8(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let keep = complete_prefix_len(buffer);
    if keep == buffer.len() {
        return None;
    }
    Some(buffer.split_off(keep))
}

/// Keep at most the last `max` bytes of `text`, cutting forward to a char boundary.
pub fn clip_last_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Keep at most the first `max` bytes of `text`, cutting back to a char boundary.
pub fn clip_first_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
