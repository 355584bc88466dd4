//! Incremental Server-Sent-Events parsing for streamed completion bodies.
//!
//! Feed decoded text chunks in as they arrive; complete events come out once
//! their terminating blank line is seen, so events split across chunk
//! boundaries are reassembled transparently.

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Termination sentinel used by OpenAI-compatible streams.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Stateful parser that survives events split across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: Option<SseEvent>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of decoded text, returning any events it completed.
    pub fn process_chunk(&mut self, text: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.buffer.push_str(text);

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.current.take() {
                    if !event.data.is_empty() {
                        events.push(event);
                    }
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.strip_prefix(' ').unwrap_or(value);
            let event = self.current.get_or_insert_with(|| SseEvent {
                event: None,
                data: String::new(),
            });
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => {
                    if !event.data.is_empty() {
                        event.data.push('\n');
                    }
                    event.data.push_str(value);
                }
                _ => {}
            }
        }

        events
    }

    /// Extract a trailing unterminated event when the stream ends.
    pub fn flush(&mut self) -> Option<SseEvent> {
        self.current.take().filter(|e| !e.data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_event() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk("data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn reassembles_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.process_chunk("data: {\"he").is_empty());
        assert!(parser.process_chunk("llo\":true}").is_empty());
        let events = parser.process_chunk("\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"hello\":true}");
    }

    #[test]
    fn joins_multi_line_data_fields() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk("data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn carries_event_type_and_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk(": keepalive\nevent: delta\ndata: x\n\n");
        assert_eq!(events[0].event.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn handles_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk("data: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn done_sentinel_is_detected() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk("data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn flush_returns_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.process_chunk("data: tail\n").is_empty());
        let event = parser.flush().expect("flushed event");
        assert_eq!(event.data, "tail");
        assert!(parser.flush().is_none());
    }

    #[test]
    fn events_arrive_in_order() {
        let mut parser = SseParser::new();
        let events = parser.process_chunk("data: 1\n\ndata: 2\n\ndata: 3\n\n");
        let data: Vec<&str> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2", "3"]);
    }
}
