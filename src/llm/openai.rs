//! OpenAI-compatible chat completion client over blocking HTTP.
//!
//! Producers call this from their own threads; streaming reads the SSE body
//! incrementally and hands whole-code-point text to the sink in order.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use crate::log_debug;
use crate::utf8_safe::split_incomplete_utf8;

use super::sse::SseParser;
use super::{
    retry_delay, CancelToken, CompletionRequest, CompletionResponse, LlmClient, LlmError, Message,
    Role, StreamItem, ToolCall, MAX_ATTEMPTS,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CANCEL_POLL: Duration = Duration::from_millis(50);

pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, LlmError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| LlmError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::blocking::Response, LlmError> {
        let body = WireRequest::from_request(request, stream);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|err| LlmError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    /// Run `attempt_fn` under the transient-retry policy.
    fn with_retries<T>(
        &self,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
        mut attempt_fn: impl FnMut(&mut dyn FnMut(StreamItem<'_>)) -> Result<T, LlmError>,
    ) -> Result<T, LlmError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }
            match attempt_fn(sink) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    log_debug(&format!(
                        "transient LLM error (attempt {}): {err}; retrying in {:?}",
                        attempt + 1,
                        delay
                    ));
                    sink(StreamItem::Retrying {
                        attempt: attempt + 1,
                        delay,
                    });
                    sleep_cancellable(delay, cancel)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl LlmClient for OpenAiClient {
    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError> {
        self.with_retries(cancel, sink, |_sink| {
            let response = self.send(request, false)?;
            let body = response
                .text()
                .map_err(|err| LlmError::Network(err.to_string()))?;
            parse_completion_body(&body)
        })
    }

    fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError> {
        // Retries cover request establishment only; once body bytes have been
        // delivered a failure surfaces directly so sink order is preserved.
        let response = self.with_retries(cancel, sink, |_sink| self.send(request, true))?;
        read_stream_body(response, cancel, sink)
    }
}

fn sleep_cancellable(delay: Duration, cancel: &CancelToken) -> Result<(), LlmError> {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        thread::sleep(CANCEL_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    Ok(())
}

fn read_stream_body(
    mut response: reqwest::blocking::Response,
    cancel: &CancelToken,
    sink: &mut dyn FnMut(StreamItem<'_>),
) -> Result<CompletionResponse, LlmError> {
    let mut parser = SseParser::new();
    let mut acc = StreamAccumulator::default();
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => return Err(LlmError::Network(err.to_string())),
        };
        pending.extend_from_slice(&buf[..n]);
        let tail = split_incomplete_utf8(&mut pending);
        let text = String::from_utf8_lossy(&pending).into_owned();
        pending = tail.unwrap_or_default();
        for event in parser.process_chunk(&text) {
            if event.is_done() {
                return Ok(acc.finish());
            }
            if let Some(delta) = acc.apply_chunk(&event.data)? {
                sink(StreamItem::Text(&delta));
            }
        }
    }
    if let Some(event) = parser.flush() {
        if !event.is_done() {
            if let Some(delta) = acc.apply_chunk(&event.data)? {
                sink(StreamItem::Text(&delta));
            }
        }
    }
    Ok(acc.finish())
}

/// Collects streamed deltas into the final response.
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tool_id: String,
    tool_name: String,
    tool_arguments: String,
}

impl StreamAccumulator {
    /// Apply one `chat.completion.chunk` payload; returns any new text delta.
    fn apply_chunk(&mut self, data: &str) -> Result<Option<String>, LlmError> {
        let chunk: WireChunk =
            serde_json::from_str(data).map_err(|err| LlmError::Parse(err.to_string()))?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        if let Some(calls) = choice.delta.tool_calls {
            for call in calls {
                if let Some(id) = call.id {
                    self.tool_id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        self.tool_name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        self.tool_arguments.push_str(&arguments);
                    }
                }
            }
        }
        match choice.delta.content {
            Some(content) if !content.is_empty() => {
                self.text.push_str(&content);
                Ok(Some(content))
            }
            _ => Ok(None),
        }
    }

    fn finish(self) -> CompletionResponse {
        let tool_call = if self.tool_name.is_empty() {
            None
        } else {
            Some(ToolCall {
                id: self.tool_id,
                name: self.tool_name,
                arguments: self.tool_arguments,
            })
        };
        CompletionResponse {
            text: self.text,
            tool_call,
        }
    }
}

fn classify_status(status: u16, body: &str) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth { status },
        429 => LlmError::RateLimited,
        400 if body.contains("context_length") || body.contains("maximum context length") => {
            LlmError::ContextLength
        }
        400 | 404 | 422 => LlmError::InvalidRequest(error_message(body)),
        500..=599 => LlmError::Server { status },
        _ => LlmError::InvalidRequest(error_message(body)),
    }
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

fn parse_completion_body(body: &str) -> Result<CompletionResponse, LlmError> {
    let parsed: WireResponse =
        serde_json::from_str(body).map_err(|err| LlmError::Parse(err.to_string()))?;
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(LlmError::Parse("response has no choices".into()));
    };
    let tool_call = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        });
    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_call,
    })
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a CompletionRequest, stream: bool) -> Self {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|tool| WireTool {
                        kind: "function",
                        function: WireToolFunction {
                            name: &tool.name,
                            description: &tool.description,
                            parameters: &tool.parameters,
                        },
                    })
                    .collect(),
            )
        };
        Self {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            tools,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCallOut<'a>>>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls = message.tool_call.as_ref().map(|call| {
            vec![WireToolCallOut {
                id: &call.id,
                kind: "function",
                function: WireFunctionOut {
                    name: &call.name,
                    arguments: &call.arguments,
                },
            }]
        });
        Self {
            role,
            content: &message.content,
            tool_call_id: message.tool_call_id.as_deref(),
            tool_calls,
        }
    }
}

#[derive(Serialize)]
struct WireToolCallOut<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionOut<'a>,
}

#[derive(Serialize)]
struct WireFunctionOut<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction<'a>,
}

#[derive(Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallFull>>,
}

#[derive(Deserialize)]
struct WireToolCallFull {
    id: String,
    function: WireFunctionFull,
}

#[derive(Deserialize)]
struct WireFunctionFull {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireDeltaToolCall>>,
}

#[derive(Deserialize)]
struct WireDeltaToolCall {
    id: Option<String>,
    function: Option<WireDeltaFunction>,
}

#[derive(Deserialize)]
struct WireDeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_taxonomy() {
        assert!(matches!(classify_status(401, ""), LlmError::Auth { .. }));
        assert!(matches!(classify_status(429, ""), LlmError::RateLimited));
        assert!(matches!(
            classify_status(502, ""),
            LlmError::Server { status: 502 }
        ));
        assert!(matches!(
            classify_status(400, "{\"error\":{\"message\":\"x\",\"code\":\"context_length_exceeded\"}}"),
            LlmError::ContextLength
        ));
        assert!(matches!(
            classify_status(400, "{\"error\":{\"message\":\"bad field\"}}"),
            LlmError::InvalidRequest(msg) if msg == "bad field"
        ));
    }

    #[test]
    fn parse_completion_body_extracts_text() {
        let body = r#"{"choices":[{"message":{"content":"git status"}}]}"#;
        let response = parse_completion_body(body).expect("parse");
        assert_eq!(response.text, "git status");
        assert!(response.tool_call.is_none());
    }

    #[test]
    fn parse_completion_body_extracts_tool_call() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"run_command","arguments":"{\"cmd\":\"ls -a\"}"}}
        ]}}]}"#;
        let response = parse_completion_body(body).expect("parse");
        assert_eq!(response.text, "");
        let call = response.tool_call.expect("tool call");
        assert_eq!(call.name, "run_command");
        assert_eq!(call.arguments, "{\"cmd\":\"ls -a\"}");
    }

    #[test]
    fn accumulator_concatenates_text_deltas_in_order() {
        let mut acc = StreamAccumulator::default();
        let a = acc
            .apply_chunk(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#)
            .expect("chunk");
        let b = acc
            .apply_chunk(r#"{"choices":[{"delta":{"content":"lo"}}]}"#)
            .expect("chunk");
        assert_eq!(a.as_deref(), Some("Hel"));
        assert_eq!(b.as_deref(), Some("lo"));
        assert_eq!(acc.finish().text, "Hello");
    }

    #[test]
    fn accumulator_reassembles_tool_call_fragments() {
        let mut acc = StreamAccumulator::default();
        acc.apply_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"run_command","arguments":"{\"cmd\""}}]}}]}"#,
        )
        .expect("chunk");
        acc.apply_chunk(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"pwd\"}"}}]}}]}"#,
        )
        .expect("chunk");
        let call = acc.finish().tool_call.expect("tool call");
        assert_eq!(call.id, "call_9");
        assert_eq!(call.arguments, "{\"cmd\":\"pwd\"}");
    }

    #[test]
    fn accumulator_rejects_malformed_chunks() {
        let mut acc = StreamAccumulator::default();
        assert!(matches!(
            acc.apply_chunk("not json"),
            Err(LlmError::Parse(_))
        ));
    }

    #[test]
    fn wire_request_omits_tools_when_empty() {
        let request = CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            temperature: 0.2,
            max_tokens: 64,
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
        };
        let json =
            serde_json::to_string(&WireRequest::from_request(&request, false)).expect("json");
        assert!(!json.contains("\"tools\""));
        assert!(json.contains("\"stream\":false"));
    }

    #[test]
    fn wire_message_maps_tool_role_and_call_id() {
        let message = Message::tool_result("exit 0", "call_3");
        let wire = WireMessage::from(&message);
        let json = serde_json::to_string(&wire).expect("json");
        assert!(json.contains("\"role\":\"tool\""));
        assert!(json.contains("\"tool_call_id\":\"call_3\""));
    }

    #[test]
    fn wire_message_carries_assistant_tool_calls() {
        let message = Message::assistant_tool_call(crate::llm::ToolCall {
            id: "call_7".into(),
            name: "run_command".into(),
            arguments: "{\"cmd\":\"ls\"}".into(),
        });
        let json = serde_json::to_string(&WireMessage::from(&message)).expect("json");
        assert!(json.contains("\"tool_calls\""));
        assert!(json.contains("\"type\":\"function\""));
        assert!(json.contains("run_command"));
    }
}
