//! Turning history blocks into provider messages and template excerpts.

use butterfish::history::{Block, BlockKind};
use butterfish::llm::{Message, ToolCall};

pub(crate) const RUN_COMMAND_TOOL: &str = "run_command";

/// Map a clipped history suffix onto chat messages.
///
/// Function calls and results keep their tool-call linkage so the goal-mode
/// transcript stays wire-correct; shell traffic becomes user-role context.
pub(crate) fn history_to_messages(blocks: &[Block]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(blocks.len());
    for block in blocks {
        let message = match block.kind {
            BlockKind::ShellInput => Message::user(format!("$ {}", block.text)),
            BlockKind::ShellOutput => Message::user(block.text.clone()),
            BlockKind::LlmPrompt => Message::user(block.text.clone()),
            BlockKind::LlmResponse => Message::assistant(block.text.clone()),
            BlockKind::FunctionCall => Message::assistant_tool_call(ToolCall {
                id: block.tool_call_id.clone().unwrap_or_default(),
                name: RUN_COMMAND_TOOL.to_string(),
                arguments: block.text.clone(),
            }),
            BlockKind::FunctionResult => Message::tool_result(
                block.text.clone(),
                block.tool_call_id.clone().unwrap_or_default(),
            ),
        };
        messages.push(message);
    }
    messages
}

/// Flatten a history suffix into plain text for instruct-style templates.
pub(crate) fn history_excerpt(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block.kind {
            BlockKind::ShellInput => {
                out.push_str("$ ");
                out.push_str(&block.text);
            }
            _ => out.push_str(&block.text),
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
