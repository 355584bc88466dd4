//! Goal-mode executor: the agent loop that proposes and observes shell commands.

use butterfish::llm::{
    CompletionRequest, CompletionResponse, Message, ToolCall, ToolDefinition,
};
use butterfish::prompts::{PromptError, PromptLibrary, GOAL_FIX_COMMAND, GOAL_SYSTEM};
use serde::Deserialize;
use std::collections::HashMap;

use crate::assemble::{history_to_messages, RUN_COMMAND_TOOL};
use crate::event_state::{EventLoopState, GoalOutcome};

const GOAL_TEMPERATURE: f32 = 0.2;
const GOAL_MAX_TOKENS: u32 = 512;

/// How many identical consecutive proposals mean the agent is stuck.
const REPEAT_STALL_COUNT: usize = 3;

/// Bytes of command output fed back to the agent per step.
pub(crate) const OBSERVATION_TAIL_BYTES: usize = 512;

/// What the agent asked for in its latest turn.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PlanAction {
    /// Run a shell command (after confirmation in safe goal mode).
    RunCommand { cmd: String, tool_call_id: String },
    /// A plain message for the user; the loop waits for feedback.
    Message(String),
    /// The agent declared the goal finished.
    Finished(GoalOutcome),
}

pub(crate) fn run_command_tool() -> ToolDefinition {
    ToolDefinition {
        name: RUN_COMMAND_TOOL.to_string(),
        description: "Run one shell command in the user's interactive shell and observe \
                      its output and exit status."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "cmd": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["cmd"]
        }),
    }
}

/// Assemble the next goal-mode request from the current history suffix.
pub(crate) fn plan_request(
    state: &EventLoopState,
    prompts: &PromptLibrary,
) -> Result<CompletionRequest, PromptError> {
    let mut fields: HashMap<&str, String> = HashMap::new();
    fields.insert("goal", state.goal_text.clone());
    fields.insert("sysinfo", state.sysinfo.clone());
    let system = prompts.render(GOAL_SYSTEM, &fields)?;
    let suffix = state.history.suffix_for_prompt(
        state.config.effective_token_budget(),
        state.config.history_block_byte_cap(),
    );
    let mut messages = vec![Message::system(system)];
    messages.extend(history_to_messages(&suffix));
    Ok(CompletionRequest {
        model: state.config.prompt_model.clone(),
        temperature: GOAL_TEMPERATURE,
        max_tokens: GOAL_MAX_TOKENS,
        messages,
        tools: vec![run_command_tool()],
    })
}

#[derive(Deserialize)]
struct RunCommandArgs {
    cmd: String,
}

/// Interpret the agent's response: tool call, terminal signal, or plain text.
pub(crate) fn parse_plan(response: &CompletionResponse, fallback_seq: u64) -> PlanAction {
    if let Some(call) = &response.tool_call {
        if call.name == RUN_COMMAND_TOOL {
            if let Some(cmd) = parse_run_command_args(call) {
                let tool_call_id = if call.id.is_empty() {
                    format!("call_{fallback_seq}")
                } else {
                    call.id.clone()
                };
                return PlanAction::RunCommand { cmd, tool_call_id };
            }
        }
        return PlanAction::Message(format!(
            "agent requested unknown tool {}",
            call.name
        ));
    }
    let text = response.text.trim();
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("goal met") || lower.starts_with("goal achieved") {
        return PlanAction::Finished(GoalOutcome::Succeeded);
    }
    if lower.starts_with("impossible") {
        return PlanAction::Finished(GoalOutcome::Impossible);
    }
    PlanAction::Message(text.to_string())
}

fn parse_run_command_args(call: &ToolCall) -> Option<String> {
    let args: RunCommandArgs = serde_json::from_str(&call.arguments).ok()?;
    let cmd = args.cmd.trim().to_string();
    if cmd.is_empty() {
        return None;
    }
    Some(cmd)
}

/// Record a proposed command; true when the last three proposals are identical.
pub(crate) fn record_and_check_stall(recent: &mut Vec<String>, cmd: &str) -> bool {
    recent.push(cmd.to_string());
    if recent.len() > REPEAT_STALL_COUNT {
        recent.remove(0);
    }
    recent.len() == REPEAT_STALL_COUNT && recent.iter().all(|c| c == cmd)
}

/// The fix-command nudge appended after a non-zero exit.
pub(crate) fn fix_command_prompt(
    prompts: &PromptLibrary,
    cmd: &str,
    status: i32,
    output: &str,
) -> Result<String, PromptError> {
    let mut fields: HashMap<&str, String> = HashMap::new();
    fields.insert("command", cmd.to_string());
    fields.insert("status", status.to_string());
    fields.insert("output", output.to_string());
    prompts.render(GOAL_FIX_COMMAND, &fields)
}

pub(crate) fn outcome_banner(outcome: GoalOutcome) -> &'static str {
    match outcome {
        GoalOutcome::Succeeded => "goal met, returning control to the shell",
        GoalOutcome::Impossible => "goal abandoned as impossible, returning control",
        GoalOutcome::UserCancelled => "goal mode cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfish::config::AppConfig;
    use clap::Parser;

    fn response_with_tool(arguments: &str) -> CompletionResponse {
        CompletionResponse {
            text: String::new(),
            tool_call: Some(ToolCall {
                id: "call_1".into(),
                name: RUN_COMMAND_TOOL.into(),
                arguments: arguments.into(),
            }),
        }
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.into(),
            tool_call: None,
        }
    }

    #[test]
    fn tool_call_becomes_run_command() {
        let action = parse_plan(&response_with_tool("{\"cmd\":\"ls -a\"}"), 0);
        assert_eq!(
            action,
            PlanAction::RunCommand {
                cmd: "ls -a".into(),
                tool_call_id: "call_1".into()
            }
        );
    }

    #[test]
    fn empty_tool_call_id_gets_a_synthetic_one() {
        let mut response = response_with_tool("{\"cmd\":\"pwd\"}");
        response.tool_call.as_mut().expect("call").id = String::new();
        let action = parse_plan(&response, 42);
        assert_eq!(
            action,
            PlanAction::RunCommand {
                cmd: "pwd".into(),
                tool_call_id: "call_42".into()
            }
        );
    }

    #[test]
    fn malformed_tool_arguments_degrade_to_message() {
        let action = parse_plan(&response_with_tool("not json"), 0);
        assert!(matches!(action, PlanAction::Message(_)));
    }

    #[test]
    fn terminal_signals_are_detected_case_insensitively() {
        assert_eq!(
            parse_plan(&text_response("Goal met: files listed."), 0),
            PlanAction::Finished(GoalOutcome::Succeeded)
        );
        assert_eq!(
            parse_plan(&text_response("IMPOSSIBLE: no network access"), 0),
            PlanAction::Finished(GoalOutcome::Impossible)
        );
    }

    #[test]
    fn plain_text_is_a_message_for_the_user() {
        let action = parse_plan(&text_response("I need to know the target directory."), 0);
        assert_eq!(
            action,
            PlanAction::Message("I need to know the target directory.".into())
        );
    }

    #[test]
    fn stall_detection_needs_three_identical_commands() {
        let mut recent = Vec::new();
        assert!(!record_and_check_stall(&mut recent, "make"));
        assert!(!record_and_check_stall(&mut recent, "make"));
        assert!(record_and_check_stall(&mut recent, "make"));
    }

    #[test]
    fn stall_detection_resets_on_different_command() {
        let mut recent = Vec::new();
        record_and_check_stall(&mut recent, "make");
        record_and_check_stall(&mut recent, "make");
        assert!(!record_and_check_stall(&mut recent, "make test"));
        assert!(!record_and_check_stall(&mut recent, "make"));
    }

    #[test]
    fn plan_request_carries_tool_schema_and_goal() {
        let mut state = EventLoopState::new(AppConfig::parse_from(["butterfish"]), 80);
        state.goal_text = "find hidden files".into();
        let request = plan_request(&state, &PromptLibrary::builtin()).expect("plan request");
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, RUN_COMMAND_TOOL);
        assert!(request.messages[0].content.contains("find hidden files"));
    }

    #[test]
    fn fix_command_prompt_mentions_status_and_output() {
        let rendered = fix_command_prompt(
            &PromptLibrary::builtin(),
            "find -name *.go",
            1,
            "find: illegal option",
        )
        .expect("render fix prompt");
        assert!(rendered.contains("find -name *.go"));
        assert!(rendered.contains('1'));
        assert!(rendered.contains("illegal option"));
    }
}
