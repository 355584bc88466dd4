//! Child-output handling: mirroring, history capture, and prompt-return events.

use butterfish::ansi::strip_for_history;
use butterfish::history::BlockKind;
use butterfish::log_debug;
use butterfish::utf8_safe::clip_last_bytes;
use std::time::{Duration, Instant};

use crate::event_state::{
    EventLoopDeps, EventLoopState, GoalState, PASSTHROUGH_TAIL_BYTES,
};
use crate::goal_mode::{self, OBSERVATION_TAIL_BYTES};

use super::input_dispatch::{exit_goal, issue_goal_plan};
use super::schedule_autosuggest;

pub(crate) fn handle_output_chunk(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    data: &[u8],
) {
    let scan = state.scanner.scan(data);
    if let Some(entered) = scan.alt_screen {
        if entered && !state.passthrough {
            log_debug("entering TUI passthrough (alt screen)");
            state.passthrough = true;
        } else if !entered && state.passthrough {
            log_debug("leaving TUI passthrough (alt screen)");
            leave_passthrough(state);
        }
    }

    deps.writer.write_raw(&scan.cleaned);

    let text = strip_for_history(&scan.cleaned);
    if state.passthrough {
        // Expensive parsing is suspended; keep only a bounded sanitised tail.
        if !text.is_empty() {
            state.passthrough_tail.push_str(&text);
            if state.passthrough_tail.len() > PASSTHROUGH_TAIL_BYTES {
                state.passthrough_tail =
                    clip_last_bytes(&state.passthrough_tail, PASSTHROUGH_TAIL_BYTES).to_string();
            }
        }
    } else if !text.is_empty() {
        state.history.append_tail(&text);
        if matches!(state.goal, GoalState::Executing { .. }) {
            state.goal_exec_output.push_str(&text);
            if state.goal_exec_output.len() > OBSERVATION_TAIL_BYTES {
                state.goal_exec_output =
                    clip_last_bytes(&state.goal_exec_output, OBSERVATION_TAIL_BYTES).to_string();
            }
        }
    }

    for status in scan.prompts {
        on_prompt_returned(state, deps, status);
    }
}

fn leave_passthrough(state: &mut EventLoopState) {
    state.passthrough = false;
    let tail = std::mem::take(&mut state.passthrough_tail);
    if !tail.is_empty() {
        state.history.append_tail(&tail);
        state.history.seal_tail();
    }
}

/// The marker reappeared: the child printed a fresh prompt.
fn on_prompt_returned(state: &mut EventLoopState, deps: &mut EventLoopDeps, status: Option<i32>) {
    if state.passthrough {
        // A prompt while "in" a TUI means the command already ended.
        log_debug("leaving TUI passthrough (prompt returned)");
        leave_passthrough(state);
    }
    state.last_exit_status = status;
    state.history.seal_tail();
    state.child_busy = false;
    state.line.clear();
    state.line_valid = true;

    if let GoalState::Executing { .. } = state.goal {
        let GoalState::Executing {
            cmd, tool_call_id, ..
        } = std::mem::replace(&mut state.goal, GoalState::Idle)
        else {
            return;
        };
        observe_command_result(state, deps, cmd, tool_call_id, status);
        return;
    }

    // Fresh prompt, nothing pending: maybe suggest the next command.
    schedule_autosuggest(state);
}

/// Record the finished goal command and ask the agent what happens next.
fn observe_command_result(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    cmd: String,
    tool_call_id: String,
    status: Option<i32>,
) {
    let exit_status = status.unwrap_or(-1);
    let output = std::mem::take(&mut state.goal_exec_output);
    let result_text = format!("exit status: {exit_status}\n{output}");
    state
        .history
        .append_function_result(result_text, &tool_call_id);
    if exit_status != 0 {
        match goal_mode::fix_command_prompt(&deps.prompts, &cmd, exit_status, &output) {
            Ok(fix) => {
                state.history.append(BlockKind::LlmPrompt, fix);
            }
            Err(err) => log_debug(&format!("fix-command prompt assembly failed: {err}")),
        }
    }
    state.goal_steps += 1;
    if state.goal_steps >= state.config.goal_max_steps {
        log_debug("goal mode step budget exhausted");
        exit_goal(state, deps, crate::event_state::GoalOutcome::Impossible);
        return;
    }
    issue_goal_plan(state, deps);
}

/// Timeout path used by the periodic task when a command never prompts again.
pub(super) fn observe_command_timeout(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    let GoalState::Executing {
        cmd, tool_call_id, ..
    } = std::mem::replace(&mut state.goal, GoalState::Idle)
    else {
        return;
    };
    let timeout = Duration::from_millis(state.config.goal_timeout_ms);
    log_debug(&format!("goal command timed out after {timeout:?}: {cmd}"));
    let output = std::mem::take(&mut state.goal_exec_output);
    state.history.append_function_result(
        format!(
            "command still running after {} ms; partial output:\n{output}",
            timeout.as_millis()
        ),
        &tool_call_id,
    );
    state.goal_steps += 1;
    if state.goal_steps >= state.config.goal_max_steps {
        exit_goal(state, deps, crate::event_state::GoalOutcome::Impossible);
        return;
    }
    issue_goal_plan(state, deps);
}

/// Deadline accessor for the periodic task.
pub(super) fn goal_exec_deadline(state: &EventLoopState) -> Option<Instant> {
    match &state.goal {
        GoalState::Executing { deadline, .. } => Some(*deadline),
        _ => None,
    }
}
