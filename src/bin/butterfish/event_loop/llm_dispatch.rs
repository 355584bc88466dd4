//! Routing for LLM events: streamed answers, autosuggest results, goal turns.

use butterfish::history::BlockKind;
use butterfish::llm::CompletionResponse;
use butterfish::log_debug;
use std::time::{Duration, Instant};

use crate::autosuggest;
use crate::event_state::{
    AutosuggestState, EventLoopDeps, EventLoopState, GoalOutcome, GoalState,
};
use crate::goal_mode::{self, PlanAction};
use crate::llm_jobs::{LlmEvent, LlmOutcome, RequestId};
use crate::writer::SGR_RESET;

use super::input_dispatch::{exit_goal, issue_goal_plan, repaint_child_prompt};
use super::forward_to_child;

pub(crate) fn handle_llm_event(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    event: LlmEvent,
) {
    match event {
        LlmEvent::Chunk { id, text } => handle_chunk(state, deps, id, &text),
        LlmEvent::Notice { id, text } => handle_notice(state, deps, id, &text),
        LlmEvent::Done { id, outcome } => handle_done(state, deps, id, outcome),
    }
}

fn handle_chunk(state: &mut EventLoopState, deps: &mut EventLoopDeps, id: RequestId, text: &str) {
    let Some(manual) = &mut state.manual else {
        return;
    };
    if manual.job.id != id || manual.job.cancel.is_cancelled() {
        return;
    }
    manual.accumulated.push_str(text);
    let out = manual.renderer.feed(text);
    if !out.is_empty() {
        deps.writer.write_str(&out);
    }
}

fn handle_notice(state: &mut EventLoopState, deps: &mut EventLoopDeps, id: RequestId, text: &str) {
    // Retry/degradation notices surface for interactive requests only;
    // autosuggest stays silent and just logs.
    let interactive = state.manual.as_ref().is_some_and(|m| m.job.id == id)
        || matches!(&state.goal, GoalState::AwaitingPlan { job } | GoalState::AwaitingObservation { job } if job.id == id);
    if interactive {
        deps.writer.print_notice_line(text);
    } else {
        log_debug(&format!("request {id}: {text}"));
    }
}

fn handle_done(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    id: RequestId,
    outcome: LlmOutcome,
) {
    if state.manual.as_ref().is_some_and(|m| m.job.id == id) {
        finish_manual(state, deps, outcome);
        return;
    }
    if matches!(&state.autosuggest, AutosuggestState::InFlight { job, .. } if job.id == id) {
        finish_autosuggest(state, deps, outcome);
        return;
    }
    let goal_matches = matches!(
        &state.goal,
        GoalState::AwaitingPlan { job } | GoalState::AwaitingObservation { job } if job.id == id
    );
    if goal_matches {
        finish_goal_turn(state, deps, outcome);
        return;
    }
    log_debug(&format!("dropping event for stale request {id}"));
}

fn finish_manual(state: &mut EventLoopState, deps: &mut EventLoopDeps, outcome: LlmOutcome) {
    let Some(mut manual) = state.manual.take() else {
        return;
    };
    match outcome {
        LlmOutcome::Finished(_) => {
            let out = manual.renderer.finish();
            if !out.is_empty() {
                deps.writer.write_str(&out);
            }
            if manual.accumulated.is_empty() || !manual.renderer.produced_output() {
                deps.writer.print_notice_line("no advice for this one");
            } else {
                state
                    .history
                    .append(BlockKind::LlmResponse, manual.accumulated);
            }
        }
        LlmOutcome::Cancelled => {
            deps.writer.write_str(&format!("{SGR_RESET}\r\n"));
            if !manual.accumulated.is_empty() {
                state
                    .history
                    .append_cancelled(BlockKind::LlmResponse, manual.accumulated);
            }
        }
        LlmOutcome::Error(err) => {
            deps.writer.print_error_line(&err.to_string());
        }
    }
    repaint_child_prompt(deps);
}

fn finish_autosuggest(state: &mut EventLoopState, deps: &mut EventLoopDeps, outcome: LlmOutcome) {
    let AutosuggestState::InFlight { line_snapshot, .. } =
        std::mem::replace(&mut state.autosuggest, AutosuggestState::Idle)
    else {
        return;
    };
    let LlmOutcome::Finished(response) = outcome else {
        if let LlmOutcome::Error(err) = outcome {
            log_debug(&format!("autosuggest failed: {err}"));
        }
        return;
    };
    // Discard anything that raced a keystroke.
    if line_snapshot != state.line || !state.at_interactive_prompt() {
        return;
    }
    let Some(suggestion) = autosuggest::validate(&response.text, &state.line) else {
        return;
    };
    let typed_len = state.line.len();
    let delta = autosuggest::suggestion_delta(&suggestion, typed_len).to_string();
    deps.writer.show_suggestion(&delta);
    state.autosuggest = AutosuggestState::Displayed {
        suggestion,
        typed_len,
    };
}

fn finish_goal_turn(state: &mut EventLoopState, deps: &mut EventLoopDeps, outcome: LlmOutcome) {
    let response = match outcome {
        LlmOutcome::Finished(response) => response,
        LlmOutcome::Cancelled => {
            exit_goal(state, deps, GoalOutcome::UserCancelled);
            return;
        }
        LlmOutcome::Error(err) => {
            deps.writer.print_error_line(&err.to_string());
            exit_goal(state, deps, GoalOutcome::Impossible);
            return;
        }
    };
    apply_plan(state, deps, &response);
}

fn apply_plan(state: &mut EventLoopState, deps: &mut EventLoopDeps, response: &CompletionResponse) {
    let fallback_seq = state.next_id();
    match goal_mode::parse_plan(response, fallback_seq) {
        PlanAction::RunCommand { cmd, tool_call_id } => {
            if goal_mode::record_and_check_stall(&mut state.recent_goal_cmds, &cmd) {
                log_debug("goal mode stalled on a repeating command");
                exit_goal(state, deps, GoalOutcome::Impossible);
                return;
            }
            state.history.append_function_call(
                serde_json::json!({ "cmd": cmd }).to_string(),
                &tool_call_id,
            );
            log_debug(&format!("goal mode proposes: {cmd}"));
            if state.goal_unsafe {
                state.goal_exec_output.clear();
                state.line.clear();
                state.child_busy = true;
                forward_to_child(deps, cmd.as_bytes());
                forward_to_child(deps, b"\r");
                state.goal = GoalState::Executing {
                    cmd,
                    tool_call_id,
                    deadline: Instant::now()
                        + Duration::from_millis(state.config.goal_timeout_ms),
                };
            } else {
                deps.writer
                    .print_notice_line("proposed command; Enter runs it, edits are yours, Ctrl-C aborts");
                forward_to_child(deps, cmd.as_bytes());
                state.line = cmd.clone();
                state.goal = GoalState::AwaitingConfirm { cmd, tool_call_id };
            }
        }
        PlanAction::Message(text) => {
            if !text.is_empty() {
                let answer = deps.writer.theme.answer;
                deps.writer
                    .print_lines(&format!("\n{answer}{text}{SGR_RESET}\n"));
                state.history.append(BlockKind::LlmResponse, text);
            }
            deps.writer
                .print_notice_line("agent is waiting; guide it with a capital-letter message or Ctrl-C to exit");
            state.goal = GoalState::AwaitingFeedback;
        }
        PlanAction::Finished(outcome) => {
            if !response.text.is_empty() {
                state
                    .history
                    .append(BlockKind::LlmResponse, response.text.clone());
            }
            exit_goal(state, deps, outcome);
        }
    }
}
