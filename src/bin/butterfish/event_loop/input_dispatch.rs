//! Keystroke routing: pass through, capture locally, or drive goal mode.

use butterfish::history::BlockKind;
use butterfish::llm::Message;
use butterfish::log_debug;
use butterfish::prompts::SHELL_SYSTEM;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::autosuggest::suggestion_delta;
use crate::event_state::{
    AutosuggestState, CaptureKind, EventLoopDeps, EventLoopState, GoalState, ManualRequest,
    ShellMode,
};
use crate::goal_mode;
use crate::help;
use crate::input::InputEvent;
use crate::llm_jobs::spawn_completion_job;
use crate::prompt_detect::command_enters_passthrough;
use crate::writer::StreamRenderer;

use super::{clear_suggestion, forward_to_child, schedule_autosuggest};

const CTRL_C: u8 = 0x03;
const TAB: u8 = 0x09;
const ENTER: u8 = 0x0d;
const CTRL_U: u8 = 0x15;
const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x7f;
const BACKSPACE_ALT: u8 = 0x08;

const MANUAL_TEMPERATURE: f32 = 0.7;
const MANUAL_MAX_TOKENS: u32 = 1024;

pub(crate) fn handle_input_event(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    event: InputEvent,
    running: &mut bool,
) {
    match event {
        InputEvent::Eof => *running = false,
        InputEvent::Bytes(bytes) => handle_bytes(state, deps, &bytes),
    }
}

fn handle_bytes(state: &mut EventLoopState, deps: &mut EventLoopDeps, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if state.passthrough {
        forward_to_child(deps, bytes);
        return;
    }
    if state.manual.is_some() {
        // While an answer is streaming, the only accepted key is Ctrl-C.
        if bytes.contains(&CTRL_C) {
            if let Some(manual) = &state.manual {
                manual.job.cancel.cancel();
            }
        }
        return;
    }
    match state.mode {
        ShellMode::Capturing(kind) => capture_input(state, deps, kind, bytes),
        ShellMode::Normal => normal_input(state, deps, bytes),
    }
}

fn normal_input(state: &mut EventLoopState, deps: &mut EventLoopDeps, bytes: &[u8]) {
    match &state.goal {
        GoalState::AwaitingConfirm { .. } => {
            confirm_input(state, deps, bytes);
            return;
        }
        GoalState::AwaitingPlan { .. } | GoalState::AwaitingObservation { .. } => {
            if bytes.contains(&CTRL_C) {
                state.goal.cancel_in_flight();
                exit_goal(state, deps, crate::event_state::GoalOutcome::UserCancelled);
            }
            return;
        }
        GoalState::Executing { .. } => {
            // The agent's command is running; the user keeps Ctrl-C and the
            // rest of their keystrokes go straight to the child.
            forward_to_child(deps, bytes);
            return;
        }
        GoalState::AwaitingFeedback => {
            if bytes.contains(&CTRL_C) {
                exit_goal(state, deps, crate::event_state::GoalOutcome::UserCancelled);
                return;
            }
            // Capital letter opens a guidance prompt; other keys fall through
            // to normal shell handling so the user can poke around.
            if state.line.is_empty() && bytes.first().is_some_and(u8::is_ascii_uppercase) {
                clear_suggestion(state, deps);
                enter_capture(state, deps, CaptureKind::GoalFeedback, bytes);
                return;
            }
        }
        GoalState::Idle => {}
    }

    // Whole-chunk special keys first; these arrive as single keystrokes.
    match bytes {
        [TAB] => {
            if let AutosuggestState::Displayed {
                suggestion,
                typed_len,
            } = &state.autosuggest
            {
                let delta = suggestion_delta(suggestion, *typed_len).to_string();
                let suggestion = suggestion.clone();
                deps.writer.clear_suggestion();
                state.autosuggest = AutosuggestState::Idle;
                log_debug(&format!("autosuggest accepted: {suggestion}"));
                forward_to_child(deps, delta.as_bytes());
                state.line = suggestion;
                return;
            }
            forward_to_child(deps, bytes);
            return;
        }
        [CTRL_C] => {
            let had_suggest = !matches!(state.autosuggest, AutosuggestState::Idle);
            clear_suggestion(state, deps);
            if !had_suggest {
                forward_to_child(deps, bytes);
            }
            return;
        }
        [CTRL_U] => {
            clear_suggestion(state, deps);
            state.line.clear();
            forward_to_child(deps, bytes);
            schedule_autosuggest(state);
            return;
        }
        [BACKSPACE] | [BACKSPACE_ALT] => {
            clear_suggestion(state, deps);
            state.line.pop();
            forward_to_child(deps, bytes);
            schedule_autosuggest(state);
            return;
        }
        _ => {}
    }

    if bytes[0] == ESC {
        // Arrow keys and friends move the cursor in ways the shadow line
        // cannot model; suspend autosuggest until the next prompt.
        clear_suggestion(state, deps);
        state.line_valid = false;
        forward_to_child(deps, bytes);
        return;
    }

    // Interception point: first printable on an empty line at a fresh prompt.
    if state.at_interactive_prompt() && state.line.is_empty() {
        match bytes[0] {
            b'A'..=b'Z' => {
                clear_suggestion(state, deps);
                enter_capture(state, deps, CaptureKind::Question, bytes);
                return;
            }
            b'!' => {
                clear_suggestion(state, deps);
                enter_capture(state, deps, CaptureKind::Goal, bytes);
                return;
            }
            _ => {}
        }
    }

    clear_suggestion(state, deps);
    forward_to_child(deps, bytes);
    track_forwarded_bytes(state, bytes);
    schedule_autosuggest(state);
}

/// Update the shadow line (and submissions) for bytes already forwarded.
fn track_forwarded_bytes(state: &mut EventLoopState, bytes: &[u8]) {
    for &byte in bytes {
        match byte {
            ENTER | b'\n' => on_line_submitted(state),
            BACKSPACE | BACKSPACE_ALT => {
                state.line.pop();
            }
            byte if byte >= 0x20 => {
                state.line.push(byte as char);
            }
            _ => {}
        }
    }
}

/// Enter was forwarded: the shadow line is now a submitted command.
fn on_line_submitted(state: &mut EventLoopState) {
    let line = std::mem::take(&mut state.line);
    if !line.trim().is_empty() {
        state.history.seal_tail();
        state.history.append(BlockKind::ShellInput, line.trim());
        if command_enters_passthrough(&line, &state.passthrough_cmds) {
            state.passthrough = true;
        }
    }
    state.child_busy = true;
    state.line_valid = true;
    state.autosuggest.reset();
}

/// Keystrokes while the agent's proposed command sits unconfirmed at the prompt.
fn confirm_input(state: &mut EventLoopState, deps: &mut EventLoopDeps, bytes: &[u8]) {
    if bytes.contains(&CTRL_C) {
        // Clear the synthesised line in the child, then leave goal mode.
        forward_to_child(deps, &[CTRL_C]);
        state.line.clear();
        exit_goal(state, deps, crate::event_state::GoalOutcome::UserCancelled);
        return;
    }
    if bytes.iter().any(|&b| b == ENTER || b == b'\n') {
        let GoalState::AwaitingConfirm { tool_call_id, .. } =
            std::mem::replace(&mut state.goal, GoalState::Idle)
        else {
            return;
        };
        // The user may have edited the proposal; the shadow line is what runs.
        let cmd = state.line.clone();
        forward_to_child(deps, b"\r");
        log_debug(&format!("goal mode executing: {cmd}"));
        state.line.clear();
        state.child_busy = true;
        state.goal_exec_output.clear();
        state.goal = GoalState::Executing {
            cmd,
            tool_call_id,
            deadline: Instant::now() + Duration::from_millis(state.config.goal_timeout_ms),
        };
        return;
    }
    forward_to_child(deps, bytes);
    track_forwarded_bytes(state, bytes);
}

/// Begin capturing a local line; the first chunk is replayed into the capture.
fn enter_capture(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    kind: CaptureKind,
    bytes: &[u8],
) {
    state.mode = ShellMode::Capturing(kind);
    state.captured.clear();
    capture_input(state, deps, kind, bytes);
}

fn capture_input(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    kind: CaptureKind,
    bytes: &[u8],
) {
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest[0] == ESC {
            // Cursor-movement sequences have no meaning in a captured line.
            return;
        }
        let special = rest
            .iter()
            .position(|&b| matches!(b, CTRL_C | ENTER | b'\n' | BACKSPACE | BACKSPACE_ALT));
        let printable_end = special.unwrap_or(rest.len());
        if printable_end > 0 {
            let run: Vec<u8> = rest[..printable_end]
                .iter()
                .copied()
                .filter(|&b| b >= 0x20)
                .collect();
            if !run.is_empty() {
                let text = String::from_utf8_lossy(&run).into_owned();
                let prompt = deps.writer.theme.prompt;
                deps.writer
                    .write_str(&format!("{prompt}{text}{}", crate::writer::SGR_RESET));
                state.captured.push_str(&text);
            }
        }
        let Some(idx) = special else {
            return;
        };
        match rest[idx] {
            CTRL_C => {
                erase_captured_echo(state, deps);
                leave_capture(state, kind);
                return;
            }
            ENTER | b'\n' => {
                submit_capture(state, deps, kind);
                return;
            }
            BACKSPACE | BACKSPACE_ALT => {
                if state.captured.pop().is_some() {
                    deps.writer.write_str("\x08 \x08");
                }
            }
            _ => {}
        }
        rest = &rest[idx + 1..];
    }
}

fn erase_captured_echo(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    let cells = state.captured.chars().count();
    if cells > 0 {
        deps.writer.write_str(&format!("\x1b[{cells}D\x1b[0K"));
    }
    state.captured.clear();
}

fn leave_capture(state: &mut EventLoopState, kind: CaptureKind) {
    state.mode = ShellMode::Normal;
    if kind == CaptureKind::GoalFeedback {
        // The agent is still waiting; only the guidance line was abandoned.
        debug_assert!(matches!(state.goal, GoalState::AwaitingFeedback));
    }
}

fn submit_capture(state: &mut EventLoopState, deps: &mut EventLoopDeps, kind: CaptureKind) {
    let captured = std::mem::take(&mut state.captured);
    state.mode = ShellMode::Normal;
    match kind {
        CaptureKind::Question => submit_question(state, deps, captured),
        CaptureKind::Goal => submit_goal(state, deps, captured),
        CaptureKind::GoalFeedback => {
            deps.writer.write_str("\r\n");
            if captured.trim().is_empty() {
                return;
            }
            state
                .history
                .append(BlockKind::LlmPrompt, captured.trim().to_string());
            issue_goal_plan(state, deps);
        }
    }
}

fn submit_question(state: &mut EventLoopState, deps: &mut EventLoopDeps, captured: String) {
    let question = captured.trim().to_string();
    if question.is_empty() {
        deps.writer.write_str("\r\n");
        return;
    }
    match question.as_str() {
        "Help" => {
            deps.writer.write_str("\r\n");
            deps.writer.print_lines(&help::help_text());
            repaint_child_prompt(deps);
            return;
        }
        "Status" => {
            deps.writer.write_str("\r\n");
            let text = help::status_text(state);
            deps.writer.print_lines(&text);
            repaint_child_prompt(deps);
            return;
        }
        "History" => {
            deps.writer.write_str("\r\n");
            let text = help::history_dump(state);
            deps.writer.print_lines(&text);
            repaint_child_prompt(deps);
            return;
        }
        _ => {}
    }

    let request = match build_question_request(state, deps, &question) {
        Ok(request) => request,
        Err(err) => {
            log_debug(&format!("prompt assembly failed: {err}"));
            deps.writer.print_error_line("could not assemble the prompt");
            repaint_child_prompt(deps);
            return;
        }
    };
    state.history.append(BlockKind::LlmPrompt, question);
    let id = state.next_id();
    let job = spawn_completion_job(deps.client.clone(), request, id, deps.llm_tx.clone(), true);
    state.manual = Some(ManualRequest {
        job,
        renderer: StreamRenderer::new(deps.writer.theme, state.terminal_cols),
        accumulated: String::new(),
    });
}

fn build_question_request(
    state: &EventLoopState,
    deps: &EventLoopDeps,
    question: &str,
) -> Result<butterfish::llm::CompletionRequest, butterfish::prompts::PromptError> {
    let mut fields: HashMap<&str, String> = HashMap::new();
    fields.insert("sysinfo", state.sysinfo.clone());
    let system = deps.prompts.render(SHELL_SYSTEM, &fields)?;
    let suffix = state.history.suffix_for_prompt(
        state.config.effective_token_budget(),
        state.config.history_block_byte_cap(),
    );
    let mut messages = vec![Message::system(system)];
    messages.extend(crate::assemble::history_to_messages(&suffix));
    messages.push(Message::user(question.to_string()));
    Ok(butterfish::llm::CompletionRequest {
        model: state.config.prompt_model.clone(),
        temperature: MANUAL_TEMPERATURE,
        max_tokens: MANUAL_MAX_TOKENS,
        messages,
        tools: Vec::new(),
    })
}

fn submit_goal(state: &mut EventLoopState, deps: &mut EventLoopDeps, captured: String) {
    deps.writer.write_str("\r\n");
    let stripped = captured.trim_start_matches('!');
    let unsafe_mode = captured.len() - stripped.len() >= 2;
    let goal = stripped.trim().to_string();
    if goal.is_empty() {
        return;
    }
    state.goal_text = goal.clone();
    state.goal_unsafe = unsafe_mode;
    state.goal_steps = 0;
    state.recent_goal_cmds.clear();
    state
        .history
        .append(BlockKind::LlmPrompt, format!("goal: {goal}"));
    log_debug(&format!(
        "entering {} goal mode: {goal}",
        if unsafe_mode { "unsafe" } else { "confirmed" }
    ));
    issue_goal_plan(state, deps);
}

/// Ask the agent for its next step; shared by entry, feedback, and observation.
pub(super) fn issue_goal_plan(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    let request = match goal_mode::plan_request(state, &deps.prompts) {
        Ok(request) => request,
        Err(err) => {
            log_debug(&format!("goal prompt assembly failed: {err}"));
            deps.writer.print_error_line("could not assemble the goal prompt");
            state.goal = GoalState::Idle;
            return;
        }
    };
    let id = state.next_id();
    let job = spawn_completion_job(deps.client.clone(), request, id, deps.llm_tx.clone(), false);
    state.goal = GoalState::AwaitingPlan { job };
}

pub(super) fn exit_goal(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    outcome: crate::event_state::GoalOutcome,
) {
    state.goal.cancel_in_flight();
    state.goal = GoalState::Idle;
    state.goal_exec_output.clear();
    state.recent_goal_cmds.clear();
    deps.writer
        .print_notice_line(goal_mode::outcome_banner(outcome));
}

/// Nudge the child into reprinting its prompt after wrapper-local output.
pub(super) fn repaint_child_prompt(deps: &mut EventLoopDeps) {
    forward_to_child(deps, b"\n");
}
