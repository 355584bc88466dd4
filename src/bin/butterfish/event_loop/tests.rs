use super::*;
use crate::event_state::{
    AutosuggestState, CaptureKind, EventLoopDeps, EventLoopState, GoalState, ManualRequest,
};
use crate::input::InputEvent;
use crate::llm_jobs::{LlmEvent, LlmJob, LlmOutcome};
use crate::writer::{StreamRenderer, TermWriter, Theme};
use butterfish::config::AppConfig;
use butterfish::history::BlockKind;
use butterfish::llm::{
    CancelToken, CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamItem, ToolCall,
};
use butterfish::pty_session::ShellSession;
use clap::Parser;
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct StubClient {
    response: CompletionResponse,
}

impl LlmClient for StubClient {
    fn complete(
        &self,
        _request: &CompletionRequest,
        _cancel: &CancelToken,
        _sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError> {
        Ok(self.response.clone())
    }

    fn stream(
        &self,
        _request: &CompletionRequest,
        _cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError> {
        if !self.response.text.is_empty() {
            sink(StreamItem::Text(&self.response.text));
        }
        Ok(self.response.clone())
    }
}

fn canned(text: &str, tool_call: Option<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        text: text.to_string(),
        tool_call,
    }
}

fn run_command_call(cmd: &str) -> ToolCall {
    ToolCall {
        id: "call_t".into(),
        name: "run_command".into(),
        arguments: format!("{{\"cmd\":\"{cmd}\"}}"),
    }
}

fn harness(response: CompletionResponse) -> (EventLoopState, EventLoopDeps) {
    let session = ShellSession::spawn(&["cat".to_string()], 24, 80).expect("spawn cat");
    let (_input_tx, input_rx) = bounded(8);
    let (llm_tx, llm_rx) = bounded(256);
    let state = EventLoopState::new(AppConfig::parse_from(["butterfish"]), 80);
    let deps = EventLoopDeps {
        session,
        input_rx,
        llm_rx,
        llm_tx,
        client: Arc::new(StubClient { response }),
        prompts: butterfish::prompts::PromptLibrary::builtin(),
        writer: TermWriter::new(Theme::dark()),
    };
    (state, deps)
}

fn at_prompt(state: &mut EventLoopState) {
    state.child_busy = false;
}

fn press(state: &mut EventLoopState, deps: &mut EventLoopDeps, bytes: &[u8]) {
    let mut running = true;
    handle_input_event(
        state,
        deps,
        InputEvent::Bytes(bytes.to_vec()),
        &mut running,
    );
}

fn history_texts(state: &EventLoopState) -> Vec<(BlockKind, String)> {
    state
        .history
        .suffix_for_prompt(100_000, 100_000)
        .into_iter()
        .map(|b| (b.kind, b.text))
        .collect()
}

fn drain_llm_events(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let event = {
            let rx = deps.llm_rx.clone();
            rx.recv_timeout(Duration::from_millis(100))
        };
        match event {
            Ok(LlmEvent::Done { id, outcome }) => {
                handle_llm_event(state, deps, LlmEvent::Done { id, outcome });
                return;
            }
            Ok(event) => handle_llm_event(state, deps, event),
            Err(_) => {}
        }
    }
    panic!("no Done event arrived");
}

fn idle_job(state: &mut EventLoopState) -> LlmJob {
    LlmJob {
        id: state.next_id(),
        cancel: CancelToken::new(),
    }
}

#[test]
fn capital_letter_enters_capture_without_forwarding() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"H");
    assert_eq!(state.mode, ShellMode::Capturing(CaptureKind::Question));
    assert_eq!(state.captured, "H");
    assert!(state.line.is_empty());
}

#[test]
fn bang_enters_goal_capture() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"!");
    assert_eq!(state.mode, ShellMode::Capturing(CaptureKind::Goal));
    assert_eq!(state.captured, "!");
}

#[test]
fn lowercase_at_prompt_forwards_and_schedules_suggest() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"g");
    assert_eq!(state.mode, ShellMode::Normal);
    assert_eq!(state.line, "g");
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::Scheduled { .. }
    ));
}

#[test]
fn capital_letter_while_busy_passes_through() {
    let (mut state, mut deps) = harness(canned("", None));
    state.child_busy = true;
    press(&mut state, &mut deps, b"H");
    assert_eq!(state.mode, ShellMode::Normal);
    assert_eq!(state.line, "H");
}

#[test]
fn enter_seals_a_shell_input_block_and_marks_busy() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"ls -la");
    press(&mut state, &mut deps, b"\r");
    assert!(state.child_busy);
    assert!(state.line.is_empty());
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::ShellInput && t == "ls -la"));
}

#[test]
fn tab_commits_exactly_the_suggestion_delta() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.line = "git s".to_string();
    state.autosuggest = AutosuggestState::Displayed {
        suggestion: "git status".to_string(),
        typed_len: 5,
    };
    press(&mut state, &mut deps, &[0x09]);
    assert_eq!(state.line, "git status");
    assert!(matches!(state.autosuggest, AutosuggestState::Idle));
    // cat echoes whatever the wrapper synthesised: exactly the delta.
    let mut echoed = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(chunk) = deps
            .session
            .output_rx()
            .recv_timeout(Duration::from_millis(100))
        {
            echoed.extend_from_slice(&chunk);
            if echoed.windows(5).any(|w| w == b"tatus") {
                break;
            }
        }
    }
    let text = String::from_utf8_lossy(&echoed);
    assert!(text.contains("tatus"), "child saw {text:?}");
    assert!(!text.contains("git s"), "child saw more than the delta: {text:?}");
}

#[test]
fn ctrl_c_clears_suggestion_instead_of_forwarding() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.autosuggest = AutosuggestState::Displayed {
        suggestion: "git status".to_string(),
        typed_len: 0,
    };
    press(&mut state, &mut deps, &[0x03]);
    assert!(matches!(state.autosuggest, AutosuggestState::Idle));
}

#[test]
fn typing_clears_displayed_suggestion_and_reschedules() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.line = "git s".to_string();
    state.autosuggest = AutosuggestState::Displayed {
        suggestion: "git status".to_string(),
        typed_len: 5,
    };
    press(&mut state, &mut deps, b"t");
    assert_eq!(state.line, "git st");
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::Scheduled { .. }
    ));
}

#[test]
fn prompt_marker_returns_child_to_ready() {
    let (mut state, mut deps) = harness(canned("", None));
    state.child_busy = true;
    handle_output_chunk(&mut state, &mut deps, b"file1\nfile2\n\x1b]7770;0\x07$ ");
    assert!(!state.child_busy);
    assert_eq!(state.last_exit_status, Some(0));
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::Scheduled { .. }
    ));
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::ShellOutput && t.contains("file1")));
}

#[test]
fn passthrough_command_suspends_interception() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"vim notes.txt\r");
    assert!(state.passthrough);
    // Keystrokes now pass straight through, even capital letters.
    press(&mut state, &mut deps, b"Insert");
    assert_eq!(state.mode, ShellMode::Normal);
    assert!(state.captured.is_empty());
}

#[test]
fn alt_screen_codes_toggle_passthrough() {
    let (mut state, mut deps) = harness(canned("", None));
    handle_output_chunk(&mut state, &mut deps, b"\x1b[?1049h");
    assert!(state.passthrough);
    handle_output_chunk(&mut state, &mut deps, b"tui body\x1b[?1049l");
    assert!(!state.passthrough);
}

#[test]
fn passthrough_keeps_a_bounded_sanitised_tail() {
    let (mut state, mut deps) = harness(canned("", None));
    handle_output_chunk(&mut state, &mut deps, b"\x1b[?1049h");
    let big = vec![b'x'; 4096];
    handle_output_chunk(&mut state, &mut deps, &big);
    assert!(state.passthrough_tail.len() <= crate::event_state::PASSTHROUGH_TAIL_BYTES);
    handle_output_chunk(&mut state, &mut deps, b"\x1b[?1049l");
    assert!(state.passthrough_tail.is_empty());
}

#[test]
fn help_command_is_intercepted_locally() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"Help\r");
    assert_eq!(state.mode, ShellMode::Normal);
    assert!(state.manual.is_none());
    assert!(history_texts(&state).is_empty());
}

#[test]
fn question_round_trip_appends_prompt_and_response_blocks() {
    let (mut state, mut deps) = harness(canned("Use `ls *.py`.", None));
    at_prompt(&mut state);
    press(&mut state, &mut deps, b"How do I list .py files?\r");
    assert!(state.manual.is_some());
    drain_llm_events(&mut state, &mut deps);
    assert!(state.manual.is_none());
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::LlmPrompt && t == "How do I list .py files?"));
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::LlmResponse && t == "Use `ls *.py`."));
}

#[test]
fn ctrl_c_cancels_streaming_manual_request() {
    let (mut state, mut deps) = harness(canned("", None));
    let job = idle_job(&mut state);
    let cancel = job.cancel.clone();
    state.manual = Some(ManualRequest {
        job,
        renderer: StreamRenderer::new(Theme::dark(), 80),
        accumulated: "partial".to_string(),
    });
    press(&mut state, &mut deps, &[0x03]);
    assert!(cancel.is_cancelled());
    // The producer's final Done(Cancelled) settles the request.
    let id = state.manual.as_ref().expect("manual").job.id;
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Cancelled,
        },
    );
    assert!(state.manual.is_none());
    let blocks = state.history.suffix_for_prompt(100_000, 100_000);
    let cancelled = blocks
        .iter()
        .find(|b| b.kind == BlockKind::LlmResponse)
        .expect("partial response block");
    assert_eq!(
        cancelled.truncated,
        butterfish::history::Truncated::Cancelled
    );
    assert_eq!(cancelled.text, "partial");
}

#[test]
fn stale_chunks_after_cancel_are_dropped() {
    let (mut state, mut deps) = harness(canned("", None));
    let job = idle_job(&mut state);
    job.cancel.cancel();
    let id = job.id;
    state.manual = Some(ManualRequest {
        job,
        renderer: StreamRenderer::new(Theme::dark(), 80),
        accumulated: String::new(),
    });
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Chunk {
            id,
            text: "late".to_string(),
        },
    );
    assert!(state.manual.as_ref().expect("manual").accumulated.is_empty());
}

#[test]
fn goal_tool_call_waits_for_confirmation() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.goal_text = "list hidden files".into();
    let job = idle_job(&mut state);
    let id = job.id;
    state.goal = GoalState::AwaitingPlan { job };
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Finished(canned("", Some(run_command_call("ls -a")))),
        },
    );
    assert!(matches!(
        &state.goal,
        GoalState::AwaitingConfirm { cmd, .. } if cmd == "ls -a"
    ));
    assert_eq!(state.line, "ls -a");
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::FunctionCall && t.contains("ls -a")));
}

#[test]
fn unsafe_goal_executes_without_confirmation() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.goal_unsafe = true;
    let job = idle_job(&mut state);
    let id = job.id;
    state.goal = GoalState::AwaitingPlan { job };
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Finished(canned("", Some(run_command_call("ls -a")))),
        },
    );
    assert!(matches!(&state.goal, GoalState::Executing { cmd, .. } if cmd == "ls -a"));
    assert!(state.child_busy);
}

#[test]
fn confirm_enter_runs_the_proposed_command() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.line = "ls -a".to_string();
    state.goal = GoalState::AwaitingConfirm {
        cmd: "ls -a".into(),
        tool_call_id: "call_t".into(),
    };
    press(&mut state, &mut deps, b"\r");
    assert!(matches!(&state.goal, GoalState::Executing { cmd, .. } if cmd == "ls -a"));
    assert!(state.child_busy);
}

#[test]
fn confirm_ctrl_c_abandons_goal_mode() {
    let (mut state, mut deps) = harness(canned("", None));
    state.goal = GoalState::AwaitingConfirm {
        cmd: "rm -rf /tmp/x".into(),
        tool_call_id: "call_t".into(),
    };
    press(&mut state, &mut deps, &[0x03]);
    assert!(matches!(state.goal, GoalState::Idle));
}

#[test]
fn executing_marker_records_result_and_requeries() {
    let (mut state, mut deps) = harness(canned("goal met", None));
    state.goal_text = "list go files".into();
    state.child_busy = true;
    state.goal = GoalState::Executing {
        cmd: "find -name *.go".into(),
        tool_call_id: "call_t".into(),
        deadline: Instant::now() + Duration::from_secs(30),
    };
    handle_output_chunk(
        &mut state,
        &mut deps,
        b"find: unknown option\n\x1b]7770;1\x07$ ",
    );
    // Non-zero exit: result block plus the fix-command nudge, then a re-query.
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::FunctionResult && t.contains("exit status: 1")));
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::LlmPrompt && t.contains("find -name *.go")));
    assert!(matches!(state.goal, GoalState::AwaitingPlan { .. }));
    assert_eq!(state.goal_steps, 1);
    // The stubbed observation says the goal is met; the loop exits cleanly.
    drain_llm_events(&mut state, &mut deps);
    assert!(matches!(state.goal, GoalState::Idle));
}

#[test]
fn goal_stalls_out_after_three_identical_proposals() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    for round in 0..3 {
        let job = idle_job(&mut state);
        let id = job.id;
        state.goal = GoalState::AwaitingPlan { job };
        handle_llm_event(
            &mut state,
            &mut deps,
            LlmEvent::Done {
                id,
                outcome: LlmOutcome::Finished(canned("", Some(run_command_call("make")))),
            },
        );
        if round < 2 {
            assert!(matches!(state.goal, GoalState::AwaitingConfirm { .. }));
        }
    }
    assert!(matches!(state.goal, GoalState::Idle));
}

#[test]
fn goal_message_without_tool_call_awaits_feedback() {
    let (mut state, mut deps) = harness(canned("", None));
    let job = idle_job(&mut state);
    let id = job.id;
    state.goal = GoalState::AwaitingPlan { job };
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Finished(canned("Which directory should I search?", None)),
        },
    );
    assert!(matches!(state.goal, GoalState::AwaitingFeedback));
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::LlmResponse && t.contains("Which directory")));
}

#[test]
fn autosuggest_result_displays_only_when_line_unchanged() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.line = "git s".to_string();
    let job = idle_job(&mut state);
    let id = job.id;
    state.autosuggest = AutosuggestState::InFlight {
        job,
        line_snapshot: "git s".to_string(),
    };
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Finished(canned("git status", None)),
        },
    );
    assert!(matches!(
        &state.autosuggest,
        AutosuggestState::Displayed { suggestion, typed_len }
            if suggestion == "git status" && *typed_len == 5
    ));
}

#[test]
fn autosuggest_result_is_discarded_when_line_moved_on() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    state.line = "git st".to_string();
    let job = idle_job(&mut state);
    let id = job.id;
    state.autosuggest = AutosuggestState::InFlight {
        job,
        line_snapshot: "git s".to_string(),
    };
    handle_llm_event(
        &mut state,
        &mut deps,
        LlmEvent::Done {
            id,
            outcome: LlmOutcome::Finished(canned("git status", None)),
        },
    );
    assert!(matches!(state.autosuggest, AutosuggestState::Idle));
}

#[test]
fn scheduled_autosuggest_fires_from_the_periodic_tick() {
    let (mut state, mut deps) = harness(canned("git status", None));
    at_prompt(&mut state);
    state.line = "git s".to_string();
    state.autosuggest = AutosuggestState::Scheduled {
        deadline: Instant::now() - Duration::from_millis(1),
    };
    run_periodic_tasks(&mut state, &mut deps, Instant::now());
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::InFlight { .. }
    ));
    drain_llm_events(&mut state, &mut deps);
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::Displayed { .. }
    ));
}

#[test]
fn at_most_one_autosuggest_in_flight() {
    let (mut state, mut deps) = harness(canned("", None));
    at_prompt(&mut state);
    let job = idle_job(&mut state);
    let first_cancel = job.cancel.clone();
    state.autosuggest = AutosuggestState::InFlight {
        job,
        line_snapshot: String::new(),
    };
    // A keystroke supersedes the in-flight request before a new schedule.
    press(&mut state, &mut deps, b"g");
    assert!(first_cancel.is_cancelled());
    assert!(matches!(
        state.autosuggest,
        AutosuggestState::Scheduled { .. }
    ));
}

#[test]
fn goal_timeout_records_partial_result() {
    let (mut state, mut deps) = harness(canned("impossible", None));
    state.goal_text = "wait forever".into();
    state.child_busy = true;
    state.goal = GoalState::Executing {
        cmd: "sleep 9999".into(),
        tool_call_id: "call_t".into(),
        deadline: Instant::now() - Duration::from_millis(1),
    };
    run_periodic_tasks(&mut state, &mut deps, Instant::now());
    let blocks = history_texts(&state);
    assert!(blocks
        .iter()
        .any(|(k, t)| *k == BlockKind::FunctionResult && t.contains("still running")));
    assert!(matches!(state.goal, GoalState::AwaitingPlan { .. }));
}
