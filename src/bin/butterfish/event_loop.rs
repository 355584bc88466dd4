//! Core runtime loop coordinating keystrokes, child output, and LLM events.

mod input_dispatch;
mod llm_dispatch;
mod output_dispatch;
mod periodic_tasks;

#[cfg(test)]
mod tests;

use anyhow::Result;
use butterfish::log_debug;
use crossbeam_channel::select;
use std::time::{Duration, Instant};

use crate::event_state::{AutosuggestState, EventLoopDeps, EventLoopState, ShellMode};

pub(crate) use input_dispatch::handle_input_event;
pub(crate) use llm_dispatch::handle_llm_event;
pub(crate) use output_dispatch::handle_output_chunk;
pub(crate) use periodic_tasks::{run_periodic_tasks, sync_winsize};

const EVENT_LOOP_IDLE_MS: u64 = 20;

/// Drain all producers from one consumer; each event runs to completion, which
/// is the invariant that keeps the terminal cursor position predictable.
pub(crate) fn run_event_loop(state: &mut EventLoopState, deps: &mut EventLoopDeps) -> Result<()> {
    let tick = Duration::from_millis(EVENT_LOOP_IDLE_MS);
    let input_rx = deps.input_rx.clone();
    let output_rx = deps.session.output_rx().clone();
    let llm_rx = deps.llm_rx.clone();
    let mut running = true;
    let mut last_tick = Instant::now();
    while running {
        sync_winsize(state, deps);
        let now = Instant::now();
        if now.duration_since(last_tick) >= tick {
            run_periodic_tasks(state, deps, now);
            last_tick = now;
        }
        select! {
            recv(input_rx) -> event => match event {
                Ok(event) => handle_input_event(state, deps, event, &mut running),
                Err(_) => running = false,
            },
            recv(output_rx) -> chunk => match chunk {
                Ok(data) => handle_output_chunk(state, deps, &data),
                Err(_) => {
                    // Child closed its side of the PTY: session over.
                    running = false;
                }
            },
            recv(llm_rx) -> event => match event {
                Ok(event) => handle_llm_event(state, deps, event),
                Err(_) => {}
            },
            default(tick) => {}
        }
    }
    Ok(())
}

/// Write into the child's stdin, logging (not propagating) failures; the
/// reader thread will surface a dead child as end-of-stream.
pub(crate) fn forward_to_child(deps: &EventLoopDeps, bytes: &[u8]) {
    if let Err(err) = deps.session.write_all(bytes) {
        log_debug(&format!("failed to write to child: {err}"));
    }
}

/// Erase a displayed suggestion from the screen and drop autosuggest state.
pub(crate) fn clear_suggestion(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    if state.autosuggest.reset() {
        deps.writer.clear_suggestion();
    }
}

/// Re-arm the autosuggest debounce if the feature can run right now.
///
/// Entering Scheduled cancels any in-flight request, which keeps at most one
/// autosuggest outstanding.
pub(crate) fn schedule_autosuggest(state: &mut EventLoopState) {
    if state.config.no_autosuggest
        || !state.at_interactive_prompt()
        || !state.line_valid
        || state.mode != ShellMode::Normal
        || state.manual.is_some()
        || state.goal.is_active()
    {
        return;
    }
    state.autosuggest.reset();
    state.autosuggest = AutosuggestState::Scheduled {
        deadline: Instant::now() + Duration::from_millis(state.config.autosuggest_timeout_ms),
    };
}
