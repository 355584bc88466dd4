//! Deadline-driven work run from the select loop's idle tick.

use butterfish::log_debug;
use std::time::Instant;

use crate::autosuggest;
use crate::event_state::{AutosuggestState, EventLoopDeps, EventLoopState, ShellMode};
use crate::llm_jobs::spawn_completion_job;
use crate::terminal::{apply_winsize, take_sigwinch};

use super::output_dispatch::{goal_exec_deadline, observe_command_timeout};

/// Apply a pending terminal resize; called on every loop turn so the change
/// reaches the PTY before the next child write.
pub(crate) fn sync_winsize(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    if take_sigwinch() {
        let (cols, _rows) = apply_winsize(&deps.session);
        state.terminal_cols = cols;
        if let Some(manual) = &mut state.manual {
            manual.renderer.set_width(cols);
        }
    }
}

pub(crate) fn run_periodic_tasks(
    state: &mut EventLoopState,
    deps: &mut EventLoopDeps,
    now: Instant,
) {
    if let AutosuggestState::Scheduled { deadline } = state.autosuggest {
        if now >= deadline {
            fire_autosuggest(state, deps);
        }
    }

    if let Some(deadline) = goal_exec_deadline(state) {
        if now >= deadline {
            observe_command_timeout(state, deps);
        }
    }
}

/// The line has been stable for the debounce interval: issue the request.
fn fire_autosuggest(state: &mut EventLoopState, deps: &mut EventLoopDeps) {
    if state.config.no_autosuggest
        || !state.at_interactive_prompt()
        || !state.line_valid
        || state.mode != ShellMode::Normal
        || state.manual.is_some()
        || state.goal.is_active()
    {
        state.autosuggest = AutosuggestState::Idle;
        return;
    }
    let request = match autosuggest::build_request(state, &deps.prompts) {
        Ok(request) => request,
        Err(err) => {
            // Programming error in the template; skip the feature this round.
            log_debug(&format!("autosuggest prompt assembly failed: {err}"));
            state.autosuggest = AutosuggestState::Idle;
            return;
        }
    };
    let id = state.next_id();
    let job = spawn_completion_job(deps.client.clone(), request, id, deps.llm_tx.clone(), false);
    state.autosuggest = AutosuggestState::InFlight {
        job,
        line_snapshot: state.line.clone(),
    };
}
