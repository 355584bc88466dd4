//! Local output for the Help, Status, and History intercepted commands.

use butterfish::history::Truncated;
use butterfish::log_file_path;

use crate::event_state::EventLoopState;

pub(crate) fn help_text() -> String {
    "\
butterfish shell wrapper
  Start a line with a capital letter to ask the assistant a question.
  Start a line with ! to give the agent a goal, !! to let it run unconfirmed.
  Tab accepts the dim autosuggest; any other key dismisses it.
  Ctrl-C cancels a streaming answer, a pending suggestion, or goal mode.
  Special words while prompting: Help, Status, History.
"
    .to_string()
}

pub(crate) fn status_text(state: &EventLoopState) -> String {
    let config = &state.config;
    let autosuggest = if config.no_autosuggest {
        "off".to_string()
    } else {
        format!("on ({} ms debounce)", config.autosuggest_timeout_ms)
    };
    format!(
        "\
prompt model:      {}
autosuggest model: {}
autosuggest:       {}
history blocks:    {} tokens max each, {} token prompt budget
goal mode:         {} steps max, {} ms command timeout
log file:          {} (verbosity {})
",
        config.prompt_model,
        config.autosuggest_model,
        autosuggest,
        config.max_history_block_tokens,
        config.effective_token_budget(),
        config.goal_max_steps,
        config.goal_timeout_ms,
        log_file_path().display(),
        config.verbose,
    )
}

pub(crate) fn history_dump(state: &EventLoopState) -> String {
    let blocks = state.history.suffix_for_prompt(
        state.config.effective_token_budget(),
        state.config.history_block_byte_cap(),
    );
    if blocks.is_empty() {
        return "history is empty\n".to_string();
    }
    let mut out = String::new();
    for block in &blocks {
        let marker = match block.truncated {
            Truncated::No => String::new(),
            Truncated::Bytes(n) => format!(" [truncated {n} bytes]"),
            Truncated::Cancelled => " [cancelled]".to_string(),
        };
        out.push_str(&format!("--- {}{}\n", block.kind.label(), marker));
        out.push_str(&block.text);
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
