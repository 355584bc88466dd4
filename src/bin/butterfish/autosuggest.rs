//! Inline autosuggest: template choice, request building, and result validation.

use butterfish::llm::CompletionRequest;
use butterfish::prompts::{
    PromptError, PromptLibrary, AUTOSUGGEST_COMMAND, AUTOSUGGEST_NEW_COMMAND, AUTOSUGGEST_QUESTION,
};
use std::collections::HashMap;

use crate::assemble::history_excerpt;
use crate::event_state::EventLoopState;

const SUGGEST_TEMPERATURE: f32 = 0.1;
const SUGGEST_MAX_TOKENS: u32 = 128;

/// Pick the template by the shape of the current line and instantiate it.
///
/// Empty line asks for a fresh command; a capital first letter treats the line
/// as a natural-language question; anything else completes the command.
pub(crate) fn build_request(
    state: &EventLoopState,
    prompts: &PromptLibrary,
) -> Result<CompletionRequest, PromptError> {
    let line = state.line.as_str();
    let excerpt = history_excerpt(&state.history.suffix_for_prompt(
        state.config.effective_token_budget(),
        state.config.history_block_byte_cap(),
    ));
    let mut fields: HashMap<&str, String> = HashMap::new();
    fields.insert("history", excerpt);
    let template = if line.is_empty() {
        AUTOSUGGEST_NEW_COMMAND
    } else {
        fields.insert("command", line.to_string());
        if line.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
            AUTOSUGGEST_QUESTION
        } else {
            AUTOSUGGEST_COMMAND
        }
    };
    let prompt = prompts.render(template, &fields)?;
    Ok(CompletionRequest {
        model: state.config.autosuggest_model.clone(),
        temperature: SUGGEST_TEMPERATURE,
        max_tokens: SUGGEST_MAX_TOKENS,
        messages: vec![butterfish::llm::Message::user(prompt)],
        tools: Vec::new(),
    })
}

/// Check a returned completion against the line as it is *now*.
///
/// Returns the full accepted suggestion, or None when the response is empty,
/// a NOOP, no longer consistent with what the user typed, or adds nothing.
pub(crate) fn validate(response_text: &str, current_line: &str) -> Option<String> {
    let text = response_text
        .trim_end_matches(['\r', '\n'])
        .trim_start_matches('\n');
    let text = text.lines().next().unwrap_or("");
    if text.is_empty() || text == "NOOP" {
        return None;
    }
    if !text.starts_with(current_line) {
        return None;
    }
    if text.len() == current_line.len() {
        return None;
    }
    Some(text.to_string())
}

/// The dim remainder to render after the cursor.
pub(crate) fn suggestion_delta<'a>(suggestion: &'a str, typed_len: usize) -> &'a str {
    suggestion.get(typed_len..).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfish::config::AppConfig;
    use clap::Parser;

    fn state_with_line(line: &str) -> EventLoopState {
        let mut state = EventLoopState::new(AppConfig::parse_from(["butterfish"]), 80);
        state.line = line.to_string();
        state
    }

    #[test]
    fn empty_line_uses_new_command_template() {
        let state = state_with_line("");
        let request =
            build_request(&state, &PromptLibrary::builtin()).expect("build suggest request");
        assert!(request.messages[0]
            .content
            .contains("Predict the next shell command"));
        assert_eq!(request.model, state.config.autosuggest_model);
    }

    #[test]
    fn command_line_uses_completion_template() {
        let state = state_with_line("git s");
        let request =
            build_request(&state, &PromptLibrary::builtin()).expect("build suggest request");
        assert!(request.messages[0].content.contains("git s"));
        assert!(request.messages[0]
            .content
            .contains("started typing the shell command"));
    }

    #[test]
    fn capitalised_line_uses_question_template() {
        let state = state_with_line("How do I");
        let request =
            build_request(&state, &PromptLibrary::builtin()).expect("build suggest request");
        assert!(request.messages[0].content.contains("question"));
    }

    #[test]
    fn validate_accepts_extension_of_current_line() {
        assert_eq!(
            validate("git status\n", "git s"),
            Some("git status".to_string())
        );
    }

    #[test]
    fn validate_rejects_stale_or_useless_results() {
        // Line changed since the request was issued.
        assert_eq!(validate("git status", "ls"), None);
        // Nothing beyond what was typed.
        assert_eq!(validate("git s", "git s"), None);
        assert_eq!(validate("", "git s"), None);
        assert_eq!(validate("NOOP", ""), None);
    }

    #[test]
    fn validate_keeps_only_the_first_line() {
        assert_eq!(
            validate("git status\ngit diff", "git s"),
            Some("git status".to_string())
        );
    }

    #[test]
    fn delta_is_the_untyped_suffix() {
        assert_eq!(suggestion_delta("git status", 5), "tatus");
        assert_eq!(suggestion_delta("git status", 10), "");
    }
}
