//! Prompt library: named templates with `{field}` placeholders, merged with on-disk overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template references unbound field {{{0}}}")]
    MissingField(String),
    #[error("unknown prompt {0}")]
    UnknownPrompt(String),
    #[error("failed to read prompt library: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed prompt library: {0}")]
    Yaml(#[from] serde_norway::Error),
}

/// One on-disk prompt record. `oktoreplace=false` freezes a user's edit across
/// upgrades; `true` lets the built-in default overwrite it at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptRecord {
    pub name: String,
    pub prompt: String,
    pub oktoreplace: bool,
}

pub const SHELL_SYSTEM: &str = "shell-system";
pub const AUTOSUGGEST_NEW_COMMAND: &str = "autosuggest-new-command";
pub const AUTOSUGGEST_COMMAND: &str = "autosuggest-command";
pub const AUTOSUGGEST_QUESTION: &str = "autosuggest-question";
pub const GOAL_SYSTEM: &str = "goal-system";
pub const GOAL_FIX_COMMAND: &str = "goal-fix-command";

fn builtin_defaults() -> Vec<PromptRecord> {
    let defaults = [
        (
            SHELL_SYSTEM,
            "You are an assistant helping the user inside their Unix shell session. \
             You see recent commands and their output as context. Answer concisely; \
             when the answer is a command, give the command first. \
             System info: {sysinfo}",
        ),
        (
            AUTOSUGGEST_NEW_COMMAND,
            "Predict the next shell command the user will run based on this session:\n\
             {history}\n\
             Respond with only the command, no explanation. If you have no useful \
             prediction, respond with exactly NOOP.",
        ),
        (
            AUTOSUGGEST_COMMAND,
            "The user has started typing the shell command: {command}\n\
             Recent session:\n{history}\n\
             Respond with the full completed command. The response must begin with \
             the text the user already typed. If you have no useful completion, \
             respond with exactly NOOP.",
        ),
        (
            AUTOSUGGEST_QUESTION,
            "The user has started typing a question for an AI assistant: {command}\n\
             Recent session:\n{history}\n\
             Respond with the full completed question, beginning with the text \
             already typed. If you have no useful completion, respond with exactly \
             NOOP.",
        ),
        (
            GOAL_SYSTEM,
            "You are an agent operating the user's Unix shell to accomplish a goal. \
             Goal: {goal}\n\
             Call run_command with exactly one shell command at a time, then wait \
             for its output. When the goal is accomplished respond with a plain \
             message starting with 'goal met'. If the goal cannot be accomplished, \
             respond with a plain message starting with 'impossible'. \
             System info: {sysinfo}",
        ),
        (
            GOAL_FIX_COMMAND,
            "The command {command} exited with status {status}. Output:\n{output}\n\
             Propose a corrected command with run_command, or explain why the goal \
             is impossible.",
        ),
    ];
    defaults
        .into_iter()
        .map(|(name, prompt)| PromptRecord {
            name: name.to_string(),
            prompt: prompt.to_string(),
            oktoreplace: true,
        })
        .collect()
}

/// In-memory prompt catalogue, keyed by record name.
#[derive(Debug)]
pub struct PromptLibrary {
    records: Vec<PromptRecord>,
}

impl PromptLibrary {
    /// Load `path`, merge the built-in defaults, and rewrite the file.
    ///
    /// Records with `oktoreplace=true` are overwritten by the matching default;
    /// `oktoreplace=false` records are preserved verbatim; defaults missing from
    /// the file are appended. The merge is idempotent. Malformed YAML is an
    /// error the caller treats as fatal.
    pub fn load_and_merge(path: &Path) -> Result<Self, PromptError> {
        let on_disk: Vec<PromptRecord> = match fs::read_to_string(path) {
            Ok(text) => serde_norway::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let merged = merge_defaults(on_disk, builtin_defaults());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_norway::to_string(&merged)?)?;
        Ok(Self { records: merged })
    }

    /// Library of just the built-in defaults, with no file backing.
    pub fn builtin() -> Self {
        Self {
            records: builtin_defaults(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&str, PromptError> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.prompt.as_str())
            .ok_or_else(|| PromptError::UnknownPrompt(name.to_string()))
    }

    /// Instantiate the named template with `fields`.
    pub fn render(
        &self,
        name: &str,
        fields: &HashMap<&str, String>,
    ) -> Result<String, PromptError> {
        render_template(self.get(name)?, fields)
    }
}

fn merge_defaults(
    on_disk: Vec<PromptRecord>,
    defaults: Vec<PromptRecord>,
) -> Vec<PromptRecord> {
    let mut merged = on_disk;
    for default in defaults {
        match merged.iter_mut().find(|r| r.name == default.name) {
            Some(existing) if existing.oktoreplace => {
                existing.prompt = default.prompt;
            }
            Some(_) => {}
            None => merged.push(default),
        }
    }
    merged
}

/// Substitute every `{name}` placeholder in `template` from `fields`.
///
/// Pure and total over its inputs: an unbound placeholder is
/// `PromptError::MissingField`, there is no partial application.
pub fn render_template(
    template: &str,
    fields: &HashMap<&str, String>,
) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        let name = &after[..close];
        match fields.get(name) {
            Some(value) => out.push_str(value),
            None => return Err(PromptError::MissingField(name.to_string())),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
