//! CLI flag schema and on-disk configuration so wrapper startup behavior is explicit.

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Env marker set in the child shell; present at startup means we are nested.
pub const WRAPPER_ENV_MARKER: &str = "BUTTERFISH_SHELL";

pub const TOKEN_KEY: &str = "OPENAI_TOKEN";
const ENV_FILE_MODE: u32 = 0o600;

/// Global cap on retained history bytes.
pub const HISTORY_MAX_BYTES: usize = 256 * 1024;
/// Token budget offered to prompt assembly before the held-back margin.
pub const HISTORY_TOKEN_BUDGET: usize = 1536;
/// Fraction of the token budget held back against tokeniser divergence.
pub const TOKEN_BUDGET_MARGIN: f64 = 0.15;

pub const DEFAULT_PASSTHROUGH_COMMANDS: &str =
    "vim,nvim,vi,emacs,nano,less,more,man,top,htop,ssh,tmux,screen,watch";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "butterfish",
    about = "Butterfish wraps your shell with an LLM assistant",
    version
)]
pub struct AppConfig {
    /// Shell binary to wrap (default: $SHELL)
    #[arg(short = 'b', long = "shell")]
    pub shell_bin: Option<String>,

    /// Model used for prompts and goal mode
    #[arg(short = 'm', long = "model", default_value = "gpt-3.5-turbo")]
    pub prompt_model: String,

    /// Model used for autosuggest completions
    #[arg(
        short = 'a',
        long = "autosuggest-model",
        default_value = "gpt-3.5-turbo-instruct"
    )]
    pub autosuggest_model: String,

    /// Disable inline autosuggest
    #[arg(short = 'A', long = "no-autosuggest", default_value_t = false)]
    pub no_autosuggest: bool,

    /// Autosuggest debounce in milliseconds
    #[arg(short = 't', long = "autosuggest-timeout", default_value_t = 400)]
    pub autosuggest_timeout_ms: u64,

    /// Suppress the decorative emoji prepended to the shell prompt
    #[arg(short = 'p', long = "no-prompt-emoji", default_value_t = false)]
    pub no_prompt_emoji: bool,

    /// Colour scheme for light terminal backgrounds
    #[arg(short = 'l', long = "light-color", default_value_t = false)]
    pub light_color: bool,

    /// Max tokens retained per history block
    #[arg(short = 'H', long = "max-history-block-tokens", default_value_t = 512)]
    pub max_history_block_tokens: usize,

    /// Log verbosity (-v debug, -vv trace), written to the log file
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Comma-separated command names that switch the wrapper to TUI passthrough
    #[arg(long = "passthrough-commands", default_value = DEFAULT_PASSTHROUGH_COMMANDS)]
    pub passthrough_commands: String,

    /// How long goal mode waits for a command to return to the prompt (ms)
    #[arg(long = "goal-timeout", default_value_t = 30_000)]
    pub goal_timeout_ms: u64,

    /// Goal-mode step budget before giving up
    #[arg(long = "goal-max-steps", default_value_t = 12)]
    pub goal_max_steps: u32,

    /// OpenAI-compatible API base URL
    #[arg(long = "base-url", default_value = "https://api.openai.com/v1")]
    pub base_url: String,
}

impl AppConfig {
    /// Shell command to spawn: `-b` override (split shell-words) or `$SHELL`.
    pub fn resolve_shell(&self) -> Result<Vec<String>> {
        let raw = match &self.shell_bin {
            Some(bin) => bin.clone(),
            None => env::var("SHELL").map_err(|_| anyhow!("no shell found: $SHELL is unset"))?,
        };
        let words =
            shell_words::split(&raw).with_context(|| format!("invalid shell command {raw:?}"))?;
        let Some(binary) = words.first() else {
            return Err(anyhow!("no shell found: empty shell command"));
        };
        if !binary_exists(binary) {
            return Err(anyhow!("no shell found: {binary} is not executable"));
        }
        Ok(words)
    }

    pub fn passthrough_command_list(&self) -> Vec<String> {
        self.passthrough_commands
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Token budget minus a margin held back against tokeniser divergence.
    pub fn effective_token_budget(&self) -> usize {
        let budget = HISTORY_TOKEN_BUDGET as f64 * (1.0 - TOKEN_BUDGET_MARGIN);
        budget as usize
    }

    /// Per-block byte ceiling: max history block tokens x 4.
    pub fn history_block_byte_cap(&self) -> usize {
        self.max_history_block_tokens.saturating_mul(4)
    }
}

fn binary_exists(binary: &str) -> bool {
    if binary.contains('/') {
        return Path::new(binary).is_file();
    }
    let Ok(path_var) = env::var("PATH") else {
        return false;
    };
    path_var
        .split(':')
        .filter(|dir| !dir.is_empty())
        .any(|dir| Path::new(dir).join(binary).is_file())
}

/// True when we are already running inside a butterfish-wrapped shell.
pub fn nested_wrapper_detected() -> bool {
    env::var_os(WRAPPER_ENV_MARKER).is_some()
}

/// `~/.config/butterfish`, honouring `XDG_CONFIG_HOME`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        let xdg = PathBuf::from(xdg);
        if xdg.is_absolute() {
            return Ok(xdg.join("butterfish"));
        }
    }
    let home = env::var_os("HOME").ok_or_else(|| anyhow!("$HOME is unset"))?;
    Ok(PathBuf::from(home).join(".config").join("butterfish"))
}

pub fn env_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("butterfish.env"))
}

pub fn prompts_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("prompts.yaml"))
}

/// Read the API token from the env file, creating the file via `ask_token`
/// (permissions 0600) when it does not exist yet.
pub fn load_or_create_token(
    path: &Path,
    ask_token: impl FnOnce() -> Result<String>,
) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => parse_env_token(&text)
            .ok_or_else(|| anyhow!("{} does not define {TOKEN_KEY}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let token = ask_token()?;
            let token = token.trim().to_string();
            if token.is_empty() {
                return Err(anyhow!("empty {TOKEN_KEY}"));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, format!("{TOKEN_KEY}={token}\n"))?;
            fs::set_permissions(path, fs::Permissions::from_mode(ENV_FILE_MODE))?;
            Ok(token)
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn parse_env_token(text: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.trim() == TOKEN_KEY {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
