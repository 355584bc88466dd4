//! Wrapper entry point: startup ladder, thread bootstrap, and teardown order.

mod assemble;
mod autosuggest;
mod event_loop;
mod event_state;
mod goal_mode;
mod help;
mod input;
mod llm_jobs;
mod prompt_detect;
mod terminal;
mod writer;

use anyhow::{Context, Result};
use butterfish::config::{
    env_file_path, load_or_create_token, nested_wrapper_detected, prompts_file_path, AppConfig,
};
use butterfish::llm::openai::OpenAiClient;
use butterfish::llm::LlmClient;
use butterfish::prompts::PromptLibrary;
use butterfish::pty_session::ShellSession;
use butterfish::terminal_restore::RawModeGuard;
use butterfish::{init_tracing, log_debug};
use clap::Parser;
use crossbeam_channel::bounded;
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use event_loop::run_event_loop;
use event_state::{EventLoopDeps, EventLoopState};
use input::spawn_input_thread;
use prompt_detect::bootstrap_command;
use terminal::{current_size, install_sigwinch_handler};
use writer::{TermWriter, Theme};

const EXIT_STARTUP_FAILURE: i32 = 3;
const EXIT_RUNTIME_FAILURE: i32 = 4;
const EXIT_NO_SHELL: i32 = 7;
const EXIT_NESTED_WRAPPER: i32 = 8;

/// Producer channels are bounded; stdin and PTY readers block when full.
const EVENT_CHANNEL_CAP: usize = 1024;

fn main() {
    let config = AppConfig::parse();
    if nested_wrapper_detected() {
        eprintln!("butterfish: refusing to run inside an already-wrapped shell");
        exit(EXIT_NESTED_WRAPPER);
    }
    init_tracing(config.verbose);

    let shell_argv = match config.resolve_shell() {
        Ok(argv) => argv,
        Err(err) => {
            eprintln!("butterfish: {err}");
            exit(EXIT_NO_SHELL);
        }
    };

    let (mut state, mut deps, mut guard) = match startup(config, &shell_argv) {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("butterfish: {err:#}");
            exit(EXIT_STARTUP_FAILURE);
        }
    };

    let result = run_event_loop(&mut state, &mut deps);

    guard.restore();
    if let Some(status) = deps.session.wait_exit_status() {
        log_debug(&format!("child shell exited with status {status}"));
    }
    match result {
        Ok(()) => exit(0),
        Err(err) => {
            eprintln!("butterfish: {err:#}");
            exit(EXIT_RUNTIME_FAILURE);
        }
    }
}

fn startup(
    config: AppConfig,
    shell_argv: &[String],
) -> Result<(EventLoopState, EventLoopDeps, RawModeGuard)> {
    let env_path = env_file_path()?;
    let token = load_or_create_token(&env_path, ask_token_interactively)
        .context("missing or invalid OpenAI token")?;

    let prompts_path = prompts_file_path()?;
    let prompts =
        PromptLibrary::load_and_merge(&prompts_path).context("loading the prompt library")?;

    let client: Arc<dyn LlmClient> = Arc::new(
        OpenAiClient::new(config.base_url.clone(), token).context("building the LLM client")?,
    );

    let (cols, rows) = current_size();
    let session =
        ShellSession::spawn(shell_argv, rows, cols).context("spawning the shell under a PTY")?;
    install_sigwinch_handler()?;

    let guard = RawModeGuard::enter()?;

    inject_prompt_bootstrap(&session, shell_argv, &config);

    let (input_tx, input_rx) = bounded(EVENT_CHANNEL_CAP);
    spawn_input_thread(input_tx);
    let (llm_tx, llm_rx) = bounded(EVENT_CHANNEL_CAP);

    let theme = if config.light_color {
        Theme::light()
    } else {
        Theme::dark()
    };
    let state = EventLoopState::new(config, cols);
    let deps = EventLoopDeps {
        session,
        input_rx,
        llm_rx,
        llm_tx,
        client,
        prompts,
        writer: TermWriter::new(theme),
    };
    Ok((state, deps, guard))
}

/// Teach the child's PS1 to announce fresh prompts (and `$?`) via the marker.
fn inject_prompt_bootstrap(session: &ShellSession, shell_argv: &[String], config: &AppConfig) {
    let basename = Path::new(&shell_argv[0])
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&shell_argv[0]);
    match bootstrap_command(basename, !config.no_prompt_emoji) {
        Some(command) => {
            if let Err(err) = session.write_all(command.as_bytes()) {
                log_debug(&format!("failed to inject prompt bootstrap: {err}"));
            }
        }
        None => {
            log_debug(&format!(
                "shell {basename} has no prompt bootstrap; ChildBusy tracking degraded"
            ));
        }
    }
}

/// First-run token prompt, asked on the controlling terminal before raw mode.
fn ask_token_interactively() -> Result<String> {
    let mut stdout = std::io::stdout();
    write!(
        stdout,
        "butterfish needs an OpenAI API token (stored 0600 in your config dir).\nToken: "
    )?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading token from stdin")?;
    Ok(line)
}
