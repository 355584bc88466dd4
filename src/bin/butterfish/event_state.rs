//! Mutable session state owned by the event-loop consumer; no locks anywhere.

use butterfish::config::AppConfig;
use butterfish::history::RollingHistory;
use butterfish::llm::LlmClient;
use butterfish::prompts::PromptLibrary;
use butterfish::pty_session::ShellSession;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use crate::input::InputEvent;
use crate::llm_jobs::{LlmEvent, LlmJob, RequestId};
use crate::prompt_detect::MarkerScanner;
use crate::writer::{StreamRenderer, TermWriter};

/// What a locally-captured line will become when the user presses Enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureKind {
    /// Capital-letter question for the assistant.
    Question,
    /// `!`/`!!` goal for the agent.
    Goal,
    /// Guidance typed while the agent is waiting for feedback.
    GoalFeedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShellMode {
    /// Keystrokes pass through to the child.
    Normal,
    /// Keystrokes are captured locally until Enter or cancel.
    Capturing(CaptureKind),
}

/// Lifecycle of the inline suggestion; at most one request in flight.
#[derive(Debug)]
pub(crate) enum AutosuggestState {
    Idle,
    Scheduled {
        deadline: Instant,
    },
    InFlight {
        job: LlmJob,
        /// Command line at request time; a mismatch on arrival discards the result.
        line_snapshot: String,
    },
    Displayed {
        /// Full suggested line (includes what the user already typed).
        suggestion: String,
        /// Bytes of the line already typed when the suggestion was anchored.
        typed_len: usize,
    },
}

impl AutosuggestState {
    /// Cancel any in-flight request; returns true when a suggestion was shown.
    pub(crate) fn reset(&mut self) -> bool {
        let was_displayed = matches!(self, AutosuggestState::Displayed { .. });
        if let AutosuggestState::InFlight { job, .. } = self {
            job.cancel.cancel();
        }
        *self = AutosuggestState::Idle;
        was_displayed
    }
}

/// Goal-mode executor state, layered over the shell state machine.
#[derive(Debug)]
pub(crate) enum GoalState {
    Idle,
    /// Plan request in flight.
    AwaitingPlan { job: LlmJob },
    /// The agent sent a plain message; waiting for the user to guide or cancel.
    AwaitingFeedback,
    /// Command synthesised into the child's line, waiting for the user's Enter.
    AwaitingConfirm { cmd: String, tool_call_id: String },
    /// Command submitted; waiting for the prompt marker or a timeout.
    Executing {
        cmd: String,
        tool_call_id: String,
        deadline: Instant,
    },
    /// Observation request in flight after a command finished.
    AwaitingObservation { job: LlmJob },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GoalOutcome {
    Succeeded,
    Impossible,
    UserCancelled,
}

impl GoalState {
    pub(crate) fn cancel_in_flight(&mut self) {
        match self {
            GoalState::AwaitingPlan { job } | GoalState::AwaitingObservation { job } => {
                job.cancel.cancel();
            }
            _ => {}
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !matches!(self, GoalState::Idle)
    }
}

/// An in-flight manual prompt: streamed to the terminal as it arrives.
pub(crate) struct ManualRequest {
    pub(crate) job: LlmJob,
    pub(crate) renderer: StreamRenderer,
    pub(crate) accumulated: String,
}

/// Bounded sanitised tail retained while a TUI command owns the terminal.
pub(crate) const PASSTHROUGH_TAIL_BYTES: usize = 1024;

pub(crate) struct EventLoopState {
    pub(crate) config: AppConfig,
    pub(crate) mode: ShellMode,
    pub(crate) child_busy: bool,
    pub(crate) passthrough: bool,
    pub(crate) passthrough_tail: String,
    /// Shadow of the child's current command line, maintained from keystrokes.
    pub(crate) line: String,
    /// False after cursor movement we cannot model; autosuggest pauses until
    /// the next prompt.
    pub(crate) line_valid: bool,
    pub(crate) captured: String,
    pub(crate) autosuggest: AutosuggestState,
    pub(crate) goal: GoalState,
    pub(crate) goal_text: String,
    pub(crate) goal_unsafe: bool,
    pub(crate) goal_steps: u32,
    pub(crate) recent_goal_cmds: Vec<String>,
    pub(crate) goal_exec_output: String,
    pub(crate) manual: Option<ManualRequest>,
    pub(crate) history: RollingHistory,
    pub(crate) scanner: MarkerScanner,
    pub(crate) passthrough_cmds: Vec<String>,
    pub(crate) next_request_id: RequestId,
    pub(crate) last_exit_status: Option<i32>,
    pub(crate) terminal_cols: u16,
    pub(crate) sysinfo: String,
}

impl EventLoopState {
    pub(crate) fn new(config: AppConfig, terminal_cols: u16) -> Self {
        let history = RollingHistory::new(
            butterfish::config::HISTORY_MAX_BYTES,
            config.history_block_byte_cap(),
        );
        let passthrough_cmds = config.passthrough_command_list();
        Self {
            config,
            mode: ShellMode::Normal,
            // Busy until the bootstrap command's first prompt marker appears.
            child_busy: true,
            passthrough: false,
            passthrough_tail: String::new(),
            line: String::new(),
            line_valid: true,
            captured: String::new(),
            autosuggest: AutosuggestState::Idle,
            goal: GoalState::Idle,
            goal_text: String::new(),
            goal_unsafe: false,
            goal_steps: 0,
            recent_goal_cmds: Vec::new(),
            goal_exec_output: String::new(),
            manual: None,
            history,
            scanner: MarkerScanner,
            passthrough_cmds,
            next_request_id: 1,
            last_exit_status: None,
            terminal_cols,
            sysinfo: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    pub(crate) fn next_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Whether the wrapper may intercept keystrokes (fresh prompt, no TUI).
    pub(crate) fn at_interactive_prompt(&self) -> bool {
        !self.child_busy && !self.passthrough
    }
}

/// I/O handles and collaborators; producers own their own ends.
pub(crate) struct EventLoopDeps {
    pub(crate) session: ShellSession,
    pub(crate) input_rx: Receiver<InputEvent>,
    pub(crate) llm_rx: Receiver<LlmEvent>,
    pub(crate) llm_tx: Sender<LlmEvent>,
    pub(crate) client: Arc<dyn LlmClient>,
    pub(crate) prompts: PromptLibrary,
    pub(crate) writer: TermWriter,
}
