//! Rolling session history: append-only blocks with byte caps and token accounting.

use std::collections::VecDeque;

use crate::utf8_safe::{clip_first_bytes, clip_last_bytes};

/// What a history block records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    ShellInput,
    ShellOutput,
    LlmPrompt,
    LlmResponse,
    FunctionCall,
    FunctionResult,
}

impl BlockKind {
    /// Calibration factor applied on top of the bytes/4 token heuristic.
    fn token_fudge(self) -> f64 {
        match self {
            BlockKind::ShellInput | BlockKind::LlmPrompt | BlockKind::LlmResponse => 1.0,
            BlockKind::ShellOutput | BlockKind::FunctionResult => 1.1,
            BlockKind::FunctionCall => 1.2,
        }
    }

    /// Whether clipping keeps the end of the text (command output) or the start.
    fn clip_keeps_tail(self) -> bool {
        matches!(self, BlockKind::ShellOutput | BlockKind::FunctionResult)
    }

    pub fn label(self) -> &'static str {
        match self {
            BlockKind::ShellInput => "shell-input",
            BlockKind::ShellOutput => "shell-output",
            BlockKind::LlmPrompt => "prompt",
            BlockKind::LlmResponse => "response",
            BlockKind::FunctionCall => "function-call",
            BlockKind::FunctionResult => "function-result",
        }
    }
}

/// Why (and by how much) a block's text is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Truncated {
    #[default]
    No,
    /// Bytes dropped to stay under the per-block ceiling.
    Bytes(u64),
    /// The producing request was cancelled mid-stream.
    Cancelled,
}

/// One immutable unit of session history.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    pub truncated: Truncated,
    pub seq: u64,
    pub tool_call_id: Option<String>,
}

impl Block {
    /// Estimated token count for this block's text.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(self.text.len(), self.kind)
    }
}

pub fn estimate_tokens(byte_len: usize, kind: BlockKind) -> usize {
    let base = byte_len.div_ceil(4) as f64;
    (base * kind.token_fudge()).ceil() as usize
}

/// Ordered block log bounded by a global byte cap, oldest evicted first.
///
/// The tail block (kind ShellOutput) stays unsealed while a command runs and is
/// extended with `append_tail`; sealing freezes it. Sealed blocks are immutable.
#[derive(Debug)]
pub struct RollingHistory {
    blocks: VecDeque<Block>,
    tail: Option<Block>,
    tail_dropped: u64,
    next_seq: u64,
    max_total_bytes: usize,
    max_block_bytes: usize,
}

impl RollingHistory {
    pub fn new(max_total_bytes: usize, max_block_bytes: usize) -> Self {
        Self {
            blocks: VecDeque::new(),
            tail: None,
            tail_dropped: 0,
            next_seq: 0,
            max_total_bytes,
            max_block_bytes,
        }
    }

    pub fn append(&mut self, kind: BlockKind, text: impl Into<String>) -> u64 {
        self.append_block(kind, text.into(), Truncated::No, None)
    }

    pub fn append_function_call(&mut self, text: impl Into<String>, tool_call_id: &str) -> u64 {
        self.append_block(
            BlockKind::FunctionCall,
            text.into(),
            Truncated::No,
            Some(tool_call_id.to_string()),
        )
    }

    pub fn append_function_result(&mut self, text: impl Into<String>, tool_call_id: &str) -> u64 {
        self.append_block(
            BlockKind::FunctionResult,
            text.into(),
            Truncated::No,
            Some(tool_call_id.to_string()),
        )
    }

    /// Record a response cut short by cancellation.
    pub fn append_cancelled(&mut self, kind: BlockKind, text: impl Into<String>) -> u64 {
        self.append_block(kind, text.into(), Truncated::Cancelled, None)
    }

    fn append_block(
        &mut self,
        kind: BlockKind,
        mut text: String,
        truncated: Truncated,
        tool_call_id: Option<String>,
    ) -> u64 {
        self.seal_tail();
        let mut truncated = truncated;
        if text.len() > self.max_block_bytes {
            let dropped = (text.len() - self.max_block_bytes) as u64;
            text = if kind.clip_keeps_tail() {
                clip_last_bytes(&text, self.max_block_bytes).to_string()
            } else {
                clip_first_bytes(&text, self.max_block_bytes).to_string()
            };
            truncated = match truncated {
                Truncated::Cancelled => Truncated::Cancelled,
                Truncated::Bytes(prior) => Truncated::Bytes(prior + dropped),
                Truncated::No => Truncated::Bytes(dropped),
            };
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.blocks.push_back(Block {
            kind,
            text,
            truncated,
            seq,
            tool_call_id,
        });
        self.evict_over_cap();
        seq
    }

    /// Extend the unsealed ShellOutput tail, opening one if necessary.
    ///
    /// Bytes past the per-block ceiling are dropped and accounted in the
    /// block's truncation counter; earlier tail content is kept so the block
    /// reflects how the command started.
    pub fn append_tail(&mut self, text: &str) {
        let tail = self.tail.get_or_insert_with(|| Block {
            kind: BlockKind::ShellOutput,
            text: String::new(),
            truncated: Truncated::No,
            seq: 0,
            tool_call_id: None,
        });
        let room = self.max_block_bytes.saturating_sub(tail.text.len());
        if room >= text.len() {
            tail.text.push_str(text);
        } else {
            let kept = clip_first_bytes(text, room);
            tail.text.push_str(kept);
            self.tail_dropped += (text.len() - kept.len()) as u64;
        }
        self.evict_over_cap();
    }

    /// Freeze the current tail block; a later `append_tail` opens a new one.
    pub fn seal_tail(&mut self) {
        let Some(mut tail) = self.tail.take() else {
            return;
        };
        let dropped = std::mem::take(&mut self.tail_dropped);
        if tail.text.is_empty() && dropped == 0 {
            return;
        }
        if dropped > 0 {
            tail.truncated = Truncated::Bytes(dropped);
        }
        tail.seq = self.next_seq;
        self.next_seq += 1;
        self.blocks.push_back(tail);
        self.evict_over_cap();
    }

    fn retained_bytes(&self) -> usize {
        let sealed: usize = self.blocks.iter().map(|b| b.text.len()).sum();
        sealed + self.tail.as_ref().map_or(0, |t| t.text.len())
    }

    fn evict_over_cap(&mut self) {
        while self.retained_bytes() > self.max_total_bytes {
            if self.blocks.pop_front().is_none() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len() + usize::from(self.tail.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest-first budget walk, returned oldest-first for prompt assembly.
    ///
    /// Each block's text is clipped to `per_block_byte_cap` at a UTF-8 boundary
    /// (ShellOutput and FunctionResult keep their final bytes, everything else
    /// its first bytes); blocks are taken until the next one would push the
    /// estimated token total past `token_budget`.
    pub fn suffix_for_prompt(
        &self,
        token_budget: usize,
        per_block_byte_cap: usize,
    ) -> Vec<Block> {
        let mut selected: Vec<Block> = Vec::new();
        let mut spent = 0usize;
        let newest_first = self
            .tail
            .iter()
            .chain(self.blocks.iter().rev())
            .filter(|b| !b.text.is_empty());
        for block in newest_first {
            let clipped = if block.kind.clip_keeps_tail() {
                clip_last_bytes(&block.text, per_block_byte_cap)
            } else {
                clip_first_bytes(&block.text, per_block_byte_cap)
            };
            let tokens = estimate_tokens(clipped.len(), block.kind);
            if spent + tokens > token_budget {
                break;
            }
            spent += tokens;
            let mut copy = block.clone();
            if clipped.len() < block.text.len() {
                let dropped = (block.text.len() - clipped.len()) as u64;
                copy.truncated = match copy.truncated {
                    Truncated::Cancelled => Truncated::Cancelled,
                    Truncated::Bytes(prior) => Truncated::Bytes(prior + dropped),
                    Truncated::No => Truncated::Bytes(dropped),
                };
                copy.text = clipped.to_string();
            }
            selected.push(copy);
        }
        selected.reverse();
        selected
    }
}
