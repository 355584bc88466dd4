//! LLM request producers: worker threads that stream results into the event queue.

use butterfish::llm::{
    CancelToken, CompletionRequest, CompletionResponse, LlmClient, LlmError, StreamItem,
};
use butterfish::log_debug;
use crossbeam_channel::{Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

/// Most chunk events a producer will queue locally while the consumer is busy;
/// beyond this the oldest queued chunk is dropped and the request is degraded.
const PRODUCER_QUEUE_CAP: usize = 1024;

pub(crate) type RequestId = u64;

#[derive(Debug)]
pub(crate) enum LlmOutcome {
    Finished(CompletionResponse),
    Cancelled,
    Error(LlmError),
}

#[derive(Debug)]
pub(crate) enum LlmEvent {
    Chunk { id: RequestId, text: String },
    Notice { id: RequestId, text: String },
    Done { id: RequestId, outcome: LlmOutcome },
}

#[cfg(test)]
impl LlmEvent {
    fn id(&self) -> RequestId {
        match self {
            LlmEvent::Chunk { id, .. }
            | LlmEvent::Notice { id, .. }
            | LlmEvent::Done { id, .. } => *id,
        }
    }
}

/// Handle the consumer keeps for an in-flight request.
#[derive(Debug, Clone)]
pub(crate) struct LlmJob {
    pub(crate) id: RequestId,
    pub(crate) cancel: CancelToken,
}

/// Buffers producer events in front of the shared bounded channel.
///
/// Stdin and PTY producers block on a full queue; LLM producers instead drop
/// their own oldest chunk and flag the request as degraded, so a slow consumer
/// never stalls the HTTP stream.
struct EventPump {
    tx: Sender<LlmEvent>,
    queue: VecDeque<LlmEvent>,
    degraded: bool,
    id: RequestId,
}

impl EventPump {
    fn new(tx: Sender<LlmEvent>, id: RequestId) -> Self {
        Self {
            tx,
            queue: VecDeque::new(),
            degraded: false,
            id,
        }
    }

    fn drain(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    self.queue.push_front(event);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.queue.clear();
                    break;
                }
            }
        }
    }

    fn push(&mut self, event: LlmEvent) {
        self.queue.push_back(event);
        self.drain();
        if self.queue.len() > PRODUCER_QUEUE_CAP {
            self.queue.pop_front();
            if !self.degraded {
                self.degraded = true;
                log_debug(&format!("request {} degraded: dropping chunks", self.id));
                self.queue.push_back(LlmEvent::Notice {
                    id: self.id,
                    text: "response degraded: terminal is falling behind".to_string(),
                });
            }
        }
    }

    /// Deliver everything left, blocking; used once the request has finished.
    fn flush_blocking(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            if self.tx.send(event).is_err() {
                self.queue.clear();
                return;
            }
        }
    }
}

/// Spawn a worker thread running `request`; events arrive on `tx` tagged `id`.
///
/// `streaming=true` uses the streaming endpoint and emits `Chunk` events in
/// order; otherwise only the final `Done` carries text. After `cancel` fires
/// the consumer sees no further chunks and exactly one `Done(Cancelled)`.
pub(crate) fn spawn_completion_job(
    client: Arc<dyn LlmClient>,
    request: CompletionRequest,
    id: RequestId,
    tx: Sender<LlmEvent>,
    streaming: bool,
) -> LlmJob {
    let cancel = CancelToken::new();
    let job = LlmJob {
        id,
        cancel: cancel.clone(),
    };
    thread::spawn(move || {
        let mut pump = EventPump::new(tx, id);
        let result = {
            let cancel_for_sink = cancel.clone();
            let mut sink = |item: StreamItem<'_>| match item {
                StreamItem::Text(text) => {
                    if !cancel_for_sink.is_cancelled() {
                        pump.push(LlmEvent::Chunk {
                            id,
                            text: text.to_string(),
                        });
                    }
                }
                StreamItem::Retrying { attempt, delay } => {
                    pump.push(LlmEvent::Notice {
                        id,
                        text: format!(
                            "transient error, retrying (attempt {attempt}, waiting {}s)",
                            delay.as_secs()
                        ),
                    });
                }
            };
            if streaming {
                client.stream(&request, &cancel, &mut sink)
            } else {
                client.complete(&request, &cancel, &mut sink)
            }
        };
        let outcome = match result {
            Ok(_) if cancel.is_cancelled() => LlmOutcome::Cancelled,
            Ok(response) => LlmOutcome::Finished(response),
            Err(LlmError::Cancelled) => LlmOutcome::Cancelled,
            Err(err) => LlmOutcome::Error(err),
        };
        if cancel.is_cancelled() {
            // Drop chunks queued before cancellation; only Done may follow.
            pump.queue.retain(|e| !matches!(e, LlmEvent::Chunk { .. }));
        }
        pump.push(LlmEvent::Done { id, outcome });
        pump.flush_blocking();
    });
    job
}
