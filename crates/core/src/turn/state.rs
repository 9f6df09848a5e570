use std::fmt::{self, Debug};
use std::sync::Arc;

use futures_util::StreamExt;
use rapport_model::{
    GenerationConfig, ModelMessage, ModelRequest, ModelResponseEvent,
    ToolCallRequest, ToolCallResult,
};
use tracing::Instrument;

use super::{
    BACKEND_FAILURE_APOLOGY, Notice, Orchestrator, TurnOutcome, TurnStatus,
    UNKNOWN_TOOL_APOLOGY,
};
use crate::model_client::{EventStream, ModelClient};
use crate::tool::Registry;
use crate::transcript::Message;

pub(crate) enum TurnStage {
    /// A new streaming call has to be issued.
    Requesting,
    /// Fragments of the current pass are being consumed.
    StreamingText(EventStream),
    /// The model asked for a tool, the current pass is abandoned.
    AwaitingToolResult(ToolCallRequest),
    Finished,
}

impl Debug for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnStage::Requesting => write!(f, "Requesting"),
            TurnStage::StreamingText(_) => write!(f, "StreamingText"),
            TurnStage::AwaitingToolResult(call) => {
                f.debug_tuple("AwaitingToolResult").field(call).finish()
            }
            TurnStage::Finished => write!(f, "Finished"),
        }
    }
}

pub(crate) struct TurnState {
    model_client: ModelClient,
    registry: Arc<Registry>,
    on_notice: Option<Arc<dyn Fn(Notice) + Send + Sync>>,
    config: GenerationConfig,
    pass_limit: Option<usize>,

    /// The wire transcript, extended with every tool exchange.
    wire: Vec<ModelMessage>,
    /// Transcript entries produced by this turn.
    produced: Vec<Message>,
    buffer: String,
    reply: String,
    passes: usize,
    status: TurnStatus,
    stage: TurnStage,
}

impl TurnState {
    pub fn new(orchestrator: &Orchestrator, wire: Vec<ModelMessage>) -> Self {
        Self {
            model_client: orchestrator.model_client.clone(),
            registry: Arc::clone(&orchestrator.registry),
            on_notice: orchestrator.on_notice.clone(),
            config: orchestrator.config.clone(),
            pass_limit: orchestrator.pass_limit,
            wire,
            produced: vec![],
            buffer: String::new(),
            reply: String::new(),
            passes: 0,
            status: TurnStatus::Running,
            stage: TurnStage::Requesting,
        }
    }

    pub fn into_outcome(self) -> TurnOutcome {
        let mut messages = self.produced;
        if !self.reply.is_empty() {
            messages.push(Message::assistant(self.reply.clone()));
        }
        TurnOutcome {
            messages,
            reply: self.reply,
            passes: self.passes,
            status: self.status,
        }
    }

    fn notify(&self, notice: Notice) {
        if let Some(on_notice) = &self.on_notice {
            on_notice(notice);
        }
    }

    fn build_request(&self) -> ModelRequest {
        ModelRequest {
            messages: self.wire.clone(),
            tools: self.registry.descriptors(),
            config: self.config.clone(),
        }
    }

    /// Yields `text` as the last output of the turn.
    fn finish_with(
        mut self,
        status: TurnStatus,
        text: &str,
    ) -> (Option<String>, Self) {
        self.status = status;
        self.stage = TurnStage::Finished;
        self.reply = text.to_owned();
        (Some(self.reply.clone()), self)
    }

    fn fail_backend(self, message: String) -> (Option<String>, Self) {
        error!("turn failed after {} passes: {message}", self.passes);
        self.notify(Notice::BackendFailed { message });
        self.finish_with(TurnStatus::BackendFailed, BACKEND_FAILURE_APOLOGY)
    }
}

/// Runs the turn until the next text is ready.
///
/// Returns `None` along with the state once the turn is over.
pub(crate) async fn advance(mut state: TurnState) -> (Option<String>, TurnState) {
    loop {
        let stage = std::mem::replace(&mut state.stage, TurnStage::Finished);
        trace!("advancing turn from {stage:?}");

        match stage {
            TurnStage::Requesting => {
                if let Some(limit) = state.pass_limit {
                    if state.passes >= limit {
                        warn!("turn exceeded the limit of {limit} passes");
                        state.notify(Notice::PassLimitExceeded { limit });
                        return state.finish_with(
                            TurnStatus::PassLimitExceeded,
                            BACKEND_FAILURE_APOLOGY,
                        );
                    }
                }
                state.passes += 1;
                let req = state.build_request();
                let resp_or_err = state
                    .model_client
                    .send_request(req)
                    .instrument(debug_span!("pass", n = state.passes))
                    .await;
                match resp_or_err {
                    Ok(events) => state.stage = TurnStage::StreamingText(events),
                    Err(err) => return state.fail_backend(format!("{err}")),
                }
            }
            TurnStage::StreamingText(mut events) => match events.next().await {
                Some(Ok(ModelResponseEvent::MessageDelta(delta))) => {
                    state.stage = TurnStage::StreamingText(events);
                    if delta.is_empty() {
                        continue;
                    }
                    state.buffer.push_str(&delta);
                    state.reply.clone_from(&state.buffer);
                    return (Some(state.buffer.clone()), state);
                }
                Some(Ok(ModelResponseEvent::ToolCall(call))) => {
                    // The rest of this pass is not trusted before the tool
                    // result reaches the model.
                    drop(events);
                    state.stage = TurnStage::AwaitingToolResult(call);
                }
                Some(Ok(ModelResponseEvent::Completed(reason))) => {
                    trace!("pass {} completed: {reason:?}", state.passes);
                    state.stage = TurnStage::StreamingText(events);
                }
                Some(Err(err)) => return state.fail_backend(format!("{err}")),
                None => {
                    debug!("turn completed after {} passes", state.passes);
                    state.status = TurnStatus::Completed;
                    return (None, state);
                }
            },
            TurnStage::AwaitingToolResult(call) => {
                let Some(tool) = state.registry.lookup(&call.name) else {
                    warn!("tool not found: {}", call.name);
                    state.notify(Notice::UnknownTool {
                        name: call.name.clone(),
                    });
                    return state
                        .finish_with(TurnStatus::UnknownTool, UNKNOWN_TOOL_APOLOGY);
                };

                trace!("executing tool {} with args: {:?}", call.name, call.arguments);
                let result = tool
                    .execute(call.arguments.clone())
                    .instrument(debug_span!("tool execute", name = %call.name))
                    .await;
                let text = match result {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("tool {} failed: {err}", call.name);
                        format!("{err}")
                    }
                };

                let result = ToolCallResult::with_text(&call, text);
                state.wire.push(ModelMessage::ToolCall(call.clone()));
                state.wire.push(ModelMessage::Tool(result.clone()));
                state.produced.push(Message::tool_call(call.clone()));
                state.produced.push(Message::tool_result(result));
                state.notify(Notice::ToolExecuted {
                    name: call.name,
                    arguments: call.arguments,
                });
                state.stage = TurnStage::Requesting;
            }
            TurnStage::Finished => return (None, state),
        }
    }
}
