mod builder;
mod state;
#[cfg(test)]
mod tests;

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use rapport_model::GenerationConfig;
use serde_json::{Map, Value};

use crate::model_client::ModelClient;
use crate::tool::Registry;
use crate::transcript::{Message, Transcript};
pub use builder::OrchestratorBuilder;
use state::TurnState;

/// Text yielded when the model asks for a tool that is not registered.
pub const UNKNOWN_TOOL_APOLOGY: &str = "Sorry, an internal error occurred.";

/// Text yielded when the generation backend fails.
pub const BACKEND_FAILURE_APOLOGY: &str =
    "Sorry, there was an error processing your request.";

/// Something the caller should surface to the user while a turn runs.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// A tool has been executed and its result handed back to the model.
    ToolExecuted {
        /// Name of the tool.
        name: String,
        /// Arguments the model passed.
        arguments: Map<String, Value>,
    },
    /// The model asked for a tool that is not registered.
    UnknownTool {
        /// The requested name.
        name: String,
    },
    /// The generation backend failed.
    BackendFailed {
        /// Description of the failure.
        message: String,
    },
    /// The turn needed more passes than allowed.
    PassLimitExceeded {
        /// The configured limit.
        limit: usize,
    },
}

/// How a turn ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TurnStatus {
    /// The turn is still running.
    #[default]
    Running,
    /// A pass ended without requesting a tool.
    Completed,
    /// The model asked for a tool that is not registered.
    UnknownTool,
    /// The generation backend failed.
    BackendFailed,
    /// The turn needed more passes than allowed.
    PassLimitExceeded,
}

/// Everything a finished turn produced.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    /// Messages to append to the transcript, in order: the echoed tool call
    /// and function result pairs, then the final assistant text.
    pub messages: Vec<Message>,
    /// The last text yielded by the turn.
    pub reply: String,
    /// How many streaming calls were issued.
    pub passes: usize,
    /// How the turn ended.
    pub status: TurnStatus,
}

/// Drives the model through one user turn, executing the tools it asks
/// for until a pass finishes without a tool call.
///
/// The orchestrator holds no transcript itself; every turn is started from
/// the transcript passed to [`Orchestrator::run_turn`].
#[derive(Clone)]
pub struct Orchestrator {
    model_client: ModelClient,
    registry: Arc<Registry>,
    on_notice: Option<Arc<dyn Fn(Notice) + Send + Sync>>,
    config: GenerationConfig,
    pass_limit: Option<usize>,
}

impl Orchestrator {
    /// Returns the tools advertised to the model.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the sampling and safety settings sent on every pass.
    #[inline]
    pub fn generation_config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Starts a turn for the given transcript, whose last message is
    /// normally the prompt just typed by the user.
    ///
    /// Nothing happens until the returned stream is polled.
    pub fn run_turn(&self, transcript: &Transcript) -> TurnStream {
        let state = TurnState::new(self, transcript.to_model_messages());
        TurnStream::new(state)
    }
}

impl Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("pass_limit", &self.pass_limit)
            .finish_non_exhaustive()
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The lazy sequence of texts produced by a turn.
///
/// Every item is the whole response accumulated so far, not a delta. The
/// stream ends with the turn and cannot be restarted. Dropping it stops the
/// turn at its next suspension point.
pub struct TurnStream {
    progress: Progress,
}

enum Progress {
    /// Resolves to the next text, or to `None` once the turn is over.
    Running(PinnedFuture<(Option<String>, TurnState)>),
    Done(TurnState),
}

impl TurnStream {
    fn new(state: TurnState) -> Self {
        Self {
            progress: Progress::Running(Box::pin(state::advance(state))),
        }
    }

    /// Drains the remaining texts and returns what the turn produced.
    pub async fn finish(self) -> TurnOutcome {
        let mut next_fut = match self.progress {
            Progress::Running(next_fut) => next_fut,
            Progress::Done(state) => return state.into_outcome(),
        };
        loop {
            match next_fut.await {
                (Some(_), state) => next_fut = Box::pin(state::advance(state)),
                (None, state) => return state.into_outcome(),
            }
        }
    }
}

impl Stream for TurnStream {
    type Item = String;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Progress::Running(next_fut) = &mut this.progress else {
            return Poll::Ready(None);
        };
        let (text, state) = ready!(next_fut.as_mut().poll(cx));
        match text {
            Some(text) => {
                // The turn may have more to say, create a new future for the
                // next text.
                this.progress = Progress::Running(Box::pin(state::advance(state)));
                Poll::Ready(Some(text))
            }
            None => {
                this.progress = Progress::Done(state);
                Poll::Ready(None)
            }
        }
    }
}

impl Debug for TurnStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnStream")
            .field("finished", &matches!(self.progress, Progress::Done(_)))
            .finish_non_exhaustive()
    }
}
