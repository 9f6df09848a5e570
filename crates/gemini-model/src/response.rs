use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use rapport_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::{self, GenerateContentResponse};

struct PartialState {
    sse: Sse,
    // Events decoded from a chunk but not yet handed out. One chunk may
    // carry several parts, and the order of parts is kept.
    pending_events: VecDeque<ModelResponseEvent>,
    has_tool_call: bool,
    finished: bool,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct GeminiResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl GeminiResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            pending_events: Default::default(),
            has_tool_call: false,
            finished: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for GeminiResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // Some proxies close the stream without a finish reason.
                partial_state.finished = true;
                continue;
            }
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");

        let chunk = serde_json::from_str::<GenerateContentResponse>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        decode_chunk(chunk, &mut partial_state)?;
    }
}

fn decode_chunk(
    chunk: GenerateContentResponse,
    partial_state: &mut PartialState,
) -> Result<(), Error> {
    if let Some(err) = chunk.error {
        let kind = match err.code {
            Some(429) => ErrorKind::RateLimitExceeded,
            _ => ErrorKind::Other,
        };
        let message = err
            .message
            .or(err.status)
            .unwrap_or_else(|| "unknown server error".to_owned());
        return Err(Error::new(message, kind));
    }

    if let Some(reason) = chunk
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(Error::new(
            format!("prompt blocked: {reason}"),
            ErrorKind::Moderated,
        ));
    }

    // Only the first candidate is ever requested.
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(());
    };

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(call) = part.function_call.clone() {
            partial_state.has_tool_call = true;
            partial_state
                .pending_events
                .push_back(ModelResponseEvent::ToolCall(proto::create_tool_call(
                    &part, call,
                )));
            continue;
        }
        if let Some(text) = part.text {
            if !text.is_empty() {
                partial_state
                    .pending_events
                    .push_back(ModelResponseEvent::MessageDelta(text));
            }
        }
    }

    if let Some(finish_reason) = candidate.finish_reason {
        match finish_reason.as_str() {
            "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => {
                return Err(Error::new(
                    format!("response blocked: {finish_reason}"),
                    ErrorKind::Moderated,
                ));
            }
            _ => {}
        }
        let reason = if partial_state.has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        partial_state
            .pending_events
            .push_back(ModelResponseEvent::Completed(reason));
        partial_state.finished = true;
    }

    Ok(())
}
