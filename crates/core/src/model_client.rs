use std::fmt::{self, Debug};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use rapport_model::{
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ModelResponseEvent,
};
use tracing::Instrument;

/// Events of one streaming pass, with the provider erased.
pub(crate) type EventStream = Pin<
    Box<
        dyn Stream<Item = Result<ModelResponseEvent, Box<dyn ModelProviderError>>>
            + Send,
    >,
>;

type SendRequestResult = Result<EventStream, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn =
            Arc::new(move |req: ModelRequest| -> BoxedSendRequestFuture {
                let fut = provider.send_request(&req);
                Box::pin(
                    async move {
                        trace!("got a request: {:?}", req);
                        let resp = fut.await.map_err(|err| {
                            error!("got an error: {err:?}");
                            Box::new(err) as Box<dyn ModelProviderError>
                        })?;
                        let events: EventStream =
                            Box::pin(ResponseEvents { resp, done: false });
                        Ok::<_, Box<dyn ModelProviderError>>(events)
                    }
                    .instrument(trace_span!("model client req")),
                )
            });
        Self { handler_fn }
    }

    /// Sends a request and returns the stream of its events.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events once the returned stream is dropped.
    #[inline]
    pub async fn send_request(&self, req: ModelRequest) -> SendRequestResult {
        (self.handler_fn)(req).await
    }
}

impl Debug for ModelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClient").finish_non_exhaustive()
    }
}

pin_project! {
    struct ResponseEvents<R> {
        #[pin]
        resp: R,
        done: bool,
    }
}

impl<R: ModelResponse> Stream for ResponseEvents<R> {
    type Item = Result<ModelResponseEvent, Box<dyn ModelProviderError>>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match this.resp.poll_next_event(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(event))) => {
                trace!("got an event: {event:?}");
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Ok(None)) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Err(err)) => {
                error!("got an error: {err:?}");
                // Nothing is read from a failed response.
                *this.done = true;
                let err: Box<dyn ModelProviderError> = Box::new(err);
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use rapport_model::{GenerationConfig, ModelFinishReason, ModelMessage};
    use rapport_test_model::{PresetEvent, PresetResponse, TestModelProvider};

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
            config: GenerationConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let model_provider = TestModelProvider::default();
        for _ in 0..3 {
            model_provider.add_response(PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
            ]));
        }

        let model_client = ModelClient::new(model_provider.clone());

        for _ in 0..3 {
            let events: Vec<_> = model_client
                .send_request(request())
                .await
                .unwrap()
                .map(|event| event.unwrap())
                .collect()
                .await;
            assert_eq!(events.len(), 4);
            assert_eq!(
                events.last(),
                Some(&ModelResponseEvent::Completed(ModelFinishReason::Stop))
            );
        }
        assert_eq!(model_provider.request_count(), 3);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        model_provider.add_response(PresetResponse::with_events([
            PresetEvent::Failure("connection reset".to_owned()),
        ]));
        let model_client = ModelClient::new(model_provider);

        let mut events = model_client.send_request(request()).await.unwrap();
        assert!(matches!(events.next().await, Some(Err(_))));
        assert!(events.next().await.is_none());

        // The script is exhausted now.
        assert!(model_client.send_request(request()).await.is_err());
    }
}
