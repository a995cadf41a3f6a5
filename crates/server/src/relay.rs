use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Json, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures::{Stream, StreamExt};
use relaychat_llm::{
    CHAT_RESPONSE_CONTENT_TYPE, CHAT_ROUTE, ChatRequest, LlmProvider, ProviderEventStream,
    ProviderStreamHandle, StreamEvent, StreamRequest,
};
use snafu::Snafu;

/// Body text for failures that happen before any delta is sent.
pub const RELAY_FAILURE_BODY: &str = "Error talking to the AI";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RelayError {
    #[snafu(display("provider stream failed on `{stage}`: {message}"))]
    ProviderStream {
        stage: &'static str,
        message: String,
    },
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Shared handler state: one provider and the model every turn is sent to.
#[derive(Clone)]
pub struct RelayState {
    provider: Arc<dyn LlmProvider>,
    model_id: String,
}

impl RelayState {
    pub fn new(provider: Arc<dyn LlmProvider>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route(CHAT_ROUTE, post(relay_chat))
        .with_state(state)
}

async fn relay_chat(
    State(state): State<RelayState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let message_count = request.messages.len();
    let stream_request = StreamRequest::new(state.model_id.clone(), request.messages);

    let ProviderStreamHandle { mut stream, worker } = match state.provider.stream_chat(stream_request)
    {
        Ok(handle) => handle,
        Err(error) => {
            tracing::error!(error = %error, provider = state.provider.id(), "failed to open provider stream");
            return (StatusCode::INTERNAL_SERVER_ERROR, RELAY_FAILURE_BODY).into_response();
        }
    };

    tracing::debug!(
        provider = state.provider.id(),
        model = %state.model_id,
        message_count,
        "relaying chat turn"
    );
    tokio::spawn(worker);

    // Headers are committed only once the provider has produced something.
    let first_chunk = match await_stream_start(&mut stream).await {
        StreamStart::Text(text) => Some(text),
        StreamStart::Finished => None,
        StreamStart::Failed(message) => {
            tracing::error!(error = %message, provider = state.provider.id(), "provider stream failed before streaming");
            return (StatusCode::INTERNAL_SERVER_ERROR, RELAY_FAILURE_BODY).into_response();
        }
    };

    let body = futures::stream::iter(first_chunk.map(Ok::<_, RelayError>))
        .chain(delta_body(stream));
    (
        [(header::CONTENT_TYPE, CHAT_RESPONSE_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response()
}

#[derive(Debug, PartialEq, Eq)]
enum StreamStart {
    Text(String),
    Finished,
    Failed(String),
}

/// Waits for the first non-empty delta, the end of the stream, or a failure.
async fn await_stream_start(stream: &mut ProviderEventStream) -> StreamStart {
    loop {
        match stream.recv().await {
            Some(StreamEvent::Delta(text)) if text.is_empty() => continue,
            Some(StreamEvent::Delta(text)) => return StreamStart::Text(text),
            Some(StreamEvent::Done) => return StreamStart::Finished,
            Some(StreamEvent::Error(message)) => return StreamStart::Failed(message),
            None => {
                return StreamStart::Failed(
                    "provider worker exited before streaming".to_string(),
                );
            }
        }
    }
}

/// Turns provider events into response body chunks.
///
/// Empty deltas are skipped. A provider error ends the body with an error so the
/// connection is aborted instead of closing cleanly. Dropping the returned stream
/// drops the event stream, which cancels the provider worker.
pub fn delta_body(
    stream: ProviderEventStream,
) -> impl Stream<Item = RelayResult<String>> + Send + 'static {
    futures::stream::unfold(Some(stream), |state| async move {
        let mut stream = state?;
        loop {
            match stream.recv().await? {
                StreamEvent::Delta(text) if text.is_empty() => continue,
                StreamEvent::Delta(text) => return Some((Ok(text), Some(stream))),
                StreamEvent::Done => return None,
                StreamEvent::Error(message) => {
                    tracing::error!(error = %message, "provider stream failed mid-response");
                    let error = RelayError::ProviderStream {
                        stage: "relay-provider-stream",
                        message,
                    };
                    return Some((Err(error), None));
                }
            }
        }
    })
}
