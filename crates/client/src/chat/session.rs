use std::sync::Arc;

use futures::StreamExt;
use relaychat_llm::ChatRequest;
use relaychat_storage::GuardedStorage;
use snafu::{ResultExt, Snafu};

use super::conversation::{ConversationStore, Sidebar};
use super::decoder::Utf8StreamDecoder;
use super::ids::{ConversationId, MessageId};
use super::message::{Message, StreamState, StreamTransition};
use super::transcript::{Transcript, TranscriptStore};
use super::transport::{ChatTransport, TransportError};

/// Shown in place of an answer when a turn fails.
pub const APOLOGY_MESSAGE: &str =
    "⚠️ Something went wrong while asking the AI. Please try again in a few seconds.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TurnError {
    #[snafu(display("failed to open relay stream on `{stage}`: {source}"))]
    OpenStream {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("relay stream broke on `{stage}`: {source}"))]
    ReadStream {
        stage: &'static str,
        source: TransportError,
    },
}

pub type TurnResult<T> = Result<T, TurnError>;

/// Why a submit did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    EmptyInput,
    InFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
}

/// A turn whose messages are in the transcript but whose stream has not run yet.
#[derive(Debug)]
pub struct PendingTurn {
    placeholder: MessageId,
    request: ChatRequest,
}

impl PendingTurn {
    pub fn placeholder(&self) -> &MessageId {
        &self.placeholder
    }

    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

/// Transcript plus the store it is written through to.
struct PersistedTranscript {
    transcript: Transcript,
    store: TranscriptStore,
}

impl PersistedTranscript {
    fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    fn push(&mut self, message: Message) {
        self.transcript.push(message);
        self.store.save(&self.transcript);
    }

    /// Appends a decoded delta. Empty text is not a change and is skipped.
    fn append(&mut self, placeholder: &MessageId, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        if !self.transcript.append_to(placeholder, text) {
            tracing::warn!(placeholder = %placeholder, "placeholder vanished mid-stream");
            return false;
        }
        self.store.save(&self.transcript);
        true
    }
}

/// Settles the stream state of one turn, even if the turn future is dropped.
struct TurnGuard<'a> {
    state: &'a mut StreamState,
    placeholder: Option<MessageId>,
}

impl<'a> TurnGuard<'a> {
    fn new(state: &'a mut StreamState, placeholder: MessageId) -> Self {
        Self {
            state,
            placeholder: Some(placeholder),
        }
    }

    fn settle(mut self, transition: StreamTransition) {
        self.placeholder = None;
        match self.state.apply(transition) {
            Ok(next) => *self.state = next,
            Err(rejection) => {
                tracing::warn!(?rejection, "stream transition rejected; forcing idle");
                *self.state = StreamState::Idle;
            }
        }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if let Some(placeholder) = self.placeholder.take() {
            tracing::warn!(placeholder = %placeholder, "chat turn abandoned before it settled");
            *self.state = StreamState::Failed {
                placeholder,
                message: "turn abandoned".to_string(),
            };
        }
    }
}

/// Client-side chat state: the transcript, the sidebar, and the single in-flight turn.
///
/// Every transcript change is written through to storage before observers see it.
pub struct ChatSession {
    transcript: PersistedTranscript,
    sidebar: Sidebar,
    stream_state: StreamState,
    conversation_store: ConversationStore,
    transport: Arc<dyn ChatTransport>,
}

impl ChatSession {
    /// Builds an empty session without reading storage.
    pub fn new(storage: GuardedStorage, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transcript: PersistedTranscript {
                transcript: Transcript::new(),
                store: TranscriptStore::new(storage.clone()),
            },
            sidebar: Sidebar::default(),
            stream_state: StreamState::Idle,
            conversation_store: ConversationStore::new(storage),
            transport,
        }
    }

    /// Builds a session and hydrates it from storage.
    pub fn open(storage: GuardedStorage, transport: Arc<dyn ChatTransport>) -> Self {
        let mut session = Self::new(storage, transport);
        session.hydrate();
        session
    }

    /// Loads stored state once. Missing or malformed blobs leave the defaults in place.
    pub fn hydrate(&mut self) {
        if let Some(transcript) = self.transcript.store.load() {
            tracing::debug!(message_count = transcript.len(), "restored transcript");
            self.transcript.transcript = transcript;
        }

        if let Some(conversations) = self.conversation_store.load() {
            let active_id = conversations
                .active()
                .first()
                .map(|conversation| conversation.id.clone());
            self.sidebar = Sidebar::new(conversations, active_id);
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn is_loading(&self) -> bool {
        self.stream_state.is_in_flight()
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    pub fn sidebar(&self) -> &Sidebar {
        &self.sidebar
    }

    /// Runs one full turn: validates input, appends the messages, streams the reply.
    pub async fn submit<F>(
        &mut self,
        input: &str,
        mut on_change: F,
    ) -> Result<TurnOutcome, SubmitRejection>
    where
        F: FnMut(&[Message]),
    {
        let turn = self.begin_turn(input)?;
        on_change(self.transcript.messages());
        Ok(self.stream_turn(turn, on_change).await)
    }

    /// Appends the user message and the assistant placeholder, and marks the turn in flight.
    pub fn begin_turn(&mut self, input: &str) -> Result<PendingTurn, SubmitRejection> {
        let content = input.trim();
        if content.is_empty() {
            return Err(SubmitRejection::EmptyInput);
        }
        if self.is_loading() {
            return Err(SubmitRejection::InFlight);
        }

        let user_message = Message::user(content);
        let mut history = self
            .transcript
            .messages()
            .iter()
            .map(Message::to_provider_message)
            .collect::<Vec<_>>();
        history.push(user_message.to_provider_message());

        let placeholder = Message::assistant_placeholder();
        let placeholder_id = placeholder.id.clone();

        self.stream_state = self
            .stream_state
            .apply(StreamTransition::Start(placeholder_id.clone()))
            .map_err(|_| SubmitRejection::InFlight)?;

        self.transcript.push(user_message);
        self.transcript.push(placeholder);

        Ok(PendingTurn {
            placeholder: placeholder_id,
            request: ChatRequest::new(history),
        })
    }

    /// Streams the relay response into the turn's placeholder.
    ///
    /// On failure the placeholder keeps whatever arrived and a separate apology message
    /// is appended after it. The in-flight state is cleared either way, including when
    /// this future is dropped before completing.
    pub async fn stream_turn<F>(&mut self, turn: PendingTurn, mut on_change: F) -> TurnOutcome
    where
        F: FnMut(&[Message]),
    {
        let PendingTurn {
            placeholder,
            request,
        } = turn;
        let guard = TurnGuard::new(&mut self.stream_state, placeholder.clone());
        let transport = Arc::clone(&self.transport);

        let result = pump_stream(
            transport.as_ref(),
            &mut self.transcript,
            &placeholder,
            request,
            &mut on_change,
        )
        .await;

        match result {
            Ok(()) => {
                guard.settle(StreamTransition::Complete(placeholder));
                TurnOutcome::Completed
            }
            Err(error) => {
                tracing::error!(error = %error, "chat turn failed");
                guard.settle(StreamTransition::Fail {
                    placeholder,
                    message: error.to_string(),
                });
                self.transcript.push(Message::assistant(APOLOGY_MESSAGE));
                on_change(self.transcript.messages());
                TurnOutcome::Failed
            }
        }
    }

    pub fn create_conversation(&mut self) -> ConversationId {
        let id = self.sidebar.create();
        self.persist_conversations();
        id
    }

    pub fn select_conversation(&mut self, id: ConversationId) {
        self.sidebar.select(id);
    }

    pub fn rename_conversation(&mut self, id: &ConversationId, draft: &str) -> bool {
        let renamed = self.sidebar.commit_rename(id, draft);
        if renamed {
            self.persist_conversations();
        }
        renamed
    }

    pub fn toggle_favorite(&mut self, id: &ConversationId) {
        self.sidebar.toggle_favorite(id);
        self.persist_conversations();
    }

    pub fn toggle_archive(&mut self, id: &ConversationId) {
        self.sidebar.toggle_archive(id);
        self.persist_conversations();
    }

    fn persist_conversations(&self) {
        self.conversation_store.save(self.sidebar.conversations());
    }
}

async fn pump_stream<F>(
    transport: &dyn ChatTransport,
    transcript: &mut PersistedTranscript,
    placeholder: &MessageId,
    request: ChatRequest,
    on_change: &mut F,
) -> TurnResult<()>
where
    F: FnMut(&[Message]),
{
    let mut body = transport.open(request).await.context(OpenStreamSnafu {
        stage: "turn-open-stream",
    })?;

    let mut decoder = Utf8StreamDecoder::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context(ReadStreamSnafu {
            stage: "turn-read-chunk",
        })?;
        if transcript.append(placeholder, &decoder.decode(&chunk)) {
            on_change(transcript.messages());
        }
    }

    if transcript.append(placeholder, &decoder.finish()) {
        on_change(transcript.messages());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::{FutureExt, stream};
    use relaychat_llm::{ProviderMessage, Role};
    use relaychat_storage::{KeyValueStore, MemoryStore};

    use super::*;
    use crate::chat::conversation::CONVERSATIONS_STORAGE_KEY;
    use crate::chat::transcript::TRANSCRIPT_STORAGE_KEY;
    use crate::chat::transport::{BoxFuture, ByteStream, TransportResult};

    #[derive(Clone)]
    enum Script {
        Chunks(Vec<Vec<u8>>),
        BreakAfter(Vec<Vec<u8>>),
        Hang,
        Refuse,
    }

    struct ScriptedTransport {
        script: Script,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn read_error() -> TransportError {
        TransportError::UnexpectedStatus {
            stage: "scripted",
            url: "http://relay.test/api/chat".into(),
            status: 500,
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn open<'a>(
            &'a self,
            request: ChatRequest,
        ) -> BoxFuture<'a, TransportResult<ByteStream>> {
            self.requests.lock().unwrap().push(request);
            let script = self.script.clone();
            Box::pin(async move {
                match script {
                    Script::Chunks(chunks) => {
                        let body: ByteStream =
                            Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, TransportError>)));
                        Ok(body)
                    }
                    Script::BreakAfter(chunks) => {
                        let items = chunks
                            .into_iter()
                            .map(Ok)
                            .chain(std::iter::once(Err(read_error())));
                        let body: ByteStream = Box::pin(stream::iter(items));
                        Ok(body)
                    }
                    Script::Hang => {
                        let body: ByteStream =
                            Box::pin(stream::pending::<TransportResult<Vec<u8>>>());
                        Ok(body)
                    }
                    Script::Refuse => Err(read_error()),
                }
            })
        }
    }

    fn session_with(
        script: Script,
    ) -> (ChatSession, Arc<ScriptedTransport>, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let transport = ScriptedTransport::new(script);
        let session = ChatSession::open(GuardedStorage::new(backend.clone()), transport.clone());
        (session, transport, backend)
    }

    fn chunks(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.as_bytes().to_vec()).collect()
    }

    fn stored_transcript(backend: &MemoryStore) -> Transcript {
        let raw = backend.get(TRANSCRIPT_STORAGE_KEY).unwrap().unwrap();
        Transcript::decode(&raw).unwrap()
    }

    #[tokio::test]
    async fn successful_turn_appends_user_then_filled_assistant() {
        let (mut session, transport, backend) =
            session_with(Script::Chunks(chunks(&["Hel", "lo", "!"])));

        let mut renders = Vec::new();
        let outcome = session
            .submit("  hi  ", |messages| {
                renders.push(messages.last().map(|m| m.content.clone()))
            })
            .await;

        assert_eq!(outcome, Ok(TurnOutcome::Completed));
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello!");
        assert!(!session.is_loading());

        // One render for the appended pair, then one per chunk.
        assert_eq!(
            renders,
            vec![
                Some(String::new()),
                Some("Hel".to_string()),
                Some("Hello".to_string()),
                Some("Hello!".to_string()),
            ]
        );

        assert_eq!(
            transport.requests(),
            vec![ChatRequest::new(vec![ProviderMessage::new(Role::User, "hi")])]
        );
        assert_eq!(stored_transcript(&backend).messages(), session.messages());
    }

    #[tokio::test]
    async fn history_sent_is_prior_transcript_plus_new_user_message() {
        let (mut session, transport, _backend) =
            session_with(Script::Chunks(chunks(&["ok"])));

        session.submit("first", |_| {}).await.unwrap();
        session.submit("second", |_| {}).await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[1].messages,
            vec![
                ProviderMessage::new(Role::User, "first"),
                ProviderMessage::new(Role::Assistant, "ok"),
                ProviderMessage::new(Role::User, "second"),
            ]
        );
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let (mut session, transport, backend) = session_with(Script::Chunks(Vec::new()));

        let outcome = session.submit(" \n\t ", |_| panic!("no render expected")).await;

        assert_eq!(outcome, Err(SubmitRejection::EmptyInput));
        assert!(session.messages().is_empty());
        assert!(transport.requests().is_empty());
        assert_eq!(backend.get(TRANSCRIPT_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn submit_while_in_flight_is_rejected() {
        let (mut session, _transport, _backend) = session_with(Script::Chunks(chunks(&["x"])));

        let turn = session.begin_turn("first").unwrap();
        assert!(session.is_loading());
        let before = session.messages().to_vec();

        assert_eq!(
            session.submit("second", |_| {}).await,
            Err(SubmitRejection::InFlight)
        );
        assert_eq!(session.messages(), before.as_slice());

        assert_eq!(session.stream_turn(turn, |_| {}).await, TurnOutcome::Completed);
        assert!(!session.is_loading());
    }

    #[tokio::test]
    async fn broken_stream_keeps_partial_placeholder_and_appends_apology() {
        let (mut session, _transport, backend) =
            session_with(Script::BreakAfter(chunks(&["par", "tial"])));

        let outcome = session.submit("hi", |_| {}).await;

        assert_eq!(outcome, Ok(TurnOutcome::Failed));
        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "partial");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, APOLOGY_MESSAGE);
        assert!(!session.is_loading());
        assert!(matches!(session.stream_state(), StreamState::Failed { .. }));
        assert_eq!(stored_transcript(&backend).messages(), session.messages());
    }

    #[tokio::test]
    async fn refused_request_leaves_empty_placeholder_and_apology() {
        let (mut session, _transport, _backend) = session_with(Script::Refuse);

        let outcome = session.submit("hi", |_| {}).await;

        assert_eq!(outcome, Ok(TurnOutcome::Failed));
        let contents = session
            .messages()
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["hi", "", APOLOGY_MESSAGE]);

        // The session accepts the next turn.
        assert!(session.begin_turn("again").is_ok());
    }

    #[test]
    fn dropping_a_turn_mid_stream_clears_in_flight() {
        let (mut session, _transport, _backend) = session_with(Script::Hang);

        let turn = session.begin_turn("hi").unwrap();
        assert!(session.stream_turn(turn, |_| {}).now_or_never().is_none());

        assert!(!session.is_loading());
        assert!(matches!(session.stream_state(), StreamState::Failed { .. }));
        assert!(session.begin_turn("again").is_ok());
    }

    #[tokio::test]
    async fn malformed_stored_transcript_hydrates_empty() {
        let backend = Arc::new(MemoryStore::with_entry(TRANSCRIPT_STORAGE_KEY, "not json"));
        let session = ChatSession::open(
            GuardedStorage::new(backend),
            ScriptedTransport::new(Script::Chunks(Vec::new())),
        );
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn stored_transcript_is_restored_on_open() {
        let (mut session, transport, backend) = session_with(Script::Chunks(chunks(&["yo"])));
        session.submit("hey", |_| {}).await.unwrap();

        let reopened = ChatSession::open(GuardedStorage::new(backend), transport);
        assert_eq!(reopened.messages(), session.messages());
    }

    #[tokio::test]
    async fn detached_storage_still_chats() {
        let mut session = ChatSession::open(
            GuardedStorage::detached(),
            ScriptedTransport::new(Script::Chunks(chunks(&["fine"]))),
        );
        assert_eq!(session.submit("hi", |_| {}).await, Ok(TurnOutcome::Completed));
        assert_eq!(session.messages()[1].content, "fine");
    }

    #[test]
    fn conversation_changes_are_persisted_and_transcript_untouched() {
        let (mut session, _transport, backend) = session_with(Script::Chunks(Vec::new()));

        let id = session.create_conversation();
        assert_eq!(session.sidebar().active_id(), Some(&id));
        session.toggle_favorite(&id);
        assert!(session.rename_conversation(&id, "Trip planning"));
        assert!(!session.rename_conversation(&id, "  "));

        let raw = backend.get(CONVERSATIONS_STORAGE_KEY).unwrap().unwrap();
        assert!(raw.contains("Trip planning"));
        assert!(session.messages().is_empty());

        session.toggle_archive(&id);
        let reopened = ChatSession::open(
            GuardedStorage::new(backend),
            ScriptedTransport::new(Script::Chunks(Vec::new())),
        );
        let restored = reopened.sidebar().conversations().get(&id).unwrap();
        assert!(restored.is_favorite);
        assert!(restored.is_archived);
        assert_eq!(reopened.sidebar().active_id(), Some(&ConversationId::new("default")));
    }
}
