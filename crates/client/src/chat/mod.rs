/// Conversation records and the sidebar over them.
pub mod conversation;
pub mod decoder;
pub mod ids;
/// Message entities and the stream state machine.
pub mod message;
/// Turn orchestration: submit, stream, persist.
pub mod session;
pub mod transcript;
/// HTTP transport to the relay.
pub mod transport;

pub use conversation::{
    CONVERSATIONS_STORAGE_KEY, Conversation, ConversationList, ConversationStore,
    DEFAULT_CONVERSATION_TITLE, Sidebar,
};
pub use decoder::Utf8StreamDecoder;
pub use ids::{ConversationId, MessageId};
pub use message::{
    Message, StreamState, StreamTransition, StreamTransitionRejection, StreamTransitionResult,
};
pub use relaychat_llm::Role;
pub use session::{
    APOLOGY_MESSAGE, ChatSession, PendingTurn, SubmitRejection, TurnError, TurnOutcome,
};
pub use transcript::{TRANSCRIPT_STORAGE_KEY, Transcript, TranscriptDecodeError, TranscriptStore};
pub use transport::{ChatTransport, RelayClient, TransportError};
