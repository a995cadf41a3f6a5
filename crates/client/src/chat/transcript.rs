use std::collections::HashSet;

use relaychat_storage::GuardedStorage;
use snafu::{ResultExt, Snafu, ensure};

use super::ids::MessageId;
use super::message::Message;

/// Storage key holding the serialized transcript.
pub const TRANSCRIPT_STORAGE_KEY: &str = "chat_messages_v1";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TranscriptDecodeError {
    #[snafu(display("stored transcript is not a message array: {source}"))]
    MalformedBlob {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stored transcript repeats message id '{id}'"))]
    DuplicateMessageId { stage: &'static str, id: MessageId },
}

pub type TranscriptDecodeResult<T> = Result<T, TranscriptDecodeError>;

/// Ordered messages of the active conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends `chunk` to the message with `id`. Returns false when no message matches.
    pub fn append_to(&mut self, id: &MessageId, chunk: &str) -> bool {
        match self.messages.iter_mut().find(|message| &message.id == id) {
            Some(message) => {
                message.content.push_str(chunk);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.messages)
    }

    /// Parses a stored blob against the message schema.
    pub fn decode(raw: &str) -> TranscriptDecodeResult<Self> {
        let messages = serde_json::from_str::<Vec<Message>>(raw).context(MalformedBlobSnafu {
            stage: "transcript-decode-json",
        })?;

        let mut seen = HashSet::with_capacity(messages.len());
        for message in &messages {
            ensure!(
                seen.insert(&message.id),
                DuplicateMessageIdSnafu {
                    stage: "transcript-decode-unique-ids",
                    id: message.id.clone(),
                }
            );
        }

        Ok(Self { messages })
    }
}

/// Reads and writes the transcript blob through guarded storage.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    storage: GuardedStorage,
}

impl TranscriptStore {
    pub fn new(storage: GuardedStorage) -> Self {
        Self { storage }
    }

    /// Returns the stored transcript, or `None` when it is absent or malformed.
    pub fn load(&self) -> Option<Transcript> {
        let raw = self.storage.get(TRANSCRIPT_STORAGE_KEY)?;
        match Transcript::decode(&raw) {
            Ok(transcript) => Some(transcript),
            Err(error) => {
                tracing::error!(error = %error, "ignoring stored transcript");
                None
            }
        }
    }

    pub fn save(&self, transcript: &Transcript) {
        match transcript.encode() {
            Ok(serialized) => self.storage.set(TRANSCRIPT_STORAGE_KEY, &serialized),
            Err(error) => {
                tracing::error!(error = %error, "failed to serialize transcript for storage");
            }
        }
    }
}
