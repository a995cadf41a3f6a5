use relaychat_llm::{ProviderMessage, Role};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;

/// One transcript entry, in the shape it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::generate(), Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageId::generate(), Role::Assistant, content)
    }

    /// Empty assistant message that deltas get appended to.
    pub fn assistant_placeholder() -> Self {
        Self::assistant(String::new())
    }

    pub fn to_provider_message(&self) -> ProviderMessage {
        ProviderMessage::new(self.role, self.content.clone())
    }
}

/// Lifecycle of the single turn a session may have in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(MessageId),
    Done(MessageId),
    Failed {
        placeholder: MessageId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(MessageId),
    Complete(MessageId),
    Fail {
        placeholder: MessageId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: MessageId,
        attempted: MessageId,
    },
    NoActiveStream,
    PlaceholderMismatch {
        active: MessageId,
        attempted: MessageId,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Placeholder currently receiving deltas, if any.
    pub fn active_placeholder(&self) -> Option<&MessageId> {
        match self {
            Self::Streaming(placeholder) => Some(placeholder),
            Self::Idle | Self::Done(_) | Self::Failed { .. } => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_placeholder().is_some()
    }

    /// Applies one transition. Terminal transitions must name the active placeholder.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(placeholder) => match self {
                Self::Streaming(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                    active: active.clone(),
                    attempted: placeholder,
                }),
                Self::Idle | Self::Done(_) | Self::Failed { .. } => {
                    Ok(Self::Streaming(placeholder))
                }
            },
            StreamTransition::Complete(placeholder) => {
                self.ensure_active(&placeholder)?;
                Ok(Self::Done(placeholder))
            }
            StreamTransition::Fail {
                placeholder,
                message,
            } => {
                self.ensure_active(&placeholder)?;
                Ok(Self::Failed {
                    placeholder,
                    message,
                })
            }
        }
    }

    fn ensure_active(&self, placeholder: &MessageId) -> Result<(), StreamTransitionRejection> {
        match self {
            Self::Streaming(active) if active == placeholder => Ok(()),
            Self::Streaming(active) => Err(StreamTransitionRejection::PlaceholderMismatch {
                active: active.clone(),
                attempted: placeholder.clone(),
            }),
            Self::Idle | Self::Done(_) | Self::Failed { .. } => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}
