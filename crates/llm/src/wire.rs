use serde::{Deserialize, Serialize};

use super::provider::ProviderMessage;

/// Route the relay serves and the client posts to.
pub const CHAT_ROUTE: &str = "/api/chat";

/// Content type of the relay's streamed response body.
pub const CHAT_RESPONSE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Request body of `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ProviderMessage>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ProviderMessage>) -> Self {
        Self { messages }
    }
}
