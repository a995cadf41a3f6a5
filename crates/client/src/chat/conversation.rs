use std::time::{SystemTime, UNIX_EPOCH};

use relaychat_storage::GuardedStorage;
use serde::{Deserialize, Serialize};

use super::ids::ConversationId;

/// Storage key holding the serialized conversation list.
pub const CONVERSATIONS_STORAGE_KEY: &str = "chat_conversations_v1";
pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";
pub const SEED_CONVERSATION_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

impl Conversation {
    pub fn new(id: ConversationId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            is_favorite: false,
            is_archived: false,
            created_at: None,
            updated_at: None,
        }
    }

    fn favorited(mut self) -> Self {
        self.is_favorite = true;
        self
    }
}

/// Ordered conversation records. Every update returns a new list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    pub fn new(items: Vec<Conversation>) -> Self {
        Self { items }
    }

    /// Starter list for a fresh install.
    pub fn seeded() -> Self {
        Self::new(vec![
            Conversation::new(ConversationId::new(SEED_CONVERSATION_ID), "Main conversation")
                .favorited(),
            Conversation::new(ConversationId::new("ideas"), "Course ideas"),
            Conversation::new(ConversationId::new("quick-tests"), "Quick tests"),
        ])
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|conversation| &conversation.id == id)
    }

    /// Appends a fresh default-titled record and returns the new list with its id.
    pub fn create(&self) -> (Self, ConversationId) {
        let id = ConversationId::generate();
        let now = unix_now_seconds();
        let mut created = Conversation::new(id.clone(), DEFAULT_CONVERSATION_TITLE);
        created.created_at = Some(now);
        created.updated_at = Some(now);

        let mut items = self.items.clone();
        items.push(created);
        (Self { items }, id)
    }

    pub fn rename(&self, id: &ConversationId, title: &str) -> Self {
        let now = unix_now_seconds();
        self.map_matching(id, |conversation| Conversation {
            title: title.to_string(),
            updated_at: Some(now),
            ..conversation.clone()
        })
    }

    pub fn toggle_favorite(&self, id: &ConversationId) -> Self {
        self.map_matching(id, |conversation| Conversation {
            is_favorite: !conversation.is_favorite,
            ..conversation.clone()
        })
    }

    /// Archives an active record or restores an archived one.
    pub fn toggle_archive(&self, id: &ConversationId) -> Self {
        self.map_matching(id, |conversation| Conversation {
            is_archived: !conversation.is_archived,
            ..conversation.clone()
        })
    }

    pub fn active(&self) -> Vec<&Conversation> {
        self.items
            .iter()
            .filter(|conversation| !conversation.is_archived)
            .collect()
    }

    pub fn archived(&self) -> Vec<&Conversation> {
        self.items
            .iter()
            .filter(|conversation| conversation.is_archived)
            .collect()
    }

    fn map_matching(
        &self,
        id: &ConversationId,
        update: impl Fn(&Conversation) -> Conversation,
    ) -> Self {
        let items = self
            .items
            .iter()
            .map(|conversation| {
                if &conversation.id == id {
                    update(conversation)
                } else {
                    conversation.clone()
                }
            })
            .collect();
        Self { items }
    }
}

/// Sidebar state: the conversation list plus the selected entry.
///
/// Selection is not tied to the transcript; switching conversations does not swap
/// the messages shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidebar {
    conversations: ConversationList,
    active_id: Option<ConversationId>,
}

impl Default for Sidebar {
    fn default() -> Self {
        Self {
            conversations: ConversationList::seeded(),
            active_id: Some(ConversationId::new(SEED_CONVERSATION_ID)),
        }
    }
}

impl Sidebar {
    pub fn new(conversations: ConversationList, active_id: Option<ConversationId>) -> Self {
        Self {
            conversations,
            active_id,
        }
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn active_id(&self) -> Option<&ConversationId> {
        self.active_id.as_ref()
    }

    pub fn select(&mut self, id: ConversationId) {
        self.active_id = Some(id);
    }

    pub fn create(&mut self) -> ConversationId {
        let (conversations, id) = self.conversations.create();
        self.conversations = conversations;
        self.active_id = Some(id.clone());
        id
    }

    /// Applies a rename typed by the user. Blank drafts are discarded.
    pub fn commit_rename(&mut self, id: &ConversationId, draft: &str) -> bool {
        let trimmed = draft.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.conversations = self.conversations.rename(id, trimmed);
        true
    }

    pub fn toggle_favorite(&mut self, id: &ConversationId) {
        self.conversations = self.conversations.toggle_favorite(id);
    }

    pub fn toggle_archive(&mut self, id: &ConversationId) {
        self.conversations = self.conversations.toggle_archive(id);
    }
}

/// Reads and writes the conversation list through guarded storage.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    storage: GuardedStorage,
}

impl ConversationStore {
    pub fn new(storage: GuardedStorage) -> Self {
        Self { storage }
    }

    pub fn load(&self) -> Option<ConversationList> {
        let raw = self.storage.get(CONVERSATIONS_STORAGE_KEY)?;
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(items) => Some(ConversationList::new(items)),
            Err(error) => {
                tracing::error!(error = %error, "ignoring stored conversation list");
                None
            }
        }
    }

    pub fn save(&self, conversations: &ConversationList) {
        match serde_json::to_string(conversations.items()) {
            Ok(serialized) => self.storage.set(CONVERSATIONS_STORAGE_KEY, &serialized),
            Err(error) => {
                tracing::error!(error = %error, "failed to serialize conversation list for storage");
            }
        }
    }
}

fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
