//! Document storage for profiles, people, memories and conversations.

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use rapport_core::Role;
use rapport_core::knowledge::{ProfileSource, SourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use file::FileStore;
pub use memory::InMemoryStore;

/// Format of [`MemoryRecord::recorded_at`], in local time.
pub const MEMORY_TIME_FORMAT: &str = "%Y/%m/%d %H:%M";

/// Format of conversation start times and turn timestamps, in local time.
pub const TURN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The error type for [`DocumentStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the underlying storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored document could not be encoded or decoded.
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    /// The addressed document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The identifier cannot address a document.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),
}

/// A note the assistant saved about the user or someone they know.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Identifier of the record.
    pub id: String,
    /// The remembered fact, as a full sentence.
    pub text: String,
    /// When the memory was saved, formatted with [`MEMORY_TIME_FORMAT`].
    pub recorded_at: String,
}

/// A persisted user or assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Author of the message.
    pub role: Role,
    /// Text of the message.
    pub content: String,
    /// When the message was stored, formatted with [`TURN_TIME_FORMAT`].
    pub timestamp: String,
}

impl ConversationTurn {
    /// Creates a turn stamped with the current local time.
    pub fn now<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now().format(TURN_TIME_FORMAT).to_string(),
        }
    }
}

/// A saved conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Identifier of the conversation.
    pub id: String,
    /// Title shown in the history.
    pub title: String,
    /// When saving was enabled, formatted with [`TURN_TIME_FORMAT`].
    pub start_time: String,
    /// The persisted messages, in order.
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
}

/// Storage of everything known about the users of the assistant.
///
/// Profiles and people records are opaque JSON documents maintained outside
/// of the assistant; memories and conversations are written by it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the profile of the user, if any.
    async fn profile(&self, user_id: &str) -> Result<Option<Value>, StoreError>;

    /// Returns the records of the people the user has characterized.
    async fn people(&self, user_id: &str) -> Result<Vec<Value>, StoreError>;

    /// Returns the memories of the user ordered by the time they were saved.
    async fn memories(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Saves a new memory for the user.
    async fn add_memory(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<MemoryRecord, StoreError>;

    /// Deletes a memory. Deleting a missing memory is not an error.
    async fn delete_memory(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError>;

    /// Creates a conversation starting now with the given turns.
    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<ConversationRecord, StoreError>;

    /// Returns a conversation, if it exists.
    async fn conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError>;

    /// Returns every conversation of the user, in no particular order.
    async fn conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, StoreError>;

    /// Appends a turn to a conversation.
    async fn append_turn(
        &self,
        user_id: &str,
        id: &str,
        turn: ConversationTurn,
    ) -> Result<(), StoreError>;

    /// Changes the title of a conversation.
    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<(), StoreError>;

    /// Deletes a conversation. Deleting a missing conversation is not an
    /// error.
    async fn delete_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError>;
}

/// Exposes a [`DocumentStore`] to the knowledge assembler.
#[derive(Clone)]
pub struct StoreProfiles(pub Arc<dyn DocumentStore>);

#[async_trait]
impl ProfileSource for StoreProfiles {
    async fn profile(&self, user_id: &str) -> Result<Option<Value>, SourceError> {
        Ok(self.0.profile(user_id).await?)
    }

    async fn people(&self, user_id: &str) -> Result<Vec<Value>, SourceError> {
        Ok(self.0.people(user_id).await?)
    }

    async fn memories(&self, user_id: &str) -> Result<Vec<Value>, SourceError> {
        let memories = self.0.memories(user_id).await?;
        let values = memories
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        Ok(values)
    }
}

#[inline]
pub(crate) fn memory_timestamp() -> String {
    Local::now().format(MEMORY_TIME_FORMAT).to_string()
}

#[inline]
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Returns an id that sorts after every id generated before it by this
/// process.
#[inline]
pub(crate) fn new_memory_id() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

/// Checks that `id` can be used as a single path component.
pub(crate) fn check_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && !id.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_owned()))
    }
}

/// Orders memories chronologically. The timestamp format sorts like the
/// time it encodes, and ids break ties within a minute.
pub(crate) fn sort_memories(memories: &mut [MemoryRecord]) {
    memories.sort_by(|a, b| {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_check_id() {
        assert!(check_id("ana").is_ok());
        assert!(check_id("3f2a9c").is_ok());
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", "a\nb"] {
            assert!(
                matches!(check_id(id), Err(StoreError::InvalidId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_turn_serialization() {
        let turn = ConversationTurn {
            role: Role::Assistant,
            content: "Hi!".to_owned(),
            timestamp: "2025-05-03 10:00:00".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            json!({
                "role": "assistant",
                "content": "Hi!",
                "timestamp": "2025-05-03 10:00:00"
            })
        );
    }

    #[tokio::test]
    async fn test_store_profiles() {
        let store = InMemoryStore::new()
            .with_profile("ana", json!({ "name": "Ana" }))
            .with_person("ana", json!({ "name": "Marta" }));
        store.add_memory("ana", "Marta likes jazz.").await.unwrap();
        let profiles = StoreProfiles(Arc::new(store));

        assert_eq!(
            profiles.profile("ana").await.unwrap(),
            Some(json!({ "name": "Ana" }))
        );
        assert_eq!(profiles.people("ana").await.unwrap().len(), 1);
        let memories = profiles.memories("ana").await.unwrap();
        assert_eq!(memories[0]["text"], "Marta likes jazz.");
        assert!(memories[0]["recorded_at"].is_string());

        assert_eq!(profiles.profile("luis").await.unwrap(), None);
    }
}
