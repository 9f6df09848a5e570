use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    ConversationRecord, ConversationTurn, DocumentStore, MemoryRecord,
    StoreError, TURN_TIME_FORMAT, memory_timestamp, new_id, new_memory_id,
    sort_memories,
};

#[derive(Default)]
struct UserData {
    profile: Option<Value>,
    people: Vec<Value>,
    memories: Vec<MemoryRecord>,
    conversations: Vec<ConversationRecord>,
}

/// A store that keeps every document in memory.
///
/// Useful for testing and for sessions where nothing should survive the
/// process.
#[derive(Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<String, UserData>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the profile of a user.
    pub fn with_profile(mut self, user_id: &str, profile: Value) -> Self {
        self.user_mut(user_id).profile = Some(profile);
        self
    }

    /// Adds a people record to a user.
    pub fn with_person(mut self, user_id: &str, person: Value) -> Self {
        self.user_mut(user_id).people.push(person);
        self
    }

    /// Adds a conversation record to a user.
    pub fn with_conversation(
        mut self,
        user_id: &str,
        conversation: ConversationRecord,
    ) -> Self {
        self.user_mut(user_id).conversations.push(conversation);
        self
    }

    fn user_mut(&mut self, user_id: &str) -> &mut UserData {
        self.users
            .get_mut()
            .entry(user_id.to_owned())
            .or_default()
    }
}

fn conversation_mut<'a>(
    users: &'a mut HashMap<String, UserData>,
    user_id: &str,
    id: &str,
) -> Result<&'a mut ConversationRecord, StoreError> {
    users
        .get_mut(user_id)
        .and_then(|user| {
            user.conversations
                .iter_mut()
                .find(|conversation| conversation.id == id)
        })
        .ok_or_else(|| StoreError::NotFound(id.to_owned()))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn profile(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).and_then(|user| user.profile.clone()))
    }

    async fn people(&self, user_id: &str) -> Result<Vec<Value>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|user| user.people.clone())
            .unwrap_or_default())
    }

    async fn memories(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let users = self.users.read().await;
        let mut memories = users
            .get(user_id)
            .map(|user| user.memories.clone())
            .unwrap_or_default();
        sort_memories(&mut memories);
        Ok(memories)
    }

    async fn add_memory(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<MemoryRecord, StoreError> {
        let record = MemoryRecord {
            id: new_memory_id(),
            text: text.to_owned(),
            recorded_at: memory_timestamp(),
        };
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_owned())
            .or_default()
            .memories
            .push(record.clone());
        Ok(record)
    }

    async fn delete_memory(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(user_id) {
            user.memories.retain(|memory| memory.id != id);
        }
        Ok(())
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        turns: Vec<ConversationTurn>,
    ) -> Result<ConversationRecord, StoreError> {
        let record = ConversationRecord {
            id: new_id(),
            title: title.to_owned(),
            start_time: Local::now().format(TURN_TIME_FORMAT).to_string(),
            turns,
        };
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_owned())
            .or_default()
            .conversations
            .push(record.clone());
        Ok(record)
    }

    async fn conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(user_id).and_then(|user| {
            user.conversations
                .iter()
                .find(|conversation| conversation.id == id)
                .cloned()
        }))
    }

    async fn conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .get(user_id)
            .map(|user| user.conversations.clone())
            .unwrap_or_default())
    }

    async fn append_turn(
        &self,
        user_id: &str,
        id: &str,
        turn: ConversationTurn,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        conversation_mut(&mut users, user_id, id)?.turns.push(turn);
        Ok(())
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        conversation_mut(&mut users, user_id, id)?.title = title.to_owned();
        Ok(())
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(user_id) {
            user.conversations.retain(|conversation| conversation.id != id);
        }
        Ok(())
    }
}
