use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use rapport_core::knowledge::{ReferenceDocument, ReferenceLibrary};
use rapport_core::{
    KnowledgeAssembler, Message, Notice, Orchestrator, OrchestratorBuilder,
    Role, Transcript, TurnOutcome, TurnStream,
};
use rapport_model::ModelProvider;

use crate::library::DirectoryLibrary;
use crate::store::{
    ConversationRecord, ConversationTurn, DocumentStore, InMemoryStore,
    MemoryRecord, StoreError, StoreProfiles, TURN_TIME_FORMAT,
};
use crate::tools::SaveMemoryTool;

/// User id used when none is configured.
pub const DEFAULT_USER_ID: &str = "default";

/// Directory reference documents are read from when no library is
/// configured.
pub const DEFAULT_KNOWLEDGE_DIR: &str = "knowledge";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    orchestrator_builder: OrchestratorBuilder,
    user_id: String,
    store: Option<Arc<dyn DocumentStore>>,
    library: Option<Arc<dyn ReferenceLibrary>>,
    documents: Option<Vec<ReferenceDocument>>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            orchestrator_builder: OrchestratorBuilder::with_model_provider(
                provider,
            ),
            user_id: DEFAULT_USER_ID.to_owned(),
            store: None,
            library: None,
            documents: None,
        }
    }

    /// Sets the user chatting in this session.
    #[inline]
    pub fn with_user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Sets the store holding the user data. An empty in-memory store is
    /// used by default.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets where reference documents are read from.
    #[inline]
    pub fn with_library(mut self, library: Arc<dyn ReferenceLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    /// Replaces the reference documents to read.
    #[inline]
    pub fn with_documents(mut self, documents: Vec<ReferenceDocument>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Attaches a callback to be invoked with every [`Notice`] of a turn.
    #[inline]
    pub fn on_notice(
        mut self,
        on_notice: impl Fn(Notice) + Send + Sync + 'static,
    ) -> Self {
        self.orchestrator_builder = self.orchestrator_builder.on_notice(on_notice);
        self
    }

    /// Caps the number of model calls of a single turn.
    #[inline]
    pub fn with_pass_limit(mut self, limit: usize) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_pass_limit(limit);
        self
    }

    /// Builds a new session and assembles its background knowledge.
    pub async fn build(self) -> Session {
        let Self {
            orchestrator_builder,
            user_id,
            store,
            library,
            documents,
        } = self;

        let store: Arc<dyn DocumentStore> =
            store.unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let library: Arc<dyn ReferenceLibrary> = library.unwrap_or_else(|| {
            Arc::new(DirectoryLibrary::new(DEFAULT_KNOWLEDGE_DIR))
        });

        let orchestrator = orchestrator_builder
            .with_tool(SaveMemoryTool::new(Arc::clone(&store), user_id.clone()))
            .build();
        let mut assembler = KnowledgeAssembler::new(
            library,
            Arc::new(StoreProfiles(Arc::clone(&store))),
        );
        if let Some(documents) = documents {
            assembler = assembler.with_documents(documents);
        }

        let context = assembler.build_context(&user_id).await;
        Session {
            user_id,
            store,
            assembler,
            orchestrator,
            transcript: Transcript::with_context(context),
            conversation_id: None,
            title: default_title(),
        }
    }
}

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// The session owns the transcript of the current conversation and decides
/// what gets persisted. Nothing is saved until [`Session::enable_saving`]
/// is called; from then on every user and assistant message is appended to
/// the stored conversation as soon as it is complete.
pub struct Session {
    user_id: String,
    store: Arc<dyn DocumentStore>,
    assembler: KnowledgeAssembler,
    orchestrator: Orchestrator,
    transcript: Transcript,
    conversation_id: Option<String>,
    title: String,
}

impl Session {
    /// Returns the user chatting in this session.
    #[inline]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the transcript of the current conversation.
    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Returns the title of the current conversation.
    #[inline]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the id of the stored conversation, if saving is enabled.
    #[inline]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Returns `true` if messages are persisted as they complete.
    #[inline]
    pub fn is_saving(&self) -> bool {
        self.conversation_id.is_some()
    }

    /// Returns `true` if the conversation has messages that would be lost by
    /// starting a new one.
    #[inline]
    pub fn has_unsaved_messages(&self) -> bool {
        !self.is_saving() && self.transcript.visible().next().is_some()
    }

    /// Sends a user message and starts the assistant turn answering it.
    ///
    /// Once the returned stream is drained, hand its outcome to
    /// [`Session::complete_turn`].
    pub async fn send_message(&mut self, prompt: &str) -> TurnStream {
        self.transcript.push(Message::user(prompt));
        self.persist(Role::User, prompt).await;
        self.orchestrator.run_turn(&self.transcript)
    }

    /// Appends what a turn produced to the transcript.
    pub async fn complete_turn(&mut self, outcome: TurnOutcome) {
        debug!(
            "turn finished with {:?} after {} passes",
            outcome.status, outcome.passes
        );
        self.transcript.extend(outcome.messages);
        if !outcome.reply.is_empty() {
            self.persist(Role::Assistant, &outcome.reply).await;
        }
    }

    /// Sends a user message and waits for the whole answer.
    pub async fn ask(&mut self, prompt: &str) -> String {
        let outcome = self.send_message(prompt).await.finish().await;
        let reply = outcome.reply.clone();
        self.complete_turn(outcome).await;
        reply
    }

    /// Starts persisting the conversation, including the messages so far.
    ///
    /// Returns `false` if saving was already enabled.
    pub async fn enable_saving(&mut self) -> Result<bool, StoreError> {
        if self.is_saving() {
            info!("saving is already enabled for {}", self.title);
            return Ok(false);
        }
        let turns = self
            .transcript
            .visible()
            .map(|msg| ConversationTurn::now(msg.role(), msg.content()))
            .collect();
        let record = self
            .store
            .create_conversation(&self.user_id, &self.title, turns)
            .await?;
        info!("saving conversation {} as {}", self.title, record.id);
        self.conversation_id = Some(record.id);
        Ok(true)
    }

    /// Changes the title of the conversation. Blank titles are ignored.
    ///
    /// The local title changes even if persisting it fails.
    pub async fn rename(&mut self, title: &str) -> Result<(), StoreError> {
        let title = title.trim();
        if title.is_empty() || title == self.title {
            return Ok(());
        }
        self.title = title.to_owned();
        match &self.conversation_id {
            Some(id) => {
                self.store
                    .rename_conversation(&self.user_id, id, title)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Deletes the stored conversation, if any, and starts a new one.
    ///
    /// The session is reset even if the deletion fails.
    pub async fn delete_conversation(&mut self) -> Result<(), StoreError> {
        let result = match &self.conversation_id {
            Some(id) => self.store.delete_conversation(&self.user_id, id).await,
            None => Ok(()),
        };
        self.reset().await;
        result
    }

    /// Replaces the current conversation with a stored one. Future messages
    /// are appended to it.
    pub async fn load_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        let record = self
            .store
            .conversation(&self.user_id, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;

        self.reset().await;
        self.transcript.extend(
            record
                .turns
                .into_iter()
                .filter(|turn| turn.role != Role::Function)
                .map(|turn| Message::text(turn.role, turn.content)),
        );
        self.conversation_id = Some(record.id);
        self.title = record.title;
        info!("loaded conversation {}", self.title);
        Ok(())
    }

    /// Starts a new conversation with freshly assembled knowledge. Saving
    /// is disabled until enabled again.
    pub async fn reset(&mut self) {
        let context = self.assembler.build_context(&self.user_id).await;
        self.transcript.reset(context);
        self.conversation_id = None;
        self.title = default_title();
    }

    /// Returns the stored conversations of the user, newest first.
    pub async fn conversations(
        &self,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        let mut conversations = self.store.conversations(&self.user_id).await?;
        sort_conversations(&mut conversations);
        Ok(conversations)
    }

    /// Returns the memories saved for the user, newest first.
    pub async fn memories(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        let mut memories = self.store.memories(&self.user_id).await?;
        memories.reverse();
        Ok(memories)
    }

    /// Saves a memory typed by the user.
    ///
    /// Like the ones saved by the assistant, it reaches the model once the
    /// knowledge is assembled again.
    pub async fn remember(&self, text: &str) -> Result<MemoryRecord, StoreError> {
        let record = self.store.add_memory(&self.user_id, text.trim()).await?;
        info!("user saved memory {}", record.id);
        Ok(record)
    }

    /// Deletes a memory of the user.
    pub async fn forget(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_memory(&self.user_id, id).await?;
        info!("user deleted memory {id}");
        Ok(())
    }

    async fn persist(&self, role: Role, content: &str) {
        let Some(id) = &self.conversation_id else {
            return;
        };
        let turn = ConversationTurn::now(role, content);
        if let Err(err) = self.store.append_turn(&self.user_id, id, turn).await {
            error!("failed to save a turn of {id}: {err}");
        }
    }
}

fn default_title() -> String {
    format!("Conversation {}", Local::now().format("%Y-%m-%d %H:%M"))
}

/// Sorts by start time, newest first. Unparsable start times go last.
fn sort_conversations(conversations: &mut [ConversationRecord]) {
    conversations.sort_by_key(|conversation| {
        Reverse(
            NaiveDateTime::parse_from_str(
                &conversation.start_time,
                TURN_TIME_FORMAT,
            )
            .ok(),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, start_time: &str) -> ConversationRecord {
        ConversationRecord {
            id: id.to_owned(),
            title: id.to_owned(),
            start_time: start_time.to_owned(),
            turns: vec![],
        }
    }

    #[test]
    fn test_sort_conversations() {
        let mut conversations = vec![
            record("broken", "yesterday"),
            record("old", "2024-01-05 09:00:00"),
            record("new", "2025-05-03 10:00:00"),
            record("missing", ""),
            record("middle", "2024-12-31 23:59:59"),
        ];
        sort_conversations(&mut conversations);
        let ids: Vec<_> = conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "middle", "old", "broken", "missing"]);
    }

    #[test]
    fn test_default_title() {
        let title = default_title();
        let date = title.strip_prefix("Conversation ").unwrap();
        assert!(NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M").is_ok());
    }
}
