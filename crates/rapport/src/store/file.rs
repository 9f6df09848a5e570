use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use super::{
    ConversationRecord, ConversationTurn, DocumentStore, MemoryRecord,
    StoreError, TURN_TIME_FORMAT, check_id, memory_timestamp, new_id,
    new_memory_id, sort_memories,
};

const PROFILE_FILE: &str = "profile.json";
const PEOPLE_DIR: &str = "people";
const MEMORIES_DIR: &str = "memories";
const CONVERSATIONS_DIR: &str = "conversations";

/// A store keeping one JSON document per file.
///
/// The layout under the data directory is:
///
/// ```text
/// users/<user id>/profile.json
/// users/<user id>/people/<person id>.json
/// users/<user id>/memories/<memory id>.json
/// users/<user id>/conversations/<conversation id>.json
/// ```
///
/// Profiles and people are maintained by hand, the rest is written by the
/// assistant.
pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles on conversation documents.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store rooted at the given data directory. Directories are
    /// created on first write.
    #[inline]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the data directory.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        check_id(user_id)?;
        Ok(self.root.join("users").join(user_id))
    }

    fn document_path(
        &self,
        user_id: &str,
        collection: &str,
        id: &str,
    ) -> Result<PathBuf, StoreError> {
        check_id(id)?;
        Ok(self
            .user_dir(user_id)?
            .join(collection)
            .join(format!("{id}.json")))
    }
}

async fn read_document<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_document<T: Serialize>(
    path: &Path,
    document: &T,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(document)?;
    fs::write(path, bytes).await?;
    trace!("wrote {}", path.display());
    Ok(())
}

/// Reads every JSON document of a directory. A missing directory is an
/// empty collection, and malformed documents are skipped.
async fn read_collection<T: DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, StoreError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(err.into()),
    };

    let mut paths = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    // Directory order is unspecified.
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        match read_document(&path).await {
            Ok(Some(document)) => documents.push(document),
            Ok(None) => {}
            Err(err) => warn!("skipping {}: {err}", path.display()),
        }
    }
    Ok(documents)
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn profile(&self, user_id: &str) -> Result<Option<Value>, StoreError> {
        read_document(&self.user_dir(user_id)?.join(PROFILE_FILE)).await
    }

    async fn people(&self, user_id: &str) -> Result<Vec<Value>, StoreError> {
        read_collection(&self.user_dir(user_id)?.join(PEOPLE_DIR)).await
    }

    async fn memories(
        &self,
        user_id: &str,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let mut memories: Vec<MemoryRecord> =
            read_collection(&self.user_dir(user_id)?.join(MEMORIES_DIR)).await?;
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
        let path = self.document_path(user_id, MEMORIES_DIR, &record.id)?;
        write_document(&path, &record).await?;
        debug!("saved memory {} for {user_id}", record.id);
        Ok(record)
    }

    async fn delete_memory(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let path = self.document_path(user_id, MEMORIES_DIR, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
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
        let path = self.document_path(user_id, CONVERSATIONS_DIR, &record.id)?;
        let _guard = self.write_lock.lock().await;
        write_document(&path, &record).await?;
        Ok(record)
    }

    async fn conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        read_document(&self.document_path(user_id, CONVERSATIONS_DIR, id)?)
            .await
    }

    async fn conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationRecord>, StoreError> {
        read_collection(&self.user_dir(user_id)?.join(CONVERSATIONS_DIR)).await
    }

    async fn append_turn(
        &self,
        user_id: &str,
        id: &str,
        turn: ConversationTurn,
    ) -> Result<(), StoreError> {
        let path = self.document_path(user_id, CONVERSATIONS_DIR, id)?;
        let _guard = self.write_lock.lock().await;
        let mut record: ConversationRecord = read_document(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        record.turns.push(turn);
        write_document(&path, &record).await
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let path = self.document_path(user_id, CONVERSATIONS_DIR, id)?;
        let _guard = self.write_lock.lock().await;
        let mut record: ConversationRecord = read_document(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        record.title = title.to_owned();
        write_document(&path, &record).await
    }

    async fn delete_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let path = self.document_path(user_id, CONVERSATIONS_DIR, id)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
