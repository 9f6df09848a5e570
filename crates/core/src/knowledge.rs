//! Assembly of the background knowledge handed to the model at the start of
//! every conversation.

use std::error::Error as StdError;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// The error type returned by knowledge sources.
pub type SourceError = Box<dyn StdError + Send + Sync>;

/// Read-only access to the static reference documents.
#[async_trait]
pub trait ReferenceLibrary: Send + Sync {
    /// Reads the document at `path` as UTF-8 text.
    async fn read_text(&self, path: &str) -> Result<String, SourceError>;
}

/// Read-only access to what is known about a user.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Returns the profile of the user, if one was ever filled in.
    async fn profile(&self, user_id: &str) -> Result<Option<Value>, SourceError>;

    /// Returns the records of the people the user has characterized.
    async fn people(&self, user_id: &str) -> Result<Vec<Value>, SourceError>;

    /// Returns the memories saved for the user, oldest first.
    async fn memories(&self, user_id: &str) -> Result<Vec<Value>, SourceError>;
}

/// A reference document and the sentence introducing it to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceDocument {
    /// Path of the document inside the library.
    pub path: String,
    /// Sentence placed right before the document content.
    pub intro: String,
}

impl ReferenceDocument {
    /// Creates a reference document.
    #[inline]
    pub fn new<P: Into<String>, I: Into<String>>(path: P, intro: I) -> Self {
        Self {
            path: path.into(),
            intro: intro.into(),
        }
    }

    /// Returns the standard documents, in the order they are presented.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "instructions.txt",
                "The following are the behavioural instructions you must \
                 follow",
            ),
            Self::new(
                "behavioral_model.txt",
                "The following is information about how to treat people \
                 according to the behavioural model",
            ),
            Self::new(
                "component_tables.json",
                "The following are the temperament component tables, which \
                 indicate how to treat people for different goals according \
                 to their components",
            ),
            Self::new(
                "people_schema.txt",
                "The following is the schema of the people records. Every \
                 person this user has characterized has the following fields",
            ),
        ]
    }
}

const PROFILE_INTRO: &str = "The following is information about the user \
                             who is writing to you and interacting with you";
const PEOPLE_INTRO: &str = "The following is information about the people \
                            the user relates to, filled in by the user";
const MEMORIES_INTRO: &str = "Lastly, these are the memories you saved in \
                              previous interactions with the user. You must \
                              take them into account when answering";

/// Builds the context message out of the reference library and the stored
/// user data.
#[derive(Clone)]
pub struct KnowledgeAssembler {
    library: Arc<dyn ReferenceLibrary>,
    profiles: Arc<dyn ProfileSource>,
    documents: Vec<ReferenceDocument>,
}

impl KnowledgeAssembler {
    /// Creates an assembler reading the [standard
    /// documents](ReferenceDocument::defaults).
    pub fn new(
        library: Arc<dyn ReferenceLibrary>,
        profiles: Arc<dyn ProfileSource>,
    ) -> Self {
        Self {
            library,
            profiles,
            documents: ReferenceDocument::defaults(),
        }
    }

    /// Replaces the reference documents to read.
    #[inline]
    pub fn with_documents(mut self, documents: Vec<ReferenceDocument>) -> Self {
        self.documents = documents;
        self
    }

    /// Builds the background knowledge for `user_id`.
    ///
    /// Sections come in a fixed order: reference documents, the user
    /// profile, the people records and the memories. Missing pieces are
    /// skipped, so the result may be empty.
    pub async fn build_context(&self, user_id: &str) -> String {
        let mut sections = vec![];

        for doc in &self.documents {
            match self.library.read_text(&doc.path).await {
                Ok(content) if !content.trim().is_empty() => {
                    sections.push(section(&doc.intro, &content));
                }
                Ok(_) => warn!("reference document {} is empty", doc.path),
                Err(err) => {
                    warn!("failed to read reference document {}: {err}", doc.path);
                }
            }
        }

        match self.profiles.profile(user_id).await {
            Ok(Some(profile)) if !is_blank(&profile) => {
                sections.push(json_section(PROFILE_INTRO, &profile));
            }
            Ok(_) => info!("no profile found for {user_id}, skipping"),
            Err(err) => warn!("failed to load the profile of {user_id}: {err}"),
        }

        match self.profiles.people(user_id).await {
            Ok(people) if !people.is_empty() => {
                sections.push(json_section(PEOPLE_INTRO, &Value::Array(people)));
            }
            Ok(_) => info!("no people found for {user_id}, skipping"),
            Err(err) => warn!("failed to load the people of {user_id}: {err}"),
        }

        match self.profiles.memories(user_id).await {
            Ok(memories) if !memories.is_empty() => {
                sections
                    .push(json_section(MEMORIES_INTRO, &Value::Array(memories)));
            }
            Ok(_) => {}
            Err(err) => warn!("failed to load the memories of {user_id}: {err}"),
        }

        debug!("assembled {} knowledge sections", sections.len());
        sections.join("\n\n")
    }
}

impl Debug for KnowledgeAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeAssembler")
            .field("documents", &self.documents)
            .finish_non_exhaustive()
    }
}

#[inline]
fn section(intro: &str, content: &str) -> String {
    format!("{intro}:\n{content}")
}

fn json_section(intro: &str, value: &Value) -> String {
    // Serializing a `Value` only fails for non-string map keys, which it
    // cannot hold.
    let content =
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    section(intro, &content)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
