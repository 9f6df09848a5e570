use std::sync::Arc;

use rapport_core::tool::{Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::store::DocumentStore;

/// Input of [`SaveMemoryTool`].
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SaveMemoryParameters {
    #[serde(rename = "memoria")]
    #[schemars(
        description = "The sentence or key fact the assistant must save as a memory."
    )]
    memory: String,
}

/// Saves a piece of information as a persistent memory of the user.
pub struct SaveMemoryTool {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    parameter_schema: Value,
}

impl SaveMemoryTool {
    /// Creates a tool saving memories of `user_id` into `store`.
    pub fn new<S: Into<String>>(store: Arc<dyn DocumentStore>, user_id: S) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            parameter_schema: schema_for!(SaveMemoryParameters).to_value(),
        }
    }
}

impl Tool for SaveMemoryTool {
    type Input = SaveMemoryParameters;

    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Saves a piece of information provided by the user as a persistent \
         memory. Only save what the user explicitly asks to remember, or data \
         relevant to future conversations about your goals. Write it as a \
         grammatically correct sentence about the user or another specific \
         person."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: SaveMemoryParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let store = Arc::clone(&self.store);
        let user_id = self.user_id.clone();
        async move {
            let text = input.memory;
            // Failures are reported to the model as the result text.
            match store.add_memory(&user_id, &text).await {
                Ok(record) => {
                    info!("saved memory {} for {user_id}", record.id);
                    Ok(format!("Memory saved successfully: '{text}'"))
                }
                Err(err) => {
                    error!("failed to save a memory for {user_id}: {err}");
                    Ok(format!("Internal error while saving the memory: {err}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Map, json};

    use super::*;
    use crate::store::{
        ConversationRecord, ConversationTurn, InMemoryStore, MemoryRecord,
        StoreError,
    };

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parameter_schema() {
        let tool = SaveMemoryTool::new(Arc::new(InMemoryStore::new()), "ana");
        let schema = tool.parameter_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["memoria"]));
        assert_eq!(schema["properties"]["memoria"]["type"], "string");
    }

    #[tokio::test]
    async fn test_execute() {
        let store = Arc::new(InMemoryStore::new());
        let tool = SaveMemoryTool::new(store.clone(), "ana");
        let input: SaveMemoryParameters =
            serde_json::from_value(json!({ "memoria": "Luis likes jazz." }))
                .unwrap();

        let result = tool.execute(input).await.unwrap();
        assert_eq!(result, "Memory saved successfully: 'Luis likes jazz.'");

        let memories = store.memories("ana").await.unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].text, "Luis likes jazz.");
        assert!(store.memories("luis").await.unwrap().is_empty());
    }

    #[test]
    fn test_missing_argument() {
        let err = serde_json::from_value::<SaveMemoryParameters>(Value::Object(
            arguments(json!({ "text": "X" })),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("memoria"));
    }

    struct BrokenStore;

    #[async_trait]
    impl DocumentStore for BrokenStore {
        async fn profile(&self, _: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn people(&self, _: &str) -> Result<Vec<Value>, StoreError> {
            Ok(vec![])
        }

        async fn memories(&self, _: &str) -> Result<Vec<MemoryRecord>, StoreError> {
            Ok(vec![])
        }

        async fn add_memory(
            &self,
            _: &str,
            _: &str,
        ) -> Result<MemoryRecord, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk full")))
        }

        async fn delete_memory(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_conversation(
            &self,
            _: &str,
            _: &str,
            _: Vec<ConversationTurn>,
        ) -> Result<ConversationRecord, StoreError> {
            Err(StoreError::NotFound("unsupported".to_owned()))
        }

        async fn conversation(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<ConversationRecord>, StoreError> {
            Ok(None)
        }

        async fn conversations(
            &self,
            _: &str,
        ) -> Result<Vec<ConversationRecord>, StoreError> {
            Ok(vec![])
        }

        async fn append_turn(
            &self,
            _: &str,
            _: &str,
            _: ConversationTurn,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn rename_conversation(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_conversation(
            &self,
            _: &str,
            _: &str,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_result() {
        let tool = SaveMemoryTool::new(Arc::new(BrokenStore), "ana");
        let input: SaveMemoryParameters =
            serde_json::from_value(json!({ "memoria": "X" })).unwrap();

        let result = tool.execute(input).await.unwrap();
        assert_eq!(
            result,
            "Internal error while saving the memory: I/O error: disk full"
        );
    }
}
