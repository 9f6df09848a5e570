use serde_json::{Map, Value};

use crate::GenerationConfig;
use crate::response::ToolCallRequest;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
    /// Sampling and safety settings for this request.
    pub config: GenerationConfig,
}

/// A complete message.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    /// A user input text.
    User(String),
    /// A text generated by the model.
    Assistant(String),
    /// A tool call previously requested by the model, echoed back so that
    /// the following [`ModelMessage::Tool`] has something to answer.
    ToolCall(ToolCallRequest),
    /// A tool call result.
    Tool(ToolCallResult),
}

impl ModelMessage {
    /// Returns `true` if the message is authored by the user side of the
    /// conversation.
    #[inline]
    pub fn is_user(&self) -> bool {
        matches!(self, ModelMessage::User(_))
    }
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallResult {
    /// The identifier of the answered tool call request, if it had one.
    pub id: Option<String>,
    /// Name of the tool that produced this result.
    pub name: String,
    /// The payload handed back to the model.
    pub payload: Map<String, Value>,
}

impl ToolCallResult {
    /// Creates a result whose payload is `{"result": content}`.
    pub fn with_text<S: Into<String>>(
        request: &ToolCallRequest,
        content: S,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("result".to_owned(), Value::String(content.into()));
        Self {
            id: request.id.clone(),
            name: request.name.clone(),
            payload,
        }
    }

    /// Returns the textual result, if the payload carries one.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        self.payload.get("result").and_then(Value::as_str)
    }
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_result_with_text() {
        let request = ToolCallRequest {
            id: None,
            name: "save_memory".to_owned(),
            arguments: Map::new(),
            signature: None,
        };
        let result = ToolCallResult::with_text(&request, "saved");
        assert_eq!(result.name, "save_memory");
        assert_eq!(Value::Object(result.payload.clone()), json!({ "result": "saved" }));
        assert_eq!(result.text(), Some("saved"));
    }
}
