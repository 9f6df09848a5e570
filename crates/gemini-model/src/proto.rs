use rapport_model::{
    GenerationConfig as ModelGenerationConfig, HarmCategory, ModelMessage,
    ModelRequest, ModelTool, SafetyThreshold, ToolCallRequest,
    ToolCallResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ------------------------------
// Types shared in both directions
// ------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Set on parts that carry the model's reasoning instead of an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ApiError {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub error: Option<ApiError>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    safety_settings: Vec<SafetySetting>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(req: &ModelRequest) -> GenerateContentRequest {
    let tools = if req.tools.is_empty() {
        vec![]
    } else {
        vec![Tool {
            function_declarations: req.tools.iter().map(create_tool).collect(),
        }]
    };
    GenerateContentRequest {
        contents: req.messages.iter().map(create_content).collect(),
        tools,
        generation_config: create_generation_config(&req.config),
        safety_settings: req
            .config
            .safety_settings
            .iter()
            .map(|setting| SafetySetting {
                category: harm_category(setting.category),
                threshold: safety_threshold(setting.threshold),
            })
            .collect(),
    }
}

fn create_content(msg: &ModelMessage) -> Content {
    let (role, part) = match msg {
        ModelMessage::User(text) => ("user", Part {
            text: Some(text.clone()),
            ..Default::default()
        }),
        ModelMessage::Assistant(text) => ("model", Part {
            text: Some(text.clone()),
            ..Default::default()
        }),
        ModelMessage::ToolCall(call) => ("model", Part {
            thought_signature: call.signature.clone(),
            function_call: Some(FunctionCall {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.arguments.clone(),
            }),
            ..Default::default()
        }),
        ModelMessage::Tool(result) => ("function", Part {
            function_response: Some(create_function_response(result)),
            ..Default::default()
        }),
    };
    Content {
        role: Some(role.to_owned()),
        parts: vec![part],
    }
}

#[inline]
fn create_function_response(result: &ToolCallResult) -> FunctionResponse {
    FunctionResponse {
        id: result.id.clone(),
        name: result.name.clone(),
        response: result.payload.clone(),
    }
}

#[inline]
fn create_generation_config(config: &ModelGenerationConfig) -> GenerationConfig {
    GenerationConfig {
        temperature: config.temperature,
        seed: config.seed,
        max_output_tokens: config.max_output_tokens,
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: sanitize_schema(tool.parameters.clone()),
    }
}

/// Strips the JSON schema keywords that function declarations reject.
fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| {
                    !matches!(
                        key.as_str(),
                        "$schema" | "title" | "additionalProperties"
                    )
                })
                .map(|(key, value)| (key, sanitize_schema(value)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(sanitize_schema).collect())
        }
        other => other,
    }
}

fn harm_category(category: HarmCategory) -> &'static str {
    match category {
        HarmCategory::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
        HarmCategory::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
        HarmCategory::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        HarmCategory::Harassment => "HARM_CATEGORY_HARASSMENT",
    }
}

fn safety_threshold(threshold: SafetyThreshold) -> &'static str {
    match threshold {
        SafetyThreshold::Off => "OFF",
        SafetyThreshold::BlockNone => "BLOCK_NONE",
        SafetyThreshold::BlockOnlyHigh => "BLOCK_ONLY_HIGH",
        SafetyThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
    }
}

/// Converts a function call part into a model-agnostic request.
#[inline]
pub fn create_tool_call(part: &Part, call: FunctionCall) -> ToolCallRequest {
    ToolCallRequest {
        id: call.id,
        name: call.name,
        arguments: call.args,
        signature: part.thought_signature.clone(),
    }
}

#[cfg(test)]
mod tests {
    use rapport_model::SafetySetting as ModelSafetySetting;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_create_request() {
        let call = ToolCallRequest {
            id: None,
            name: "save_memory".to_owned(),
            arguments: json!({ "memoria": "X" }).as_object().cloned().unwrap(),
            signature: Some("sig".to_owned()),
        };
        let request = ModelRequest {
            messages: vec![
                ModelMessage::User("Remember X".to_owned()),
                ModelMessage::ToolCall(call.clone()),
                ModelMessage::Tool(ToolCallResult::with_text(&call, "ok")),
            ],
            tools: vec![ModelTool {
                name: "save_memory".to_owned(),
                description: "Saves a memory.".to_owned(),
                parameters: json!({
                    "$schema": "https://json-schema.org/draft/2020-12/schema",
                    "title": "SaveMemoryParameters",
                    "type": "object",
                    "properties": {
                        "memoria": { "type": "string" }
                    },
                    "required": ["memoria"]
                }),
            }],
            config: ModelGenerationConfig {
                temperature: 0.1,
                seed: Some(133),
                max_output_tokens: Some(65_535),
                safety_settings: vec![ModelSafetySetting {
                    category: HarmCategory::Harassment,
                    threshold: SafetyThreshold::Off,
                }],
            },
        };

        let payload = serde_json::to_value(create_request(&request)).unwrap();
        assert_eq!(
            payload,
            json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": "Remember X" }] },
                    {
                        "role": "model",
                        "parts": [{
                            "thoughtSignature": "sig",
                            "functionCall": {
                                "name": "save_memory",
                                "args": { "memoria": "X" }
                            }
                        }]
                    },
                    {
                        "role": "function",
                        "parts": [{
                            "functionResponse": {
                                "name": "save_memory",
                                "response": { "result": "ok" }
                            }
                        }]
                    }
                ],
                "tools": [{
                    "functionDeclarations": [{
                        "name": "save_memory",
                        "description": "Saves a memory.",
                        "parameters": {
                            "type": "object",
                            "properties": {
                                "memoria": { "type": "string" }
                            },
                            "required": ["memoria"]
                        }
                    }]
                }],
                "generationConfig": {
                    "temperature": 0.1f32,
                    "seed": 133,
                    "maxOutputTokens": 65535
                },
                "safetySettings": [
                    { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" }
                ]
            })
        );
    }
}
