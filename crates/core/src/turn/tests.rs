use std::future::ready;
use std::sync::{Arc, LazyLock, Mutex};

use futures_util::StreamExt;
use rapport_model::{
    HarmCategory, ModelMessage, SafetyThreshold, ToolCallRequest,
};
use rapport_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};

use super::*;
use crate::tool::{Tool, ToolResult};
use crate::transcript::{FunctionPart, Role};

static MEMORY_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "properties": { "memoria": { "type": "string" } },
        "required": ["memoria"]
    })
});

#[derive(Deserialize)]
struct MemoryInput {
    memoria: String,
}

#[derive(Clone, Default)]
struct RecordingTool {
    saved: Arc<Mutex<Vec<String>>>,
}

impl RecordingTool {
    fn saved(&self) -> Vec<String> {
        self.saved.lock().unwrap().clone()
    }
}

impl Tool for RecordingTool {
    type Input = MemoryInput;

    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Saves a memory"
    }

    fn parameter_schema(&self) -> &Value {
        &MEMORY_SCHEMA
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        self.saved.lock().unwrap().push(input.memoria.clone());
        ready(Ok(format!("Memory saved successfully: '{}'", input.memoria)))
    }
}

fn save_call(memoria: &str) -> ToolCallRequest {
    ToolCallRequest::new(
        "save_memory",
        json!({ "memoria": memoria }).as_object().cloned().unwrap(),
    )
}

struct Fixture {
    provider: TestModelProvider,
    tool: RecordingTool,
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl Fixture {
    fn new(responses: impl IntoIterator<Item = PresetResponse>) -> Self {
        let provider = TestModelProvider::default();
        for resp in responses {
            provider.add_response(resp);
        }
        Self {
            provider,
            tool: RecordingTool::default(),
            notices: Default::default(),
        }
    }

    fn builder(&self) -> OrchestratorBuilder {
        let notices = Arc::clone(&self.notices);
        OrchestratorBuilder::with_model_provider(self.provider.clone())
            .with_tool(self.tool.clone())
            .on_notice(move |notice| notices.lock().unwrap().push(notice))
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

fn transcript(prompt: &str) -> Transcript {
    let mut transcript = Transcript::with_context("You are a helpful assistant.");
    transcript.push(Message::user(prompt));
    transcript
}

async fn collect(stream: TurnStream) -> Vec<String> {
    stream.collect().await
}

#[tokio::test]
async fn test_simple_message() {
    let fixture = Fixture::new([PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ])]);
    let orchestrator = fixture.builder().build();

    let mut stream = orchestrator.run_turn(&transcript("Hello"));
    assert_eq!(stream.next().await.as_deref(), Some("Hi, "));
    let outcome = stream.finish().await;

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.passes, 1);
    assert_eq!(outcome.reply, "Hi, what can I do for you?");
    assert_eq!(
        outcome.messages,
        vec![Message::assistant("Hi, what can I do for you?")]
    );
    assert!(fixture.notices().is_empty());
}

#[tokio::test]
async fn test_finish_at_any_point() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::MessageDelta("One".to_owned())]),
        PresetResponse::with_events([PresetEvent::MessageDelta("Two".to_owned())]),
    ]);
    let orchestrator = fixture.builder().build();

    // Never polled.
    let outcome = orchestrator.run_turn(&transcript("First")).finish().await;
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.reply, "One");

    // Fully drained, then polled again.
    let mut stream = orchestrator.run_turn(&transcript("Second"));
    assert_eq!(stream.next().await.as_deref(), Some("Two"));
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.next().await, None);
    assert!(format!("{stream:?}").contains("finished: true"));
    let outcome = stream.finish().await;
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.passes, 1);
    assert_eq!(outcome.messages, vec![Message::assistant("Two")]);
}

#[tokio::test]
async fn test_request_carries_config_and_tools() {
    let fixture = Fixture::new([PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi".to_owned()),
    ])]);
    let orchestrator = fixture.builder().build();
    orchestrator.run_turn(&transcript("Hello")).finish().await;

    let requests = fixture.provider.requests();
    assert_eq!(requests.len(), 1);
    let config = &requests[0].config;
    assert_eq!(config.temperature, 0.1);
    assert_eq!(config.seed, Some(133));
    assert_eq!(config.max_output_tokens, Some(65_535));
    assert_eq!(config.safety_settings.len(), HarmCategory::ALL.len());
    assert!(
        config
            .safety_settings
            .iter()
            .all(|setting| setting.threshold == SafetyThreshold::Off)
    );
    assert_eq!(requests[0].tools, orchestrator.registry().descriptors());
    assert_eq!(requests[0].tools[0].name, "save_memory");
    assert_eq!(
        requests[0].messages,
        vec![
            ModelMessage::User("You are a helpful assistant.".to_owned()),
            ModelMessage::User("Hello".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_empty_context_never_reaches_the_model() {
    let fixture = Fixture::new([PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi".to_owned()),
    ])]);
    let orchestrator = fixture.builder().build();

    let mut transcript = Transcript::with_context("");
    transcript.push(Message::user("Hello"));
    orchestrator.run_turn(&transcript).finish().await;

    assert_eq!(
        fixture.provider.requests()[0].messages,
        vec![ModelMessage::User("Hello".to_owned())]
    );
}

#[tokio::test]
async fn test_save_memory_then_reply() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::ToolCall(save_call("X"))]),
        PresetResponse::with_events([PresetEvent::MessageDelta(
            "done".to_owned(),
        )]),
    ]);
    let orchestrator = fixture.builder().build();

    let mut transcript = transcript("Remember X");
    let outcome = orchestrator.run_turn(&transcript).finish().await;
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.passes, 2);
    transcript.extend(outcome.messages);

    let history = transcript.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0], Message::user("Remember X"));
    assert_eq!(history[1].role(), Role::Assistant);
    assert_eq!(
        history[1].function(),
        Some(&FunctionPart::Call(save_call("X")))
    );
    assert_eq!(history[2].role(), Role::Function);
    assert_eq!(history[2].content(), "Memory saved successfully: 'X'");
    assert_eq!(history[3], Message::assistant("done"));

    assert_eq!(fixture.tool.saved(), vec!["X"]);
    assert_eq!(
        fixture.notices(),
        vec![Notice::ToolExecuted {
            name: "save_memory".to_owned(),
            arguments: save_call("X").arguments,
        }]
    );

    // The echoed call is answered right away, before the second pass.
    let requests = fixture.provider.requests();
    assert_eq!(requests.len(), 2);
    let wire = &requests[1].messages;
    assert_eq!(wire.len(), 4);
    assert_eq!(wire[2], ModelMessage::ToolCall(save_call("X")));
    match &wire[3] {
        ModelMessage::Tool(result) => {
            assert_eq!(result.name, "save_memory");
            assert_eq!(result.text(), Some("Memory saved successfully: 'X'"));
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_text_accumulates_across_passes() {
    let fixture = Fixture::new([
        PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me ".to_owned()),
            PresetEvent::MessageDelta("note ".to_owned()),
            PresetEvent::ToolCall(save_call("Luis likes jazz.")),
            // Never read, the pass is abandoned at the tool call.
            PresetEvent::MessageDelta("ignored".to_owned()),
        ]),
        PresetResponse::with_events([
            PresetEvent::MessageDelta("that. ".to_owned()),
            PresetEvent::MessageDelta("Done!".to_owned()),
        ]),
    ]);
    let orchestrator = fixture.builder().build();

    let texts = collect(orchestrator.run_turn(&transcript("Luis likes jazz"))).await;
    assert_eq!(
        texts,
        vec![
            "Let me ",
            "Let me note ",
            "Let me note that. ",
            "Let me note that. Done!",
        ]
    );
    assert!(texts.windows(2).all(|pair| pair[1].starts_with(&pair[0])));
    assert_eq!(fixture.tool.saved(), vec!["Luis likes jazz."]);
}

#[tokio::test]
async fn test_unknown_tool() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::ToolCall(
            ToolCallRequest::new("delete_everything", Default::default()),
        )]),
        PresetResponse::with_events([PresetEvent::MessageDelta(
            "unreachable".to_owned(),
        )]),
    ]);
    let orchestrator = fixture.builder().build();

    let mut stream = orchestrator.run_turn(&transcript("Hello"));
    let mut texts = vec![];
    while let Some(text) = stream.next().await {
        texts.push(text);
    }
    assert_eq!(texts, vec![UNKNOWN_TOOL_APOLOGY]);

    let outcome = stream.finish().await;
    assert_eq!(outcome.status, TurnStatus::UnknownTool);
    assert_eq!(outcome.reply, UNKNOWN_TOOL_APOLOGY);
    assert_eq!(outcome.messages, vec![Message::assistant(UNKNOWN_TOOL_APOLOGY)]);
    assert_eq!(fixture.provider.request_count(), 1);
    assert!(fixture.tool.saved().is_empty());
    assert_eq!(
        fixture.notices(),
        vec![Notice::UnknownTool {
            name: "delete_everything".to_owned()
        }]
    );
}

#[tokio::test]
async fn test_failure_mid_stream() {
    let fixture = Fixture::new([PresetResponse::with_events([
        PresetEvent::Failure("connection reset".to_owned()),
    ])]);
    let orchestrator = fixture.builder().build();

    let mut stream = orchestrator.run_turn(&transcript("Hello"));
    let mut texts = vec![];
    while let Some(text) = stream.next().await {
        texts.push(text);
    }
    assert_eq!(texts, vec![BACKEND_FAILURE_APOLOGY]);

    let outcome = stream.finish().await;
    assert_eq!(outcome.status, TurnStatus::BackendFailed);
    assert!(
        outcome
            .messages
            .iter()
            .all(|msg| msg.role() != Role::Function)
    );
    assert!(matches!(
        fixture.notices().as_slice(),
        [Notice::BackendFailed { message }] if message.contains("connection reset")
    ));
}

#[tokio::test]
async fn test_failure_keeps_shown_text() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::ToolCall(save_call("X"))]),
        PresetResponse::with_events([
            PresetEvent::MessageDelta("Sav".to_owned()),
            PresetEvent::Failure("connection reset".to_owned()),
        ]),
    ]);
    let orchestrator = fixture.builder().build();

    let stream = orchestrator.run_turn(&transcript("Remember X"));
    let outcome = stream.finish().await;

    // The executed tool is not rolled back.
    assert_eq!(fixture.tool.saved(), vec!["X"]);
    assert_eq!(outcome.status, TurnStatus::BackendFailed);
    assert_eq!(outcome.messages.len(), 3);
    assert_eq!(outcome.messages[2], Message::assistant(BACKEND_FAILURE_APOLOGY));
}

#[tokio::test]
async fn test_rejected_request() {
    let fixture = Fixture::new([PresetResponse::rejected("quota exhausted")]);
    let orchestrator = fixture.builder().build();

    let texts = collect(orchestrator.run_turn(&transcript("Hello"))).await;
    assert_eq!(texts, vec![BACKEND_FAILURE_APOLOGY]);
    assert!(matches!(
        fixture.notices().as_slice(),
        [Notice::BackendFailed { message }] if message.contains("quota exhausted")
    ));
}

#[tokio::test]
async fn test_invalid_arguments_reach_the_model() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::ToolCall(
            ToolCallRequest::new(
                "save_memory",
                json!({ "text": "X" }).as_object().cloned().unwrap(),
            ),
        )]),
        PresetResponse::with_events([PresetEvent::MessageDelta(
            "Sorry, let me retry.".to_owned(),
        )]),
    ]);
    let orchestrator = fixture.builder().build();

    let outcome = orchestrator.run_turn(&transcript("Remember X")).finish().await;
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert!(fixture.tool.saved().is_empty());
    assert!(outcome.messages[1].content().starts_with("Invalid input"));
}

#[tokio::test]
async fn test_pass_limit() {
    let fixture = Fixture::new([
        PresetResponse::with_events([PresetEvent::ToolCall(save_call("A"))]),
        PresetResponse::with_events([PresetEvent::ToolCall(save_call("B"))]),
        PresetResponse::with_events([PresetEvent::ToolCall(save_call("C"))]),
    ]);
    let orchestrator = fixture.builder().with_pass_limit(2).build();

    let outcome = orchestrator.run_turn(&transcript("Remember")).finish().await;
    assert_eq!(outcome.status, TurnStatus::PassLimitExceeded);
    assert_eq!(outcome.passes, 2);
    assert_eq!(outcome.reply, BACKEND_FAILURE_APOLOGY);
    assert_eq!(fixture.tool.saved(), vec!["A", "B"]);
    assert_eq!(fixture.provider.request_count(), 2);
    assert_eq!(
        fixture.notices().last(),
        Some(&Notice::PassLimitExceeded { limit: 2 })
    );
}

#[tokio::test]
async fn test_no_pass_limit_by_default() {
    let mut responses: Vec<_> = (0..5)
        .map(|idx| {
            PresetResponse::with_events([PresetEvent::ToolCall(save_call(
                &format!("memory {idx}"),
            ))])
        })
        .collect();
    responses.push(PresetResponse::with_events([PresetEvent::MessageDelta(
        "All saved.".to_owned(),
    )]));
    let fixture = Fixture::new(responses);
    let orchestrator = fixture.builder().build();

    let outcome = orchestrator.run_turn(&transcript("Remember")).finish().await;
    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.passes, 6);
    assert_eq!(fixture.tool.saved().len(), 5);
    assert_eq!(outcome.messages.len(), 11);
}
