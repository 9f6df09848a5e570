//! Transcript-related types.

use rapport_model::{ModelMessage, ToolCallRequest, ToolCallResult};
use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting with the assistant.
    User,
    /// The model.
    Assistant,
    /// A locally executed tool answering the model.
    Function,
}

/// The structured half of a tool exchange carried by a message.
#[derive(Clone, Debug, PartialEq)]
pub enum FunctionPart {
    /// The call requested by the model, echoed back verbatim.
    Call(ToolCallRequest),
    /// What the tool returned.
    Response(ToolCallResult),
}

/// An entry of the [`Transcript`].
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub(crate) role: Role,
    pub(crate) content: String,
    pub(crate) is_context: bool,
    pub(crate) function: Option<FunctionPart>,
}

impl Message {
    /// Creates a message typed by the user.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::text(Role::User, content)
    }

    /// Creates a text message written by the model.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Creates a plain text message with the given role.
    #[inline]
    pub fn text<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
            is_context: false,
            function: None,
        }
    }

    #[inline]
    pub(crate) fn context(content: String) -> Self {
        Self {
            role: Role::User,
            content,
            is_context: true,
            function: None,
        }
    }

    /// Creates the message echoing a tool call of the model.
    #[inline]
    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            is_context: false,
            function: Some(FunctionPart::Call(call)),
        }
    }

    /// Creates the function-role message answering a tool call.
    #[inline]
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: Role::Function,
            content: result.text().unwrap_or_default().to_owned(),
            is_context: false,
            function: Some(FunctionPart::Response(result)),
        }
    }

    /// Returns the author of this message.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the text of this message.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns `true` for the synthetic message carrying the assembled
    /// background knowledge.
    #[inline]
    pub fn is_context(&self) -> bool {
        self.is_context
    }

    /// Returns the tool exchange this message belongs to, if any.
    #[inline]
    pub fn function(&self) -> Option<&FunctionPart> {
        self.function.as_ref()
    }

    /// Returns `true` if the message is plain user or assistant text that
    /// is shown on screen and persisted.
    #[inline]
    pub fn is_visible(&self) -> bool {
        !self.is_context && self.function.is_none() && self.role != Role::Function
    }

    /// Converts this message to its wire representation. Returns `None`
    /// for messages the model never sees.
    pub(crate) fn to_model_message(&self) -> Option<ModelMessage> {
        if self.is_context && self.content.is_empty() {
            return None;
        }
        let msg = match (&self.function, self.role) {
            (Some(FunctionPart::Call(call)), _) => ModelMessage::ToolCall(call.clone()),
            (Some(FunctionPart::Response(result)), _) => {
                ModelMessage::Tool(result.clone())
            }
            (None, Role::User) => ModelMessage::User(self.content.clone()),
            (None, _) => ModelMessage::Assistant(self.content.clone()),
        };
        Some(msg)
    }
}

/// The ordered messages of a chat session.
///
/// The context message, if any, always sits at position 0 and there is at
/// most one of it. Everything else is appended in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates a transcript starting with the given background knowledge.
    ///
    /// Empty knowledge produces no context message at all.
    pub fn with_context<S: Into<String>>(context: S) -> Self {
        let context = context.into();
        let mut messages = vec![];
        if !context.is_empty() {
            messages.push(Message::context(context));
        }
        Self { messages }
    }

    /// Appends a message.
    ///
    /// Context messages can only be set up by [`Transcript::with_context`]
    /// and [`Transcript::reset`], and are ignored here.
    pub fn push(&mut self, msg: Message) {
        if msg.is_context {
            warn!("refusing to append a second context message");
            return;
        }
        self.messages.push(msg);
    }

    /// Appends every message in order.
    pub fn extend<I: IntoIterator<Item = Message>>(&mut self, msgs: I) {
        for msg in msgs {
            self.push(msg);
        }
    }

    /// Replaces the whole transcript with a fresh context and no history.
    #[inline]
    pub fn reset<S: Into<String>>(&mut self, context: S) {
        *self = Self::with_context(context);
    }

    /// Returns every message, the context message included.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the context message, if there is one.
    #[inline]
    pub fn context(&self) -> Option<&Message> {
        self.messages.first().filter(|msg| msg.is_context)
    }

    /// Returns the messages following the context message.
    #[inline]
    pub fn history(&self) -> &[Message] {
        match self.context() {
            Some(_) => &self.messages[1..],
            None => &self.messages,
        }
    }

    /// Returns the messages shown on screen and persisted.
    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|msg| msg.is_visible())
    }

    /// Translates the transcript to the messages sent to the model.
    pub fn to_model_messages(&self) -> Vec<ModelMessage> {
        self.messages
            .iter()
            .filter_map(Message::to_model_message)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;

    fn call() -> ToolCallRequest {
        ToolCallRequest::new(
            "save_memory",
            json!({ "memoria": "X" }).as_object().cloned().unwrap_or_else(Map::new),
        )
    }

    #[test]
    fn test_empty_context_is_omitted() {
        let transcript = Transcript::with_context("");
        assert!(transcript.messages().is_empty());
        assert!(transcript.context().is_none());
        assert!(transcript.to_model_messages().is_empty());

        // Even a context message that ends up empty never reaches the wire.
        let empty = Transcript {
            messages: vec![Message::context(String::new())],
        };
        assert!(empty.to_model_messages().is_empty());
    }

    #[test]
    fn test_context_stays_first_and_unique() {
        let mut transcript = Transcript::with_context("Background");
        transcript.push(Message::user("Hello"));
        transcript.push(Message::context("Another".to_owned()));
        transcript.push(Message::assistant("Hi!"));

        assert_eq!(transcript.messages().len(), 3);
        assert!(transcript.messages()[0].is_context());
        assert_eq!(transcript.history().len(), 2);
        assert_eq!(
            transcript.messages().iter().filter(|m| m.is_context()).count(),
            1
        );

        transcript.reset("Fresh");
        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.context().map(Message::content), Some("Fresh"));
    }

    #[test]
    fn test_to_model_messages() {
        let mut transcript = Transcript::with_context("Background");
        transcript.push(Message::user("Remember X"));
        transcript.push(Message::tool_call(call()));
        transcript.push(Message::tool_result(ToolCallResult::with_text(
            &call(),
            "saved",
        )));
        transcript.push(Message::assistant("Done"));

        assert_eq!(
            transcript.to_model_messages(),
            vec![
                ModelMessage::User("Background".to_owned()),
                ModelMessage::User("Remember X".to_owned()),
                ModelMessage::ToolCall(call()),
                ModelMessage::Tool(ToolCallResult::with_text(&call(), "saved")),
                ModelMessage::Assistant("Done".to_owned()),
            ]
        );

        let visible: Vec<_> = transcript.visible().map(Message::content).collect();
        assert_eq!(visible, vec!["Remember X", "Done"]);
    }
}
