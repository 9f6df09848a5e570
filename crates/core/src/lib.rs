//! Core logic including the turn loop, tool execution, the transcript and
//! the background knowledge.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod knowledge;
mod model_client;
pub mod tool;
pub mod transcript;
mod turn;

pub use knowledge::KnowledgeAssembler;
pub use tool::{Registry, Tool, ToolResult};
pub use transcript::{Message, Role, Transcript};
pub use turn::{
    BACKEND_FAILURE_APOLOGY, Notice, Orchestrator, OrchestratorBuilder,
    TurnOutcome, TurnStatus, TurnStream, UNKNOWN_TOOL_APOLOGY,
};
