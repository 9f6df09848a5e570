//! The protocol spoken between the chat assistant and generative models.
//!
//! This crate keeps the assistant independent of any particular vendor:
//! the orchestrator builds [`ModelRequest`]s out of the transcript and
//! consumes [`ModelResponseEvent`]s, while provider crates translate both
//! to and from their own wire formats.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod config;
mod error;
mod provider;
mod request;
mod response;

pub use config::*;
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
