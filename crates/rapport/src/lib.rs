//! A relationship assistant that remembers the people in your life.
//!
//! The crate includes a CLI tool for chatting in the terminal. It can also
//! be used as a library: build a [`Session`] over a [`store::DocumentStore`]
//! and a model provider, then send messages to it.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod library;
mod session;
pub mod store;
pub mod tools;

pub use library::DirectoryLibrary;
pub use session::{
    DEFAULT_KNOWLEDGE_DIR, DEFAULT_USER_ID, Session, SessionBuilder,
};

/// Re-exports of [`rapport_core`] crate.
pub mod core {
    pub use rapport_core::*;
}
