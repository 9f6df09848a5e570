//! The tools the assistant offers to the model.

mod save_memory;

pub use save_memory::{SaveMemoryParameters, SaveMemoryTool};
