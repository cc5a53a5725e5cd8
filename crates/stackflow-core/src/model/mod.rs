//! Data model
//!
//! Resource nodes, stacks, projects and secret handles.

mod project;
mod resource;
mod secret;
mod stack;

// Re-exports
pub use project::*;
pub use resource::*;
pub use secret::*;
pub use stack::*;
