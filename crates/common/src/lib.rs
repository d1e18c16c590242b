//! Shared types for the order saga workspace.

pub mod text;
pub mod types;

pub use types::{OrderId, Version};
