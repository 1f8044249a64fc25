//! Core types shared across the engine

mod stream;
mod task;

#[cfg(test)]
mod tests;

pub use stream::{PlayState, StreamDestination};
pub use task::{PlayMode, TaskItem, TaskKind};
