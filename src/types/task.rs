//! Play-list task types

use serde::{Deserialize, Serialize};

/// How a task's URL is interpreted before fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// The URL addresses the media bytes directly
    File,
    /// The URL returns a JSON envelope that must be resolved to the real
    /// media URL (optionally carrying cookie / referer / user-agent)
    Cached,
}

/// One URL-addressed media item within a stream's play list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Unique name within the owning instance
    pub name: String,
    /// Media or envelope URL
    pub url: String,
    /// How to interpret the URL
    pub kind: TaskKind,
    /// Stream mode: decode while downloading through a chained queue with a
    /// receive-rate cap, instead of buffering the whole file
    pub stream_mode: bool,
}

impl TaskItem {
    /// Create a file-mode task
    #[must_use]
    pub fn file(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind: TaskKind::File,
            stream_mode: false,
        }
    }
}

/// Play-list consumption mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayMode {
    /// Advance by one, saturating at the last element
    #[default]
    Fifo,
    /// Move backwards by one, saturating at the first element
    Lifo,
    /// Wrap around modulo the play-list size
    RoundRobin,
    /// Pick the next index uniformly at random
    Random,
    /// Repeat the current element
    SingleLoop,
}
