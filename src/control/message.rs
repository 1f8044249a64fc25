//! Control envelope types
//!
//! The request envelope carries an optional client-chosen 16-byte id and
//! exactly one operation payload. Responses echo the id (or a
//! server-generated one), the stream id, and the server time in
//! milliseconds.

use serde::{Deserialize, Serialize};

use crate::types::{PlayMode, PlayState, StreamDestination, TaskItem, TaskKind};

/// Length of request/response identifiers in bytes
pub const REQUEST_ID_LEN: usize = 16;

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Client-chosen identifier; the server generates one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Vec<u8>>,
    /// The addressed stream and operation
    pub stream_request: StreamRequest,
}

/// The addressed stream plus one operation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Addressing info
    pub info: StreamRequestInfo,
    /// The operation
    pub payload: RequestPayload,
}

/// Stream addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequestInfo {
    /// Target stream id
    pub stream_id: String,
}

/// Exactly one operation per request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPayload {
    /// Create an instance and start playback
    StartStream(StartStreamPayload),
    /// Stop and remove an instance
    RemoveStream,
    /// Mutate a live stream
    UpdateStream(UpdateAction),
    /// Query stream status
    GetStream,
    /// Query the play-list order
    GetPlayList,
    /// Atomic play-list replace
    UpdatePlayList(UpdatePlayListPayload),
}

/// `start_stream` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartStreamPayload {
    /// RTP destination description
    pub stream_info: StreamDestination,
    /// Initial play list in order
    pub order_list: Vec<OrderItem>,
}

/// One play-list entry on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    /// Unique task name
    pub task_id: String,
    /// Media or envelope URL
    pub url: String,
    /// File or cached
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Stream-mode flag
    #[serde(default)]
    pub use_stream: bool,
}

impl From<OrderItem> for TaskItem {
    fn from(item: OrderItem) -> Self {
        Self {
            name: item.task_id,
            url: item.url,
            kind: item.kind,
            stream_mode: item.use_stream,
        }
    }
}

impl From<TaskItem> for OrderItem {
    fn from(task: TaskItem) -> Self {
        Self {
            task_id: task.name,
            url: task.url,
            kind: task.kind,
            use_stream: task.stream_mode,
        }
    }
}

/// `update_stream` action, exactly one of
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// Seek to an absolute position
    Seek {
        /// Position in seconds
        second: f64,
    },
    /// Absolute and/or relative skip
    Skip {
        /// Task name to jump to
        #[serde(default)]
        next: Option<String>,
        /// Relative offset applied after `next`
        #[serde(default)]
        offset: i32,
    },
    /// Pause or resume
    SwitchPlayState {
        /// The new state
        play_state: PlayState,
    },
    /// Change the play-list mode
    SwitchPlayMode {
        /// The new mode
        play_mode: PlayMode,
    },
    /// Change the volume
    SetVolume {
        /// New volume, rounded to 0.01
        volume: f64,
    },
}

/// `update_play_list` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePlayListPayload {
    /// Replacement play list in order
    pub order_list: Vec<OrderItem>,
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    /// Operation applied
    Success,
    /// Operation failed or was rejected; no side effects on rejection
    Error,
    /// No instance with the given stream id
    NotFound,
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Status
    pub code: ResponseCode,
    /// Detail, empty on plain success
    pub message: String,
    /// Echoed or server-generated 16-byte identifier
    pub id: Vec<u8>,
    /// The addressed stream
    pub stream_id: String,
    /// Server time in milliseconds since the epoch
    pub timestamp_ms: i64,
    /// Operation result, when the operation returns one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResponsePayload>,
}

/// Operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePayload {
    /// `get_stream` result
    GetStreamResponse(GetStreamResponse),
    /// `get_play_list` / `update_play_list` result
    PlayListResponse(PlayListResponse),
}

/// Stream status on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStreamResponse {
    /// The stream
    pub stream_id: String,
    /// The task currently playing, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_play: Option<OrderItem>,
    /// Milliseconds played of the current task
    pub time_played: i64,
    /// Total milliseconds of the current task, 0 while unknown
    pub time_total: i64,
    /// Playback state
    pub play_state: PlayState,
    /// Volume
    pub volume: f64,
    /// Play-list mode
    pub play_mode: PlayMode,
}

/// Play-list order on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayListResponse {
    /// The stream
    pub stream_id: String,
    /// Task names in play order
    pub order_list: Vec<String>,
}

/// Server-initiated message pushed on the publish socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushedEvent {
    /// Fixed routing identity so subscribers can filter server pushes
    pub routing: String,
    /// Event body, shaped like the matching query response
    pub response: Response,
}
