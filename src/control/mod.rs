//! Control plane
//!
//! A request/response surface plus server-pushed state events. Requests are
//! length-delimited frames carrying JSON envelopes; the dispatcher routes
//! them to instance operations and publishes events on state-changing ones.

mod dispatcher;
mod message;
mod server;


pub use dispatcher::Dispatcher;
pub use message::{
    GetStreamResponse, OrderItem, PlayListResponse, PushedEvent, Request, RequestPayload,
    Response, ResponseCode, ResponsePayload, StartStreamPayload, StreamRequest,
    StreamRequestInfo, UpdateAction, UpdatePlayListPayload,
};
pub use server::ControlServer;

/// Routing identity stamped on every server-initiated message
pub const EVENT_ROUTING_ID: &str = "OMNI";
