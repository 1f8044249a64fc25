//! Control sockets
//!
//! Two TCP listeners: a request/response endpoint where the server answers
//! each frame, and a publish endpoint where every subscriber receives state
//! events. Frames are length-delimited; payloads are JSON envelopes.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;

use super::message::{Request, Response, ResponseCode};
use super::Dispatcher;

/// The control plane's socket front end
pub struct ControlServer {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl ControlServer {
    /// Create a server over the dispatcher
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown,
        }
    }

    /// Bind both listeners and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when either address cannot be bound.
    pub async fn run(self, request_addr: &str, publish_addr: &str) -> Result<(), StreamError> {
        let request_listener = TcpListener::bind(request_addr).await?;
        let publish_listener = TcpListener::bind(publish_addr).await?;
        info!(request = %request_addr, publish = %publish_addr, "control plane listening");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = request_listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "request client connected");
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(serve_requests(socket, dispatcher, shutdown));
                        }
                        Err(e) => warn!("request accept failed: {e}"),
                    }
                }
                accepted = publish_listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "event subscriber connected");
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(serve_events(socket, dispatcher, shutdown));
                        }
                        Err(e) => warn!("publish accept failed: {e}"),
                    }
                }
            }
        }
        Ok(())
    }
}

async fn serve_requests(
    socket: TcpStream,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return,
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else { return };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("request framing error: {e}");
                return;
            }
        };

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => dispatcher.handle(request).await,
            Err(e) => malformed_response(&e.to_string()),
        };
        let encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("response encoding failed: {e}");
                return;
            }
        };
        if framed.send(encoded.into()).await.is_err() {
            return;
        }
    }
}

async fn serve_events(
    socket: TcpStream,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    let mut events = dispatcher.subscribe();
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            // A lagged subscriber skips to the live edge.
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        };
        let pushed = dispatcher.event_message(&event);
        let encoded = match serde_json::to_vec(&pushed) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("event encoding failed: {e}");
                continue;
            }
        };
        if framed.send(encoded.into()).await.is_err() {
            return;
        }
    }
}

fn malformed_response(detail: &str) -> Response {
    Response {
        code: ResponseCode::Error,
        message: format!("malformed request: {detail}"),
        id: vec![0u8; super::message::REQUEST_ID_LEN],
        stream_id: String::new(),
        timestamp_ms: 0,
        payload: None,
    }
}
