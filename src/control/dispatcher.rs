//! Request dispatcher and instance registry

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StreamError;
use crate::http::HttpDriver;
use crate::pipeline::{EngineEvent, StreamInstance};
use crate::types::TaskItem;

use super::message::{
    GetStreamResponse, PlayListResponse, Request, RequestPayload, Response, ResponseCode,
    ResponsePayload, UpdateAction, REQUEST_ID_LEN,
};
use super::EVENT_ROUTING_ID;
use super::PushedEvent;

/// Routes control requests to instances and publishes state events
pub struct Dispatcher {
    instances: Mutex<HashMap<String, Arc<StreamInstance>>>,
    driver: Arc<HttpDriver>,
    config: Config,
    events: broadcast::Sender<EngineEvent>,
    halt_tx: mpsc::UnboundedSender<String>,
    halt_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl Dispatcher {
    /// Create a dispatcher over the process-wide HTTP driver
    #[must_use]
    pub fn new(driver: Arc<HttpDriver>, config: Config) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (halt_tx, halt_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            instances: Mutex::new(HashMap::new()),
            driver,
            config,
            events,
            halt_tx,
            halt_rx: Mutex::new(Some(halt_rx)),
        })
    }

    /// Subscribe to engine events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Run the registry reaper: instances that halt (stop request or error
    /// threshold) are evicted here. Runs until the dispatcher drops; invoke
    /// once from the serving context.
    pub async fn run_reaper(self: Arc<Self>) {
        let Some(mut halt_rx) = self.halt_rx.lock().expect("reaper slot poisoned").take() else {
            warn!("reaper already running");
            return;
        };
        while let Some(stream_id) = halt_rx.recv().await {
            let removed = self
                .instances
                .lock()
                .expect("instance registry poisoned")
                .remove(&stream_id);
            if removed.is_some() {
                info!(stream = %stream_id, "instance evicted from registry");
            }
        }
    }

    /// Number of live instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().expect("instance registry poisoned").len()
    }

    /// Stop every instance (process shutdown)
    pub fn stop_all(&self) {
        let instances: Vec<Arc<StreamInstance>> = self
            .instances
            .lock()
            .expect("instance registry poisoned")
            .values()
            .cloned()
            .collect();
        for instance in instances {
            instance.stop();
        }
    }

    fn find(&self, stream_id: &str) -> Option<Arc<StreamInstance>> {
        self.instances
            .lock()
            .expect("instance registry poisoned")
            .get(stream_id)
            .cloned()
    }

    /// Handle one request and build its response envelope
    pub async fn handle(&self, request: Request) -> Response {
        let stream_id = request.stream_request.info.stream_id.clone();
        let id = match request.request_id {
            Some(id) if id.len() == REQUEST_ID_LEN => id,
            _ => generate_id(),
        };
        let mut response = Response {
            code: ResponseCode::Success,
            message: String::new(),
            id,
            stream_id: stream_id.clone(),
            timestamp_ms: now_ms(),
            payload: None,
        };

        let result = self.route(&stream_id, request.stream_request.payload, &mut response).await;
        if let Err(error) = result {
            response.code = match error {
                StreamError::NotFound { .. } => ResponseCode::NotFound,
                _ => ResponseCode::Error,
            };
            response.message = error.to_string();
            response.payload = None;
        }
        response.timestamp_ms = now_ms();
        response
    }

    async fn route(
        &self,
        stream_id: &str,
        payload: RequestPayload,
        response: &mut Response,
    ) -> Result<(), StreamError> {
        match payload {
            RequestPayload::StartStream(start) => {
                if self.find(stream_id).is_some() {
                    return Err(StreamError::Rejected {
                        message: format!("stream {stream_id} already exists"),
                    });
                }
                let tasks: Vec<TaskItem> =
                    start.order_list.into_iter().map(TaskItem::from).collect();
                let instance = StreamInstance::start(
                    stream_id.to_string(),
                    start.stream_info,
                    tasks,
                    Arc::clone(&self.driver),
                    &self.config,
                    self.events.clone(),
                    self.halt_tx.clone(),
                )
                .await?;
                self.instances
                    .lock()
                    .expect("instance registry poisoned")
                    .insert(stream_id.to_string(), instance);
                info!(stream = %stream_id, "stream started");
                Ok(())
            }
            RequestPayload::RemoveStream => {
                // Stop is idempotent and asynchronous; eviction happens in
                // the reaper once the instance winds down.
                let instance = self.lookup(stream_id)?;
                instance.stop();
                Ok(())
            }
            RequestPayload::UpdateStream(action) => {
                let instance = self.lookup(stream_id)?;
                match action {
                    UpdateAction::Seek { second } => instance.seek(second)?,
                    UpdateAction::Skip { next, offset } => {
                        instance.skip(next.as_deref(), offset)?;
                    }
                    UpdateAction::SwitchPlayState { play_state } => {
                        instance.set_play_state(play_state);
                    }
                    UpdateAction::SwitchPlayMode { play_mode } => {
                        instance.set_play_mode(play_mode);
                    }
                    UpdateAction::SetVolume { volume } => instance.set_volume(volume),
                }
                Ok(())
            }
            RequestPayload::GetStream => {
                let instance = self.lookup(stream_id)?;
                let status = instance.status();
                if status.current_play.is_none() {
                    // A live stream with an empty queue is not an error.
                    response.message = "stream exists but has no running task".to_string();
                }
                response.payload = Some(ResponsePayload::GetStreamResponse(GetStreamResponse {
                    stream_id: stream_id.to_string(),
                    current_play: status.current_play.map(Into::into),
                    time_played: status.time_played_ms,
                    time_total: status.time_total_ms,
                    play_state: status.play_state,
                    volume: status.volume,
                    play_mode: status.play_mode,
                }));
                Ok(())
            }
            RequestPayload::GetPlayList => {
                let instance = self.lookup(stream_id)?;
                response.payload = Some(ResponsePayload::PlayListResponse(PlayListResponse {
                    stream_id: stream_id.to_string(),
                    order_list: instance.playlist().order(),
                }));
                Ok(())
            }
            RequestPayload::UpdatePlayList(update) => {
                let instance = self.lookup(stream_id)?;
                let tasks: Vec<TaskItem> =
                    update.order_list.iter().cloned().map(TaskItem::from).collect();
                let order: Vec<String> =
                    update.order_list.into_iter().map(|item| item.task_id).collect();
                instance.update_playlist(tasks, order)?;
                response.payload = Some(ResponsePayload::PlayListResponse(PlayListResponse {
                    stream_id: stream_id.to_string(),
                    order_list: instance.playlist().order(),
                }));
                Ok(())
            }
        }
    }

    fn lookup(&self, stream_id: &str) -> Result<Arc<StreamInstance>, StreamError> {
        self.find(stream_id).ok_or_else(|| StreamError::NotFound {
            stream_id: stream_id.to_string(),
        })
    }

    /// Build the pushed envelope for an engine event
    pub fn event_message(&self, event: &EngineEvent) -> PushedEvent {
        let response = match event {
            EngineEvent::Stream { stream_id } => {
                let mut response = empty_response(stream_id);
                if let Some(instance) = self.find(stream_id) {
                    let status = instance.status();
                    response.payload =
                        Some(ResponsePayload::GetStreamResponse(GetStreamResponse {
                            stream_id: stream_id.clone(),
                            current_play: status.current_play.map(Into::into),
                            time_played: status.time_played_ms,
                            time_total: status.time_total_ms,
                            play_state: status.play_state,
                            volume: status.volume,
                            play_mode: status.play_mode,
                        }));
                }
                response
            }
            EngineEvent::Playlist { stream_id } => {
                let mut response = empty_response(stream_id);
                if let Some(instance) = self.find(stream_id) {
                    response.payload = Some(ResponsePayload::PlayListResponse(PlayListResponse {
                        stream_id: stream_id.clone(),
                        order_list: instance.playlist().order(),
                    }));
                }
                response
            }
            EngineEvent::Removed { stream_id } => {
                let mut response = empty_response(stream_id);
                response.message = "stream removed".to_string();
                response
            }
        };
        PushedEvent {
            routing: EVENT_ROUTING_ID.to_string(),
            response,
        }
    }
}

fn empty_response(stream_id: &str) -> Response {
    Response {
        code: ResponseCode::Success,
        message: String::new(),
        id: generate_id(),
        stream_id: stream_id.to_string(),
        timestamp_ms: now_ms(),
        payload: None,
    }
}

fn generate_id() -> Vec<u8> {
    let mut id = vec![0u8; REQUEST_ID_LEN];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
