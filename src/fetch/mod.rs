//! Task runner: the per-instance fetch loop
//!
//! Pulls the current play-list task, resolves cached URLs, drives the HTTP
//! transfer into the task's byte source, and walks the cycle handshake with
//! the producer. Four consecutive failed cycles halt the instance.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::buffer::{ByteSource, ChainedQueue, FixedBuffer, SharedByteSource};
use crate::http::{
    LowSpeedGuard, SinkFlow, TransferCode, TransferOutcome, TransferRequest,
};
use crate::pipeline::{PipelineShared, RunningTask, TaskPhase};
use crate::types::{PlayMode, TaskItem, TaskKind};

/// Chained-queue staging chunk: bytes accumulate here before being
/// coalesced into the source under its lock.
const STAGING_CHUNK: usize = 32 * 1024;

/// Pause reception when the consumer-visible backlog exceeds this
const PAUSE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Low-speed guard for file-mode transfers
const LOW_SPEED_BITS_PER_SEC: u64 = 320 * 1024;
const LOW_SPEED_WINDOW: Duration = Duration::from_secs(10);

/// Consecutive failed cycles before the instance self-terminates
const MAX_CONSECUTIVE_ERRORS: u32 = 4;

/// JSON envelope returned by cached URLs
#[derive(Debug, Deserialize)]
struct CachedEnvelope {
    url: String,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    cookie: Option<String>,
    #[serde(default)]
    proxy: Option<String>,
}

pub(crate) async fn run_fetcher(shared: Arc<PipelineShared>, default_buffer_size: usize) {
    let mut err_count: u32 = 0;

    while !shared.stop.is_cancelled() {
        if err_count >= MAX_CONSECUTIVE_ERRORS {
            error!(
                stream = %shared.stream_id,
                "{err_count} consecutive failed cycles, halting instance"
            );
            shared.stop.cancel();
            shared.ring.shutdown();
            break;
        }

        let Some(task) = shared.playlist.peek_current() else {
            debug!(stream = %shared.stream_id, "play list empty, waiting");
            shared.playlist.task_update().reset();
            tokio::select! {
                () = shared.stop.cancelled() => break,
                () = shared.playlist.task_update().wait() => {}
            }
            continue;
        };

        match run_cycle(&shared, task, default_buffer_size).await {
            CycleEnd::Clean => err_count = 0,
            CycleEnd::Failed => err_count += 1,
            CycleEnd::Stopped => break,
        }

        // A manual skip already repositioned the play list.
        if !shared.playlist.take_manual_skip() {
            let before = shared.playlist.current_index();
            shared.playlist.auto_next();
            let mode = shared.playlist.mode();
            let saturated = matches!(mode, PlayMode::Fifo | PlayMode::Lifo)
                && shared.playlist.current_index() == before;
            if saturated {
                // End of the list: hold here until the play list changes
                // instead of re-fetching the boundary task.
                debug!(stream = %shared.stream_id, "play list exhausted, parking");
                shared.playlist.task_update().reset();
                tokio::select! {
                    () = shared.stop.cancelled() => break,
                    () = shared.playlist.task_update().wait() => {}
                }
            }
        }
    }
    info!(stream = %shared.stream_id, "fetcher exited");
}

enum CycleEnd {
    Clean,
    Failed,
    Stopped,
}

async fn run_cycle(
    shared: &Arc<PipelineShared>,
    task: TaskItem,
    default_buffer_size: usize,
) -> CycleEnd {
    // Resolve the media URL and per-task headers first; a cached task whose
    // envelope cannot be fetched never opens a cycle.
    let (media_url, headers) = match resolve_media_url(shared, &task).await {
        Ok(resolved) => resolved,
        Err(message) => {
            error!(stream = %shared.stream_id, task = %task.name, "preflight failed: {message}");
            return CycleEnd::Failed;
        }
    };

    let source = if task.stream_mode {
        ByteSource::Chained(ChainedQueue::new())
    } else {
        ByteSource::Fixed(FixedBuffer::new(default_buffer_size))
    };
    let running = RunningTask::new(task.clone(), source);
    shared.set_current(Arc::clone(&running));
    shared.new_download.set();

    // The byte counter includes data held in staging; the completion flush
    // below reconciles the source before the phase advances.
    let staging: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::with_capacity(STAGING_CHUNK)));
    let request = TransferRequest {
        url: media_url,
        headers,
        rate_cap: task.stream_mode.then_some(u64::from(shared.bitrate)),
        low_speed: (!task.stream_mode).then_some(LowSpeedGuard {
            min_bits_per_sec: LOW_SPEED_BITS_PER_SEC,
            window: LOW_SPEED_WINDOW,
        }),
        resume: Arc::clone(&running.resume_recv),
        sink: make_sink(&running, task.stream_mode, Arc::clone(&staging)),
        on_complete: {
            let running = Arc::clone(&running);
            Box::new(move |outcome| {
                flush_staging(&running.source, &mut staging.lock().expect("staging poisoned"));
                match outcome.code {
                    TransferCode::Ok => {
                        running.set_phase(TaskPhase::DownloadAndWriteFinished);
                    }
                    // A deliberate flush is not a transport failure.
                    TransferCode::Cancelled | TransferCode::Aborted => {}
                    code => {
                        warn!(task = %running.item.name, ?code, "download failed: {}", outcome.message);
                        running.mark_skip();
                    }
                }
                running.download_finished.complete();
            })
        },
    };
    running.set_transfer(shared.driver.add(request));

    tokio::select! {
        () = shared.stop.cancelled() => return CycleEnd::Stopped,
        () = running.download_finished.wait() => {}
    }
    let _ = running.take_transfer();

    if running.should_skip() {
        // Make sure the producer runs its cycle to the end.
        shared.do_skip();
    }

    tokio::select! {
        () = shared.stop.cancelled() => return CycleEnd::Stopped,
        () = running.read_finished.wait() => {}
    }

    if let Some(read_error) = running.read_error() {
        warn!(stream = %shared.stream_id, task = %task.name, "cycle failed: {read_error}");
        return CycleEnd::Failed;
    }
    if running.should_skip() {
        return CycleEnd::Failed;
    }
    debug!(stream = %shared.stream_id, task = %task.name, "cycle complete");
    CycleEnd::Clean
}

/// Build the write sink appending into the running task's byte source.
///
/// Stream mode stages up to [`STAGING_CHUNK`] bytes before taking the
/// source lock, and pauses reception once the consumer-visible backlog
/// crosses [`PAUSE_THRESHOLD`]; the consumer resumes it on its next
/// need-more. File mode appends directly.
fn make_sink(
    running: &Arc<RunningTask>,
    stream_mode: bool,
    staging: Arc<Mutex<Vec<u8>>>,
) -> Box<dyn FnMut(&[u8]) -> SinkFlow + Send> {
    let task = Arc::clone(running);
    if stream_mode {
        Box::new(move |bytes| {
            task.add_bytes(bytes.len() as u64);
            let mut staging = staging.lock().expect("staging poisoned");
            staging.extend_from_slice(bytes);
            if staging.len() < STAGING_CHUNK {
                return SinkFlow::Continue;
            }
            let backlog = {
                let mut source = task.source.lock().expect("byte source lock poisoned");
                source.append(&staging);
                source.pending()
            };
            staging.clear();
            if backlog > PAUSE_THRESHOLD {
                SinkFlow::Pause
            } else {
                SinkFlow::Continue
            }
        })
    } else {
        Box::new(move |bytes| {
            task.add_bytes(bytes.len() as u64);
            let accepted = {
                let mut source = task.source.lock().expect("byte source lock poisoned");
                source.append(bytes)
            };
            if !accepted {
                error!(
                    task = %task.item.name,
                    "fixed buffer rejected {} bytes, capacity exhausted",
                    bytes.len()
                );
                task.mark_skip();
            }
            SinkFlow::Continue
        })
    }
}

/// Flush staged bytes that never crossed the coalescing threshold, so the
/// source holds every received byte before eof is latched.
fn flush_staging(source: &SharedByteSource, staging: &mut Vec<u8>) {
    if !staging.is_empty() {
        let mut source = source.lock().expect("byte source lock poisoned");
        source.append(staging);
        staging.clear();
    }
}

/// Resolve the real media URL and per-task headers
async fn resolve_media_url(
    shared: &Arc<PipelineShared>,
    task: &TaskItem,
) -> Result<(String, Vec<(String, String)>), String> {
    if task.kind != TaskKind::Cached {
        return Ok((task.url.clone(), Vec::new()));
    }

    let body: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = oneshot::channel::<TransferOutcome>();
    let sink_body = Arc::clone(&body);
    let request = TransferRequest {
        url: task.url.clone(),
        headers: vec![("InstanceId".to_string(), shared.stream_id.clone())],
        rate_cap: None,
        low_speed: None,
        resume: Arc::new(tokio::sync::Notify::new()),
        sink: Box::new(move |bytes| {
            sink_body.lock().expect("preflight body poisoned").extend_from_slice(bytes);
            SinkFlow::Continue
        }),
        on_complete: Box::new(move |outcome| {
            let _ = done_tx.send(outcome);
        }),
    };
    let handle = shared.driver.add(request);

    let outcome = tokio::select! {
        () = shared.stop.cancelled() => {
            shared.driver.cancel(handle);
            return Err("stopped".to_string());
        }
        outcome = done_rx => outcome.map_err(|_| "driver dropped preflight".to_string())?,
    };
    if !outcome.code.is_ok() {
        return Err(format!("{:?}: {}", outcome.code, outcome.message));
    }

    let body = body.lock().expect("preflight body poisoned");
    let envelope: CachedEnvelope = serde_json::from_slice(&body)
        .map_err(|e| format!("cached envelope is not valid JSON: {e}"))?;

    if let Some(proxy) = &envelope.proxy {
        debug!(task = %task.name, proxy = %proxy, "cached envelope names a proxy, ignoring");
    }
    let mut headers = Vec::new();
    if let Some(user_agent) = envelope.user_agent {
        headers.push(("User-Agent".to_string(), user_agent));
    }
    if let Some(referer) = envelope.referer {
        headers.push(("Referer".to_string(), referer));
    }
    if let Some(cookie) = envelope.cookie {
        headers.push(("Cookie".to_string(), cookie));
    }
    Ok((envelope.url, headers))
}
