//! Process-wide HTTP driver
//!
//! One dedicated OS thread hosts a current-thread runtime and a shared HTTP
//! client, and services every fetcher's transfer. Keeping transfers off the
//! pipeline workers means a slow remote can never stall a send deadline.
//!
//! Contract: `add` registers a transfer and returns a handle; the completion
//! callback fires exactly once with a code and message — `Cancelled` after
//! `cancel(handle)`, `Aborted` for transfers still pending at `stop()`.
//! Callbacks are invoked from transfer tasks, never under the registry lock.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StreamError;

/// Identifies one registered transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle(u64);

/// Terminal code of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCode {
    /// 2xx response, body fully delivered
    Ok,
    /// Non-2xx response status
    HttpStatus(u16),
    /// Connection or body read failure
    Network,
    /// Receive rate stayed under the low-speed guard for its full window
    LowSpeed,
    /// Cancelled via `cancel`
    Cancelled,
    /// Aborted by `stop`
    Aborted,
}

impl TransferCode {
    /// Whether the transfer delivered its body completely
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Terminal report handed to the completion callback
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// How the transfer ended
    pub code: TransferCode,
    /// Human-readable detail
    pub message: String,
    /// `Content-Length` when the server sent one
    pub content_length: Option<u64>,
}

/// Abort the transfer when fewer bytes than this arrive over the window
#[derive(Debug, Clone, Copy)]
pub struct LowSpeedGuard {
    /// Minimum acceptable rate in bits per second
    pub min_bits_per_sec: u64,
    /// Observation window
    pub window: Duration,
}

/// Flow-control decision returned by a write sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFlow {
    /// Keep the body coming
    Continue,
    /// Park reception until the resume notifier fires
    Pause,
}

/// Receives body bytes in arrival order
pub type WriteSink = Box<dyn FnMut(&[u8]) -> SinkFlow + Send>;

/// Invoked exactly once when the transfer reaches a terminal state
pub type CompletionCallback = Box<dyn FnOnce(TransferOutcome) + Send>;

/// One transfer submission
pub struct TransferRequest {
    /// Absolute URL to GET
    pub url: String,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Cap reception at this many bits per second
    pub rate_cap: Option<u64>,
    /// Abort slow transfers
    pub low_speed: Option<LowSpeedGuard>,
    /// Woken to resume a paused reception
    pub resume: Arc<Notify>,
    /// Body byte sink
    pub sink: WriteSink,
    /// Terminal callback
    pub on_complete: CompletionCallback,
}

struct TransferJob {
    id: u64,
    request: TransferRequest,
    token: CancellationToken,
}

/// Process-wide HTTP transfer driver
pub struct HttpDriver {
    /// Dropped on stop so the worker loop drains and exits
    tx: Mutex<Option<mpsc::UnboundedSender<TransferJob>>>,
    registry: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    next_id: AtomicU64,
    stopping: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HttpDriver {
    /// Start the driver thread.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker thread or its runtime cannot start.
    pub fn start(max_connections: usize) -> Result<Self, StreamError> {
        let (tx, rx) = mpsc::unbounded_channel::<TransferJob>();
        let registry: Arc<Mutex<HashMap<u64, CancellationToken>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        let worker_registry = Arc::clone(&registry);
        let worker_stopping = Arc::clone(&stopping);
        let worker = thread::Builder::new()
            .name("http-driver".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("http driver runtime failed to start: {e}");
                        return;
                    }
                };
                runtime.block_on(drive(rx, worker_registry, worker_stopping, max_connections));
            })
            .map_err(|e| StreamError::HttpDriver {
                message: format!("worker thread: {e}"),
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            registry,
            next_id: AtomicU64::new(1),
            stopping,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Register a transfer. The completion callback fires exactly once.
    pub fn add(&self, request: TransferRequest) -> TransferHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut registry = self.registry.lock().expect("driver registry poisoned");
            registry.insert(id, token.clone());
        }
        let job = TransferJob { id, request, token };

        let sender = self.tx.lock().expect("driver sender poisoned").clone();
        let rejected = match sender {
            Some(sender) => sender.send(job).err().map(|send_err| send_err.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            // Driver already stopped; fail the transfer from the caller's
            // context, outside the registry lock.
            self.registry
                .lock()
                .expect("driver registry poisoned")
                .remove(&job.id);
            (job.request.on_complete)(TransferOutcome {
                code: TransferCode::Aborted,
                message: "http driver stopped".to_string(),
                content_length: None,
            });
        }
        TransferHandle(id)
    }

    /// Cancel a transfer. Its callback fires once with `Cancelled`; unknown
    /// or already-finished handles are ignored.
    pub fn cancel(&self, handle: TransferHandle) {
        let token = {
            let registry = self.registry.lock().expect("driver registry poisoned");
            registry.get(&handle.0).cloned()
        };
        if let Some(token) = token {
            debug!(transfer = handle.0, "cancelling transfer");
            token.cancel();
        }
    }

    /// Abort every pending transfer and join the worker thread.
    /// Idempotent.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stopping http driver");
        // Close the submission channel so the worker loop can drain out.
        drop(self.tx.lock().expect("driver sender poisoned").take());
        let tokens: Vec<CancellationToken> = {
            let registry = self.registry.lock().expect("driver registry poisoned");
            registry.values().cloned().collect()
        };
        for token in tokens {
            token.cancel();
        }
        if let Some(worker) = self
            .worker
            .lock()
            .expect("driver worker slot poisoned")
            .take()
        {
            if worker.join().is_err() {
                warn!("http driver worker panicked during shutdown");
            }
        }
    }
}

impl Drop for HttpDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop: accept jobs until the submission channel closes and every
/// spawned transfer has settled.
async fn drive(
    mut rx: mpsc::UnboundedReceiver<TransferJob>,
    registry: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    stopping: Arc<AtomicBool>,
    max_connections: usize,
) {
    let client = match reqwest::Client::builder()
        .pool_max_idle_per_host(max_connections)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("http client build failed: {e}");
            return;
        }
    };

    let mut inflight = tokio::task::JoinSet::new();
    loop {
        tokio::select! {
            job = rx.recv() => {
                let Some(job) = job else { break };
                let client = client.clone();
                let registry = Arc::clone(&registry);
                let stopping = Arc::clone(&stopping);
                inflight.spawn(async move {
                    let id = job.id;
                    run_transfer(client, job, &stopping).await;
                    registry.lock().expect("driver registry poisoned").remove(&id);
                });
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
        }
    }
    // Channel closed: drain what is still running (each observes its
    // cancellation token, so this terminates promptly on stop).
    while inflight.join_next().await.is_some() {}
}

async fn run_transfer(client: reqwest::Client, job: TransferJob, stopping: &AtomicBool) {
    let TransferJob { id, request, token } = job;
    let TransferRequest {
        url,
        headers,
        rate_cap,
        low_speed,
        resume,
        mut sink,
        on_complete,
    } = request;

    let cancelled_code = |stopping: &AtomicBool| {
        if stopping.load(Ordering::Acquire) {
            TransferCode::Aborted
        } else {
            TransferCode::Cancelled
        }
    };

    let mut builder = client.get(&url);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }

    let response = tokio::select! {
        () = token.cancelled() => {
            on_complete(TransferOutcome {
                code: cancelled_code(stopping),
                message: "cancelled before response".to_string(),
                content_length: None,
            });
            return;
        }
        response = builder.send() => response,
    };

    let mut response = match response {
        Ok(response) => response,
        Err(e) => {
            on_complete(TransferOutcome {
                code: TransferCode::Network,
                message: e.to_string(),
                content_length: None,
            });
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        on_complete(TransferOutcome {
            code: TransferCode::HttpStatus(status.as_u16()),
            message: format!("server returned {status}"),
            content_length: None,
        });
        return;
    }
    let content_length = response.content_length();

    let started = Instant::now();
    let mut received: u64 = 0;
    let mut window_start = Instant::now();
    let mut window_bytes: u64 = 0;

    loop {
        let chunk = tokio::select! {
            () = token.cancelled() => {
                on_complete(TransferOutcome {
                    code: cancelled_code(stopping),
                    message: "cancelled mid-body".to_string(),
                    content_length,
                });
                return;
            }
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                received += bytes.len() as u64;
                window_bytes += bytes.len() as u64;

                if sink(&bytes) == SinkFlow::Pause {
                    debug!(transfer = id, "reception paused by sink");
                    tokio::select! {
                        () = token.cancelled() => {
                            on_complete(TransferOutcome {
                                code: cancelled_code(stopping),
                                message: "cancelled while paused".to_string(),
                                content_length,
                            });
                            return;
                        }
                        () = resume.notified() => {}
                    }
                }

                // Pace reception so the sender stays the pacing authority.
                if let Some(bits_per_sec) = rate_cap {
                    let due = started
                        + Duration::from_secs_f64(received as f64 * 8.0 / bits_per_sec as f64);
                    if due > Instant::now() {
                        tokio::select! {
                            () = token.cancelled() => {
                                on_complete(TransferOutcome {
                                    code: cancelled_code(stopping),
                                    message: "cancelled during pacing".to_string(),
                                    content_length,
                                });
                                return;
                            }
                            () = tokio::time::sleep_until(due) => {}
                        }
                    }
                }

                if let Some(guard) = low_speed {
                    let elapsed = window_start.elapsed();
                    if elapsed >= guard.window {
                        let bits = window_bytes * 8;
                        let floor =
                            guard.min_bits_per_sec * guard.window.as_secs().max(1);
                        if bits < floor {
                            on_complete(TransferOutcome {
                                code: TransferCode::LowSpeed,
                                message: format!(
                                    "{bits} bits over {:?} is under the low-speed floor",
                                    guard.window
                                ),
                                content_length,
                            });
                            return;
                        }
                        window_start = Instant::now();
                        window_bytes = 0;
                    }
                }
            }
            Ok(None) => {
                on_complete(TransferOutcome {
                    code: TransferCode::Ok,
                    message: String::new(),
                    content_length: content_length.or(Some(received)),
                });
                return;
            }
            Err(e) => {
                on_complete(TransferOutcome {
                    code: TransferCode::Network,
                    message: e.to_string(),
                    content_length,
                });
                return;
            }
        }
    }
}
