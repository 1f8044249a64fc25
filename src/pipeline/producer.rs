//! Producer: per-task lifecycle driver
//!
//! Opens each cycle the fetcher announces: probes the container, picks the
//! decoder, waits for a working backlog, resolves the stream format, keeps
//! the consumer fed, and retires the task once the consumer has drained it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::audio::TARGET_SAMPLE_RATE;
use crate::decode::{make_decoder, probe_container, ContainerKind};
use crate::error::{ReadError, ReadErrorKind};
use crate::pipeline::{PipelineShared, RunningTask, TaskPhase};

/// Probe window at the head of the stream
const PROBE_BYTES: usize = 4096;

/// Backlog required before format resolution starts; enough to avoid
/// false-start errors on high-bitrate sources.
const BACKLOG_BYTES: u64 = 480 * 1024;

/// Format resolution attempts before waiting out the download
const MAX_FORMAT_TRIES: u32 = 3;

/// Poll step while waiting on the byte source to fill
const FILL_POLL: Duration = Duration::from_millis(20);

/// Re-arm interval for the feed signal on long-running stream downloads
const FEED_REARM: Duration = Duration::from_secs(2);

pub(crate) async fn run_producer(shared: Arc<PipelineShared>) {
    let mut last_cycle: Option<Arc<RunningTask>> = None;

    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        // Wait for a cycle we have not driven yet.
        let task = match shared.current_task() {
            Some(task)
                if last_cycle
                    .as_ref()
                    .map_or(true, |previous| !Arc::ptr_eq(previous, &task)) =>
            {
                task
            }
            _ => {
                shared.new_download.reset();
                tokio::select! {
                    () = shared.stop.cancelled() => break,
                    () = shared.new_download.wait() => {}
                }
                continue;
            }
        };
        last_cycle = Some(Arc::clone(&task));

        run_cycle(&shared, &task).await;
    }
    info!(stream = %shared.stream_id, "producer exited");
}

async fn run_cycle(shared: &Arc<PipelineShared>, task: &Arc<RunningTask>) {
    // A skip against the previous cycle may have left the drain latch set.
    shared.read_done.reset();

    // ===== Probing =====
    let kind = match probe(shared, task).await {
        ProbeEnd::Kind(kind) => kind,
        // The cycle is winding down (manual skip, failed download, or
        // stop); retire it without inventing a format error.
        ProbeEnd::WindingDown => return retire_with_error(shared, task, None).await,
        ProbeEnd::Unrecognised => {
            return retire_with_error(
                shared,
                task,
                Some(ReadError::new(
                    ReadErrorKind::InvalidFormat,
                    "container not recognised",
                )),
            )
            .await;
        }
    };
    debug!(stream = %shared.stream_id, task = %task.item.name, ?kind, "container probed");

    // MP4-family metadata sits at the tail, so the whole byte range must be
    // present before setup; a streaming source can never provide that.
    if kind.needs_complete_source() {
        if task.item.stream_mode {
            return retire_with_error(
                shared,
                task,
                Some(ReadError::new(
                    ReadErrorKind::InvalidFormat,
                    "mp4-family container requires file mode",
                )),
            )
            .await;
        }
        tokio::select! {
            () = shared.stop.cancelled() => return,
            () = task.download_finished.wait() => {}
        }
        task.source.lock().expect("byte source lock poisoned").set_eof();
    }

    {
        let mut slot = shared.decoder.lock().expect("decoder lock poisoned");
        *slot = Some(make_decoder(kind));
    }

    // ===== WaitingBacklog =====
    if !wait_for_backlog(shared, task).await {
        if shared.stop.is_cancelled() {
            return;
        }
        return retire_with_error(shared, task, None).await;
    }

    // ===== ResolvingFormat =====
    if !resolve_format(shared, task).await {
        if shared.stop.is_cancelled() {
            return;
        }
        if task.is_winding_down() {
            return retire_with_error(shared, task, None).await;
        }
        return retire_with_error(
            shared,
            task,
            Some(ReadError::new(
                ReadErrorKind::CannotFindInfo,
                "decoder produced no stream parameters",
            )),
        )
        .await;
    }
    shared.publish_stream_event();

    // ===== Feeding =====
    shared.feed_decoder.set();
    if task.item.stream_mode {
        // A parked consumer would otherwise starve if a need-more landed
        // between chunks; re-arm periodically while the download runs.
        loop {
            tokio::select! {
                () = shared.stop.cancelled() => return,
                () = task.download_finished.wait() => break,
                () = tokio::time::sleep(FEED_REARM) => shared.feed_decoder.set(),
            }
        }
    } else {
        tokio::select! {
            () = shared.stop.cancelled() => return,
            () = task.download_finished.wait() => {}
        }
    }

    // ===== AwaitReadComplete =====
    task.source.lock().expect("byte source lock poisoned").set_eof();
    {
        let decoder = shared.decoder.lock().expect("decoder lock poisoned");
        if let Some(decoder) = decoder.as_ref() {
            shared.props.set_total_samples(decoder.total_samples());
        }
    }
    shared.publish_stream_event();
    // The source may have drained while we waited; wake the consumer so it
    // observes eof.
    shared.feed_decoder.set();

    debug!(stream = %shared.stream_id, task = %task.item.name, "awaiting drain");
    tokio::select! {
        () = shared.stop.cancelled() => return,
        () = shared.read_done.wait() => {}
    }
    shared.read_done.reset();

    // ===== Retired =====
    retire_with_error(shared, task, None).await;
}

/// Finalise the cycle: clear decoder and props, complete the read-finished
/// token, and record the error if one is given.
async fn retire_with_error(
    shared: &Arc<PipelineShared>,
    task: &Arc<RunningTask>,
    error: Option<ReadError>,
) {
    if let Some(error) = error {
        error!(stream = %shared.stream_id, task = %task.item.name, "cycle error: {error}");
        task.record_read_error(error);
        task.mark_skip();
    }

    // Read-finished never fires before the download has settled; cancelled
    // transfers still reach their terminal callback, so this wait is
    // bounded.
    tokio::select! {
        () = shared.stop.cancelled() => {}
        () = task.download_finished.wait() => {}
    }

    shared.feed_decoder.reset();
    {
        let mut slot = shared.decoder.lock().expect("decoder lock poisoned");
        if let Some(decoder) = slot.as_mut() {
            decoder.reset();
        }
        *slot = None;
    }
    shared.props.reset_task();
    task.set_phase(TaskPhase::DrainFinished);
    task.read_finished.complete();
    shared.publish_stream_event();
    debug!(stream = %shared.stream_id, task = %task.item.name, "cycle retired");
}

enum ProbeEnd {
    Kind(ContainerKind),
    WindingDown,
    Unrecognised,
}

/// Read the head of the stream and classify the container
async fn probe(shared: &Arc<PipelineShared>, task: &Arc<RunningTask>) -> ProbeEnd {
    loop {
        if shared.stop.is_cancelled() || task.is_winding_down() {
            return ProbeEnd::WindingDown;
        }
        let available = task
            .source
            .lock()
            .expect("byte source lock poisoned")
            .len();
        let settled = task.download_finished.is_complete();
        if available >= PROBE_BYTES as u64 || settled {
            let mut head = Vec::with_capacity(PROBE_BYTES);
            task.source
                .lock()
                .expect("byte source lock poisoned")
                .read_front(&mut head, PROBE_BYTES);
            match probe_container(&head) {
                Some(kind) => return ProbeEnd::Kind(kind),
                None if settled => return ProbeEnd::Unrecognised,
                // Too short to say; keep filling.
                None => {}
            }
        }
        tokio::time::sleep(FILL_POLL).await;
    }
}

/// Wait until the source holds a working backlog or the download settles.
/// Returns `false` when the cycle is winding down instead.
async fn wait_for_backlog(shared: &Arc<PipelineShared>, task: &Arc<RunningTask>) -> bool {
    loop {
        if shared.stop.is_cancelled() || task.is_winding_down() {
            return false;
        }
        let available = task
            .source
            .lock()
            .expect("byte source lock poisoned")
            .len();
        if available >= BACKLOG_BYTES || task.download_finished.is_complete() {
            return true;
        }
        tokio::time::sleep(FILL_POLL).await;
    }
}

/// Drive decoder setup until the format is known. Publishes the format on
/// success.
async fn resolve_format(shared: &Arc<PipelineShared>, task: &Arc<RunningTask>) -> bool {
    let mut tries = 0;
    loop {
        if shared.stop.is_cancelled() || task.is_winding_down() {
            return false;
        }
        let format = {
            let mut slot = shared.decoder.lock().expect("decoder lock poisoned");
            let Some(decoder) = slot.as_mut() else {
                return false;
            };
            if let Err(e) = decoder.setup(Arc::clone(&task.source)) {
                debug!(task = %task.item.name, "setup attempt failed: {e}");
            }
            decoder.format()
        };

        if let Some(format) = format {
            info!(
                stream = %shared.stream_id,
                task = %task.item.name,
                rate = format.sample_rate,
                channels = format.channels,
                resample = format.sample_rate != TARGET_SAMPLE_RATE,
                "format resolved"
            );
            shared.props.set_format(format);
            return true;
        }

        tries += 1;
        if tries > MAX_FORMAT_TRIES {
            if task.download_finished.is_complete() {
                return false;
            }
            // Everything that will ever arrive may not be here yet; give
            // the download its chance before giving up.
            tokio::select! {
                () = shared.stop.cancelled() => return false,
                () = task.download_finished.wait() => {}
            }
            tries = 0;
        }
        tokio::time::sleep(FILL_POLL).await;
    }
}
