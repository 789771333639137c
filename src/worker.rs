//! Transfer worker: runs the per-download protocol for a single task.
//!
//! One run walks `Probing -> Connecting -> Downloading` and ends in
//! `Done`, `Paused` or `Failed`. The partial file's on-disk length is
//! the authoritative resume offset; in-memory state is never trusted
//! across runs because the process may have restarted in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::estimator::SpeedEstimator;
use crate::task::{DownloadTask, TaskSnapshot, TaskStatus};

/// Bound on the metadata probe. The main transfer is bounded per read
/// instead; a whole-request timeout would kill long downloads.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on waiting for the main response's headers and on each body
/// read. A server that stalls past this fails the run with a timeout
/// rather than pinning the worker forever.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Rate/ETA recompute and snapshot cadence, decoupled from chunk size so
/// tiny chunks don't flood observers and huge ones don't starve them.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Everything a worker needs besides the task itself.
pub(crate) struct WorkerContext {
    pub client: Client,
    pub events: UnboundedSender<TaskSnapshot>,
    pub limiter: Option<Arc<Semaphore>>,
}

/// Runs one download attempt for `task`. Every failure mode is folded
/// into a terminal status update here; nothing unwinds across the spawn
/// boundary, so one broken worker can never take down another.
pub(crate) async fn run(task: Arc<DownloadTask>, ctx: WorkerContext) {
    let _permit = match &ctx.limiter {
        Some(sem) => match sem.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // Semaphore closed: the supervisor is shutting down.
                task.end_run();
                return;
            }
        },
        None => None,
    };

    if task.stop_requested() {
        // Paused while still waiting for a slot.
        task.set_status(TaskStatus::Paused);
    } else {
        match transfer(&task, &ctx).await {
            Ok(()) => {}
            Err(err) => match err.failure_kind() {
                Some(kind) => {
                    warn!(url = %task.url, error = %err, "download failed");
                    task.set_status(TaskStatus::Failed {
                        kind,
                        detail: err.to_string(),
                    });
                }
                None => task.set_status(TaskStatus::Paused),
            },
        }
    }

    task.set_rates_idle_if_not_done();
    task.end_run();
    let _ = ctx.events.send(task.snapshot());
}

async fn transfer(task: &DownloadTask, ctx: &WorkerContext) -> Result<(), TransferError> {
    task.set_status(TaskStatus::Probing);
    let _ = ctx.events.send(task.snapshot());

    let part_path = task.part_path();
    if let Some(parent) = task.dest_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let existing = match fs::metadata(&part_path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    // Metadata probe. Failure is not fatal: it only downgrades the run
    // to "no range support, size unknown".
    let mut supports_range = false;
    let mut total_size: Option<u64> = None;
    match ctx
        .client
        .head(&task.url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => {
            supports_range = resp
                .headers()
                .get(header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.eq_ignore_ascii_case("bytes"))
                .unwrap_or(false);
            total_size = header_length(&resp);
        }
        Err(err) => {
            debug!(url = %task.url, error = %err, "probe failed, assuming no range support");
        }
    }

    if task.stop_requested() {
        return Err(TransferError::Cancelled);
    }

    task.set_status(TaskStatus::Connecting);
    let _ = ctx.events.send(task.snapshot());

    let mut request = ctx.client.get(&task.url);
    if existing > 0 && supports_range {
        debug!(url = %task.url, offset = existing, "resuming with range request");
        request = request.header(header::RANGE, format!("bytes={existing}-"));
    }
    let response = match tokio::time::timeout(READ_TIMEOUT, request.send()).await {
        Ok(response) => response?,
        Err(_) => return Err(TransferError::Timeout(None)),
    };
    if !response.status().is_success() {
        return Err(TransferError::HttpStatus(response.status()));
    }

    // A 200 answer to a ranged request means the server restarted from
    // byte zero no matter what it advertised; the response status, not
    // the probe, decides whether this run appends.
    let resumed =
        existing > 0 && supports_range && response.status() == StatusCode::PARTIAL_CONTENT;
    let offset = if resumed { existing } else { 0 };

    // The main response's length indicator wins over the probe's: for a
    // confirmed partial fetch it reports the remainder, otherwise the
    // full size. Absent on chunked transfers, where the total stays
    // unknown for the whole run.
    if let Some(reported) = header_length(&response) {
        total_size = Some(if resumed { offset + reported } else { reported });
    }

    let mut file = if resumed {
        OpenOptions::new().append(true).open(&part_path).await?
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .await?
    };

    task.reset_progress(offset, total_size, supports_range);
    task.set_status(TaskStatus::Downloading);
    let _ = ctx.events.send(task.snapshot());

    let mut downloaded = offset;
    let mut estimator = SpeedEstimator::new(Instant::now(), downloaded);
    let mut last_emit = Instant::now();

    let mut stream = response.bytes_stream();
    loop {
        // Race each read against the stop notification so pause takes
        // effect even while the server sends nothing, and bound the
        // read itself so a stalled connection cannot pin the worker.
        let item = tokio::select! {
            _ = task.stop_notified() => {
                if !task.stop_requested() {
                    // Stale permit from an earlier run.
                    continue;
                }
                file.flush().await?;
                return Err(TransferError::Cancelled);
            }
            item = tokio::time::timeout(READ_TIMEOUT, stream.next()) => item,
        };
        let chunk = match item {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => {
                // Bytes already handed to the file stay on disk even
                // when the stream dies mid-body.
                file.flush().await?;
                return Err(err.into());
            }
            Ok(None) => break,
            Err(_) => {
                file.flush().await?;
                return Err(TransferError::Timeout(None));
            }
        };
        // Observe the pause signal before touching the file so the
        // partial file length always equals the reported byte count.
        if task.stop_requested() {
            file.flush().await?;
            return Err(TransferError::Cancelled);
        }
        file.write_all(&chunk).await?;
        downloaded = task.add_bytes(chunk.len() as u64);

        let now = Instant::now();
        if now.duration_since(last_emit) >= PROGRESS_INTERVAL {
            let speed = estimator.sample(now, downloaded);
            let eta = SpeedEstimator::eta(speed, total_size, downloaded);
            task.set_rates(speed, eta);
            let _ = ctx.events.send(task.snapshot());
            last_emit = now;
        }
    }

    file.flush().await?;
    drop(file);

    task.set_rates(0.0, Some(0.0));
    match fs::rename(&part_path, &task.dest_path).await {
        Ok(()) => task.set_status(TaskStatus::Done { part_kept: false }),
        Err(err) => {
            // Keeping the partial file beats losing the data; surfaced
            // through the status text rather than swallowed.
            warn!(
                part = %part_path.display(),
                error = %err,
                "rename to final destination failed, keeping partial file"
            );
            task.set_status(TaskStatus::Done { part_kept: true });
        }
    }
    Ok(())
}

fn header_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
