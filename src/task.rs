use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use indicatif::HumanBytes;
use serde::Serialize;
use tokio::sync::Notify;

use crate::utils::format_eta;

pub type TaskId = u64;

/// Why a run ended without completing. Presentation layers format these
/// for display; nothing in the engine matches on display strings.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "code")]
pub enum FailureKind {
    Connection,
    Timeout,
    HttpStatus(u16),
    Io,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "state")]
pub enum TaskStatus {
    Queued,
    Probing,
    Connecting,
    Downloading,
    Paused,
    /// Terminal. `part_kept` is set when the final rename failed and the
    /// data was left in the `.part` file instead of being lost.
    Done { part_kept: bool },
    Failed { kind: FailureKind, detail: String },
}

impl TaskStatus {
    /// Everything that is not `Done` or mid-run can be (re)started.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Paused | TaskStatus::Failed { .. }
        )
    }

    /// True once a run has settled. `Paused` and `Failed` stay
    /// resumable; only `Done` is a terminal state.
    pub fn run_ended(&self) -> bool {
        matches!(
            self,
            TaskStatus::Paused | TaskStatus::Done { .. } | TaskStatus::Failed { .. }
        )
    }

    /// Human-readable status line.
    pub fn text(&self) -> String {
        match self {
            TaskStatus::Queued => "Queued".into(),
            TaskStatus::Probing => "Checking file info...".into(),
            TaskStatus::Connecting => "Connecting...".into(),
            TaskStatus::Downloading => "Downloading".into(),
            TaskStatus::Paused => "Paused".into(),
            TaskStatus::Done { part_kept: false } => "Done".into(),
            TaskStatus::Done { part_kept: true } => {
                "Done (rename failed, data kept in .part file)".into()
            }
            TaskStatus::Failed { kind, detail } => match kind {
                FailureKind::Connection => format!("Connection error: {detail}"),
                FailureKind::Timeout => {
                    "Timeout error: server took too long to respond".into()
                }
                FailureKind::HttpStatus(code) => format!("HTTP error: {code}"),
                FailureKind::Io => format!("I/O error: {detail}"),
            },
        }
    }
}

/// Immutable view of one task, safe to hand to a presentation layer.
#[derive(Serialize, Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub filename: String,
    pub url: String,
    pub status: TaskStatus,
    pub status_text: String,
    /// `None` while the total size is unknown (chunked transfer).
    pub percent: Option<u8>,
    pub downloaded_bytes: u64,
    pub total_size: Option<u64>,
    pub supports_range: bool,
    pub speed_bps: f64,
    pub speed_human: String,
    /// `None` means unknown, distinct from zero.
    pub eta_seconds: Option<f64>,
    pub eta_human: String,
}

/// Mutable per-run state, guarded by the task's own lock so concurrent
/// readers never serialize across tasks.
#[derive(Debug)]
struct Progress {
    status: TaskStatus,
    total_size: Option<u64>,
    downloaded: u64,
    supports_range: bool,
    speed_bps: f64,
    eta_seconds: Option<f64>,
}

/// One user-requested transfer. The worker holding the active run is the
/// only writer of the progress state; the supervisor and presentation
/// layer read it through [`DownloadTask::snapshot`].
#[derive(Debug)]
pub struct DownloadTask {
    pub id: TaskId,
    pub url: String,
    pub dest_path: PathBuf,
    pub filename: String,
    progress: Mutex<Progress>,
    stop_requested: AtomicBool,
    stop_notify: Notify,
    active: AtomicBool,
}

impl DownloadTask {
    pub(crate) fn new(id: TaskId, url: String, dest_path: PathBuf) -> Self {
        let filename = dest_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());
        Self {
            id,
            url,
            dest_path,
            filename,
            progress: Mutex::new(Progress {
                status: TaskStatus::Queued,
                total_size: None,
                downloaded: 0,
                supports_range: false,
                speed_bps: 0.0,
                eta_seconds: None,
            }),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            active: AtomicBool::new(false),
        }
    }

    /// In-progress artifact path: `<destination>.part`.
    pub fn part_path(&self) -> PathBuf {
        let mut os = self.dest_path.as_os_str().to_os_string();
        os.push(".part");
        PathBuf::from(os)
    }

    /// Claims the single run slot for this task. Returns false if a run
    /// is already active, making `start` idempotent.
    pub(crate) fn begin_run(&self) -> bool {
        let claimed = self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if claimed {
            // A stale pause signal must not kill the new run.
            self.stop_requested.store(false, Ordering::SeqCst);
        }
        claimed
    }

    pub(crate) fn end_run(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Requests cooperative cancellation of the active run, if any. The
    /// worker observes the flag at the next chunk boundary; the
    /// notification wakes a read that is blocked on a stalled server.
    pub(crate) fn request_stop(&self) {
        if self.is_active() {
            self.stop_requested.store(true, Ordering::SeqCst);
            // notify_one stores a permit, so the signal is not lost if
            // the worker is between awaits right now.
            self.stop_notify.notify_one();
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested. May resolve spuriously
    /// from a permit left over by a previous run; callers confirm with
    /// [`DownloadTask::stop_requested`].
    pub(crate) async fn stop_notified(&self) {
        self.stop_notify.notified().await;
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.progress.lock().unwrap().status = status;
    }

    pub fn status(&self) -> TaskStatus {
        self.progress.lock().unwrap().status.clone()
    }

    /// Re-seeds the run state once the main response has settled the
    /// resume offset, total size and range capability.
    pub(crate) fn reset_progress(
        &self,
        downloaded: u64,
        total_size: Option<u64>,
        supports_range: bool,
    ) {
        let mut p = self.progress.lock().unwrap();
        p.downloaded = downloaded;
        p.total_size = total_size;
        p.supports_range = supports_range;
        p.speed_bps = 0.0;
        p.eta_seconds = None;
    }

    /// Records `n` freshly written bytes and returns the new count.
    pub(crate) fn add_bytes(&self, n: u64) -> u64 {
        let mut p = self.progress.lock().unwrap();
        p.downloaded += n;
        p.downloaded
    }

    pub(crate) fn set_rates(&self, speed_bps: f64, eta_seconds: Option<f64>) {
        let mut p = self.progress.lock().unwrap();
        p.speed_bps = speed_bps;
        p.eta_seconds = eta_seconds;
    }

    /// Zeroes the displayed rates after a run ends without completing;
    /// completion keeps the 0/0 pair `set_rates` already applied.
    pub(crate) fn set_rates_idle_if_not_done(&self) {
        let mut p = self.progress.lock().unwrap();
        if !matches!(p.status, TaskStatus::Done { .. }) {
            p.speed_bps = 0.0;
            p.eta_seconds = None;
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let p = self.progress.lock().unwrap();
        let percent = match p.total_size {
            Some(total) if total > 0 => {
                Some(((p.downloaded * 100) / total).min(100) as u8)
            }
            Some(_) => Some(100),
            None => None,
        };
        let speed_human = if p.speed_bps > 0.0 {
            format!("{}/s", HumanBytes(p.speed_bps as u64))
        } else {
            "0 B/s".into()
        };
        TaskSnapshot {
            id: self.id,
            filename: self.filename.clone(),
            url: self.url.clone(),
            status: p.status.clone(),
            status_text: p.status.text(),
            percent,
            downloaded_bytes: p.downloaded,
            total_size: p.total_size,
            supports_range: p.supports_range,
            speed_bps: p.speed_bps,
            speed_human,
            eta_seconds: p.eta_seconds,
            eta_human: format_eta(p.eta_seconds),
        }
    }
}
