//! Download supervisor: owns the task collection and routes commands.
//!
//! Exactly one worker run is active per task at a time; commands
//! addressed to unknown task ids are no-ops because the presentation
//! layer may race with removal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::task::{DownloadTask, TaskId, TaskSnapshot, TaskStatus};
use crate::utils::{filename_from_url, sanitize_filename};
use crate::worker::{self, WorkerContext};

/// How long `shutdown` waits for workers to reach a safe stopping point.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Externally supplied settings. The engine never reads configuration
/// storage itself; whoever embeds it passes these in.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Destination directory for tasks added without an explicit path.
    pub default_dir: PathBuf,
    /// Upper bound on simultaneously running transfers; `None` means
    /// downloads proceed fully in parallel.
    pub max_concurrent: Option<usize>,
}

pub struct DownloadManager {
    client: Client,
    config: ManagerConfig,
    tasks: Mutex<Vec<Arc<DownloadTask>>>,
    handles: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    next_id: AtomicU64,
    events: UnboundedSender<TaskSnapshot>,
    limiter: Option<Arc<Semaphore>>,
}

impl DownloadManager {
    /// Creates the supervisor and the snapshot channel a presentation
    /// layer consumes. Snapshots for a given task arrive in
    /// non-decreasing `downloaded_bytes` order.
    pub fn new(config: ManagerConfig) -> (Self, UnboundedReceiver<TaskSnapshot>) {
        let client = Client::builder()
            .user_agent(concat!("rdm/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let (events, receiver) = mpsc::unbounded_channel();
        let limiter = config
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        let manager = Self {
            client,
            config,
            tasks: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            limiter,
        };
        (manager, receiver)
    }

    /// Adds a task in `Queued` state without starting it. When
    /// `destination` is a directory, the filename is derived from the
    /// URL's path component.
    pub fn add(&self, url: &str, destination: &Path) -> TaskId {
        let dest_path = if destination.is_dir() {
            destination.join(self.derived_filename(url))
        } else {
            destination.to_path_buf()
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(DownloadTask::new(id, url.to_string(), dest_path));
        debug!(id, url = %task.url, dest = %task.dest_path.display(), "task added");
        self.tasks.lock().unwrap().push(task);
        id
    }

    /// Adds a task into the configured default directory. This is the
    /// path external enqueue sources (e.g. a browser-extension control
    /// plane handing over `{url, filename}`) go through; it never
    /// bypasses `add`.
    pub fn enqueue(&self, url: &str, filename: Option<&str>) -> TaskId {
        let name = match filename {
            Some(name) if !name.is_empty() => sanitize_filename(name),
            _ => self.derived_filename(url),
        };
        let dest = self.config.default_dir.join(name);
        self.add(url, &dest)
    }

    fn derived_filename(&self, url: &str) -> String {
        let name = filename_from_url(url)
            .unwrap_or_else(|_| format!("download_{}", uuid::Uuid::new_v4()));
        sanitize_filename(&name)
    }

    /// Starts the task's transfer worker. No-op if the id is unknown,
    /// the task is already running, or the task is `Done`.
    pub fn start(&self, id: TaskId) {
        if let Some(task) = self.get(id) {
            self.spawn(task);
        }
    }

    /// Signals cooperative cancellation; the worker stops at the next
    /// chunk boundary, leaving the partial file intact. No-op if the id
    /// is unknown or nothing is active.
    pub fn pause(&self, id: TaskId) {
        if let Some(task) = self.get(id) {
            task.request_stop();
        }
    }

    /// Starts every resumable task (`Queued`, `Paused` or any `Failed`)
    /// that is not currently active.
    pub fn start_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().unwrap().clone();
        for task in tasks {
            if task.status().is_resumable() {
                self.spawn(task);
            }
        }
    }

    /// Pauses every currently active task.
    pub fn pause_all(&self) {
        for task in self.tasks.lock().unwrap().iter() {
            task.request_stop();
        }
    }

    /// Pauses the task if active, then detaches it from the collection.
    /// Partial and final files are never deleted: resumability and user
    /// data outrank tidiness.
    pub fn remove(&self, id: TaskId) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(pos) = tasks.iter().position(|t| t.id == id) {
            let task = tasks.remove(pos);
            task.request_stop();
            debug!(id, "task removed from collection");
        }
    }

    /// Immutable view of all tasks, in insertion order.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.snapshot())
            .collect()
    }

    pub fn task_snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.get(id).map(|t| t.snapshot())
    }

    pub fn is_active(&self, id: TaskId) -> bool {
        self.get(id).map(|t| t.is_active()).unwrap_or(false)
    }

    /// Signals cancellation to every active worker and waits a bounded
    /// interval for them to reach a safe stopping point, so shutdown
    /// never tears a partial-file write.
    pub async fn shutdown(&self) {
        self.pause_all();
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles)).await;
    }

    fn get(&self, id: TaskId) -> Option<Arc<DownloadTask>> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    fn spawn(&self, task: Arc<DownloadTask>) {
        if matches!(task.status(), TaskStatus::Done { .. }) {
            return;
        }
        if !task.begin_run() {
            debug!(id = task.id, "start ignored, task already active");
            return;
        }
        let ctx = WorkerContext {
            client: self.client.clone(),
            events: self.events.clone(),
            limiter: self.limiter.clone(),
        };
        let handle = tokio::spawn(worker::run(task.clone(), ctx));
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|_, h| !h.is_finished());
        handles.insert(task.id, handle);
    }
}
