//! rdm: a resumable, concurrent HTTP download engine.
//!
//! Two layers: a transfer worker that owns the life cycle of a single
//! download (probe, resume or restart, stream to a `.part` file,
//! promote on completion) and a [`DownloadManager`] that owns the task
//! collection and routes start/pause/remove commands. Presentation
//! layers consume immutable [`TaskSnapshot`] values, either by polling
//! [`DownloadManager::snapshot`] or from the events channel returned by
//! [`DownloadManager::new`].
//!
//! Pause is cooperative and survives process restarts: the `.part`
//! file's on-disk length is the resume offset, and a later start issues
//! a byte-range request when the server supports it.

pub mod error;
pub mod estimator;
pub mod manager;
pub mod task;
pub mod utils;
pub(crate) mod worker;

pub use error::TransferError;
pub use estimator::SpeedEstimator;
pub use manager::{DownloadManager, ManagerConfig};
pub use task::{DownloadTask, FailureKind, TaskId, TaskSnapshot, TaskStatus};
