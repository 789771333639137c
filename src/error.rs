use reqwest::StatusCode;
use thiserror::Error;

use crate::task::FailureKind;

/// Everything that can end a transfer run early. `Cancelled` is the
/// expected pause outcome, not a failure; the rest leave the task
/// resumable with its partial file intact.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection failed: {0}")]
    Connection(#[source] reqwest::Error),
    #[error("request timed out")]
    Timeout(#[source] Option<reqwest::Error>),
    #[error("server returned {0}")]
    HttpStatus(StatusCode),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("transfer stopped by request")]
    Cancelled,
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransferError::Timeout(Some(err))
        } else {
            TransferError::Connection(err)
        }
    }
}

impl TransferError {
    /// Maps to the tagged status kind; `None` for cancellation, which
    /// resolves to `Paused` rather than `Failed`.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TransferError::Connection(_) => Some(FailureKind::Connection),
            TransferError::Timeout(_) => Some(FailureKind::Timeout),
            TransferError::HttpStatus(code) => Some(FailureKind::HttpStatus(code.as_u16())),
            TransferError::Io(_) => Some(FailureKind::Io),
            TransferError::Cancelled => None,
        }
    }
}
