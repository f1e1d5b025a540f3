// Error types shared by the remote client and the planners.
// Everything the remote side can throw at us ends up in `ApiError`, and the
// retry policy treats every variant as retryable. `SyncError` separates
// planning problems (skip this folder, keep going) from remote failures
// (stop the run).

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid auth token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("no files found in {}", .0.display())]
    EmptyFolder(PathBuf),
    #[error("start index {start} is out of range, {folder} has {total} files")]
    StartIndexOutOfRange {
        folder: String,
        start: usize,
        total: usize,
    },
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("project lookup for {title} failed: {source}")]
    LookupFailed {
        title: String,
        #[source]
        source: ApiError,
    },
    #[error(transparent)]
    Remote(#[from] ApiError),
}

impl SyncError {
    /// Planning errors only affect the folder being planned; the run
    /// continues with the next one.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            SyncError::NotADirectory(_)
                | SyncError::EmptyFolder(_)
                | SyncError::StartIndexOutOfRange { .. }
                | SyncError::Io { .. }
        )
    }
}
