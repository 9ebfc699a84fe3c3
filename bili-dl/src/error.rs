//! The errors that can occur.
//!
//! Every stage of the acquisition pipeline has its own error type, so a batch
//! driver can tell a missing quality tier apart from a dead CDN node or a
//! broken muxer, and keep going with the next job.

use crate::model::TrackKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the platform's JSON API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the response could not be read.
    #[error("An error occurred while fetching: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// The response body was not the expected JSON.
    #[error("An error occurred while parsing JSON: {0}")]
    Serde(#[from] serde_json::Error),
    /// The platform answered with a non-zero application code.
    #[error("Upstream error {code}: {message}")]
    Upstream {
        /// The application-level code.
        code: i64,
        /// The message returned alongside the code.
        message: String,
    },
    /// The envelope had a zero code but no payload.
    #[error("Response for {0} carried no data")]
    EmptyData(String),
    /// A header value could not be built from the given credentials.
    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// Errors raised by the download ledger.
///
/// None of these are fatal: a corrupt store degrades to an empty history and a
/// failed write only costs a re-download on the next run.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not be read or written.
    #[error("Ledger IO error on {path:?}: {source}")]
    Io {
        /// The path of the store.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The store exists but does not hold a valid record list.
    #[error("Ledger file {path:?} is corrupted: {source}")]
    Corrupt {
        /// The path of the store.
        path: PathBuf,
        /// The parse error.
        source: serde_json::Error,
    },
    /// The in-memory records could not be serialized.
    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while resolving the stream URLs of a content unit.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The platform rejected the stream-info request.
    #[error("Upstream error {0}: {1}")]
    Upstream(i64, String),
    /// No video candidate exists at the requested quality rank.
    #[error("Quality {0} is not available for this video")]
    QualityUnavailable(u32),
    /// The manifest lacks a usable video or audio track.
    #[error("No {0} streams available")]
    NoStreams(TrackKind),
    /// The stream-info request failed below the application level.
    #[error("Failed to query stream info: {0}")]
    Request(ApiError),
}

impl From<ApiError> for ResolveError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Upstream { code, message } => ResolveError::Upstream(code, message),
            other => ResolveError::Request(other),
        }
    }
}

/// A single failed transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The connection failed, timed out or was reset.
    #[error("Transport error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("Unexpected status code: {0}")]
    Status(reqwest::StatusCode),
    /// The body ended before the declared content length.
    #[error("Transfer ended after {received} of {expected} bytes")]
    Incomplete {
        /// The declared content length.
        expected: u64,
        /// The bytes actually received.
        received: u64,
    },
    /// Writing the body to disk failed.
    #[error("An IO error occurred: {0}")]
    IO(#[from] std::io::Error),
}

/// Errors raised by the stream fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed; carries the cause of the last one.
    #[error("Download failed after {attempts} attempts: {last}")]
    Exhausted {
        /// The number of attempts made.
        attempts: usize,
        /// The cause of the final failed attempt.
        last: TransferError,
    },
}

/// Errors raised while running an external command.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The process could not be started or its pipes could not be read.
    #[error("Failed to launch command: {0}")]
    Launch(#[from] std::io::Error),
    /// A reader task panicked or was cancelled.
    #[error("An error occurred while running the runtime: {0}")]
    Runtime(#[from] tokio::task::JoinError),
    /// The process exited with a non-zero status.
    #[error("Process failed with code {code}: {stderr}")]
    Failed {
        /// The exit code, `-1` when killed by a signal.
        code: i32,
        /// The diagnostic output of the process.
        stderr: String,
    },
    /// The process did not exit in time and was killed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by the muxer.
#[derive(Debug, Error)]
pub enum MuxError {
    /// The muxing tool failed or could not be launched.
    #[error("Muxing failed: {0}")]
    Tool(#[from] ExecutorError),
    /// A path could not be passed to the tool.
    #[error("An invalid path was provided: {0}")]
    Path(String),
    /// The output could not be created or moved into place.
    #[error("An IO error occurred: {0}")]
    IO(#[from] std::io::Error),
}

/// Errors raised by one run of the acquisition pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Stream resolution failed.
    #[error("Resolve failed: {0}")]
    Resolve(#[from] ResolveError),
    /// Downloading one of the tracks failed.
    #[error("Fetching {track} failed: {source}")]
    Fetch {
        /// The track that failed.
        track: TrackKind,
        /// The fetch error.
        source: FetchError,
    },
    /// Muxing the tracks failed.
    #[error("{0}")]
    Mux(#[from] MuxError),
}

/// A type alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
