//! Error types for download sessions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::SessionState;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while resolving, fetching or writing a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// A caller-supplied argument was rejected before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No resolver stage produced a usable content length.
    #[error("could not determine the size of {url}")]
    SizeUndetermined { url: String },

    /// Multi-stream download requested for a resource without byte-range support.
    #[error("{url} does not support byte-range requests")]
    RangeUnsupported { url: String },

    /// Connection or transport failure.
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Request exceeded a configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Server answered with a status the transfer cannot use.
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The body ended before the requested range or declared length was delivered.
    #[error("stream from {url} ended after {received} of {expected} bytes")]
    TruncatedStream {
        url: String,
        expected: u64,
        received: u64,
    },

    /// A fetcher tried to write past the end of its chunk.
    #[error("chunk {index} received more than its {capacity} bytes")]
    RegionOverflow { index: usize, capacity: u64 },

    /// The caller cancelled the download.
    #[error("download cancelled")]
    Cancelled,

    /// Failed to create the destination directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to write the destination file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to read a file back from disk.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Checksum verification failed.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Failed to build the shared HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(String),

    /// Failed to build the runtime backing the blocking downloader.
    #[error("failed to create Tokio runtime: {0}")]
    Runtime(#[source] io::Error),

    /// A session was driven through a state change it does not allow.
    #[error("illegal session transition from {from} to {to}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    /// A fetcher task panicked or was aborted.
    #[error("download task failed: {0}")]
    TaskFailed(String),
}

impl DownloadError {
    /// Whether this error came from the network rather than local state.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }

    /// Whether this error is the result of caller cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn network(url: &str, reason: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}
