//! Session state for a single download.
//!
//! # State Machine
//!
//! ```text
//! Created --> SizeResolving --> Partitioned --> Downloading --> Completed
//!    |                                              ^
//!    +------------------ (single-stream) -----------+
//!
//! any non-terminal state --> Failed
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::partition::ChunkDescriptor;
use super::progress::ProgressCounters;
use super::request::DownloadRequest;
use super::strategy::StrategyKind;
use crate::error::{DownloadError, DownloadResult};

/// Lifecycle state of a [`DownloadSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session created, nothing requested yet.
    Created,
    /// Resolving the resource size and range support.
    SizeResolving,
    /// Chunks computed and the output file sized.
    Partitioned,
    /// Fetchers in flight.
    Downloading,
    /// Every fetcher succeeded.
    Completed,
    /// A fetcher or the resolver failed, or the caller cancelled.
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Whether a session using `strategy` may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState, strategy: StrategyKind) -> bool {
        use SessionState::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Created, SizeResolving) => strategy == StrategyKind::MultiStream,
            (Created, Downloading) => strategy == StrategyKind::SingleStream,
            (SizeResolving, Partitioned) | (Partitioned, Downloading) => {
                strategy == StrategyKind::MultiStream
            }
            (Downloading, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::SizeResolving => "size-resolving",
            SessionState::Partitioned => "partitioned",
            SessionState::Downloading => "downloading",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One transfer from a URL to a destination file.
#[derive(Debug)]
pub struct DownloadSession {
    url: String,
    destination: PathBuf,
    buffer_size: usize,
    strategy: StrategyKind,
    total_size: Option<u64>,
    chunks: Vec<ChunkDescriptor>,
    counters: Arc<ProgressCounters>,
    state: SessionState,
    started: Instant,
}

impl DownloadSession {
    /// Create a session for `request` in the `Created` state.
    pub fn new(request: &DownloadRequest, strategy: StrategyKind) -> Self {
        Self {
            url: request.url().to_string(),
            destination: request.destination(),
            buffer_size: request.buffer_size(),
            strategy,
            total_size: None,
            chunks: Vec::new(),
            counters: Arc::new(ProgressCounters::new(1)),
            state: SessionState::Created,
            started: Instant::now(),
        }
    }

    /// Source URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Size of each disk write.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Strategy driving this session.
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolved or declared size, once known.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Chunks assigned to fetchers (empty for single-stream sessions).
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Shared byte counters.
    pub fn counters(&self) -> &Arc<ProgressCounters> {
        &self.counters
    }

    /// Bytes written so far across all fetchers.
    pub fn bytes_downloaded(&self) -> u64 {
        self.counters.total_bytes()
    }

    /// Time since the session was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the size of the resource.
    pub fn set_total_size(&mut self, total_size: Option<u64>) {
        self.total_size = total_size;
    }

    /// Assign chunks, resetting the counters to one slot per chunk.
    pub fn set_chunks(&mut self, chunks: Vec<ChunkDescriptor>) {
        self.counters = Arc::new(ProgressCounters::new(chunks.len()));
        self.chunks = chunks;
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&mut self, next: SessionState) -> DownloadResult<()> {
        if !self.state.can_transition_to(next, self.strategy) {
            return Err(DownloadError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(url = %self.url, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Mark the session failed. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Length of the longest leading run of fully written bytes.
    ///
    /// Counts every complete leading chunk plus whatever the first
    /// incomplete chunk wrote. Single-stream sessions write strictly
    /// sequentially, so their prefix is simply the byte count.
    pub fn valid_prefix_len(&self) -> u64 {
        if self.chunks.is_empty() {
            return self.counters.total_bytes();
        }

        let mut prefix = 0;
        for chunk in &self.chunks {
            let written = self.counters.chunk_bytes(chunk.index).min(chunk.len());
            prefix += written;
            if written < chunk.len() {
                break;
            }
        }
        prefix
    }
}
