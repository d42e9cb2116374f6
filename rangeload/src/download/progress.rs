//! Progress aggregation for streaming and parallel downloads.
//!
//! Fetchers add to a shared atomic byte counter and hand the new total to a
//! [`ProgressAggregator`], which decides whether the caller's callback is due.
//! Reporting is throttled to roughly one call per percent of the transfer (or
//! one per MiB when the size is unknown), so the number of callbacks stays
//! near 100 however large the download is.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::UNKNOWN_TOTAL_REPORT_INTERVAL;

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes written to the destination so far.
    pub bytes_transferred: u64,
    /// Total size, when known.
    pub total_bytes: Option<u64>,
}

impl ProgressSnapshot {
    /// Progress as a percentage, if the total is known.
    pub fn percent(&self) -> Option<f64> {
        self.ratio().map(|r| r * 100.0)
    }

    /// Progress as a ratio (0.0 to 1.0), if the total is known.
    pub fn ratio(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64),
            None => None,
        }
    }

    /// Whether every byte of a known total has been transferred.
    pub fn is_complete(&self) -> bool {
        self.total_bytes == Some(self.bytes_transferred)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total_bytes {
            Some(total) => write!(f, "{}/{} bytes", self.bytes_transferred, total),
            None => write!(f, "{} bytes", self.bytes_transferred),
        }
    }
}

/// Callback invoked with throttled progress updates.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Throttles progress reports from one or many fetchers.
///
/// Safe to share across tasks: the next reporting mark is claimed with a
/// compare-exchange so each threshold crossing fires exactly once, and
/// delivery is serialized so reported values never go backwards.
pub struct ProgressAggregator {
    total: Option<u64>,
    threshold: u64,
    next_mark: AtomicU64,
    last_reported: Mutex<Option<u64>>,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("total", &self.total)
            .field("threshold", &self.threshold)
            .field("next_mark", &self.next_mark.load(Ordering::Relaxed))
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressAggregator {
    /// Create an aggregator for a transfer of `total` bytes.
    pub fn new(total: Option<u64>, callback: Option<ProgressCallback>) -> Self {
        let threshold = reporting_threshold(total);
        Self {
            total,
            threshold,
            next_mark: AtomicU64::new(threshold),
            last_reported: Mutex::new(None),
            callback,
        }
    }

    /// Bytes between two reports.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// The total this aggregator reports against.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Record that `bytes_so_far` bytes have been transferred.
    ///
    /// Fires the callback when the next threshold multiple has been crossed.
    pub fn report(&self, bytes_so_far: u64) {
        if self.callback.is_none() {
            return;
        }

        let mut mark = self.next_mark.load(Ordering::Acquire);
        loop {
            if bytes_so_far < mark {
                return;
            }
            let next = (bytes_so_far / self.threshold + 1) * self.threshold;
            match self.next_mark.compare_exchange_weak(
                mark,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => mark = current,
            }
        }

        self.deliver(bytes_so_far, false);
    }

    /// Report completion; always fires the callback once.
    pub fn finish(&self, bytes_so_far: u64) {
        self.deliver(bytes_so_far, true);
    }

    fn deliver(&self, bytes: u64, force: bool) {
        let Some(callback) = &self.callback else {
            return;
        };

        let mut last = self.last_reported.lock();
        if !force && last.is_some_and(|prev| bytes <= prev) {
            return;
        }
        let bytes = last.map_or(bytes, |prev| bytes.max(prev));
        *last = Some(bytes);

        callback(ProgressSnapshot {
            bytes_transferred: bytes,
            total_bytes: self.total,
        });
    }
}

/// Reporting interval for a transfer of `total` bytes.
///
/// About 1% of a known total (at least one byte), or a fixed 1 MiB.
pub fn reporting_threshold(total: Option<u64>) -> u64 {
    match total {
        Some(total) => (total / 100).max(1),
        None => UNKNOWN_TOTAL_REPORT_INTERVAL,
    }
}

/// Shared byte counters for one session.
///
/// `total` is the session-wide counter every fetcher adds to; `per_chunk`
/// holds each fetcher's own progress, used to find the valid prefix of a
/// file after an aborted multi-stream download.
#[derive(Debug)]
pub struct ProgressCounters {
    total: AtomicU64,
    per_chunk: Vec<AtomicU64>,
}

impl ProgressCounters {
    /// Create counters for `chunks` fetchers.
    pub fn new(chunks: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            per_chunk: (0..chunks).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Add `bytes` written by chunk `index`; returns the new session total.
    pub fn add(&self, index: usize, bytes: u64) -> u64 {
        if let Some(chunk) = self.per_chunk.get(index) {
            chunk.fetch_add(bytes, Ordering::Relaxed);
        }
        self.total.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Bytes written across all fetchers.
    pub fn total_bytes(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Bytes written by chunk `index`.
    pub fn chunk_bytes(&self, index: usize) -> u64 {
        self.per_chunk
            .get(index)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Number of chunks tracked.
    pub fn chunks(&self) -> usize {
        self.per_chunk.len()
    }
}
