//! File download engine.
//!
//! This module provides functionality for downloading a single resource to
//! a local file, including:
//! - Size and byte-range capability detection (`resolver`)
//! - Chunk partitioning (`partition`)
//! - Ranged per-chunk transfers (`chunk`)
//! - Sequential whole-body transfers (`stream`)
//! - Throttled progress reporting under concurrency (`progress`)
//! - Single- and multi-stream strategies (`strategy`)
//! - Session dispatch and lifecycle (`orchestrator`, `state`)
//!
//! # Architecture
//!
//! The download system is organized using the Strategy pattern:
//!
//! ```text
//! Downloader (orchestrator)
//!         │
//!         ├── DownloadStrategy (trait)
//!         │       ├── StreamingStrategy ── StreamFetcher
//!         │       └── RangedStrategy
//!         │               ├── CapabilityResolver
//!         │               ├── partition()
//!         │               └── ChunkFetcher × N (one task per chunk)
//!         │
//!         ├── DownloadSession (state machine, byte counters)
//!         │
//!         └── ProgressAggregator (throttled callbacks)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rangeload::{
//!     DownloadConfig, DownloadRequest, Downloader, ProgressCallback, ProgressSnapshot, TransportConfig,
//! };
//!
//! # async fn run() -> rangeload::DownloadResult<()> {
//! let downloader = Downloader::with_reqwest(&TransportConfig::default(), DownloadConfig::default())?;
//! let request = DownloadRequest::new("https://example.com/big.iso", "/tmp/downloads", "big.iso");
//!
//! let progress: ProgressCallback = Arc::new(|snapshot: ProgressSnapshot| println!("{}", snapshot));
//! let report = downloader
//!     .download_multi_stream_async(&request, Some(progress), None)
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod checksum;
mod chunk;
mod orchestrator;
mod output;
mod partition;
mod progress;
mod request;
mod resolver;
mod state;
mod stream;
mod strategy;

pub use buffer::{BufferPool, BufferPoolStats, PooledBuffer};
pub use checksum::{calculate_file_checksum, verify_checksum};
pub use orchestrator::{BlockingDownloader, Downloader};
pub use output::{copy_body, ByteSink, OutputFile, RegionWriter, StreamSink};
pub use partition::{chunk_count, partition, ChunkDescriptor};
pub use progress::{
    reporting_threshold, ProgressAggregator, ProgressCallback, ProgressCounters, ProgressSnapshot,
};
pub use request::{DownloadReport, DownloadRequest};
pub use resolver::{CapabilityResolver, ProbeStage, ResourceCapabilities};
pub use state::{DownloadSession, SessionState};
pub use stream::StreamOutcome;
pub use strategy::{
    DownloadStrategy, RangedStrategy, SessionContext, StrategyKind, StreamingStrategy,
};
