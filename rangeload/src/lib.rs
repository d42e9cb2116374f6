//! Rangeload - streaming and range-partitioned HTTP file downloads
//!
//! This library downloads a single remote resource into a local file using
//! one of two strategies:
//!
//! - **Single-stream**: one unranged request, written sequentially.
//! - **Multi-stream**: the resource is probed for its size and byte-range
//!   support, split into chunks, and every chunk is fetched by its own task
//!   into a disjoint region of one pre-sized file.
//!
//! Both report throttled progress through a callback and honour a
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod transport;

pub use config::{DownloadConfig, TransportConfig};
pub use download::{
    partition, BlockingDownloader, ChunkDescriptor, DownloadReport, DownloadRequest,
    Downloader, ProgressCallback, ProgressSnapshot, ResourceCapabilities, StrategyKind,
};
pub use error::{DownloadError, DownloadResult};
pub use logging::{init_logging, LogConfig};
pub use transport::{HttpTransport, ReqwestTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::MemoryTransport;
