//! Download session dispatcher.
//!
//! [`Downloader`] owns the shared HTTP transport and buffer pool, creates a
//! [`DownloadSession`] per call, and drives it through the chosen
//! [`DownloadStrategy`]. [`BlockingDownloader`] wraps it for synchronous
//! callers.

use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::buffer::{BufferPool, BufferPoolStats};
use super::checksum::verify_checksum_async;
use super::progress::ProgressCallback;
use super::request::{DownloadReport, DownloadRequest};
use super::resolver::{CapabilityResolver, ResourceCapabilities};
use super::state::{DownloadSession, SessionState};
use super::strategy::{
    DownloadStrategy, RangedStrategy, SessionContext, StrategyKind, StreamingStrategy,
};
use crate::config::{DownloadConfig, TransportConfig};
use crate::error::{DownloadError, DownloadResult};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Asynchronous download dispatcher.
///
/// Cheap to share: clone the `Arc` it lives in, or clone the downloader
/// itself. All clones use the same connection pool and buffer pool.
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn HttpTransport>,
    buffers: Arc<BufferPool>,
    config: DownloadConfig,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("buffers", &self.buffers.stats())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Create a downloader over an existing transport.
    pub fn new(transport: Arc<dyn HttpTransport>, config: DownloadConfig) -> Self {
        Self {
            buffers: Arc::new(BufferPool::new(config.max_pooled_buffers)),
            transport,
            config,
        }
    }

    /// Create a downloader backed by a pooled reqwest client.
    pub fn with_reqwest(
        transport_config: &TransportConfig,
        config: DownloadConfig,
    ) -> DownloadResult<Self> {
        let transport = ReqwestTransport::new(transport_config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Downloader configuration.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Copy buffer pool statistics.
    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.buffers.stats()
    }

    /// Determine the size and range support of `url`.
    pub async fn resolve(
        &self,
        url: &str,
        cancel: Option<CancellationToken>,
    ) -> DownloadResult<ResourceCapabilities> {
        let cancel = cancel.unwrap_or_default();
        CapabilityResolver::new(self.transport.as_ref())
            .resolve(url, &cancel)
            .await
    }

    /// Download with one sequential request.
    pub async fn download_single_stream_async(
        &self,
        request: &DownloadRequest,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> DownloadResult<DownloadReport> {
        self.run(request, &StreamingStrategy::new(), progress, cancel)
            .await
    }

    /// Download with concurrent ranged requests into one pre-sized file.
    ///
    /// Fails with `RangeUnsupported` when the server does not honour byte
    /// ranges; there is no automatic fallback to single-stream.
    pub async fn download_multi_stream_async(
        &self,
        request: &DownloadRequest,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> DownloadResult<DownloadReport> {
        self.run(request, &RangedStrategy::new(), progress, cancel)
            .await
    }

    /// Download using the strategy named by `kind`.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        kind: StrategyKind,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> DownloadResult<DownloadReport> {
        match kind {
            StrategyKind::SingleStream => {
                self.download_single_stream_async(request, progress, cancel)
                    .await
            }
            StrategyKind::MultiStream => {
                self.download_multi_stream_async(request, progress, cancel)
                    .await
            }
        }
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        strategy: &dyn DownloadStrategy,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> DownloadResult<DownloadReport> {
        request.validate()?;

        tokio::fs::create_dir_all(request.dest_dir())
            .await
            .map_err(|source| DownloadError::CreateDirFailed {
                path: request.dest_dir().to_path_buf(),
                source,
            })?;

        let mut session = DownloadSession::new(request, strategy.kind());
        let context = SessionContext {
            transport: Arc::clone(&self.transport),
            buffers: Arc::clone(&self.buffers),
            parallelism: self.config.effective_parallelism(),
            progress,
            cancel: cancel.unwrap_or_default(),
        };

        info!(
            url = request.url(),
            path = %session.destination().display(),
            strategy = %strategy.kind(),
            "Starting download"
        );

        match self.drive(&mut session, strategy, &context, request).await {
            Ok(report) => {
                info!(
                    url = request.url(),
                    bytes = report.bytes_written,
                    chunks = report.chunks,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Download complete"
                );
                Ok(report)
            }
            Err(e) => {
                session.fail();
                if e.is_cancelled() {
                    info!(
                        url = request.url(),
                        bytes = session.bytes_downloaded(),
                        "Download cancelled"
                    );
                } else {
                    warn!(
                        url = request.url(),
                        bytes = session.bytes_downloaded(),
                        error = %e,
                        "Download failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut DownloadSession,
        strategy: &dyn DownloadStrategy,
        context: &SessionContext,
        request: &DownloadRequest,
    ) -> DownloadResult<DownloadReport> {
        strategy.execute(session, context).await?;

        let sha256 = match request.expected_sha256() {
            Some(expected) => Some(
                verify_checksum_async(session.destination().to_path_buf(), expected.to_string())
                    .await?,
            ),
            None => None,
        };

        session.advance(SessionState::Completed)?;

        Ok(DownloadReport {
            path: session.destination().to_path_buf(),
            bytes_written: session.bytes_downloaded(),
            strategy: session.strategy(),
            chunks: session.chunks().len().max(1),
            elapsed: session.elapsed(),
            sha256,
        })
    }
}

/// Synchronous front end for single-stream downloads.
///
/// Owns a current-thread Tokio runtime built once at construction. Must not
/// be used from inside another runtime.
#[derive(Debug)]
pub struct BlockingDownloader {
    inner: Downloader,
    runtime: Runtime,
}

impl BlockingDownloader {
    /// Create a blocking downloader over an existing transport.
    pub fn new(transport: Arc<dyn HttpTransport>, config: DownloadConfig) -> DownloadResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DownloadError::Runtime)?;

        Ok(Self {
            inner: Downloader::new(transport, config),
            runtime,
        })
    }

    /// Create a blocking downloader backed by a pooled reqwest client.
    pub fn with_reqwest(
        transport_config: &TransportConfig,
        config: DownloadConfig,
    ) -> DownloadResult<Self> {
        let transport = ReqwestTransport::new(transport_config)?;
        Self::new(Arc::new(transport), config)
    }

    /// The async downloader this wraps.
    pub fn downloader(&self) -> &Downloader {
        &self.inner
    }

    /// Download with one sequential request, blocking until done.
    pub fn download_single_stream(
        &self,
        request: &DownloadRequest,
        progress: Option<ProgressCallback>,
    ) -> DownloadResult<DownloadReport> {
        self.runtime
            .block_on(self.inner.download_single_stream_async(request, progress, None))
    }
}
