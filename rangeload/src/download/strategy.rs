//! Download strategies.
//!
//! This module implements the Strategy pattern for single-stream vs
//! multi-stream transfers of one resource.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::buffer::BufferPool;
use super::chunk::ChunkFetcher;
use super::output::OutputFile;
use super::partition::partition;
use super::progress::{ProgressAggregator, ProgressCallback};
use super::resolver::CapabilityResolver;
use super::state::{DownloadSession, SessionState};
use super::stream::StreamFetcher;
use crate::error::{DownloadError, DownloadResult};
use crate::transport::{BoxFuture, HttpTransport};

/// Which strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// One unranged request, written sequentially.
    SingleStream,
    /// Concurrent ranged requests into disjoint regions of one file.
    MultiStream,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::SingleStream => write!(f, "single-stream"),
            StrategyKind::MultiStream => write!(f, "multi-stream"),
        }
    }
}

/// Shared resources a strategy runs with.
pub struct SessionContext {
    /// HTTP transport shared by every fetcher.
    pub transport: Arc<dyn HttpTransport>,
    /// Copy buffer pool.
    pub buffers: Arc<BufferPool>,
    /// Concurrency budget for partitioning.
    pub parallelism: usize,
    /// Caller's progress callback.
    pub progress: Option<ProgressCallback>,
    /// Caller's cancellation token.
    pub cancel: CancellationToken,
}

/// Strategy for transferring one resource.
pub trait DownloadStrategy: Send + Sync {
    /// Strategy kind, used to validate session transitions.
    fn kind(&self) -> StrategyKind;

    /// Run the transfer for `session`.
    ///
    /// Leaves the session in `Downloading` on success; the caller decides
    /// between `Completed` and `Failed`. On error the destination file holds
    /// only its valid prefix.
    fn execute<'a>(
        &'a self,
        session: &'a mut DownloadSession,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, DownloadResult<()>>;
}

/// Sequential single-request strategy.
///
/// Never consults the capability resolver, so it works against servers
/// that refuse `HEAD` and ignore `Range`.
#[derive(Debug, Default)]
pub struct StreamingStrategy;

impl StreamingStrategy {
    /// Create a new streaming strategy.
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        session: &mut DownloadSession,
        context: &SessionContext,
    ) -> DownloadResult<()> {
        session.advance(SessionState::Downloading)?;

        let fetcher = StreamFetcher {
            transport: context.transport.as_ref(),
            url: session.url(),
            block_size: session.buffer_size(),
            cancel: &context.cancel,
        };
        let mut buffer = context.buffers.acquire(session.buffer_size());
        let outcome = fetcher
            .fetch(
                session.destination(),
                &mut buffer,
                session.counters(),
                context.progress.clone(),
            )
            .await?;

        session.set_total_size(Some(outcome.bytes_written));
        Ok(())
    }
}

impl DownloadStrategy for StreamingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SingleStream
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut DownloadSession,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, DownloadResult<()>> {
        Box::pin(self.run(session, context))
    }
}

/// Concurrent range-partitioned strategy.
///
/// Resolves the resource, splits it into chunks and runs one fetcher task per
/// chunk. The first failure cancels every sibling; once all tasks have
/// stopped the file is cut back to its valid prefix.
#[derive(Debug, Default)]
pub struct RangedStrategy;

impl RangedStrategy {
    /// Create a new ranged strategy.
    pub fn new() -> Self {
        Self
    }

    async fn run(
        &self,
        session: &mut DownloadSession,
        context: &SessionContext,
    ) -> DownloadResult<()> {
        session.advance(SessionState::SizeResolving)?;
        let capabilities = CapabilityResolver::new(context.transport.as_ref())
            .resolve(session.url(), &context.cancel)
            .await?;
        if !capabilities.range_supported {
            return Err(DownloadError::RangeUnsupported {
                url: session.url().to_string(),
            });
        }

        let total_size = capabilities.total_size;
        session.set_total_size(Some(total_size));
        session.set_chunks(partition(total_size, context.parallelism)?);
        session.advance(SessionState::Partitioned)?;

        let output = OutputFile::create_presized(session.destination(), total_size).await?;
        session.advance(SessionState::Downloading)?;

        let result = self.fetch_all(session, context, &output).await;
        if result.is_err() {
            let prefix = session.valid_prefix_len();
            debug!(url = session.url(), prefix, total_size, "Truncating to valid prefix");
            if let Err(e) = output.truncate(prefix).await {
                warn!(
                    path = %output.path().display(),
                    error = %e,
                    "Failed to truncate partial download"
                );
            }
        }
        result
    }

    async fn fetch_all(
        &self,
        session: &DownloadSession,
        context: &SessionContext,
        output: &OutputFile,
    ) -> DownloadResult<()> {
        let url: Arc<str> = Arc::from(session.url());
        let block_size = session.buffer_size();
        let counters = Arc::clone(session.counters());
        let progress = Arc::new(ProgressAggregator::new(
            session.total_size(),
            context.progress.clone(),
        ));
        let cancel = context.cancel.child_token();

        let mut tasks = JoinSet::new();
        let mut first_error = None;

        for &chunk in session.chunks() {
            let region = match output.region(&chunk).await {
                Ok(region) => region,
                Err(e) => {
                    first_error = Some(e);
                    cancel.cancel();
                    break;
                }
            };

            let transport = Arc::clone(&context.transport);
            let buffers = Arc::clone(&context.buffers);
            let url = Arc::clone(&url);
            let counters = Arc::clone(&counters);
            let progress = Arc::clone(&progress);
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let mut buffer = buffers.acquire(block_size);
                let fetcher = ChunkFetcher {
                    transport: transport.as_ref(),
                    url: &url,
                    block_size,
                    counters: &counters,
                    progress: &progress,
                    cancel: &cancel,
                };
                fetcher.fetch(chunk, region, &mut buffer).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let result =
                joined.unwrap_or_else(|e| Err(DownloadError::TaskFailed(e.to_string())));
            if let Err(e) = result {
                if first_error.is_none() {
                    debug!(url = %url, error = %e, "Fetcher failed, cancelling siblings");
                    cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        progress.finish(counters.total_bytes());
        Ok(())
    }
}

impl DownloadStrategy for RangedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MultiStream
    }

    fn execute<'a>(
        &'a self,
        session: &'a mut DownloadSession,
        context: &'a SessionContext,
    ) -> BoxFuture<'a, DownloadResult<()>> {
        Box::pin(self.run(session, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::request::DownloadRequest;
    use crate::transport::MemoryTransport;
    use tempfile::TempDir;

    const MIB: usize = 1024 * 1024;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn context(transport: MemoryTransport, parallelism: usize) -> SessionContext {
        SessionContext {
            transport: Arc::new(transport),
            buffers: Arc::new(BufferPool::new(8)),
            parallelism,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    fn session(dir: &TempDir, kind: StrategyKind) -> DownloadSession {
        let request = DownloadRequest::new("mem://data.bin", dir.path(), "data.bin");
        DownloadSession::new(&request, kind)
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StrategyKind::SingleStream.to_string(), "single-stream");
        assert_eq!(StrategyKind::MultiStream.to_string(), "multi-stream");
        assert_eq!(RangedStrategy::new().kind(), StrategyKind::MultiStream);
        assert_eq!(StreamingStrategy::new().kind(), StrategyKind::SingleStream);
    }

    #[tokio::test]
    async fn test_ranged_strategy_reassembles_file() {
        let source = data(9 * MIB + 17);
        let dir = TempDir::new().unwrap();
        let context = context(MemoryTransport::new(source.clone()), 2);
        let mut session = session(&dir, StrategyKind::MultiStream);

        RangedStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Downloading);
        assert_eq!(session.chunks().len(), 2);
        assert_eq!(session.bytes_downloaded(), source.len() as u64);
        assert_eq!(tokio::fs::read(session.destination()).await.unwrap(), source);
        assert!(context.buffers.stats().pooled >= 1);
    }

    #[tokio::test]
    async fn test_ranged_strategy_rejects_unranged_server() {
        let dir = TempDir::new().unwrap();
        let context = context(MemoryTransport::new(data(1000)).without_ranges(), 2);
        let mut session = session(&dir, StrategyKind::MultiStream);

        let err = RangedStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::RangeUnsupported { .. }));
        assert!(!session.destination().exists());
    }

    #[tokio::test]
    async fn test_ranged_strategy_detects_unhonoured_ranges() {
        let dir = TempDir::new().unwrap();
        let context = context(
            MemoryTransport::new(data(2 * MIB)).advertising_unhonoured_ranges(),
            2,
        );
        let mut session = session(&dir, StrategyKind::MultiStream);

        let err = RangedStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::RangeUnsupported { .. }));
        assert_eq!(session.bytes_downloaded(), 0);
        let written = tokio::fs::read(session.destination()).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_ranged_failure_truncates_to_prefix() {
        // 6 MiB with parallelism 1 is a single chunk, so the cut is the prefix.
        let total = 6 * MIB;
        let cut = 5 * MIB as u64;
        let source = data(total);
        let dir = TempDir::new().unwrap();
        let context = context(MemoryTransport::new(source.clone()).truncated_at(cut), 1);
        let mut session = session(&dir, StrategyKind::MultiStream);

        let err = RangedStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::TruncatedStream { .. }));
        assert_eq!(session.chunks().len(), 1);
        let written = tokio::fs::read(session.destination()).await.unwrap();
        assert_eq!(written.len() as u64, cut);
        assert_eq!(written, &source[..cut as usize]);
    }

    #[tokio::test]
    async fn test_ranged_failure_in_later_chunk_keeps_valid_prefix() {
        // Chunk 0 may finish or be cancelled first; either way only a
        // contiguous, correct prefix survives.
        let total = 8 * MIB;
        let cut = 5 * MIB as u64;
        let source = data(total);
        let dir = TempDir::new().unwrap();
        let context = context(MemoryTransport::new(source.clone()).truncated_at(cut), 1);
        let mut session = session(&dir, StrategyKind::MultiStream);

        let err = RangedStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::TruncatedStream { .. }));
        assert_eq!(session.chunks().len(), 2);
        let written = tokio::fs::read(session.destination()).await.unwrap();
        assert!((written.len() as u64) <= cut);
        assert_eq!(written.len() as u64, session.valid_prefix_len());
        assert_eq!(written, &source[..written.len()]);
    }

    #[tokio::test]
    async fn test_streaming_strategy_records_size() {
        let source = data(70_000);
        let dir = TempDir::new().unwrap();
        let context = context(MemoryTransport::new(source.clone()).without_head(), 4);
        let mut session = session(&dir, StrategyKind::SingleStream);

        StreamingStrategy::new()
            .execute(&mut session, &context)
            .await
            .unwrap();

        assert_eq!(session.total_size(), Some(70_000));
        assert!(session.chunks().is_empty());
        assert_eq!(tokio::fs::read(session.destination()).await.unwrap(), source);
    }
}
