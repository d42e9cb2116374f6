//! Ranged transfer of a single chunk into its output region.

use bytes::BytesMut;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::output::{copy_body, RegionWriter};
use super::partition::ChunkDescriptor;
use super::progress::{ProgressAggregator, ProgressCounters};
use super::resolver::cancellable;
use crate::error::{DownloadError, DownloadResult};
use crate::transport::HttpTransport;

/// Fetches chunks of one resource.
///
/// A fetcher borrows the session-wide state; each call to [`fetch`] owns
/// exactly one [`RegionWriter`], so any number of fetches may run at once.
///
/// [`fetch`]: ChunkFetcher::fetch
pub struct ChunkFetcher<'a> {
    pub(crate) transport: &'a dyn HttpTransport,
    pub(crate) url: &'a str,
    pub(crate) block_size: usize,
    pub(crate) counters: &'a ProgressCounters,
    pub(crate) progress: &'a ProgressAggregator,
    pub(crate) cancel: &'a CancellationToken,
}

impl ChunkFetcher<'_> {
    /// Download `chunk` into `region`, staging bytes in `buffer`.
    ///
    /// Returns the number of bytes written, which always equals the chunk
    /// length on success.
    pub async fn fetch(
        &self,
        chunk: ChunkDescriptor,
        mut region: RegionWriter,
        buffer: &mut BytesMut,
    ) -> DownloadResult<u64> {
        debug!(
            url = self.url,
            chunk = chunk.index,
            start = chunk.start,
            end = chunk.end,
            "Fetching chunk"
        );

        let response = cancellable(
            self.cancel,
            self.transport.get(self.url, Some(chunk.byte_range())),
        )
        .await?;

        if response.head.status == StatusCode::OK {
            // The server sent the whole entity instead of the requested range.
            return Err(DownloadError::RangeUnsupported {
                url: self.url.to_string(),
            });
        }
        if response.head.status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::HttpStatus {
                url: self.url.to_string(),
                status: response.head.status.as_u16(),
            });
        }

        let copied = copy_body(
            response.body,
            &mut region,
            buffer,
            self.block_size,
            self.cancel,
            |bytes| {
                let total = self.counters.add(chunk.index, bytes);
                self.progress.report(total);
            },
        )
        .await;
        // Flush before reporting so nothing lands after a later truncate.
        let flushed = region.finish().await;
        let copied = copied?;
        flushed?;

        if copied < chunk.len() {
            return Err(DownloadError::TruncatedStream {
                url: self.url.to_string(),
                expected: chunk.len(),
                received: copied,
            });
        }

        debug!(url = self.url, chunk = chunk.index, bytes = copied, "Chunk complete");
        Ok(copied)
    }
}
