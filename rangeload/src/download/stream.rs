//! Sequential whole-body transfer.

use std::path::Path;

use bytes::BytesMut;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::output::{copy_body, StreamSink};
use super::progress::{ProgressAggregator, ProgressCallback, ProgressCounters};
use super::resolver::cancellable;
use crate::error::{DownloadError, DownloadResult};
use crate::transport::HttpTransport;

/// Result of a completed streaming transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// `Content-Length` declared by the server, if any.
    pub declared_length: Option<u64>,
}

/// Downloads a resource with a single unranged request.
pub struct StreamFetcher<'a> {
    pub(crate) transport: &'a dyn HttpTransport,
    pub(crate) url: &'a str,
    pub(crate) block_size: usize,
    pub(crate) cancel: &'a CancellationToken,
}

impl StreamFetcher<'_> {
    /// Stream the resource into `destination`.
    ///
    /// The file is pre-sized to the declared length when there is one. On
    /// every exit path the file is left holding exactly the bytes received.
    pub async fn fetch(
        &self,
        destination: &Path,
        buffer: &mut BytesMut,
        counters: &ProgressCounters,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadResult<StreamOutcome> {
        let response = cancellable(self.cancel, self.transport.get(self.url, None)).await?;

        if !response.head.status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: self.url.to_string(),
                status: response.head.status.as_u16(),
            });
        }

        let declared_length = response.head.content_length();
        debug!(url = self.url, ?declared_length, "Streaming body");

        let progress = ProgressAggregator::new(declared_length, on_progress);
        let mut sink = StreamSink::create(destination, declared_length).await?;

        let copied = copy_body(
            response.body,
            &mut sink,
            buffer,
            self.block_size,
            self.cancel,
            |bytes| progress.report(counters.add(0, bytes)),
        )
        .await;
        let finished = sink.finish().await;
        copied?;
        let bytes_written = finished?;

        if let Some(expected) = declared_length {
            if bytes_written < expected {
                return Err(DownloadError::TruncatedStream {
                    url: self.url.to_string(),
                    expected,
                    received: bytes_written,
                });
            }
        }

        progress.finish(bytes_written);
        Ok(StreamOutcome {
            bytes_written,
            declared_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::ProgressSnapshot;
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    const URL: &str = "mem://stream.bin";

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    async fn fetch(
        transport: &MemoryTransport,
        dir: &TempDir,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> DownloadResult<StreamOutcome> {
        let fetcher = StreamFetcher {
            transport,
            url: URL,
            block_size: 256,
            cancel,
        };
        let counters = ProgressCounters::new(1);
        fetcher
            .fetch(
                &dir.path().join("out.bin"),
                &mut BytesMut::with_capacity(256),
                &counters,
                on_progress,
            )
            .await
    }

    #[tokio::test]
    async fn test_stream_full_body() {
        let source = data(10_000);
        let transport = MemoryTransport::new(source.clone()).with_body_chunk_size(999);
        let dir = TempDir::new().unwrap();

        let seen = Arc::new(Mutex::new(Vec::<ProgressSnapshot>::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |s| sink.lock().push(s));

        let outcome = fetch(&transport, &dir, &CancellationToken::new(), Some(callback))
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 10_000);
        assert_eq!(outcome.declared_length, Some(10_000));
        assert_eq!(tokio::fs::read(dir.path().join("out.bin")).await.unwrap(), source);
        assert_eq!(transport.request_counts().full_get, 1);
        assert_eq!(transport.request_counts().head, 0);

        let seen = seen.lock();
        assert_eq!(seen.last().unwrap().bytes_transferred, 10_000);
        assert!(seen.len() <= 102);
    }

    #[tokio::test]
    async fn test_stream_without_length_grows() {
        let source = data(3000);
        let transport = MemoryTransport::new(source.clone()).without_content_length();
        let dir = TempDir::new().unwrap();

        let outcome = fetch(&transport, &dir, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.declared_length, None);
        assert_eq!(outcome.bytes_written, 3000);
        assert_eq!(tokio::fs::read(dir.path().join("out.bin")).await.unwrap(), source);
    }

    #[tokio::test]
    async fn test_stream_truncated_keeps_received_bytes() {
        let source = data(5000);
        let transport = MemoryTransport::new(source.clone()).truncated_at(1234);
        let dir = TempDir::new().unwrap();

        let err = fetch(&transport, &dir, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DownloadError::TruncatedStream {
                expected: 5000,
                received: 1234,
                ..
            }
        ));
        let written = tokio::fs::read(dir.path().join("out.bin")).await.unwrap();
        assert_eq!(written, &source[..1234]);
    }

    #[tokio::test]
    async fn test_stream_cancelled_mid_body() {
        let transport = MemoryTransport::new(data(100_000)).stalling_after(4096);
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = fetch(&transport, &dir, &cancel, None).await.unwrap_err();

        assert!(err.is_cancelled());
        let len = tokio::fs::metadata(dir.path().join("out.bin"))
            .await
            .unwrap()
            .len();
        assert_eq!(len, 4096);
    }

    #[tokio::test]
    async fn test_empty_resource_streams_empty_file() {
        let transport = MemoryTransport::new(Vec::<u8>::new());
        let dir = TempDir::new().unwrap();

        let outcome = fetch(&transport, &dir, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 0);
        assert!(tokio::fs::metadata(dir.path().join("out.bin"))
            .await
            .unwrap()
            .is_file());
    }
}
