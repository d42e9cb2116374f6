//! Destination file handling.
//!
//! Multi-stream sessions write into an [`OutputFile`] that is sized to the
//! full resource length before any fetcher starts. Each fetcher receives a
//! [`RegionWriter`] with its own file handle, positioned at the chunk start
//! and unable to write past the chunk end, so concurrent fetchers never touch
//! the same bytes and need no locking.
//!
//! Streaming sessions append to a [`StreamSink`] instead.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::partition::ChunkDescriptor;
use crate::error::{DownloadError, DownloadResult};
use crate::transport::{BodyStream, BoxFuture};

/// Destination that accepts sequential blocks of bytes.
pub trait ByteSink: Send {
    /// Write one block at the sink's current position.
    fn write_block<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, DownloadResult<()>>;
}

fn write_failed(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError + '_ {
    move |source| DownloadError::WriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Pre-sized destination file for a multi-stream session.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    len: u64,
}

impl OutputFile {
    /// Create (or replace) `path` and size it to `len` bytes.
    pub async fn create_presized(path: &Path, len: u64) -> DownloadResult<Self> {
        let file = File::create(path).await.map_err(write_failed(path))?;
        file.set_len(len).await.map_err(write_failed(path))?;

        Ok(Self {
            path: path.to_path_buf(),
            len,
        })
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the file was created with.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was created empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open an exclusive writer for `chunk`.
    pub async fn region(&self, chunk: &ChunkDescriptor) -> DownloadResult<RegionWriter> {
        if chunk.end >= self.len {
            return Err(DownloadError::InvalidArgument(format!(
                "chunk {} ends at {} beyond file length {}",
                chunk.index, chunk.end, self.len
            )));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(write_failed(&self.path))?;
        file.seek(SeekFrom::Start(chunk.start))
            .await
            .map_err(write_failed(&self.path))?;

        Ok(RegionWriter {
            file,
            path: self.path.clone(),
            index: chunk.index,
            start: chunk.start,
            position: chunk.start,
            end: chunk.end + 1,
        })
    }

    /// Shrink the file to `len` bytes.
    pub async fn truncate(&self, len: u64) -> DownloadResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(write_failed(&self.path))?;
        file.set_len(len).await.map_err(write_failed(&self.path))
    }
}

/// Writer confined to one chunk of an [`OutputFile`].
#[derive(Debug)]
pub struct RegionWriter {
    file: File,
    path: PathBuf,
    index: usize,
    start: u64,
    position: u64,
    end: u64,
}

impl RegionWriter {
    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.position - self.start
    }

    /// Bytes left before the chunk end.
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }

    /// Write `data` at the current position, refusing to cross the chunk end.
    pub async fn write(&mut self, data: &[u8]) -> DownloadResult<()> {
        let len = data.len() as u64;
        if len > self.remaining() {
            return Err(DownloadError::RegionOverflow {
                index: self.index,
                capacity: self.end - self.start,
            });
        }

        self.file
            .write_all(data)
            .await
            .map_err(write_failed(&self.path))?;
        self.position += len;
        Ok(())
    }

    /// Flush pending writes and release the handle.
    pub async fn finish(mut self) -> DownloadResult<()> {
        self.file.flush().await.map_err(write_failed(&self.path))
    }
}

impl ByteSink for RegionWriter {
    fn write_block<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, DownloadResult<()>> {
        Box::pin(self.write(data))
    }
}

/// Append-only destination for a streaming session.
#[derive(Debug)]
pub struct StreamSink {
    file: File,
    path: PathBuf,
    written: u64,
}

impl StreamSink {
    /// Create (or replace) `path`, pre-sizing it when the length is known.
    pub async fn create(path: &Path, size_hint: Option<u64>) -> DownloadResult<Self> {
        let file = File::create(path).await.map_err(write_failed(path))?;
        if let Some(len) = size_hint {
            file.set_len(len).await.map_err(write_failed(path))?;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append `data`.
    pub async fn write(&mut self, data: &[u8]) -> DownloadResult<()> {
        self.file
            .write_all(data)
            .await
            .map_err(write_failed(&self.path))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush and size the file to exactly the bytes written.
    pub async fn finish(mut self) -> DownloadResult<u64> {
        self.file.flush().await.map_err(write_failed(&self.path))?;
        self.file
            .set_len(self.written)
            .await
            .map_err(write_failed(&self.path))?;
        Ok(self.written)
    }
}

impl ByteSink for StreamSink {
    fn write_block<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, DownloadResult<()>> {
        Box::pin(self.write(data))
    }
}

/// Copy `body` into `sink` in blocks of `block_size` bytes.
///
/// `on_block` runs after every block reaches the sink. Returns the number of
/// bytes written. The cancellation token is checked before every network
/// read; bytes still staged in `buffer` when it fires are not written.
pub async fn copy_body<S: ByteSink>(
    mut body: BodyStream,
    sink: &mut S,
    buffer: &mut BytesMut,
    block_size: usize,
    cancel: &CancellationToken,
    mut on_block: impl FnMut(u64),
) -> DownloadResult<u64> {
    let mut copied = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };

        let mut data = chunk?;
        while !data.is_empty() {
            let take = (block_size - buffer.len()).min(data.len());
            buffer.extend_from_slice(&data.split_to(take));

            if buffer.len() == block_size {
                sink.write_block(&buffer[..]).await?;
                copied += block_size as u64;
                on_block(block_size as u64);
                buffer.clear();
            }
        }
    }

    if !buffer.is_empty() {
        let len = buffer.len() as u64;
        sink.write_block(&buffer[..]).await?;
        copied += len;
        on_block(len);
        buffer.clear();
    }

    Ok(copied)
}
