//! Reusable copy buffers.
//!
//! Every fetcher stages network bytes in a buffer before writing them to
//! disk. Buffers are taken from a pool owned by the downloader and returned
//! when the fetcher finishes, so parallel sessions do not allocate a fresh
//! buffer per chunk.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::trace;

/// Statistics for buffer pool operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers allocated because none suitable was pooled.
    pub allocations: u64,
    /// Buffers served from the pool.
    pub reuses: u64,
    /// Buffers currently idle in the pool.
    pub pooled: usize,
}

/// Thread-safe pool of `BytesMut` buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<BytesMut>>,
    max_pooled: usize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl BufferPool {
    /// Create a pool that keeps at most `max_pooled` idle buffers.
    pub fn new(max_pooled: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_pooled,
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// Take an empty buffer with at least `min_capacity` bytes of capacity.
    pub fn acquire(self: &Arc<Self>, min_capacity: usize) -> PooledBuffer {
        let reused = {
            let mut idle = self.idle.lock();
            let pos = idle.iter().position(|buf| buf.capacity() >= min_capacity);
            pos.map(|pos| idle.swap_remove(pos))
        };

        let buffer = match reused {
            Some(buffer) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                trace!(min_capacity, "Allocating copy buffer");
                BytesMut::with_capacity(min_capacity)
            }
        };

        PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        }
    }

    /// Current pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            pooled: self.idle.lock().len(),
        }
    }

    fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_pooled {
            idle.push(buffer);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.release(buffer);
    }
}
