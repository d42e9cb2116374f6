//! Splitting a resource into disjoint byte ranges.

use crate::config::MIN_CHUNK_SIZE;
use crate::error::{DownloadError, DownloadResult};
use crate::transport::ByteRange;

/// One contiguous byte range assigned to a single fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Position of the chunk in the partition.
    pub index: usize,
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ChunkDescriptor {
    /// Number of bytes in the chunk.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a chunk covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The range to request for this chunk.
    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.start, self.end)
    }
}

/// Number of chunks used for a resource of `total_size` bytes.
///
/// `max(1, min(total_size / MIN_CHUNK_SIZE, 2 * parallelism))`
pub fn chunk_count(total_size: u64, parallelism: usize) -> usize {
    let by_size = total_size / MIN_CHUNK_SIZE;
    let budget = (parallelism.max(1) as u64).saturating_mul(2);
    by_size.min(budget).max(1) as usize
}

/// Partition `[0, total_size)` into contiguous, non-overlapping chunks.
///
/// Every chunk but the last holds `total_size / count` bytes; the last one
/// absorbs the remainder and always ends at `total_size - 1`.
pub fn partition(total_size: u64, parallelism: usize) -> DownloadResult<Vec<ChunkDescriptor>> {
    if total_size == 0 {
        return Err(DownloadError::InvalidArgument(
            "cannot partition an empty resource".to_string(),
        ));
    }

    let count = chunk_count(total_size, parallelism);
    let chunk_size = total_size / count as u64;

    let chunks = (0..count)
        .map(|index| {
            let start = index as u64 * chunk_size;
            let end = if index + 1 == count {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            ChunkDescriptor { index, start, end }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_small_resource_is_one_chunk() {
        let chunks = partition(MIN_CHUNK_SIZE - 1, 8).unwrap();
        assert_eq!(
            chunks,
            vec![ChunkDescriptor {
                index: 0,
                start: 0,
                end: MIN_CHUNK_SIZE - 2
            }]
        );
    }

    #[test]
    fn test_single_byte_resource() {
        let chunks = partition(1, 4).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1);
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            partition(0, 4),
            Err(DownloadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_count_limited_by_parallelism() {
        // 100 MiB could hold 25 chunks, but 2 cores allow only 4.
        let chunks = partition(100 * MIB, 2).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 25 * MIB);
        assert_eq!(chunks[3].end, 100 * MIB - 1);
    }

    #[test]
    fn test_last_chunk_absorbs_remainder() {
        let total = 10 * MIB + 3;
        let chunks = partition(total, 16).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), total / 2);
        assert_eq!(chunks[1].len(), total - total / 2);
        assert_eq!(chunks[1].end, total - 1);
    }

    #[test]
    fn test_zero_parallelism_treated_as_one() {
        assert_eq!(chunk_count(64 * MIB, 0), 2);
    }

    #[test]
    fn test_byte_range_matches_chunk() {
        let chunk = ChunkDescriptor {
            index: 1,
            start: 10,
            end: 19,
        };
        assert_eq!(chunk.byte_range(), ByteRange::new(10, 19));
        assert_eq!(chunk.len(), 10);
    }

    proptest! {
        #[test]
        fn prop_chunks_tile_the_resource(
            total in 1u64..(1u64 << 40),
            parallelism in 1usize..128,
        ) {
            let chunks = partition(total, parallelism).unwrap();

            let expected = (total / MIN_CHUNK_SIZE)
                .min(2 * parallelism as u64)
                .max(1) as usize;
            prop_assert_eq!(chunks.len(), expected);

            prop_assert_eq!(chunks[0].start, 0);
            prop_assert_eq!(chunks[chunks.len() - 1].end, total - 1);

            for (i, pair) in chunks.windows(2).enumerate() {
                prop_assert_eq!(pair[0].index, i);
                prop_assert!(pair[0].start <= pair[0].end);
                prop_assert_eq!(pair[0].end + 1, pair[1].start);
            }

            let covered: u64 = chunks.iter().map(|c| c.len()).sum();
            prop_assert_eq!(covered, total);
        }

        #[test]
        fn prop_all_but_last_are_equal(
            total in MIN_CHUNK_SIZE..(1u64 << 36),
            parallelism in 1usize..32,
        ) {
            let chunks = partition(total, parallelism).unwrap();
            let base = total / chunks.len() as u64;
            for chunk in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(chunk.len(), base);
            }
            prop_assert!(chunks[chunks.len() - 1].len() >= base);
        }
    }
}
