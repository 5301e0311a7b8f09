use std::ops::Range;

use crate::TransferError;

/// Partition of a file into fixed-size chunks.
///
/// Every chunk is `chunk_size` bytes except the last, which holds the
/// remainder. The ranges cover `[0, file_size)` with no gaps or overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
}

impl ChunkPlan {
    /// Plans `file_size` bytes in chunks of `chunk_size`. Both must be positive.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidPlan(
                "chunk size must be positive".into(),
            ));
        }
        if file_size == 0 {
            return Err(TransferError::InvalidPlan("file is empty".into()));
        }
        Ok(Self {
            file_size,
            chunk_size,
            total_chunks: file_size.div_ceil(chunk_size),
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(file_size / chunk_size)`.
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    ///
    /// A single-chunk plan always spans the whole file.
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.total_chunks {
            return None;
        }
        if self.total_chunks == 1 {
            return Some(0..self.file_size);
        }
        let start = index * self.chunk_size;
        let end = start.saturating_add(self.chunk_size).min(self.file_size);
        Some(start..end)
    }

    /// Iterates over all chunk ranges in index order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.total_chunks).filter_map(|i| self.range(i))
    }

    /// Integer progress percentage after `completed` chunks, rounded half up.
    pub fn percent(&self, completed: u64) -> u8 {
        let completed = completed.min(self.total_chunks);
        ((200 * completed + self.total_chunks) / (2 * self.total_chunks)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_partition(plan: &ChunkPlan) {
        let mut expected_start = 0;
        let mut count = 0;
        for range in plan.ranges() {
            assert_eq!(range.start, expected_start, "gap or overlap at chunk {count}");
            assert!(range.end > range.start, "empty chunk {count}");
            assert!(range.end - range.start <= plan.chunk_size());
            expected_start = range.end;
            count += 1;
        }
        assert_eq!(expected_start, plan.file_size());
        assert_eq!(count, plan.total_chunks());
    }

    #[test]
    fn ten_mib_in_three_mib_chunks() {
        let plan = ChunkPlan::new(10 * MIB, 3 * MIB).unwrap();
        assert_eq!(plan.total_chunks(), 4);

        let sizes: Vec<u64> = plan.ranges().map(|r| r.end - r.start).collect();
        assert_eq!(sizes, vec![3 * MIB, 3 * MIB, 3 * MIB, MIB]);
        assert_partition(&plan);
    }

    #[test]
    fn single_chunk_spans_whole_file() {
        let plan = ChunkPlan::new(1234, 5 * MIB).unwrap();
        assert_eq!(plan.total_chunks(), 1);
        assert_eq!(plan.range(0), Some(0..1234));
        assert_eq!(plan.range(1), None);
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let plan = ChunkPlan::new(12, 4).unwrap();
        assert_eq!(plan.total_chunks(), 3);
        assert_eq!(plan.range(2), Some(8..12));
        assert_partition(&plan);
    }

    #[test]
    fn partitions_hold_for_many_sizes() {
        for file_size in 1..=64u64 {
            for chunk_size in 1..=20u64 {
                let plan = ChunkPlan::new(file_size, chunk_size).unwrap();
                assert_eq!(plan.total_chunks(), file_size.div_ceil(chunk_size));
                assert_partition(&plan);
            }
        }
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(
            ChunkPlan::new(10, 0),
            Err(TransferError::InvalidPlan(_))
        ));
        assert!(matches!(
            ChunkPlan::new(0, 10),
            Err(TransferError::InvalidPlan(_))
        ));
    }

    #[test]
    fn percent_rounds() {
        let plan = ChunkPlan::new(3, 1).unwrap();
        assert_eq!(plan.percent(0), 0);
        assert_eq!(plan.percent(1), 33);
        assert_eq!(plan.percent(2), 67);
        assert_eq!(plan.percent(3), 100);

        let plan = ChunkPlan::new(8, 1).unwrap();
        // 12.5 rounds up.
        assert_eq!(plan.percent(1), 13);
        assert_eq!(plan.percent(9), 100);
    }
}
