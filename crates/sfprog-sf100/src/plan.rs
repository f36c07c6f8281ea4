//! Read range decomposition
//!
//! A read of `[start, start + len)` is split into an unaligned prefix up to
//! the next 512-byte boundary, a middle made of whole 512-byte chunks that
//! the bulk engine moves, and whatever unaligned suffix is left.

use crate::protocol::BULK_CHUNK_SIZE;

/// One contiguous piece of a planned read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Flash address of the first byte
    pub start: u32,
    /// Offset into the caller's buffer
    pub offset: usize,
    /// Length in bytes, never zero
    pub len: usize,
}

impl Segment {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Prefix / aligned middle / suffix split of a read range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    start: u32,
    prefix_len: usize,
    middle_len: usize,
    suffix_len: usize,
}

impl ChunkPlan {
    /// Plan a read; `None` if the range runs past the 32-bit address space
    pub fn new(start: u32, len: usize) -> Option<Self> {
        let end = u64::from(start).checked_add(len as u64)?;
        if end > 1 << 32 {
            return None;
        }

        let misalign = start as usize % BULK_CHUNK_SIZE;
        let prefix_len = ((BULK_CHUNK_SIZE - misalign) % BULK_CHUNK_SIZE).min(len);
        let middle_len = (len - prefix_len) / BULK_CHUNK_SIZE * BULK_CHUNK_SIZE;
        let suffix_len = len - prefix_len - middle_len;

        Some(Self {
            start,
            prefix_len,
            middle_len,
            suffix_len,
        })
    }

    pub fn len(&self) -> usize {
        self.prefix_len + self.middle_len + self.suffix_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn middle_len(&self) -> usize {
        self.middle_len
    }

    pub fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Number of bulk chunks in the middle
    pub fn chunk_count(&self) -> usize {
        self.middle_len / BULK_CHUNK_SIZE
    }

    pub fn prefix(&self) -> Option<Segment> {
        self.segment(0, self.prefix_len)
    }

    pub fn middle(&self) -> Option<Segment> {
        self.segment(self.prefix_len, self.middle_len)
    }

    pub fn suffix(&self) -> Option<Segment> {
        self.segment(self.prefix_len + self.middle_len, self.suffix_len)
    }

    fn segment(&self, offset: usize, len: usize) -> Option<Segment> {
        if len == 0 {
            return None;
        }
        // A non-empty segment starts below the range end, so it fits in u32
        let start = (u64::from(self.start) + offset as u64) as u32;
        Some(Segment { start, offset, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unaligned_start_aligned_end() {
        let plan = ChunkPlan::new(0x100, 0x700).unwrap();
        assert_eq!(
            plan.prefix(),
            Some(Segment {
                start: 0x100,
                offset: 0,
                len: 0x100,
            })
        );
        assert_eq!(
            plan.middle(),
            Some(Segment {
                start: 0x200,
                offset: 0x100,
                len: 0x600,
            })
        );
        assert_eq!(plan.suffix(), None);
        assert_eq!(plan.chunk_count(), 3);
    }

    #[test]
    fn test_aligned_range_is_all_middle() {
        let plan = ChunkPlan::new(0x1000, 0x2000).unwrap();
        assert_eq!(plan.prefix_len(), 0);
        assert_eq!(plan.middle_len(), 0x2000);
        assert_eq!(plan.suffix_len(), 0);
    }

    #[test]
    fn test_short_read_inside_one_chunk() {
        // Ends before the next boundary: everything is prefix
        let plan = ChunkPlan::new(0x10, 0x20).unwrap();
        assert_eq!(plan.prefix_len(), 0x20);
        assert_eq!(plan.middle(), None);
        assert_eq!(plan.suffix(), None);

        // Aligned start, less than a chunk: everything is suffix
        let plan = ChunkPlan::new(0x200, 0x20).unwrap();
        assert_eq!(plan.prefix(), None);
        assert_eq!(plan.middle(), None);
        assert_eq!(
            plan.suffix(),
            Some(Segment {
                start: 0x200,
                offset: 0,
                len: 0x20,
            })
        );
    }

    #[test]
    fn test_prefix_middle_suffix() {
        let plan = ChunkPlan::new(0x1f0, 0x430).unwrap();
        assert_eq!(plan.prefix_len(), 0x10);
        assert_eq!(plan.middle_len(), 0x400);
        assert_eq!(plan.suffix_len(), 0x20);
        assert_eq!(plan.suffix().map(|s| s.start), Some(0x600));
    }

    #[test]
    fn test_empty_and_overflowing_ranges() {
        let plan = ChunkPlan::new(0x123, 0).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.prefix(), None);

        assert!(ChunkPlan::new(u32::MAX, 1).is_some());
        assert!(ChunkPlan::new(u32::MAX, 2).is_none());
        assert!(ChunkPlan::new(0xffff_fe00, 0x200).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1024))]

        #[test]
        fn prop_segments_cover_range(start in any::<u32>(), len in 0usize..0x20_0000) {
            prop_assume!(u64::from(start) + len as u64 <= 1 << 32);
            let plan = ChunkPlan::new(start, len).unwrap();

            prop_assert_eq!(plan.prefix_len() + plan.middle_len() + plan.suffix_len(), len);
            prop_assert!(plan.prefix_len() < BULK_CHUNK_SIZE);
            prop_assert!(plan.suffix_len() < BULK_CHUNK_SIZE);

            // Segments are contiguous and in address order
            let mut next = 0usize;
            for seg in [plan.prefix(), plan.middle(), plan.suffix()].into_iter().flatten() {
                prop_assert_eq!(seg.offset, next);
                prop_assert_eq!(u64::from(seg.start), u64::from(start) + seg.offset as u64);
                next += seg.len;
            }
            prop_assert_eq!(next, len);
        }

        #[test]
        fn prop_middle_is_chunk_aligned(start in any::<u32>(), len in 0usize..0x20_0000) {
            prop_assume!(u64::from(start) + len as u64 <= 1 << 32);
            let plan = ChunkPlan::new(start, len).unwrap();

            if let Some(middle) = plan.middle() {
                let end = u64::from(middle.start) + middle.len as u64;
                prop_assert_eq!(middle.start as usize % BULK_CHUNK_SIZE, 0);
                prop_assert_eq!(end % BULK_CHUNK_SIZE as u64, 0);
                prop_assert_eq!(plan.chunk_count() * BULK_CHUNK_SIZE, middle.len);
            } else {
                prop_assert_eq!(plan.chunk_count(), 0);
            }
        }
    }
}
