//! Contiguous Buffer Region
//!
//! All I/O buffers live in a single allocation that is carved into
//! fixed-size segments at startup. Carving uses `BytesMut::split_to`, which
//! hands out disjoint, independently owned views of the same region: a
//! segment can be written through only by whoever holds it, and no two
//! segments ever overlap.
//!
//! Segments are never resized. Growing a `BytesMut` could move it out of the
//! region, so every write goes through [`BufferSegment::fill_from`] or a
//! slice of the fixed length.

use bytes::BytesMut;
use std::ops::{Deref, DerefMut};

/// The pre-allocated region that segments are carved from.
#[derive(Debug)]
pub struct BufferPool {
    /// Uncarved tail of the region
    region: BytesMut,

    /// Size of each segment
    segment_size: usize,

    /// Offset of the next segment within the original region
    next_offset: usize,

    /// Number of segments the region was sized for
    segment_count: usize,
}

impl BufferPool {
    /// Allocates a zeroed region of `segment_size * segment_count` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the region size overflows `usize`. `Settings` validation
    /// rejects such configurations before a pool is built.
    pub fn new(segment_size: usize, segment_count: usize) -> Self {
        let total = segment_size
            .checked_mul(segment_count)
            .expect("buffer region size overflows usize");

        Self {
            region: BytesMut::zeroed(total),
            segment_size,
            next_offset: 0,
            segment_count,
        }
    }

    /// Carves the next segment off the region.
    ///
    /// Returns `None` once every segment has been handed out.
    pub fn take_segment(&mut self) -> Option<BufferSegment> {
        if self.segment_size == 0 || self.region.len() < self.segment_size {
            return None;
        }

        let buf = self.region.split_to(self.segment_size);
        let segment = BufferSegment {
            offset: self.next_offset,
            buf,
        };
        self.next_offset += self.segment_size;
        Some(segment)
    }

    /// Carves every remaining segment.
    pub fn take_all(&mut self) -> Vec<BufferSegment> {
        std::iter::from_fn(|| self.take_segment()).collect()
    }

    /// Number of segments not yet handed out.
    pub fn remaining(&self) -> usize {
        if self.segment_size == 0 {
            return 0;
        }
        self.region.len() / self.segment_size
    }

    /// Size of each segment.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of segments the region holds in total.
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }
}

/// A fixed-size byte range of the buffer region.
#[derive(Debug)]
pub struct BufferSegment {
    /// Offset of this segment within the region
    offset: usize,

    /// Exclusive view of the segment's bytes
    buf: BytesMut,
}

impl BufferSegment {
    /// Offset of the segment within the region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fixed capacity of the segment.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Copies as much of `src` as fits and returns the number of bytes copied.
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&src[..n]);
        n
    }
}

impl Deref for BufferSegment {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for BufferSegment {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carves_expected_count() {
        let mut pool = BufferPool::new(64, 4);
        assert_eq!(pool.remaining(), 4);

        let segments = pool.take_all();
        assert_eq!(segments.len(), 4);
        assert_eq!(pool.remaining(), 0);
        assert!(pool.take_segment().is_none());

        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.offset(), i * 64);
            assert_eq!(segment.capacity(), 64);
        }
    }

    #[test]
    fn test_segments_are_contiguous_and_disjoint() {
        let mut pool = BufferPool::new(32, 8);
        let segments = pool.take_all();

        let base = segments[0].as_ptr() as usize;
        for (i, segment) in segments.iter().enumerate() {
            // Carved from one region, in order, without overlap
            assert_eq!(segment.as_ptr() as usize, base + i * 32);
        }
    }

    #[test]
    fn test_writes_stay_in_their_segment() {
        let mut pool = BufferPool::new(8, 3);
        let mut segments = pool.take_all();

        segments[1].fill_from(&[0xAB; 8]);

        assert!(segments[0].iter().all(|&b| b == 0));
        assert!(segments[1].iter().all(|&b| b == 0xAB));
        assert!(segments[2].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_fill_from_is_bounded_by_capacity() {
        let mut pool = BufferPool::new(4, 1);
        let mut segment = pool.take_segment().unwrap();

        assert_eq!(segment.fill_from(b"abcdefgh"), 4);
        assert_eq!(&segment[..], b"abcd");
        assert_eq!(segment.capacity(), 4);

        assert_eq!(segment.fill_from(b"xy"), 2);
        assert_eq!(&segment[..], b"xycd");
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = BufferPool::new(16, 0);
        assert_eq!(pool.remaining(), 0);
        assert!(pool.take_segment().is_none());
    }
}
