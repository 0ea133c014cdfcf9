// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Fixed-capacity point block shared by the decoder and the assembler.
//!
//! A [`PointBlock`] holds the points of exactly one decoded datagram. Its
//! storage is allocated once at construction and reused for every packet:
//! [`PointBlock::clear`] only resets the length.
//!
//! ```text
//! ┌──────────────┐  convert()  ┌──────────────────────────────────────┐
//! │ UDP datagram │ ──────────► │ PointBlock                           │
//! │ (1206 bytes) │             │ [p, p, p, EOS, p, p, ...]  len ≤ cap │
//! └──────────────┘             └──────────────────────────────────────┘
//!                                          │ assemble()
//!                                          ▼
//!                                      Cloud(s)
//! ```
//!
//! # Example
//!
//! ```
//! use edgefirst_velodyne::buffer::{Point, PointBlock};
//!
//! let mut block = PointBlock::with_capacity(4);
//! block.push(Point::new(1.0, 2.0, 3.0, 10.0, 0));
//! block.push(Point::end_of_scan());
//! assert_eq!(block.len(), 2);
//! assert!(block.points()[1].is_end_of_scan());
//!
//! block.clear();
//! assert!(block.is_empty());
//! assert_eq!(block.capacity(), 4);
//! ```

use crate::velodyne::{BLOCKS_PER_PACKET, CHANNELS_PER_BLOCK};

/// Reserved ring id marking a synthetic scan-boundary point.
pub const END_OF_SCAN_ID: u16 = u16::MAX;

/// Maximum number of points one datagram can decode into: every channel of
/// every firing block, plus at most one boundary marker per block.
pub const POINT_BLOCK_CAPACITY: usize =
    BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK + BLOCKS_PER_PACKET;

/// One LiDAR return.
///
/// Points whose `ring_id` is [`END_OF_SCAN_ID`] carry no geometry; they are
/// control markers and never end up in an output cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
    /// Laser channel index.
    pub ring_id: u16,
}

impl Point {
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, intensity: f32, ring_id: u16) -> Self {
        Self {
            x,
            y,
            z,
            intensity,
            ring_id,
        }
    }

    /// The scan-boundary marker.
    #[inline]
    pub const fn end_of_scan() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0, END_OF_SCAN_ID)
    }

    #[inline]
    pub const fn is_end_of_scan(&self) -> bool {
        self.ring_id == END_OF_SCAN_ID
    }
}

/// Pre-allocated sequence of points with a fixed maximum capacity.
#[derive(Debug, Clone)]
pub struct PointBlock {
    points: Vec<Point>,
    capacity: usize,
}

impl PointBlock {
    /// Create a new block with the specified capacity.
    ///
    /// Memory is allocated once at construction; no allocations occur during
    /// normal operation (push/clear).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Block sized for a single Velodyne datagram.
    pub fn for_packet() -> Self {
        Self::with_capacity(POINT_BLOCK_CAPACITY)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.capacity
    }

    /// Clear all points, retaining the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Append a point.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the block is full. In release mode,
    /// points beyond capacity are silently ignored.
    #[inline]
    pub fn push(&mut self, point: Point) {
        debug_assert!(
            !self.is_full(),
            "PointBlock overflow: {} >= {}",
            self.points.len(),
            self.capacity
        );

        if !self.is_full() {
            self.points.push(point);
        }
    }

    /// Valid points in decode order.
    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Whether the block contains a scan-boundary marker.
    pub fn has_end_of_scan(&self) -> bool {
        self.points.iter().any(Point::is_end_of_scan)
    }
}

impl Default for PointBlock {
    fn default() -> Self {
        Self::for_packet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_block_basic() {
        let mut block = PointBlock::with_capacity(100);
        assert_eq!(block.len(), 0);
        assert!(block.is_empty());
        assert_eq!(block.capacity(), 100);

        block.push(Point::new(1.0, 2.0, 3.0, 128.0, 4));
        assert_eq!(block.len(), 1);
        assert_eq!(block.points()[0].x, 1.0);
        assert_eq!(block.points()[0].ring_id, 4);

        block.clear();
        assert!(block.is_empty());
        assert_eq!(block.capacity(), 100);
    }

    #[test]
    fn test_end_of_scan_marker() {
        let eos = Point::end_of_scan();
        assert!(eos.is_end_of_scan());
        assert_eq!(eos.ring_id, END_OF_SCAN_ID);
        assert!(!Point::new(0.0, 0.0, 0.0, 0.0, 127).is_end_of_scan());

        let mut block = PointBlock::with_capacity(3);
        block.push(Point::default());
        assert!(!block.has_end_of_scan());
        block.push(eos);
        assert!(block.has_end_of_scan());
    }

    #[test]
    fn test_packet_capacity() {
        assert_eq!(POINT_BLOCK_CAPACITY, 12 * 32 + 12);
        assert_eq!(PointBlock::for_packet().capacity(), POINT_BLOCK_CAPACITY);
    }

    #[test]
    fn test_clear_keeps_allocation() {
        let mut block = PointBlock::with_capacity(8);
        let ptr = block.points.as_ptr();
        for i in 0..8 {
            block.push(Point::new(i as f32, 0.0, 0.0, 0.0, 0));
        }
        assert!(block.is_full());
        block.clear();
        for i in 0..8 {
            block.push(Point::new(i as f32, 0.0, 0.0, 0.0, 0));
        }
        assert_eq!(ptr, block.points.as_ptr());
    }

    #[test]
    #[cfg_attr(debug_assertions, ignore)]
    fn test_point_block_overflow_ignored() {
        // This test only runs in release mode since debug_assert! panics in debug
        let mut block = PointBlock::with_capacity(2);
        block.push(Point::new(1.0, 1.0, 1.0, 1.0, 0));
        block.push(Point::new(2.0, 2.0, 2.0, 2.0, 0));
        block.push(Point::new(3.0, 3.0, 3.0, 3.0, 0));

        assert_eq!(block.len(), 2);
        assert_eq!(block.points()[1].x, 2.0);
    }
}
