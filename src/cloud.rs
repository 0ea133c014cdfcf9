// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Capacity-bounded `sensor_msgs/PointCloud2` clouds.
//!
//! A [`Cloud`] owns a `PointCloud2` message whose data buffer is reserved once
//! for `capacity` points and reused across accumulation cycles. Points are
//! packed little-endian in one of two layouts:
//!
//! ## 16-byte format (xyz + intensity)
//! ```text
//! ┌───────┬───────┬───────┬───────────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ intensity:f32 │
//! │ 4B    │ 4B    │ 4B    │ 4B            │
//! └───────┴───────┴───────┴───────────────┘
//! ```
//!
//! ## 18-byte format (xyz + intensity + ring)
//! ```text
//! ┌───────┬───────┬───────┬───────────────┬──────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ intensity:f32 │ ring:u16 │
//! │ 4B    │ 4B    │ 4B    │ 4B            │ 2B       │
//! └───────┴───────┴───────┴───────────────┴──────────┘
//! ```
//!
//! The layout is selected once through [`PointEncoding`]; hot loops are
//! generic over [`PointEncoder`] so the choice is made outside the per-point
//! loop.

use crate::buffer::Point;
use edgefirst_schemas::{
    builtin_interfaces::Time,
    sensor_msgs::{PointCloud2, PointField},
    std_msgs::Header,
};

/// Point field data types for PointCloud2 messages.
///
/// These values correspond to the ROS sensor_msgs/PointField datatype field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

impl PointFieldType {
    pub fn from_datatype(datatype: u8) -> Option<Self> {
        match datatype {
            1 => Some(PointFieldType::INT8),
            2 => Some(PointFieldType::UINT8),
            3 => Some(PointFieldType::INT16),
            4 => Some(PointFieldType::UINT16),
            5 => Some(PointFieldType::INT32),
            6 => Some(PointFieldType::UINT32),
            7 => Some(PointFieldType::FLOAT32),
            8 => Some(PointFieldType::FLOAT64),
            _ => None,
        }
    }

    /// Size in bytes of one element of this type.
    pub fn size(self) -> usize {
        match self {
            PointFieldType::INT8 | PointFieldType::UINT8 => 1,
            PointFieldType::INT16 | PointFieldType::UINT16 => 2,
            PointFieldType::INT32 | PointFieldType::UINT32 | PointFieldType::FLOAT32 => 4,
            PointFieldType::FLOAT64 => 8,
        }
    }
}

fn field(name: &str, offset: u32, datatype: PointFieldType) -> PointField {
    PointField {
        name: String::from(name),
        offset,
        datatype: datatype as u8,
        count: 1,
    }
}

/// Build the XYZ + intensity point fields (16-byte stride).
pub fn xyzi_fields() -> Vec<PointField> {
    vec![
        field("x", 0, PointFieldType::FLOAT32),
        field("y", 4, PointFieldType::FLOAT32),
        field("z", 8, PointFieldType::FLOAT32),
        field("intensity", 12, PointFieldType::FLOAT32),
    ]
}

/// Build the XYZ + intensity + ring point fields (18-byte stride).
pub fn xyzi_ring_fields() -> Vec<PointField> {
    let mut fields = xyzi_fields();
    fields.push(field("ring", 16, PointFieldType::UINT16));
    fields
}

/// Output point layout of a cloud.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PointEncoding {
    /// `x, y, z, intensity`
    #[default]
    Xyzi,
    /// `x, y, z, intensity, ring`
    XyziRing,
}

impl PointEncoding {
    /// Select the encoding from the `ring_information` flag.
    pub fn with_ring(ring_information: bool) -> Self {
        if ring_information {
            PointEncoding::XyziRing
        } else {
            PointEncoding::Xyzi
        }
    }

    pub fn point_step(self) -> usize {
        match self {
            PointEncoding::Xyzi => Xyzi::POINT_STEP,
            PointEncoding::XyziRing => XyziRing::POINT_STEP,
        }
    }

    pub fn fields(self) -> Vec<PointField> {
        match self {
            PointEncoding::Xyzi => xyzi_fields(),
            PointEncoding::XyziRing => xyzi_ring_fields(),
        }
    }

    pub fn has_ring(self) -> bool {
        self == PointEncoding::XyziRing
    }
}

/// Static point encoder used to monomorphise per-point loops.
pub trait PointEncoder {
    const ENCODING: PointEncoding;
    const POINT_STEP: usize;

    /// Append the packed representation of `point` to `out`.
    fn encode(point: &Point, out: &mut Vec<u8>);
}

/// Encoder for [`PointEncoding::Xyzi`].
pub struct Xyzi;

/// Encoder for [`PointEncoding::XyziRing`].
pub struct XyziRing;

impl PointEncoder for Xyzi {
    const ENCODING: PointEncoding = PointEncoding::Xyzi;
    const POINT_STEP: usize = 16;

    #[inline(always)]
    fn encode(point: &Point, out: &mut Vec<u8>) {
        out.extend_from_slice(&point.x.to_le_bytes());
        out.extend_from_slice(&point.y.to_le_bytes());
        out.extend_from_slice(&point.z.to_le_bytes());
        out.extend_from_slice(&point.intensity.to_le_bytes());
    }
}

impl PointEncoder for XyziRing {
    const ENCODING: PointEncoding = PointEncoding::XyziRing;
    const POINT_STEP: usize = 18;

    #[inline(always)]
    fn encode(point: &Point, out: &mut Vec<u8>) {
        Xyzi::encode(point, out);
        out.extend_from_slice(&point.ring_id.to_le_bytes());
    }
}

/// Point cloud message with a fixed maximum point capacity.
#[derive(Debug, Clone)]
pub struct Cloud {
    msg: PointCloud2,
    encoding: PointEncoding,
    capacity: usize,
    len: usize,
}

impl Cloud {
    /// Create an empty cloud in `frame_id` with storage for `capacity` points.
    pub fn new(frame_id: impl Into<String>, encoding: PointEncoding, capacity: usize) -> Self {
        let point_step = encoding.point_step();
        let msg = PointCloud2 {
            header: Header {
                stamp: Time { sec: 0, nanosec: 0 },
                frame_id: frame_id.into(),
            },
            height: 1,
            width: 0,
            fields: encoding.fields(),
            is_bigendian: false,
            point_step: point_step as u32,
            row_step: 0,
            data: Vec::with_capacity(capacity * point_step),
            is_dense: true,
        };

        Self {
            msg,
            encoding,
            capacity,
            len: 0,
        }
    }

    /// Drop all points and make sure the full capacity is reserved.
    ///
    /// Never reallocates once the initial reservation is in place.
    pub fn clear(&mut self) {
        self.msg.data.clear();
        self.msg.data.reserve(self.capacity * self.encoding.point_step());
        self.msg.width = 0;
        self.msg.row_step = 0;
        self.len = 0;
    }

    /// Number of points written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    #[inline]
    pub fn encoding(&self) -> PointEncoding {
        self.encoding
    }

    pub fn frame_id(&self) -> &str {
        &self.msg.header.frame_id
    }

    pub fn stamp(&self) -> &Time {
        &self.msg.header.stamp
    }

    /// Append a point using a statically selected encoder.
    ///
    /// Returns `false` without writing anything when the cloud is full.
    #[inline(always)]
    pub fn push_with<E: PointEncoder>(&mut self, point: &Point) -> bool {
        debug_assert_eq!(E::ENCODING, self.encoding);
        if self.is_full() {
            return false;
        }
        E::encode(point, &mut self.msg.data);
        self.len += 1;
        true
    }

    /// Append a point using the cloud's runtime encoding.
    pub fn push(&mut self, point: &Point) -> bool {
        match self.encoding {
            PointEncoding::Xyzi => self.push_with::<Xyzi>(point),
            PointEncoding::XyziRing => self.push_with::<XyziRing>(point),
        }
    }

    /// Shrink the logical size to `len` points.
    pub fn resize(&mut self, len: usize) {
        let len = len.min(self.len);
        self.msg.data.truncate(len * self.encoding.point_step());
        self.len = len;
        self.update_size_fields();
    }

    /// Recompute the derived size fields and stamp the cloud.
    pub fn finalize(&mut self, stamp: Time) {
        self.update_size_fields();
        self.msg.header.stamp = stamp;
    }

    fn update_size_fields(&mut self) {
        self.msg.height = 1;
        self.msg.width = self.len as u32;
        self.msg.row_step = self.msg.width * self.msg.point_step;
    }

    /// The underlying message, ready for serialization.
    pub fn msg(&self) -> &PointCloud2 {
        &self.msg
    }

    /// Decode the point at `index`.
    pub fn point(&self, index: usize) -> Option<Point> {
        if index >= self.len {
            return None;
        }
        let step = self.encoding.point_step();
        let d = &self.msg.data[index * step..(index + 1) * step];
        let f = |o: usize| f32::from_le_bytes([d[o], d[o + 1], d[o + 2], d[o + 3]]);
        let ring_id = match self.encoding {
            PointEncoding::Xyzi => 0,
            PointEncoding::XyziRing => u16::from_le_bytes([d[16], d[17]]),
        };
        Some(Point::new(f(0), f(4), f(8), f(12), ring_id))
    }

    /// Iterate over the decoded points.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        (0..self.len).filter_map(move |i| self.point(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builders() {
        let fields = xyzi_fields();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0].name, "x");
        assert_eq!(fields[3].name, "intensity");
        assert_eq!(fields[3].offset, 12);
        assert_eq!(fields[3].datatype, PointFieldType::FLOAT32 as u8);

        let ring = xyzi_ring_fields();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[4].name, "ring");
        assert_eq!(ring[4].offset, 16);
        assert_eq!(ring[4].datatype, PointFieldType::UINT16 as u8);
    }

    #[test]
    fn test_push_xyzi() {
        let mut cloud = Cloud::new("lidar", PointEncoding::Xyzi, 4);
        assert!(cloud.push(&Point::new(1.0, 10.0, 100.0, 128.0, 7)));
        assert_eq!(cloud.len(), 1);

        let data = &cloud.msg().data;
        assert_eq!(data.len(), 16);
        let x0 = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let z0 = f32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let i0 = f32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        assert_eq!(x0, 1.0);
        assert_eq!(z0, 100.0);
        assert_eq!(i0, 128.0);

        // Ring is not carried by the 16-byte format
        assert_eq!(cloud.point(0).unwrap().ring_id, 0);
    }

    #[test]
    fn test_push_ring() {
        let mut cloud = Cloud::new("lidar", PointEncoding::XyziRing, 4);
        cloud.push(&Point::new(1.0, 2.0, 3.0, 4.0, 31));
        cloud.push(&Point::new(5.0, 6.0, 7.0, 8.0, 127));
        assert_eq!(cloud.msg().data.len(), 36);
        assert_eq!(cloud.point(1), Some(Point::new(5.0, 6.0, 7.0, 8.0, 127)));
        assert_eq!(cloud.point(2), None);
    }

    #[test]
    fn test_capacity_respected() {
        let mut cloud = Cloud::new("lidar", PointEncoding::Xyzi, 2);
        assert!(cloud.push(&Point::default()));
        assert!(cloud.push(&Point::default()));
        assert!(cloud.is_full());
        assert!(!cloud.push(&Point::default()));
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.msg().data.len(), 32);
    }

    #[test]
    fn test_finalize_and_clear() {
        let mut cloud = Cloud::new("lidar", PointEncoding::XyziRing, 10);
        let reserved = cloud.msg().data.capacity();
        for i in 0..3 {
            cloud.push(&Point::new(i as f32, 0.0, 0.0, 0.0, i));
        }
        cloud.finalize(Time { sec: 5, nanosec: 6 });
        assert_eq!(cloud.msg().width, 3);
        assert_eq!(cloud.msg().height, 1);
        assert_eq!(cloud.msg().row_step, 54);
        assert_eq!(cloud.stamp().sec, 5);

        cloud.resize(1);
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud.msg().width, 1);

        cloud.clear();
        assert!(cloud.is_empty());
        assert_eq!(cloud.msg().width, 0);
        assert_eq!(cloud.msg().data.capacity(), reserved);
        assert_eq!(cloud.frame_id(), "lidar");
    }

    #[test]
    fn test_datatype_sizes() {
        assert_eq!(PointFieldType::from_datatype(7), Some(PointFieldType::FLOAT32));
        assert_eq!(PointFieldType::from_datatype(0), None);
        assert_eq!(PointFieldType::UINT16.size(), 2);
        assert_eq!(PointFieldType::FLOAT64.size(), 8);
    }
}
