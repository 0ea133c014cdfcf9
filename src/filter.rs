// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Angular/radial point filter with a static rigid transform.
//!
//! [`FilterTransform`] accepts `sensor_msgs/PointCloud2` messages from one
//! input frame, keeps the points inside a [`FilterWindow`] and re-projects
//! them into the output frame with a [`StaticTransform`]. The output cloud is
//! allocated once for `pcl_size` points and reused for every message.

use crate::{
    buffer::Point,
    cloud::{Cloud, PointEncoding, PointFieldType, XyziRing},
    lidar::Error,
};
use clap::ValueEnum;
use edgefirst_schemas::{
    builtin_interfaces::Time,
    sensor_msgs::{PointCloud2, PointField},
};
use nalgebra::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion};
use std::f32::consts::TAU;
use tracing::{instrument, warn};

/// Angular spans closer than this to a full turn are treated as a full turn.
const ANGLE_EPSILON: f32 = 1e-4;

/// Minimum quaternion norm accepted for the static transform.
const MIN_QUATERNION_NORM: f32 = 1e-6;

/// Distance used for the radius test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RadiusMode {
    /// Distance in the XY plane
    #[default]
    Planar,
    /// Full 3-D distance from the origin
    Spherical,
}

/// Bearing and range limits of the points kept by the filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterWindow {
    start_angle: f32,
    end_angle: f32,
    full_circle: bool,
    min_radius: f32,
    max_radius: f32,
    radius_mode: RadiusMode,
}

impl FilterWindow {
    /// Angles are in radians measured counter-clockwise from +X. The window
    /// runs from `start_angle` to `end_angle` and wraps through zero when
    /// `start_angle > end_angle`. Both radius limits are inclusive and
    /// `max_radius` may be infinite.
    pub fn new(
        start_angle: f32,
        end_angle: f32,
        min_radius: f32,
        max_radius: f32,
        radius_mode: RadiusMode,
    ) -> Result<Self, Error> {
        if !start_angle.is_finite() || !end_angle.is_finite() {
            return Err(Error::Config(format!(
                "filter angles must be finite, got {} and {}",
                start_angle, end_angle
            )));
        }
        if min_radius.is_nan() || max_radius.is_nan() || min_radius < 0.0 {
            return Err(Error::Config(format!(
                "invalid filter radius {}..{}",
                min_radius, max_radius
            )));
        }
        if min_radius > max_radius {
            return Err(Error::Config(format!(
                "min radius {} larger than max radius {}",
                min_radius, max_radius
            )));
        }

        let full_circle = (end_angle - start_angle).abs() >= TAU - ANGLE_EPSILON;
        let (start_angle, end_angle) = match full_circle {
            true => (0.0, 0.0),
            false => (normalize_angle(start_angle), normalize_angle(end_angle)),
        };

        Ok(Self {
            start_angle,
            end_angle,
            full_circle,
            min_radius,
            max_radius,
            radius_mode,
        })
    }

    /// Window that keeps every point.
    pub fn full() -> Self {
        Self {
            start_angle: 0.0,
            end_angle: 0.0,
            full_circle: true,
            min_radius: 0.0,
            max_radius: f32::INFINITY,
            radius_mode: RadiusMode::Planar,
        }
    }

    pub fn radius_mode(&self) -> RadiusMode {
        self.radius_mode
    }

    /// Whether `bearing` (radians, any range) lies inside the angular window.
    pub fn contains_bearing(&self, bearing: f32) -> bool {
        if self.full_circle {
            return true;
        }
        let bearing = normalize_angle(bearing);
        if self.start_angle <= self.end_angle {
            bearing >= self.start_angle && bearing <= self.end_angle
        } else {
            bearing >= self.start_angle || bearing <= self.end_angle
        }
    }

    pub fn contains_radius(&self, point: &Point) -> bool {
        let planar = point.x * point.x + point.y * point.y;
        let squared = match self.radius_mode {
            RadiusMode::Planar => planar,
            RadiusMode::Spherical => planar + point.z * point.z,
        };
        squared >= self.min_radius * self.min_radius && squared <= self.max_radius * self.max_radius
    }

    #[inline]
    pub fn contains(&self, point: &Point) -> bool {
        self.contains_radius(point) && self.contains_bearing(point.y.atan2(point.x))
    }
}

impl Default for FilterWindow {
    fn default() -> Self {
        Self::full()
    }
}

/// Map an angle in radians into `[0, 2π)`.
fn normalize_angle(angle: f32) -> f32 {
    let angle = angle.rem_euclid(TAU);
    if angle >= TAU { 0.0 } else { angle }
}

/// Rigid transform from the input frame to the output frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StaticTransform {
    isometry: Isometry3<f32>,
}

impl StaticTransform {
    /// Build from a quaternion given as `[x, y, z, w]` and a translation in
    /// meters. The quaternion is normalized; a zero quaternion is rejected.
    pub fn new(quaternion: [f32; 4], translation: [f32; 3]) -> Result<Self, Error> {
        if quaternion.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Config(String::from(
                "static transform components must be finite",
            )));
        }

        let [x, y, z, w] = quaternion;
        let rotation = UnitQuaternion::try_new(Quaternion::new(w, x, y, z), MIN_QUATERNION_NORM)
            .ok_or_else(|| {
                Error::Config(format!(
                    "static transform quaternion {:?} has zero norm",
                    quaternion
                ))
            })?;
        let [tx, ty, tz] = translation;

        Ok(Self {
            isometry: Isometry3::from_parts(Translation3::new(tx, ty, tz), rotation),
        })
    }

    pub fn identity() -> Self {
        Self {
            isometry: Isometry3::identity(),
        }
    }

    pub fn isometry(&self) -> &Isometry3<f32> {
        &self.isometry
    }

    /// Rotate then translate the geometry of `point`; other attributes are
    /// unchanged.
    #[inline]
    pub fn apply(&self, point: &Point) -> Point {
        let p = self
            .isometry
            .transform_point(&Point3::new(point.x, point.y, point.z));
        Point::new(p.x, p.y, p.z, point.intensity, point.ring_id)
    }
}

impl Default for StaticTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Validated field layout of an input cloud.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloudLayout {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub intensity: Option<(usize, PointFieldType)>,
    pub ring: Option<usize>,
    pub point_step: usize,
    /// Number of complete points that can be read
    pub points: usize,
    pub big_endian: bool,
    /// Some fields or bytes of each point are not used
    pub subset: bool,
    /// Data length disagrees with `width * height * point_step`
    pub misaligned: bool,
}

impl CloudLayout {
    /// Read the point at `index`. `data` must hold at least `points` points.
    #[inline]
    pub fn read(&self, data: &[u8], index: usize) -> Point {
        let base = index * self.point_step;
        let be = self.big_endian;
        let intensity = match self.intensity {
            Some((offset, PointFieldType::UINT8)) => data[base + offset] as f32,
            Some((offset, _)) => read_f32(data, base + offset, be),
            None => 0.0,
        };
        let ring_id = match self.ring {
            Some(offset) => read_u16(data, base + offset, be),
            None => 0,
        };
        Point::new(
            read_f32(data, base + self.x, be),
            read_f32(data, base + self.y, be),
            read_f32(data, base + self.z, be),
            intensity,
            ring_id,
        )
    }
}

fn read_f32(data: &[u8], offset: usize, big_endian: bool) -> f32 {
    let bytes = [
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ];
    if big_endian {
        f32::from_be_bytes(bytes)
    } else {
        f32::from_le_bytes(bytes)
    }
}

fn read_u16(data: &[u8], offset: usize, big_endian: bool) -> u16 {
    let bytes = [data[offset], data[offset + 1]];
    if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    }
}

fn find_field<'a>(fields: &'a [PointField], name: &str) -> Option<&'a PointField> {
    fields.iter().find(|f| f.name == name)
}

/// Locate a field of one of the `accepted` types that fits in `point_step`.
fn field_offset(
    msg: &PointCloud2,
    name: &str,
    accepted: &[PointFieldType],
) -> Result<Option<(usize, PointFieldType)>, Error> {
    let Some(field) = find_field(&msg.fields, name) else {
        return Ok(None);
    };
    let Some(datatype) = PointFieldType::from_datatype(field.datatype)
        .filter(|datatype| accepted.contains(datatype))
    else {
        return Ok(None);
    };

    let offset = field.offset as usize;
    if offset + datatype.size() > msg.point_step as usize {
        return Err(Error::InvalidLayout(format!(
            "field {} at offset {} runs past point step {}",
            name, offset, msg.point_step
        )));
    }
    Ok(Some((offset, datatype)))
}

/// Validate the layout of `msg` and work out how many points are safe to read.
pub fn sanitize(msg: &PointCloud2) -> Result<CloudLayout, Error> {
    let point_step = msg.point_step as usize;
    if point_step == 0 {
        return Err(Error::InvalidLayout(String::from("point step is zero")));
    }

    let mut coords = [0usize; 3];
    for (coord, name) in coords.iter_mut().zip(["x", "y", "z"]) {
        *coord = match field_offset(msg, name, &[PointFieldType::FLOAT32])? {
            Some((offset, _)) => offset,
            None => {
                return Err(Error::InvalidLayout(format!(
                    "point cloud has no FLOAT32 {} field",
                    name
                )));
            }
        };
    }
    let [x, y, z] = coords;

    let intensity = field_offset(
        msg,
        "intensity",
        &[PointFieldType::FLOAT32, PointFieldType::UINT8],
    )?;
    let ring = field_offset(msg, "ring", &[PointFieldType::UINT16])?.map(|(offset, _)| offset);

    let used_fields = 3 + intensity.is_some() as usize + ring.is_some() as usize;
    let used_end = [x + 4, y + 4, z + 4]
        .into_iter()
        .chain(intensity.map(|(offset, datatype)| offset + datatype.size()))
        .chain(ring.map(|offset| offset + 2))
        .max()
        .unwrap_or(0);
    let subset = msg.fields.len() != used_fields || used_end != point_step;

    // Declared sizes come off the wire and may overflow
    let declared = (msg.width as usize).checked_mul(msg.height as usize);
    let whole = msg.data.len() / point_step;
    let points = declared.map_or(whole, |declared| whole.min(declared));
    let misaligned = declared.and_then(|declared| declared.checked_mul(point_step))
        != Some(msg.data.len());

    Ok(CloudLayout {
        x,
        y,
        z,
        intensity,
        ring,
        point_step,
        points,
        big_endian: msg.is_bigendian,
        subset,
        misaligned,
    })
}

/// Configuration of a [`FilterTransform`].
#[derive(Clone, Debug, PartialEq)]
pub struct FilterConfig {
    pub input_frame_id: String,
    pub output_frame_id: String,
    pub window: FilterWindow,
    pub transform: StaticTransform,
    /// Capacity of the output cloud in points
    pub pcl_size: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            input_frame_id: String::from("lidar"),
            output_frame_id: String::from("base_link"),
            window: FilterWindow::full(),
            transform: StaticTransform::identity(),
            pcl_size: 55_000,
        }
    }
}

/// Filters clouds by [`FilterWindow`] and re-projects the survivors.
pub struct FilterTransform {
    input_frame_id: String,
    window: FilterWindow,
    transform: StaticTransform,
    output: Cloud,
}

impl FilterTransform {
    pub fn new(config: FilterConfig) -> Result<Self, Error> {
        if config.pcl_size == 0 {
            return Err(Error::Config(String::from(
                "output cloud size must be at least one point",
            )));
        }

        Ok(Self {
            output: Cloud::new(
                config.output_frame_id,
                PointEncoding::XyziRing,
                config.pcl_size,
            ),
            input_frame_id: config.input_frame_id,
            window: config.window,
            transform: config.transform,
        })
    }

    pub fn input_frame_id(&self) -> &str {
        &self.input_frame_id
    }

    /// The result of the last successful [`FilterTransform::process`] call.
    pub fn output(&self) -> &Cloud {
        &self.output
    }

    /// Filter and transform `input` into the output cloud.
    ///
    /// A message from the wrong frame or with an unusable layout leaves the
    /// previous output untouched. On overflow the output is left empty.
    #[instrument(skip_all)]
    pub fn process(&mut self, input: &PointCloud2) -> Result<&Cloud, Error> {
        if input.header.frame_id != self.input_frame_id {
            return Err(Error::FrameMismatch {
                expected: self.input_frame_id.clone(),
                actual: input.header.frame_id.clone(),
            });
        }

        let layout = sanitize(input)?;
        if layout.subset {
            warn!("using only a subset of point cloud fields");
        }
        if layout.misaligned {
            warn!(
                "misaligned data: {} bytes for {} points of {} bytes, using {} points",
                input.data.len(),
                u64::from(input.width) * u64::from(input.height),
                layout.point_step,
                layout.points
            );
        }

        self.output.clear();
        for index in 0..layout.points {
            let point = layout.read(&input.data, index);
            if !self.window.contains(&point) {
                continue;
            }
            if !self.output.push_with::<XyziRing>(&self.transform.apply(&point)) {
                self.output.clear();
                return Err(Error::CapacityExceeded {
                    capacity: self.output.capacity(),
                });
            }
        }

        self.output.finalize(Time {
            sec: input.header.stamp.sec,
            nanosec: input.header.stamp.nanosec,
        });
        Ok(&self.output)
    }
}
