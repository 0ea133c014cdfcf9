// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne VLP-16, VLP-32C and VLS-128 packet decoder.
//!
//! All three sensors share the same data packet shape and differ only in
//! their laser geometry, which is described by a static [`ModelGeometry`].
//!
//! # Packet Structure
//!
//! ## Data packet - 1206 bytes, port 2368
//! - Data: 12 firing blocks × 100 bytes = 1200 bytes
//!   - Flag: 2 bytes (`0xFF` followed by the laser bank byte)
//!   - Azimuth: 2 bytes, little-endian, 0.01° units
//!   - Channels: 32 × (2 bytes distance little-endian + 1 byte reflectivity)
//! - Timestamp: 4 bytes, microseconds past the hour
//! - Factory: return mode byte + product id byte
//!
//! ```text
//! ┌──────┬──────┬─────────┬─────────────────────────────┐
//! │ 0xFF │ bank │ azimuth │ 32 × (distance, reflectivity)│ × 12
//! └──────┴──────┴─────────┴─────────────────────────────┘
//! ┌───────────┬─────────────┬────────────┐
//! │ timestamp │ return mode │ product id │
//! └───────────┴─────────────┴────────────┘
//! ```
//!
//! The VLS-128 uses four bank bytes (`0xEE`, `0xDD`, `0xCC`, `0xBB`) to address
//! lasers 0-31, 32-63, 64-95 and 96-127. The other models only use `0xEE`.

use crate::{
    buffer::{Point, PointBlock},
    lidar::Error,
};
use clap::ValueEnum;
use std::{f32::consts::PI, fmt, str::FromStr};
use tracing::warn;

/// Data packet total size in bytes
pub const PACKET_SIZE: usize = 1206;

/// Number of firing blocks per data packet
pub const BLOCKS_PER_PACKET: usize = 12;

/// Size of each firing block in bytes
pub const BLOCK_SIZE: usize = 100;

/// Number of channel returns per firing block
pub const CHANNELS_PER_BLOCK: usize = 32;

/// Size of each channel return in bytes
const CHANNEL_SIZE: usize = 3;

/// Offset of the first channel in a block (flag + azimuth)
const BLOCK_HEADER_SIZE: usize = 4;

/// First byte of every block flag
const BLOCK_FLAG: u8 = 0xff;

/// Upper bank flag byte, the only bank of single-bank sensors
const BANK_UPPER: u8 = 0xee;

/// Azimuth values are in hundredths of a degree
const AZIMUTH_UNITS_PER_REV: u16 = 36_000;

/// Default Velodyne data port
pub const DATA_PORT: u16 = 2368;

/// Supported Velodyne sensor models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SensorModel {
    /// Puck, 16 lasers
    #[default]
    Vlp16,
    /// Ultra Puck, 32 lasers
    Vlp32c,
    /// Alpha Prime, 128 lasers
    Vls128,
}

impl SensorModel {
    pub fn geometry(self) -> &'static ModelGeometry {
        match self {
            SensorModel::Vlp16 => &VLP16,
            SensorModel::Vlp32c => &VLP32C,
            SensorModel::Vls128 => &VLS128,
        }
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.geometry().name)
    }
}

impl FromStr for SensorModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vlp16" => Ok(SensorModel::Vlp16),
            "vlp32c" => Ok(SensorModel::Vlp32c),
            "vls128" => Ok(SensorModel::Vls128),
            _ => Err(Error::Config(format!("model {} is not supported", s))),
        }
    }
}

/// Laser layout of one sensor model.
#[derive(Debug)]
pub struct ModelGeometry {
    pub name: &'static str,
    /// Product id reported in the packet factory byte
    pub product_id: u8,
    pub lasers: usize,
    /// Per-laser elevation angle in degrees
    pub elevation_deg: &'static [f32],
    /// Per-laser horizontal angle correction in degrees
    pub azimuth_offset_deg: &'static [f32],
    /// Per-laser vertical offset in meters, empty when not applicable
    pub vertical_offset_m: &'static [f32],
    /// Allowed bank bytes, index is the laser bank
    pub bank_flags: &'static [u8],
    /// Meters per raw distance unit
    pub distance_resolution: f32,
    pub min_range: f32,
    pub max_range: f32,
    /// Interval between consecutive laser firings in microseconds
    pub firing_us: f32,
    /// Duration of one full firing sequence in microseconds
    pub sequence_us: f32,
    /// Lasers fired at the same instant
    pub simultaneous: usize,
    /// Minimum backwards azimuth jump (0.01°) detected as a new revolution
    pub wrap_threshold: u16,
}

impl ModelGeometry {
    /// Number of (bank, channel) slots a block can address.
    #[inline]
    pub fn slots(&self) -> usize {
        self.bank_flags.len() * CHANNELS_PER_BLOCK
    }

    /// Laser index fed by `slot`.
    #[inline]
    pub fn laser(&self, slot: usize) -> usize {
        slot % self.lasers
    }

    /// Firing delay in microseconds of `slot` relative to the block azimuth.
    pub fn firing_delay_us(&self, slot: usize) -> f32 {
        let laser = self.laser(slot);
        let sequence = (slot % CHANNELS_PER_BLOCK) / self.lasers.min(CHANNELS_PER_BLOCK);
        sequence as f32 * self.sequence_us + (laser / self.simultaneous) as f32 * self.firing_us
    }

    fn bank(&self, flag: u8) -> Option<usize> {
        self.bank_flags.iter().position(|&b| b == flag)
    }
}

/// Return mode reported in the packet factory bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReturnMode {
    #[default]
    Strongest,
    Last,
    Dual,
    Unknown(u8),
}

impl From<u8> for ReturnMode {
    fn from(value: u8) -> Self {
        match value {
            0x37 => ReturnMode::Strongest,
            0x38 => ReturnMode::Last,
            0x39 => ReturnMode::Dual,
            val => ReturnMode::Unknown(val),
        }
    }
}

impl From<ReturnMode> for u8 {
    fn from(mode: ReturnMode) -> Self {
        match mode {
            ReturnMode::Strongest => 0x37,
            ReturnMode::Last => 0x38,
            ReturnMode::Dual => 0x39,
            ReturnMode::Unknown(val) => val,
        }
    }
}

/// Trailing metadata of a data packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketTail {
    /// Microseconds past the top of the hour
    pub timestamp_us: u32,
    pub return_mode: ReturnMode,
    pub product_id: u8,
}

impl PacketTail {
    fn parse(tail: &[u8]) -> Self {
        Self {
            timestamp_us: u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]),
            return_mode: ReturnMode::from(tail[4]),
            product_id: tail[5],
        }
    }
}

/// Precomputed geometry of one (bank, channel) slot.
#[derive(Clone, Copy, Debug)]
struct Slot {
    ring_id: u16,
    cos_elevation: f32,
    sin_elevation: f32,
    /// Horizontal correction plus firing delay, radians
    azimuth_offset: f32,
    vertical_offset: f32,
}

/// Translates Velodyne data packets into calibrated points.
///
/// The translator keeps the azimuth of the last decoded block so that a
/// revolution wrap spanning two packets is still detected.
pub struct VelodyneTranslator {
    model: SensorModel,
    geometry: &'static ModelGeometry,
    slots: Vec<Slot>,
    prev_azimuth: Option<u16>,
    tail: PacketTail,
    product_warned: bool,
}

impl VelodyneTranslator {
    /// Lowest supported rotation rate
    pub const MIN_RPM: f32 = 300.0;
    /// Highest supported rotation rate
    pub const MAX_RPM: f32 = 1200.0;

    /// Create a translator for `model` spinning at `rpm`.
    ///
    /// The rotation rate converts each laser's firing delay into an azimuth
    /// correction.
    pub fn new(model: SensorModel, rpm: f32) -> Result<Self, Error> {
        if !(Self::MIN_RPM..=Self::MAX_RPM).contains(&rpm) {
            return Err(Error::Config(format!(
                "rpm {} outside of supported range {}..={}",
                rpm,
                Self::MIN_RPM,
                Self::MAX_RPM
            )));
        }

        let geometry = model.geometry();
        let degrees_per_us = rpm * 360.0 / 60.0 / 1_000_000.0;
        let slots = (0..geometry.slots())
            .map(|slot| {
                let laser = geometry.laser(slot);
                let elevation = geometry.elevation_deg[laser].to_radians();
                let azimuth_offset = geometry.azimuth_offset_deg[laser]
                    + geometry.firing_delay_us(slot) * degrees_per_us;
                Slot {
                    ring_id: laser as u16,
                    cos_elevation: elevation.cos(),
                    sin_elevation: elevation.sin(),
                    azimuth_offset: azimuth_offset.to_radians(),
                    vertical_offset: geometry
                        .vertical_offset_m
                        .get(laser)
                        .copied()
                        .unwrap_or(0.0),
                }
            })
            .collect();

        Ok(Self {
            model,
            geometry,
            slots,
            prev_azimuth: None,
            tail: PacketTail::default(),
            product_warned: false,
        })
    }

    pub fn model(&self) -> SensorModel {
        self.model
    }

    /// Trailing metadata of the last successfully decoded packet.
    pub fn tail(&self) -> &PacketTail {
        &self.tail
    }

    /// Decode `packet` into `out`.
    ///
    /// `out` is always cleared first. Returns with zero or more points and,
    /// where a revolution wraps, one [`Point::end_of_scan`] marker at the
    /// position of the wrap. Returns with invalid ranges are skipped.
    pub fn convert(&mut self, packet: &[u8], out: &mut PointBlock) -> Result<(), Error> {
        out.clear();

        if packet.len() != PACKET_SIZE {
            return Err(Error::MalformedPacket(format!(
                "{} packet size {} bytes, expected {}",
                self.geometry.name,
                packet.len(),
                PACKET_SIZE
            )));
        }

        // Validate every block before touching translator state.
        let mut banks = [0usize; BLOCKS_PER_PACKET];
        for (index, bank) in banks.iter_mut().enumerate() {
            let block = &packet[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE];
            *bank = self.parse_block_header(index, block)?;
        }

        let tail = PacketTail::parse(&packet[BLOCKS_PER_PACKET * BLOCK_SIZE..]);
        if tail.product_id != self.geometry.product_id && !self.product_warned {
            warn!(
                "packet product id 0x{:02x} does not match configured {} (0x{:02x})",
                tail.product_id, self.geometry.name, self.geometry.product_id
            );
            self.product_warned = true;
        }
        self.tail = tail;

        for (index, bank) in banks.into_iter().enumerate() {
            let block = &packet[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE];
            self.decode_block(block, bank, out);
        }

        Ok(())
    }

    fn parse_block_header(&self, index: usize, block: &[u8]) -> Result<usize, Error> {
        let bank = match (block[0], self.geometry.bank(block[1])) {
            (BLOCK_FLAG, Some(bank)) => bank,
            _ => {
                return Err(Error::MalformedPacket(format!(
                    "invalid flag 0x{:02x}{:02x} in block {}",
                    block[0], block[1], index
                )));
            }
        };

        let azimuth = u16::from_le_bytes([block[2], block[3]]);
        if azimuth >= AZIMUTH_UNITS_PER_REV {
            return Err(Error::MalformedPacket(format!(
                "azimuth {} out of range in block {}",
                azimuth, index
            )));
        }

        Ok(bank)
    }

    fn decode_block(&mut self, block: &[u8], bank: usize, out: &mut PointBlock) {
        let azimuth = u16::from_le_bytes([block[2], block[3]]);
        if let Some(prev) = self.prev_azimuth {
            if prev > azimuth && prev - azimuth > self.geometry.wrap_threshold {
                out.push(Point::end_of_scan());
            }
        }
        self.prev_azimuth = Some(azimuth);

        let base = azimuth as f32 * (PI / 18_000.0);
        let slots = &self.slots[bank * CHANNELS_PER_BLOCK..(bank + 1) * CHANNELS_PER_BLOCK];

        for (channel, slot) in slots.iter().enumerate() {
            let offset = BLOCK_HEADER_SIZE + channel * CHANNEL_SIZE;
            let raw = u16::from_le_bytes([block[offset], block[offset + 1]]);
            if raw == 0 {
                continue;
            }

            let range = raw as f32 * self.geometry.distance_resolution;
            if range < self.geometry.min_range || range > self.geometry.max_range {
                continue;
            }

            let (sin_az, cos_az) = (base + slot.azimuth_offset).sin_cos();
            let planar = range * slot.cos_elevation;
            out.push(Point::new(
                planar * cos_az,
                -planar * sin_az,
                range * slot.sin_elevation + slot.vertical_offset,
                block[offset + 2] as f32,
                slot.ring_id,
            ));
        }
    }
}

/// Builds data packets in the sensor wire layout.
///
/// Used to synthesize traffic for replay tooling, benchmarks and tests.
#[derive(Clone, Debug)]
pub struct PacketBuilder {
    model: SensorModel,
    data: Vec<u8>,
}

impl PacketBuilder {
    /// All returns empty, every block on azimuth zero. Blocks cycle through
    /// the model's laser banks.
    pub fn new(model: SensorModel) -> Self {
        let geometry = model.geometry();
        let mut data = vec![0u8; PACKET_SIZE];
        for block in 0..BLOCKS_PER_PACKET {
            let start = block * BLOCK_SIZE;
            data[start] = BLOCK_FLAG;
            data[start + 1] = geometry.bank_flags[block % geometry.bank_flags.len()];
        }
        let tail = BLOCKS_PER_PACKET * BLOCK_SIZE;
        data[tail + 4] = ReturnMode::Strongest.into();
        data[tail + 5] = geometry.product_id;
        Self { model, data }
    }

    pub fn model(&self) -> SensorModel {
        self.model
    }

    pub fn flag(&mut self, block: usize, bank_flag: u8) -> &mut Self {
        self.data[block * BLOCK_SIZE + 1] = bank_flag;
        self
    }

    pub fn azimuth(&mut self, block: usize, azimuth: u16) -> &mut Self {
        let start = block * BLOCK_SIZE + 2;
        self.data[start..start + 2].copy_from_slice(&azimuth.to_le_bytes());
        self
    }

    /// Set every block azimuth, starting at `start` and advancing by `step`.
    pub fn azimuths(&mut self, start: u16, step: u16) -> &mut Self {
        for block in 0..BLOCKS_PER_PACKET {
            let azimuth = (start as u32 + block as u32 * step as u32) % AZIMUTH_UNITS_PER_REV as u32;
            self.azimuth(block, azimuth as u16);
        }
        self
    }

    pub fn channel(
        &mut self,
        block: usize,
        channel: usize,
        distance: u16,
        reflectivity: u8,
    ) -> &mut Self {
        let start = block * BLOCK_SIZE + BLOCK_HEADER_SIZE + channel * CHANNEL_SIZE;
        self.data[start..start + 2].copy_from_slice(&distance.to_le_bytes());
        self.data[start + 2] = reflectivity;
        self
    }

    /// Give every channel of every block the same return.
    pub fn fill(&mut self, distance: u16, reflectivity: u8) -> &mut Self {
        for block in 0..BLOCKS_PER_PACKET {
            for channel in 0..CHANNELS_PER_BLOCK {
                self.channel(block, channel, distance, reflectivity);
            }
        }
        self
    }

    pub fn timestamp(&mut self, timestamp_us: u32) -> &mut Self {
        let start = BLOCKS_PER_PACKET * BLOCK_SIZE;
        self.data[start..start + 4].copy_from_slice(&timestamp_us.to_le_bytes());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// VLP-16 geometry: two 16-laser firing sequences per block.
pub static VLP16: ModelGeometry = ModelGeometry {
    name: "VLP-16",
    product_id: 0x22,
    lasers: 16,
    elevation_deg: &[
        -15.0, 1.0, -13.0, 3.0, -11.0, 5.0, -9.0, 7.0, -7.0, 9.0, -5.0, 11.0, -3.0, 13.0, -1.0,
        15.0,
    ],
    azimuth_offset_deg: &[0.0; 16],
    vertical_offset_m: &[
        0.0112, -0.0007, 0.0097, -0.0022, 0.0081, -0.0037, 0.0066, -0.0051, 0.0051, -0.0066,
        0.0037, -0.0081, 0.0022, -0.0097, 0.0007, -0.0112,
    ],
    bank_flags: &[BANK_UPPER],
    distance_resolution: 0.002,
    min_range: 0.4,
    max_range: 100.0,
    firing_us: 2.304,
    sequence_us: 55.296,
    simultaneous: 1,
    wrap_threshold: 18_000,
};

/// VLP-32C geometry: one 32-laser firing sequence per block, lasers fire in
/// pairs.
pub static VLP32C: ModelGeometry = ModelGeometry {
    name: "VLP-32C",
    product_id: 0x28,
    lasers: 32,
    elevation_deg: &[
        -25.0, -1.0, -1.667, -15.639, -11.31, 0.0, -0.667, -8.843, -7.254, 0.333, -0.333, -6.148,
        -5.333, 1.333, 0.667, -4.0, -4.667, 1.667, 1.0, -3.667, -3.333, 3.333, 2.333, -2.667,
        -3.0, 7.0, 4.667, -2.333, -2.0, 15.0, 10.333, -1.333,
    ],
    azimuth_offset_deg: &[
        1.4, -4.2, 1.4, -1.4, 1.4, -1.4, 4.2, -1.4, 1.4, -4.2, 1.4, -1.4, 4.2, -1.4, 4.2, -1.4,
        1.4, -4.2, 1.4, -4.2, 4.2, -1.4, 1.4, -1.4, 1.4, -1.4, 1.4, -4.2, 4.2, -1.4, 1.4, -1.4,
    ],
    vertical_offset_m: &[],
    bank_flags: &[BANK_UPPER],
    distance_resolution: 0.004,
    min_range: 0.4,
    max_range: 200.0,
    firing_us: 2.304,
    sequence_us: 55.296,
    simultaneous: 2,
    wrap_threshold: 18_000,
};

/// VLS-128 geometry: four 32-laser banks, eight lasers per firing group.
///
/// Nominal elevation table; units shipped with a calibration file should be
/// checked against it.
pub static VLS128: ModelGeometry = ModelGeometry {
    name: "VLS-128",
    product_id: 0xa1,
    lasers: 128,
    elevation_deg: &[
        -25.000, -14.265, -4.000, -2.240, -0.480, 1.280, 3.200, 9.290, //
        -24.329, -13.594, -3.890, -2.130, -0.370, 1.390, 3.581, 9.671, //
        -23.658, -12.923, -3.780, -2.020, -0.260, 1.500, 3.961, 10.052, //
        -22.987, -12.252, -3.670, -1.910, -0.150, 1.610, 4.342, 10.432, //
        -22.316, -11.581, -3.560, -1.800, -0.040, 1.720, 4.723, 10.813, //
        -21.645, -10.910, -3.450, -1.690, 0.070, 1.830, 5.103, 11.194, //
        -20.974, -10.239, -3.340, -1.580, 0.180, 1.940, 5.484, 11.574, //
        -20.303, -9.568, -3.230, -1.470, 0.290, 2.050, 5.865, 11.955, //
        -19.632, -8.897, -3.120, -1.360, 0.400, 2.160, 6.245, 12.335, //
        -18.961, -8.226, -3.010, -1.250, 0.510, 2.270, 6.626, 12.716, //
        -18.290, -7.555, -2.900, -1.140, 0.620, 2.380, 7.006, 13.097, //
        -17.619, -6.884, -2.790, -1.030, 0.730, 2.490, 7.387, 13.477, //
        -16.948, -6.213, -2.680, -0.920, 0.840, 2.600, 7.768, 13.858, //
        -16.277, -5.542, -2.570, -0.810, 0.950, 2.710, 8.148, 14.239, //
        -15.606, -4.871, -2.460, -0.700, 1.060, 2.820, 8.529, 14.619, //
        -14.935, -4.200, -2.350, -0.590, 1.170, 2.930, 8.910, 15.000, //
    ],
    azimuth_offset_deg: &VLS128_AZIMUTH_OFFSETS,
    vertical_offset_m: &[],
    bank_flags: &[0xee, 0xdd, 0xcc, 0xbb],
    distance_resolution: 0.004,
    min_range: 0.4,
    max_range: 245.0,
    firing_us: 2.665,
    sequence_us: 53.3,
    simultaneous: 8,
    wrap_threshold: 18_000,
};

/// Eight optical columns, repeated for each firing group.
const VLS128_AZIMUTH_OFFSETS: [f32; 128] = {
    const COLUMNS: [f32; 8] = [-6.354, -4.548, -2.732, -0.911, 0.911, 2.732, 4.548, 6.354];
    let mut table = [0.0f32; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = COLUMNS[i % 8];
        i += 1;
    }
    table
};
