// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Cloud assembly with scan-boundary and capacity cuts.
//!
//! The [`CloudAssembler`] turns a stream of decoded [`PointBlock`]s into
//! clouds of at most `cloud_size` points. A cloud is cut either when the
//! sensor completes a revolution (an end-of-scan marker in the block) or when
//! the cloud reaches its capacity. Points that follow a cut in the same block
//! start the next cloud, so no point is lost or duplicated across cuts.
//!
//! ```text
//! block n   [p p p p p p p p]            cloud_size = 5
//!            └───────┘ └───┘
//!            emitted   carried into the next cloud
//! block n+1 [p EOS p p]
//!            │  │
//!            │  └─ cloud emitted: 3 carried + 1
//!            └──── appended
//! ```
//!
//! Completed clouds are handed to a caller supplied callback while the block
//! that produced them is still borrowed, which is why a remainder can never
//! come from a different block.

use crate::{
    buffer::{POINT_BLOCK_CAPACITY, PointBlock},
    cloud::{Cloud, PointEncoder, PointEncoding, Xyzi, XyziRing},
    lidar::{self, Error},
    velodyne::{SensorModel, VelodyneTranslator},
};
use tracing::{debug, instrument, trace};

/// Configuration of a [`CloudPipeline`].
#[derive(Clone, Debug, PartialEq)]
pub struct CloudConfig {
    pub model: SensorModel,
    /// Sensor rotation rate in revolutions per minute
    pub rpm: f32,
    /// Maximum number of points per cloud
    pub cloud_size: usize,
    /// Include the laser ring in the output clouds
    pub ring_information: bool,
    pub frame_id: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            model: SensorModel::Vlp16,
            rpm: 600.0,
            cloud_size: 55_000,
            ring_information: false,
            frame_id: String::from("lidar"),
        }
    }
}

/// Progress of the assembler between calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblerState {
    /// The in-progress cloud was finalized and emitted; the next point starts
    /// a fresh cloud.
    pub published: bool,
    /// Index into the current block of the first point not yet part of an
    /// emitted cloud.
    pub remainder_start: usize,
    /// Points in the in-progress cloud.
    pub accumulated: usize,
}

/// Accumulates decoded points into capacity-bounded clouds.
pub struct CloudAssembler {
    cloud: Cloud,
    cloud_size: usize,
    state: AssemblerState,
}

impl CloudAssembler {
    /// Create an assembler emitting clouds in `frame_id` of at most
    /// `cloud_size` points.
    pub fn new(frame_id: impl Into<String>, encoding: PointEncoding, cloud_size: usize) -> Self {
        let cloud_size = cloud_size.max(1);
        Self {
            cloud: Cloud::new(frame_id, encoding, cloud_size),
            cloud_size,
            state: AssemblerState::default(),
        }
    }

    pub fn state(&self) -> &AssemblerState {
        &self.state
    }

    pub fn cloud_size(&self) -> usize {
        self.cloud_size
    }

    /// The in-progress cloud, or the last emitted one until the next point
    /// arrives.
    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    /// Consume every point of `block`, calling `emit` for each completed
    /// cloud.
    ///
    /// Returns the number of clouds emitted. A block may complete zero, one
    /// or several clouds; points after the last cut stay in the in-progress
    /// cloud for the next call.
    pub fn assemble(&mut self, block: &PointBlock, mut emit: impl FnMut(&Cloud)) -> usize {
        match self.cloud.encoding() {
            PointEncoding::Xyzi => self.scan::<Xyzi>(block, &mut emit),
            PointEncoding::XyziRing => self.scan::<XyziRing>(block, &mut emit),
        }
    }

    fn scan<E: PointEncoder>(&mut self, block: &PointBlock, emit: &mut impl FnMut(&Cloud)) -> usize {
        let mut emitted = 0;
        // Set by a capacity cut until the next point is appended
        let mut cut = false;
        self.state.remainder_start = 0;

        for (index, point) in block.points().iter().enumerate() {
            if point.is_end_of_scan() {
                if cut {
                    // The revolution already went out with the cut
                    self.state.remainder_start = index + 1;
                    cut = false;
                    continue;
                }
                self.begin_cycle();
                self.publish(index + 1, emit);
                emitted += 1;
                continue;
            }

            self.begin_cycle();
            self.cloud.push_with::<E>(point);
            self.state.accumulated += 1;
            cut = false;

            if self.state.accumulated >= self.cloud_size {
                self.publish(index + 1, emit);
                emitted += 1;
                cut = true;
            }
        }

        emitted
    }

    /// Start a new cloud if the previous one was emitted.
    #[inline]
    fn begin_cycle(&mut self) {
        if self.state.published {
            self.cloud.clear();
            self.state.accumulated = 0;
            self.state.published = false;
        }
    }

    fn publish(&mut self, next: usize, emit: &mut impl FnMut(&Cloud)) {
        self.cloud.finalize(lidar::now());
        trace!(points = self.state.accumulated, "cloud complete");
        emit(&self.cloud);
        self.state.published = true;
        self.state.remainder_start = next;
    }
}

/// Decoder and assembler driven one datagram at a time.
pub struct CloudPipeline {
    translator: VelodyneTranslator,
    block: PointBlock,
    assembler: CloudAssembler,
}

impl CloudPipeline {
    pub fn new(config: &CloudConfig) -> Result<Self, Error> {
        if config.cloud_size <= POINT_BLOCK_CAPACITY {
            return Err(Error::Config(format!(
                "cloud size {} must be larger than the {} points of one packet",
                config.cloud_size, POINT_BLOCK_CAPACITY
            )));
        }

        let translator = VelodyneTranslator::new(config.model, config.rpm)?;
        let encoding = PointEncoding::with_ring(config.ring_information);
        debug!(
            "{} pipeline: {:?} clouds of up to {} points in {}",
            config.model, encoding, config.cloud_size, config.frame_id
        );

        Ok(Self {
            translator,
            block: PointBlock::for_packet(),
            assembler: CloudAssembler::new(config.frame_id.clone(), encoding, config.cloud_size),
        })
    }

    /// Decode one datagram and assemble its points.
    ///
    /// Returns the number of clouds passed to `emit`. A malformed packet is
    /// reported without disturbing the in-progress cloud.
    #[instrument(skip_all)]
    pub fn process_packet(
        &mut self,
        packet: &[u8],
        emit: impl FnMut(&Cloud),
    ) -> Result<usize, Error> {
        self.translator.convert(packet, &mut self.block)?;
        Ok(self.assembler.assemble(&self.block, emit))
    }

    pub fn translator(&self) -> &VelodyneTranslator {
        &self.translator
    }

    pub fn assembler(&self) -> &CloudAssembler {
        &self.assembler
    }

    /// Points of the last decoded datagram.
    pub fn block(&self) -> &PointBlock {
        &self.block
    }
}
