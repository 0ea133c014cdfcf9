// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! EdgeFirst Velodyne Library
//!
//! Decodes Velodyne VLP-16, VLP-32C and VLS-128 data packets into point
//! clouds, and filters/re-projects point clouds into another frame.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌────────────────────┐     ┌─────────────────┐
//! │  PacketSource   │ ──► │ VelodyneTranslator │ ──► │   PointBlock    │
//! │ (UDP/pcap/test) │     │   (per datagram)   │     │ (pipeline-owned)│
//! └─────────────────┘     └────────────────────┘     └─────────────────┘
//!                                                             │
//!                                                             ▼
//!                  ┌─────────────────┐     emit     ┌─────────────────┐
//!                  │ FilterTransform │ ◄─ ─ ─ ─ ─ ─ │  CloudAssembler │
//!                  │ (separate node) │  PointCloud2 │  (cut on scan   │
//!                  └─────────────────┘              │   or capacity)  │
//!                                                   └─────────────────┘
//! ```
//!
//! All buffers are allocated once when a stage is constructed. The per-packet
//! path does not allocate.
//!
//! # Modules
//!
//! - [`velodyne`]: Packet layout, sensor geometry and decoder
//! - [`buffer`]: Points and the per-packet point block
//! - [`cloud`]: `PointCloud2` clouds with fixed capacity
//! - [`assembler`]: Cloud assembly and the decode pipeline
//! - [`filter`]: Angular/radial filter with static transform
//! - [`lidar`]: Errors and clock utilities
//! - [`packet_source`]: Datagram source abstraction
//!
//! # Example
//!
//! ```
//! use edgefirst_velodyne::{
//!     CloudConfig, CloudPipeline,
//!     velodyne::{PacketBuilder, SensorModel},
//! };
//!
//! let mut pipeline = CloudPipeline::new(&CloudConfig {
//!     model: SensorModel::Vlp16,
//!     cloud_size: 1000,
//!     ..Default::default()
//! })?;
//!
//! let packet = PacketBuilder::new(SensorModel::Vlp16)
//!     .azimuths(0, 40)
//!     .fill(2500, 100)
//!     .build();
//!
//! let mut sizes = Vec::new();
//! for _ in 0..3 {
//!     pipeline.process_packet(&packet, |cloud| sizes.push(cloud.len()))?;
//! }
//! // 3 × 384 points fill one cloud of 1000
//! assert_eq!(sizes, vec![1000]);
//! # Ok::<(), edgefirst_velodyne::Error>(())
//! ```

pub mod assembler;
pub mod buffer;
pub mod cloud;
pub mod filter;
pub mod lidar;
pub mod packet_source;
#[cfg(feature = "pcap")]
pub mod pcap_source;
pub mod velodyne;

// Re-exports for convenience
pub use assembler::{AssemblerState, CloudAssembler, CloudConfig, CloudPipeline};
pub use buffer::{Point, PointBlock};
pub use cloud::{Cloud, PointEncoding, PointFieldType};
pub use filter::{FilterConfig, FilterTransform, FilterWindow, RadiusMode, StaticTransform};
pub use lidar::{Error, Severity};
pub use packet_source::PacketSource;
#[cfg(feature = "pcap")]
pub use pcap_source::PcapSource;
pub use velodyne::{SensorModel, VelodyneTranslator};
