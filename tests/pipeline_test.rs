// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Integration tests driving the decode pipeline and the filter with
//! synthetic Velodyne traffic.

use edgefirst_schemas::{sensor_msgs::PointCloud2, serde_cdr};
use edgefirst_velodyne::{
    CloudConfig, CloudPipeline, FilterConfig, FilterTransform, FilterWindow, Point, PointBlock,
    RadiusMode, SensorModel, StaticTransform, VelodyneTranslator,
    packet_source::{PacketSource, TestSource},
    velodyne::{BLOCKS_PER_PACKET, CHANNELS_PER_BLOCK, PACKET_SIZE, PacketBuilder},
};

/// Azimuth advance per firing block at 600 rpm, 0.01° units
const BLOCK_STEP: u16 = 40;

/// Packets per revolution with [`BLOCK_STEP`]
const PACKETS_PER_REV: usize = 36_000 / (BLOCK_STEP as usize * BLOCKS_PER_PACKET);

/// Consecutive packets of a spinning sensor, every return 10 m away.
fn spinning_packets(model: SensorModel, count: usize) -> Vec<Vec<u8>> {
    let distance = (10.0 / model.geometry().distance_resolution).round() as u16;
    (0..count)
        .map(|i| {
            let start = (i * BLOCKS_PER_PACKET * BLOCK_STEP as usize) % 36_000;
            let mut builder = PacketBuilder::new(model);
            builder
                .azimuths(start as u16, BLOCK_STEP)
                .fill(distance, (i % 200) as u8)
                .timestamp(i as u32 * 1327);
            builder.build()
        })
        .collect()
}

fn ring_config(model: SensorModel, cloud_size: usize) -> CloudConfig {
    CloudConfig {
        model,
        cloud_size,
        ring_information: true,
        frame_id: String::from("lidar"),
        ..Default::default()
    }
}

/// Every decoded point of `packets`, markers removed.
fn decoded_points(model: SensorModel, packets: &[Vec<u8>]) -> Vec<Point> {
    let mut translator = VelodyneTranslator::new(model, 600.0).unwrap();
    let mut block = PointBlock::for_packet();
    let mut points = Vec::new();
    for packet in packets {
        translator.convert(packet, &mut block).unwrap();
        points.extend(block.points().iter().filter(|p| !p.is_end_of_scan()));
    }
    points
}

#[test]
fn test_revolution_produces_one_cloud() {
    let packets = spinning_packets(SensorModel::Vlp16, PACKETS_PER_REV + 5);
    let mut pipeline = CloudPipeline::new(&ring_config(SensorModel::Vlp16, 55_000)).unwrap();

    let mut clouds: Vec<PointCloud2> = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        let n = pipeline
            .process_packet(packet, |cloud| clouds.push(cloud.msg().clone()))
            .unwrap();
        // The wrap is in the first block of the first packet of the next turn
        assert_eq!(n, usize::from(i == PACKETS_PER_REV), "packet {}", i);
    }

    assert_eq!(clouds.len(), 1);
    let cloud = &clouds[0];
    assert_eq!(
        cloud.width as usize,
        PACKETS_PER_REV * BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK
    );
    assert_eq!(cloud.height, 1);
    assert_eq!(cloud.point_step, 18);
    assert_eq!(cloud.row_step, cloud.width * 18);
    assert_eq!(cloud.data.len(), cloud.row_step as usize);
    assert_eq!(cloud.header.frame_id, "lidar");

    // All returns are 10 m away from the sensor; rings are laser indices
    for point in cloud.data.chunks_exact(18) {
        let f = |o: usize| f32::from_le_bytes([point[o], point[o + 1], point[o + 2], point[o + 3]]);
        let range = (f(0).powi(2) + f(4).powi(2) + f(8).powi(2)).sqrt();
        assert!((range - 10.0).abs() < 0.02, "range {}", range);
        assert!(u16::from_le_bytes([point[16], point[17]]) < 16);
    }

    // The interrupted revolution keeps accumulating
    assert_eq!(
        pipeline.assembler().state().accumulated,
        5 * BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK
    );
}

#[test]
fn test_capacity_cuts_preserve_every_point() {
    let model = SensorModel::Vlp32c;
    let packets = spinning_packets(model, 2 * PACKETS_PER_REV + 7);
    let mut pipeline = CloudPipeline::new(&ring_config(model, 5000)).unwrap();

    let mut emitted = Vec::new();
    let mut sizes = Vec::new();
    for packet in &packets {
        pipeline
            .process_packet(packet, |cloud| {
                sizes.push(cloud.len());
                emitted.extend(cloud.points());
            })
            .unwrap();
    }
    if !pipeline.assembler().state().published {
        emitted.extend(pipeline.assembler().cloud().points());
    }

    assert!(sizes.iter().all(|&n| n <= 5000));
    assert!(sizes.iter().filter(|&&n| n == 5000).count() >= 10);
    assert_eq!(emitted, decoded_points(model, &packets));
}

#[test]
fn test_malformed_packets_are_dropped() {
    let mut packets = spinning_packets(SensorModel::Vlp16, 6);
    let truncated = packets[1][..PACKET_SIZE - 6].to_vec();
    packets.insert(2, truncated);
    let mut bad_flag = packets[4].clone();
    bad_flag[BLOCKS_PER_PACKET / 2 * 100 + 1] = 0xbb;
    packets.insert(5, bad_flag);

    let mut pipeline = CloudPipeline::new(&ring_config(SensorModel::Vlp16, 10_000)).unwrap();
    let mut dropped = 0;
    for packet in &packets {
        match pipeline.process_packet(packet, |_| panic!("no cut expected")) {
            Ok(_) => {}
            Err(e) => {
                assert!(e.is_recoverable());
                dropped += 1;
            }
        }
    }

    assert_eq!(dropped, 2);
    assert_eq!(
        pipeline.assembler().cloud().len(),
        6 * BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK
    );
}

#[test]
fn test_vls128_all_rings() {
    let mut packet = PacketBuilder::new(SensorModel::Vls128);
    packet.fill(2500, 1);
    for block in 0..BLOCKS_PER_PACKET {
        // Four banks share the azimuth of one firing group
        packet.azimuth(block, 1000 + (block / 4) as u16 * 20);
    }

    let mut translator = VelodyneTranslator::new(SensorModel::Vls128, 600.0).unwrap();
    let mut block = PointBlock::for_packet();
    translator.convert(&packet.build(), &mut block).unwrap();

    let mut rings: Vec<u16> = block.points().iter().map(|p| p.ring_id).collect();
    rings.sort_unstable();
    rings.dedup();
    assert_eq!(rings, (0..128).collect::<Vec<u16>>());
    assert!(!block.has_end_of_scan());
}

#[tokio::test]
async fn test_source_to_filter() {
    let model = SensorModel::Vlp16;
    let mut source = TestSource::new(spinning_packets(model, PACKETS_PER_REV + 1));
    let mut pipeline = CloudPipeline::new(&ring_config(model, 55_000)).unwrap();

    let mut wire = Vec::new();
    let mut buf = [0u8; 2048];
    while source.has_more() {
        let len = source.recv(&mut buf).await.unwrap();
        pipeline
            .process_packet(&buf[..len], |cloud| {
                wire.push(serde_cdr::serialize(cloud.msg()).unwrap())
            })
            .unwrap();
    }
    assert_eq!(wire.len(), 1);
    let raw: PointCloud2 = serde_cdr::deserialize(&wire[0]).unwrap();

    // Keep ±1 rad around +X within 9.99 m planar distance, then lift by 1.5 m
    let mut filter = FilterTransform::new(FilterConfig {
        input_frame_id: String::from("lidar"),
        output_frame_id: String::from("base_link"),
        window: FilterWindow::new(-1.0, 1.0, 0.0, 9.99, RadiusMode::Planar).unwrap(),
        transform: StaticTransform::new([0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.5]).unwrap(),
        pcl_size: 55_000,
    })
    .unwrap();

    let out = filter.process(&raw).unwrap();
    assert_eq!(out.frame_id(), "base_link");
    assert_eq!(out.stamp().sec, raw.header.stamp.sec);
    assert_eq!(out.stamp().nanosec, raw.header.stamp.nanosec);
    assert!(!out.is_empty());
    assert!(out.len() < raw.width as usize / 2);

    let input: Vec<Point> = raw
        .data
        .chunks_exact(18)
        .map(|d| {
            let f = |o: usize| f32::from_le_bytes([d[o], d[o + 1], d[o + 2], d[o + 3]]);
            Point::new(f(0), f(4), f(8), f(12), u16::from_le_bytes([d[16], d[17]]))
        })
        .collect();
    let expected: Vec<Point> = input
        .iter()
        .filter(|p| p.y.atan2(p.x).abs() < 1.0 && (p.x * p.x + p.y * p.y).sqrt() <= 9.99)
        .map(|p| Point::new(p.x, p.y, p.z + 1.5, p.intensity, p.ring_id))
        .collect();
    assert_eq!(out.points().count(), expected.len());
    for (got, want) in out.points().zip(&expected) {
        assert!((got.z - want.z).abs() < 1e-5);
        assert_eq!(got.ring_id, want.ring_id);
    }

    // Clouds from another frame are rejected without touching the output
    let before = out.len();
    let mut foreign = raw.clone();
    foreign.header.frame_id = String::from("radar");
    assert!(filter.process(&foreign).unwrap_err().is_recoverable());
    assert_eq!(filter.output().len(), before);
}
