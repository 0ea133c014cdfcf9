// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::args::FilterArgs;
use edgefirst_schemas::{sensor_msgs::PointCloud2, serde_cdr};
use edgefirst_velodyne::{Error, FilterTransform};
use tracing::{info, trace, warn};
use zenoh::{
    Session,
    bytes::{Encoding, ZBytes},
    qos::{CongestionControl, Priority},
};

fn transport(err: zenoh::Error) -> Error {
    Error::Transport(err.to_string())
}

pub async fn run(session: Session, args: &FilterArgs) -> Result<(), Error> {
    let mut filter = FilterTransform::new(args.config()?)?;

    let subscriber = session
        .declare_subscriber(args.raw_topic.clone())
        .await
        .map_err(transport)?;
    let publisher = session
        .declare_publisher(args.filtered_topic.clone())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await
        .map_err(transport)?;
    let encoding = Encoding::APPLICATION_CDR.with_schema("sensor_msgs/msg/PointCloud2");

    info!(
        "filtering {} ({}) into {} ({})",
        args.raw_topic, args.input_frame_id, args.filtered_topic, args.output_frame_id
    );

    while let Ok(sample) = subscriber.recv_async().await {
        let msg = match serde_cdr::deserialize::<PointCloud2>(&sample.payload().to_bytes()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{}: cannot decode point cloud: {:?}", args.raw_topic, e);
                continue;
            }
        };

        let cloud = match filter.process(&msg) {
            Ok(cloud) => cloud,
            Err(e) if e.is_recoverable() => {
                warn!("{}: {}", args.raw_topic, e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let bytes =
            serde_cdr::serialize(cloud.msg()).map_err(|e| Error::Serialize(format!("{:?}", e)))?;
        publisher
            .put(ZBytes::from(bytes))
            .encoding(encoding.clone())
            .await
            .map_err(transport)?;
        trace!("{} message sent, {} points", args.filtered_topic, cloud.len());
    }

    Ok(())
}
