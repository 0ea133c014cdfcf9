// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::args::CloudArgs;
use edgefirst_schemas::serde_cdr;
#[cfg(feature = "pcap")]
use edgefirst_velodyne::PcapSource;
use edgefirst_velodyne::{
    CloudPipeline, Error,
    packet_source::{PacketSource, UdpSource},
    velodyne::PACKET_SIZE,
};
use kanal::{AsyncReceiver, AsyncSender};
use tracing::{debug, error, info, trace, warn};
use zenoh::{
    Session,
    bytes::{Encoding, ZBytes},
    pubsub::Publisher,
    qos::{CongestionControl, Priority},
};

/// Serialized clouds waiting for the publisher.
const PUBLISH_QUEUE: usize = 4;

fn transport(err: zenoh::Error) -> Error {
    Error::Transport(err.to_string())
}

async fn open_source(args: &CloudArgs) -> Result<Box<dyn PacketSource>, Error> {
    #[cfg(feature = "pcap")]
    if let Some(target) = &args.target {
        if std::path::Path::new(target).is_file() {
            let source = PcapSource::from_file(target, Some(args.port))?;
            info!("replaying {} packets from {}", source.len(), target);
            return Ok(Box::new(source));
        }
    }

    let source = UdpSource::sensor(args.target.as_deref(), args.port).await?;
    info!(
        "receiving {} packets on {}",
        args.model,
        source.local_addr()?
    );
    Ok(Box::new(source))
}

/// Decode datagrams until the source ends or a fatal error occurs.
///
/// Completed clouds are serialized inside the assembler callback and queued
/// for the publisher once the datagram is consumed.
async fn receive_loop(
    mut pipeline: CloudPipeline,
    mut source: Box<dyn PacketSource>,
    tx: AsyncSender<ZBytes>,
) -> Result<(), Error> {
    let mut buf = [0u8; 2 * PACKET_SIZE];
    let mut pending: Vec<Vec<u8>> = Vec::with_capacity(2);
    let mut clouds = 0usize;

    while source.has_more() {
        let len = source.recv(&mut buf).await?;

        let mut serialize_error = None;
        let result = pipeline.process_packet(&buf[..len], |cloud| {
            match serde_cdr::serialize(cloud.msg()) {
                Ok(bytes) => pending.push(bytes),
                Err(e) => serialize_error = Some(Error::Serialize(format!("{:?}", e))),
            }
        });

        match result {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!("dropping datagram: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        }
        if let Some(e) = serialize_error {
            return Err(e);
        }

        for bytes in pending.drain(..) {
            clouds += 1;
            trace!("cloud {} queued, {} bytes", clouds, bytes.len());
            if tx.send(ZBytes::from(bytes)).await.is_err() {
                return Err(Error::Transport(String::from("publisher task stopped")));
            }
        }
    }

    info!("packet source exhausted after {} clouds", clouds);
    Ok(())
}

async fn publish_loop(rx: AsyncReceiver<ZBytes>, publisher: &Publisher<'_>, topic: &str) {
    let encoding = Encoding::APPLICATION_CDR.with_schema("sensor_msgs/msg/PointCloud2");
    while let Ok(msg) = rx.recv().await {
        match publisher.put(msg).encoding(encoding.clone()).await {
            Ok(_) => trace!("{} message sent", topic),
            Err(e) => error!("{} message error: {:?}", topic, e),
        }
    }
    debug!("{} publisher finished", topic);
}

pub async fn run(session: Session, args: &CloudArgs) -> Result<(), Error> {
    let pipeline = CloudPipeline::new(&args.config())?;
    let source = open_source(args).await?;

    let publisher = session
        .declare_publisher(args.topic.clone())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await
        .map_err(transport)?;

    let (tx, rx) = kanal::bounded_async(PUBLISH_QUEUE);
    let (result, _) = tokio::join!(
        receive_loop(pipeline, source, tx),
        publish_loop(rx, &publisher, &args.topic)
    );

    result
}
