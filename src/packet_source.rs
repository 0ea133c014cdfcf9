// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Datagram sources feeding the cloud pipeline.
//!
//! The node reads Velodyne datagrams through the [`PacketSource`] trait so the
//! same receive loop serves:
//!
//! - **Live operation**: [`UdpSource`] bound to the sensor data port
//! - **Testing**: [`TestSource`] replaying pre-built packets
//! - **Pcap replay**: `PcapSource` reading a capture (feature `pcap`)
//!
//! # Example
//!
//! ```no_run
//! use edgefirst_velodyne::{
//!     packet_source::{PacketSource, TestSource},
//!     velodyne::{PACKET_SIZE, PacketBuilder, SensorModel},
//! };
//!
//! # async fn run() -> Result<(), edgefirst_velodyne::Error> {
//! let packet = PacketBuilder::new(SensorModel::Vlp16).fill(2500, 10).build();
//! let mut source = TestSource::new(vec![packet]);
//!
//! let mut buf = [0u8; PACKET_SIZE];
//! while source.has_more() {
//!     let len = source.recv(&mut buf).await?;
//!     // Decode buf[..len]
//! }
//! # Ok(())
//! # }
//! ```

use crate::lidar::Error;
use std::{future::Future, io, net::SocketAddr, pin::Pin};
use tokio::net::UdpSocket;
use tracing::debug;

/// Source of raw sensor datagrams.
pub trait PacketSource: Send {
    /// Receive the next datagram into `buf`, returning its length.
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>;

    /// `false` once a finite source is exhausted. Live sources never end.
    fn has_more(&self) -> bool;
}

/// Live UDP datagram source.
pub struct UdpSource {
    socket: UdpSocket,
}

impl UdpSource {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind to `addr`, for example `0.0.0.0:2368`.
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("listening for sensor data on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    /// Bind to `port` on every interface, only accepting datagrams sent from
    /// `sensor` when given.
    ///
    /// The socket is connected to `sensor:port`, which assumes the sensor
    /// sends from the same port it sends to. Velodyne units do by default; a
    /// sensor configured with a different source port has every datagram
    /// dropped, so leave `sensor` unset in that case.
    pub async fn sensor(sensor: Option<&str>, port: u16) -> Result<Self, Error> {
        let source = Self::bind(&format!("0.0.0.0:{}", port)).await?;
        if let Some(sensor) = sensor {
            let sensor = format!("{}:{}", sensor, port);
            let addr: SocketAddr = tokio::net::lookup_host(&sensor)
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", sensor))
                })?;
            source.socket.connect(addr).await?;
        }
        Ok(source)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move { Ok(self.socket.recv(buf).await?) })
    }

    fn has_more(&self) -> bool {
        true
    }
}

/// Finite source replaying pre-built datagrams in order.
pub struct TestSource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl TestSource {
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Rewind to the first packet.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.index
    }
}

impl PacketSource for TestSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let Some(packet) = self.packets.get(self.index) else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "no more packets",
                )));
            };

            // Datagram semantics: anything past the buffer is dropped
            let len = packet.len().min(buf.len());
            buf[..len].copy_from_slice(&packet[..len]);
            self.index += 1;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velodyne::{PACKET_SIZE, PacketBuilder, SensorModel};

    #[tokio::test]
    async fn test_test_source() {
        let packets = vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8, 9, 10], vec![11, 12]];
        let mut source = TestSource::new(packets);

        assert!(source.has_more());
        assert_eq!(source.len(), 3);

        let mut buf = [0u8; 100];

        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3, 4]);

        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[5, 6, 7, 8, 9, 10]);

        assert!(source.has_more());
        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[11, 12]);

        assert!(!source.has_more());
        assert!(matches!(source.recv(&mut buf).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_test_source_reset() {
        let mut source = TestSource::new(vec![vec![1, 2], vec![3, 4]]);
        let mut buf = [0u8; 100];

        source.recv(&mut buf).await.unwrap();
        source.recv(&mut buf).await.unwrap();
        assert!(!source.has_more());

        source.reset();
        assert!(source.has_more());
        assert_eq!(source.current_index(), 0);

        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2]);
    }

    #[tokio::test]
    async fn test_empty_test_source() {
        let mut source = TestSource::empty();
        assert!(!source.has_more());
        assert!(source.is_empty());

        let mut buf = [0u8; 100];
        assert!(source.recv(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_packet_truncated() {
        let mut source = TestSource::new(vec![vec![1, 2, 3, 4, 5, 6, 7, 8]]);
        let mut buf = [0u8; 4];
        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_udp_source_receives_packet() {
        let mut source = UdpSource::bind("127.0.0.1:0").await.unwrap();
        let addr = source.local_addr().unwrap();

        let packet = PacketBuilder::new(SensorModel::Vlp32c)
            .azimuths(100, 20)
            .fill(1000, 3)
            .build();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&packet, addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(len, PACKET_SIZE);
        assert_eq!(&buf[..len], &packet[..]);
        assert!(source.has_more());
    }

    #[tokio::test]
    async fn test_udp_sensor_filters_source_port() {
        let port = {
            let free = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let mut source = UdpSource::sensor(Some("127.0.0.1"), port).await.unwrap();

        // Sent from another port: dropped by the connected socket
        let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stray
            .send_to(&[0u8; 16], ("127.0.0.1", port))
            .await
            .unwrap();

        // Sent from `port` itself, like a sensor using one port both ways
        let packet = PacketBuilder::new(SensorModel::Vlp16).fill(500, 1).build();
        source.socket.send(&packet).await.unwrap();

        let mut buf = [0u8; 2048];
        let len = source.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &packet[..]);
    }
}
