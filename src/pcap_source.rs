// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Offline replay of Velodyne captures.
//!
//! [`PcapSource`] loads a PCAP or PCAPNG capture, keeps the UDP payloads that
//! have the size of a Velodyne data packet and serves them through the
//! [`PacketSource`] trait. Position packets and unrelated traffic are dropped
//! at load time.
//!
//! ```no_run
//! use edgefirst_velodyne::{PcapSource, packet_source::PacketSource, velodyne::DATA_PORT};
//!
//! # async fn run() -> Result<(), edgefirst_velodyne::Error> {
//! let mut source = PcapSource::from_file("vlp16.pcap", Some(DATA_PORT))?;
//! let mut buf = [0u8; 2048];
//! while source.has_more() {
//!     let len = source.recv(&mut buf).await?;
//!     // Decode buf[..len]
//! }
//! # Ok(())
//! # }
//! ```

use crate::{lidar::Error, packet_source::PacketSource, velodyne::PACKET_SIZE};
use etherparse::{SlicedPacket, TransportSlice};
use pcap_parser::{
    Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader,
    traits::PcapReaderIterator,
};
use std::{future::Future, io, path::Path, pin::Pin};
use tracing::debug;

/// Section header block magic of PCAPNG files
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

fn parse_error(msg: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// Capture replay source holding every data packet in memory.
pub struct PcapSource {
    packets: Vec<Vec<u8>>,
    skipped: usize,
    index: usize,
}

impl PcapSource {
    /// Load a capture from disk. When `port` is given only datagrams with a
    /// matching source or destination port are kept.
    pub fn from_file<P: AsRef<Path>>(path: P, port: Option<u16>) -> Result<Self, Error> {
        let data = std::fs::read(path.as_ref())?;
        let source = Self::from_bytes(&data, port)?;
        debug!(
            "loaded {} data packets from {}, skipped {}",
            source.len(),
            path.as_ref().display(),
            source.skipped
        );
        Ok(source)
    }

    /// Load a capture already in memory.
    pub fn from_bytes(data: &[u8], port: Option<u16>) -> Result<Self, Error> {
        let mut source = Self {
            packets: Vec::new(),
            skipped: 0,
            index: 0,
        };

        // Reader buffers must cover the whole capture to avoid Incomplete
        if data.len() >= 4 && data[..4] == PCAPNG_MAGIC {
            let reader = PcapNGReader::new(data.len(), data)
                .map_err(|e| parse_error(format!("cannot open pcapng capture: {:?}", e)))?;
            source.extract(reader, port)?;
        } else {
            let reader = LegacyPcapReader::new(data.len(), data)
                .map_err(|e| parse_error(format!("cannot open pcap capture: {:?}", e)))?;
            source.extract(reader, port)?;
        }

        Ok(source)
    }

    fn extract<R: PcapReaderIterator>(&mut self, mut reader: R, port: Option<u16>) -> Result<(), Error> {
        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::Legacy(packet) => Some(packet.data),
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => Some(epb.data),
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => Some(spb.data),
                        _ => None,
                    };
                    if let Some(frame) = frame {
                        match udp_payload(frame, port) {
                            Some(payload) if payload.len() == PACKET_SIZE => {
                                self.packets.push(payload.to_vec())
                            }
                            Some(_) => self.skipped += 1,
                            None => {}
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => break,
                Err(e) => return Err(parse_error(format!("capture parse error: {:?}", e))),
            }
        }
        Ok(())
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

    /// UDP datagrams that matched the port filter but are not data packets.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }
}

/// UDP payload of an Ethernet frame on `port`, if any.
fn udp_payload(frame: &[u8], port: Option<u16>) -> Option<&[u8]> {
    let packet = SlicedPacket::from_ethernet(frame).ok()?;
    let Some(TransportSlice::Udp(udp)) = packet.transport else {
        return None;
    };

    if let Some(port) = port {
        if udp.source_port() != port && udp.destination_port() != port {
            return None;
        }
    }

    let payload = udp.payload();
    (!payload.is_empty()).then_some(payload)
}

impl PacketSource for PcapSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let Some(packet) = self.packets.get(self.index) else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "no more packets in capture",
                )));
            };

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
