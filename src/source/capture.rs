use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use log::{info, trace};
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use std::fs::File;
use std::io::{BufReader, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use crate::signal::ShutdownFlag;
use crate::source::{Filter, Packet, PacketSource, SourceError};

/// Replays export packets from a recorded pcap capture, using the capture timestamps.
pub struct CaptureReader<R: Read> {
    reader: PcapReader<R>,
    datalink: DataLink,
    filter: Filter,
    shutdown: ShutdownFlag,
}

impl CaptureReader<BufReader<File>> {
    pub fn open(path: &Path, filter: Filter, shutdown: ShutdownFlag) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open { path: path.to_path_buf(), source })?;
        info!("Reading capture {}", path.display());
        CaptureReader::new(BufReader::new(file), filter, shutdown)
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(input: R, filter: Filter, shutdown: ShutdownFlag) -> Result<Self, SourceError> {
        let reader = PcapReader::new(input)?;
        let datalink = reader.header().datalink;

        if !is_supported(datalink) {
            return Err(SourceError::LinkType(datalink));
        }

        Ok(CaptureReader { reader, datalink, filter, shutdown })
    }
}

impl<R: Read> PacketSource for CaptureReader<R> {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }

            let packet = match self.reader.next_packet() {
                Some(packet) => packet?,
                None => {
                    info!("End of capture");
                    return Ok(None);
                }
            };

            let (src, dst, payload) = match extract_udp_payload(self.datalink, &packet.data) {
                Some(udp) => udp,
                None => {
                    trace!("Skipping captured frame of {} bytes, not UDP", packet.data.len());
                    continue;
                }
            };

            if !self.filter.matches(src, dst) {
                continue;
            }

            return Ok(Some(Packet { source: src.ip(), timestamp: packet.timestamp.as_secs(), payload: payload.to_vec() }));
        }
    }
}

/// Link types `extract_udp_payload` knows how to strip.
pub(crate) fn is_supported(datalink: DataLink) -> bool {
    matches!(datalink, DataLink::ETHERNET | DataLink::LINUX_SLL | DataLink::RAW | DataLink::IPV4 | DataLink::IPV6)
}

/// Maps a libpcap `DLT_*` value of a live handle to its pcap file link type.
/// They only differ for raw IP, where DLT_RAW is 12 (14 on OpenBSD).
#[cfg(any(feature = "live-capture", test))]
pub(crate) fn datalink_from_dlt(dlt: i32) -> DataLink {
    match dlt {
        12 | 14 => DataLink::RAW,
        other => DataLink::from(other as u32),
    }
}

/// Strips link, IP and UDP headers. Returns the UDP endpoints and payload.
pub(crate) fn extract_udp_payload(datalink: DataLink, frame: &[u8]) -> Option<(SocketAddr, SocketAddr, &[u8])> {
    let sliced = match datalink {
        DataLink::ETHERNET => SlicedPacket::from_ethernet(frame).ok()?,
        DataLink::LINUX_SLL => SlicedPacket::from_linux_sll(frame).ok()?,
        _ => SlicedPacket::from_ip(frame).ok()?,
    };

    let (src_ip, dst_ip) = match sliced.net {
        Some(NetSlice::Ipv4(v4)) => (IpAddr::V4(v4.header().source_addr()), IpAddr::V4(v4.header().destination_addr())),
        Some(NetSlice::Ipv6(v6)) => (IpAddr::V6(v6.header().source_addr()), IpAddr::V6(v6.header().destination_addr())),
        _ => return None,
    };

    match sliced.transport {
        Some(TransportSlice::Udp(udp)) => {
            Some((SocketAddr::new(src_ip, udp.source_port()), SocketAddr::new(dst_ip, udp.destination_port()), udp.payload()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use pcap_file::pcap::{PcapPacket, PcapWriter};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::time::Duration;

    fn udp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12]).ipv4(src, dst, 64).udp(src_port, dst_port);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    fn tcp_frame() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12]).ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).tcp(
            40000, 2055, 1, 1024,
        );
        let mut frame = Vec::new();
        builder.write(&mut frame, &[0, 5]).unwrap();
        frame
    }

    fn capture(frames: &[(u64, Vec<u8>)]) -> Vec<u8> {
        let mut writer = PcapWriter::new(Vec::new()).unwrap();
        for (secs, frame) in frames {
            writer.write_packet(&PcapPacket::new(Duration::new(*secs, 500), frame.len() as u32, frame)).unwrap();
        }
        writer.into_writer()
    }

    fn reader(frames: &[(u64, Vec<u8>)], filter: Filter) -> CaptureReader<Cursor<Vec<u8>>> {
        CaptureReader::new(Cursor::new(capture(frames)), filter, ShutdownFlag::manual()).unwrap()
    }

    #[test]
    fn replay_udp_payloads_with_capture_time() {
        let frames = vec![
            (1_600_000_000, udp_frame([10, 0, 0, 1], [10, 0, 0, 9], 40000, 2055, &[0, 5, 0, 1])),
            (1_600_000_001, tcp_frame()),
            (1_600_000_002, udp_frame([10, 0, 0, 2], [10, 0, 0, 9], 40000, 2055, &[0, 9])),
        ];
        let mut source = reader(&frames, Filter { port: 2055, host: None });

        assert_eq!(
            source.next_packet().unwrap(),
            Some(Packet { source: "10.0.0.1".parse().unwrap(), timestamp: 1_600_000_000, payload: vec![0, 5, 0, 1] })
        );
        assert_eq!(
            source.next_packet().unwrap(),
            Some(Packet { source: "10.0.0.2".parse().unwrap(), timestamp: 1_600_000_002, payload: vec![0, 9] })
        );
        assert_eq!(source.next_packet().unwrap(), None);
    }

    #[test]
    fn filter_port_and_host() {
        let frames = vec![
            (1, udp_frame([10, 0, 0, 1], [10, 0, 0, 9], 40000, 4739, &[1])),
            (2, udp_frame([10, 0, 0, 2], [10, 0, 0, 9], 40000, 2055, &[2])),
            (3, udp_frame([10, 0, 0, 1], [10, 0, 0, 9], 40000, 2055, &[3])),
        ];
        let mut source = reader(&frames, Filter { port: 2055, host: Some("10.0.0.1".parse().unwrap()) });

        assert_eq!(source.next_packet().unwrap().map(|p| p.payload), Some(vec![3]));
        assert_eq!(source.next_packet().unwrap(), None);
    }

    #[test]
    fn shutdown_stops_replay() {
        let shutdown = ShutdownFlag::manual();
        let frames = vec![(1, udp_frame([10, 0, 0, 1], [10, 0, 0, 9], 40000, 2055, &[1]))];
        let mut source = CaptureReader::new(Cursor::new(capture(&frames)), Filter { port: 2055, host: None }, shutdown.clone()).unwrap();

        shutdown.trigger();
        assert_eq!(source.next_packet().unwrap(), None);
    }

    #[test]
    fn reject_garbage_capture() {
        let result = CaptureReader::new(Cursor::new(vec![0u8; 8]), Filter { port: 2055, host: None }, ShutdownFlag::manual());

        assert!(matches!(result, Err(SourceError::Pcap(_))));
    }

    #[test]
    fn extract_from_live_link_types() {
        let frame = udp_frame([192, 0, 2, 1], [192, 0, 2, 2], 40000, 2055, &[0, 9, 0, 1]);

        assert_eq!(datalink_from_dlt(1), DataLink::ETHERNET);
        let (src, dst, payload) = extract_udp_payload(datalink_from_dlt(1), &frame).unwrap();
        assert_eq!(src, "192.0.2.1:40000".parse::<SocketAddr>().unwrap());
        assert_eq!(dst, "192.0.2.2:2055".parse::<SocketAddr>().unwrap());
        assert_eq!(payload, &[0, 9, 0, 1]);

        assert_eq!(datalink_from_dlt(12), DataLink::RAW);
        assert_eq!(extract_udp_payload(datalink_from_dlt(12), &frame[14..]).map(|(src, _, _)| src), Some(src));

        assert_eq!(datalink_from_dlt(113), DataLink::LINUX_SLL);
        assert!(is_supported(datalink_from_dlt(228)));
        assert!(!is_supported(datalink_from_dlt(105)));
    }

    #[test]
    fn extract_from_raw_ip() {
        let frame = udp_frame([192, 0, 2, 1], [192, 0, 2, 2], 2055, 9995, &[0, 10]);
        // drop the 14 byte ethernet header
        let (src, dst, payload) = extract_udp_payload(DataLink::RAW, &frame[14..]).unwrap();

        assert_eq!(src, "192.0.2.1:2055".parse::<SocketAddr>().unwrap());
        assert_eq!(dst, "192.0.2.2:9995".parse::<SocketAddr>().unwrap());
        assert_eq!(payload, &[0, 10]);
    }
}
