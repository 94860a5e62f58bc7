use log::{info, trace};
use pcap::{Active, Capture, Device};
use pcap_file::DataLink;
use std::convert::TryFrom;

use crate::signal::ShutdownFlag;
use crate::source::capture::{datalink_from_dlt, extract_udp_payload, is_supported};
use crate::source::{Filter, Packet, PacketSource, SourceError};

const SNAPLEN: i32 = 65535;

/// How long a read blocks before the shutdown flag is checked again, in milliseconds.
const POLL_INTERVAL: i32 = 250;

/// Sniffs export traffic on a network interface in promiscuous mode. The
/// collector keeps its port, packets are only observed on their way to it.
pub struct InterfaceCapture {
    capture: Capture<Active>,
    interface: String,
    datalink: DataLink,
    filter: Filter,
    shutdown: ShutdownFlag,
}

impl InterfaceCapture {
    pub fn open(interface: &str, filter: Filter, shutdown: ShutdownFlag) -> Result<Self, SourceError> {
        let fail = |e: pcap::Error| SourceError::Interface { name: interface.to_string(), reason: e.to_string() };

        let device = Device::list()
            .map_err(fail)?
            .into_iter()
            .find(|device| device.name == interface)
            .ok_or_else(|| SourceError::Interface { name: interface.to_string(), reason: "no such device".to_string() })?;

        let mut capture =
            Capture::from_device(device).map_err(fail)?.promisc(true).snaplen(SNAPLEN).timeout(POLL_INTERVAL).open().map_err(fail)?;

        let program = filter.bpf_program();
        capture.filter(&program, true).map_err(fail)?;

        let datalink = datalink_from_dlt(capture.get_datalink().0);
        if !is_supported(datalink) {
            return Err(SourceError::LinkType(datalink));
        }
        info!("Capturing on {} ({:?}) with filter '{}'", interface, datalink, program);

        Ok(InterfaceCapture { capture, interface: interface.to_string(), datalink, filter, shutdown })
    }
}

impl PacketSource for InterfaceCapture {
    fn next_packet(&mut self) -> Result<Option<Packet>, SourceError> {
        loop {
            if self.shutdown.is_triggered() {
                info!("Closing capture on {}", self.interface);
                return Ok(None);
            }

            let packet = match self.capture.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => return Err(SourceError::Interface { name: self.interface.clone(), reason: e.to_string() }),
            };

            let (src, dst, payload) = match extract_udp_payload(self.datalink, packet.data) {
                Some(udp) => udp,
                None => {
                    trace!("Skipping captured frame of {} bytes, not UDP", packet.data.len());
                    continue;
                }
            };

            // BPF already filtered, but fragments and odd link headers can slip through
            if !self.filter.matches(src, dst) {
                continue;
            }

            let timestamp = u64::try_from(packet.header.ts.tv_sec).unwrap_or(0);
            return Ok(Some(Packet { source: src.ip(), timestamp, payload: payload.to_vec() }));
        }
    }
}
