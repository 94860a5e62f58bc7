use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::flow::{ExportPacket, Version};
use crate::report::{Report, ReportRow};

/// Identity of an exporter: the same device may export for several observation domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExporterKey {
    pub address: IpAddr,
    pub exporter_id: u32,
}

impl ExporterKey {
    pub fn new(address: IpAddr, exporter_id: u32) -> Self {
        ExporterKey { address, exporter_id }
    }
}

impl fmt::Display for ExporterKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.exporter_id)
    }
}

/// Sequence range and flow counters of one exporter for the current window.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterState {
    pub lowest_sequence: u32,
    pub highest_sequence: u32,
    pub received_flows: u64,
    pub expected_flows: u64,
    pub version: Version,
    idle_windows: u32,
}

impl ExporterState {
    fn new(packet: &ExportPacket) -> Self {
        ExporterState {
            lowest_sequence: packet.sequence,
            highest_sequence: packet.sequence,
            received_flows: packet.flow_count as u64,
            expected_flows: packet.flow_count as u64,
            version: packet.version,
            idle_windows: 0,
        }
    }

    /// Sequence numbers are compared as raw values, a counter wrapping around
    /// within a window inflates the expected count.
    fn update(&mut self, packet: &ExportPacket) {
        self.highest_sequence = self.highest_sequence.max(packet.sequence);
        self.lowest_sequence = self.lowest_sequence.min(packet.sequence);
        self.received_flows += packet.flow_count as u64;
        self.expected_flows = (self.highest_sequence - self.lowest_sequence) as u64 + packet.flow_count as u64;
        self.version = packet.version;
    }

    /// Starts a new window. The inverted range makes the next sequence number both bounds.
    fn reset(&mut self) {
        self.highest_sequence = 0;
        self.lowest_sequence = u32::MAX;
        self.received_flows = 0;
        self.expected_flows = 0;
    }

    pub fn loss_percent(&self) -> f64 {
        if self.expected_flows == 0 {
            return 0.0;
        }

        100.0 * (self.expected_flows as f64 - self.received_flows as f64) / self.expected_flows as f64
    }
}

/// Per exporter sequence gap accounting, reporting every `window` seconds.
pub struct LossTracker {
    exporters: BTreeMap<ExporterKey, ExporterState>,
    window: u64,
    idle_limit: Option<u32>,
    last_report_time: Option<u64>,
    last_packet_time: Option<u64>,
}

impl LossTracker {
    pub fn new(window: u64) -> Self {
        LossTracker { exporters: BTreeMap::new(), window: window.max(1), idle_limit: None, last_report_time: None, last_packet_time: None }
    }

    /// Forget exporters that sent no flow for `windows` consecutive reports.
    pub fn with_idle_eviction(mut self, windows: Option<u32>) -> Self {
        self.idle_limit = windows.filter(|w| *w > 0);
        self
    }

    /// Accounts one decoded packet and returns a report when it closes the current window.
    pub fn record(&mut self, key: ExporterKey, packet: &ExportPacket, timestamp: u64) -> Option<Report> {
        self.last_packet_time = Some(timestamp);

        let last_report_time = match self.last_report_time {
            Some(time) => time,
            None => {
                self.last_report_time = Some(timestamp - timestamp % self.window);
                self.account(key, packet);
                return None;
            }
        };

        self.account(key, packet);

        if timestamp.saturating_sub(last_report_time) >= self.window {
            self.last_report_time = Some(timestamp);
            return Some(self.report(timestamp));
        }

        None
    }

    /// Flushes the partial window at shutdown. Nothing is reported if no packet was ever accounted.
    pub fn finish(&mut self) -> Option<Report> {
        let timestamp = self.last_packet_time?;
        self.last_report_time = Some(timestamp);
        Some(self.report(timestamp))
    }

    #[cfg(test)]
    pub fn get(&self, key: &ExporterKey) -> Option<&ExporterState> {
        self.exporters.get(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    #[cfg(test)]
    pub fn last_report_time(&self) -> Option<u64> {
        self.last_report_time
    }

    fn account(&mut self, key: ExporterKey, packet: &ExportPacket) {
        match self.exporters.get_mut(&key) {
            Some(state) => state.update(packet),
            None => {
                info!("New {} exporter {} starting at sequence {}", packet.version, key, packet.sequence);
                self.exporters.insert(key, ExporterState::new(packet));
            }
        }
    }

    fn report(&mut self, timestamp: u64) -> Report {
        let mut rows = Vec::new();

        for (key, state) in self.exporters.iter_mut() {
            if state.received_flows == 0 {
                state.idle_windows = state.idle_windows.saturating_add(1);
                continue;
            }

            rows.push(ReportRow {
                address: key.address,
                version: state.version,
                exporter_id: key.exporter_id,
                expected: state.expected_flows,
                received: state.received_flows,
                loss_percent: state.loss_percent(),
            });

            state.idle_windows = 0;
            state.reset();
        }

        if let Some(limit) = self.idle_limit {
            self.exporters.retain(|key, state| {
                let keep = state.idle_windows < limit;
                if !keep {
                    debug!("Evicting exporter {} after {} idle windows", key, state.idle_windows);
                }
                keep
            });
        }

        Report { timestamp, rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    const START: u64 = 1_600_000_020;

    fn key(last_octet: u8, exporter_id: u32) -> ExporterKey {
        ExporterKey::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet)), exporter_id)
    }

    fn packet(version: Version, sequence: u32, flow_count: u32) -> ExportPacket {
        ExportPacket { version, sequence, exporter_id: 0, flow_count }
    }

    #[test]
    fn contiguous_v5_stream_has_no_loss() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        for i in 0..10 {
            assert_eq!(tracker.record(exporter, &packet(Version::NetflowV5, 1000 + i * 30, 30), START), None);
        }

        let state = tracker.get(&exporter).unwrap();
        assert_eq!(state.expected_flows, 300);
        assert_eq!(state.received_flows, 300);
        assert_eq!(state.loss_percent(), 0.0);
    }

    #[test]
    fn sequence_gap_is_loss() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        for sequence in &[1, 2, 4, 5] {
            tracker.record(exporter, &packet(Version::NetflowV9, *sequence, 1), START);
        }

        let state = tracker.get(&exporter).unwrap();
        assert_eq!(state.lowest_sequence, 1);
        assert_eq!(state.highest_sequence, 5);
        assert_eq!(state.received_flows, 4);
        assert_eq!(state.expected_flows, 5);
        assert_eq!(format!("{:.2}", state.loss_percent()), "20.00");
    }

    #[test]
    fn out_of_order_packets_widen_the_range() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        for sequence in &[10, 8, 12, 9, 11] {
            tracker.record(exporter, &packet(Version::NetflowV9, *sequence, 1), START);
        }

        let state = tracker.get(&exporter).unwrap();
        assert_eq!((state.lowest_sequence, state.highest_sequence), (8, 12));
        assert_eq!(state.expected_flows, 5);
        assert_eq!(state.received_flows, 5);
    }

    #[test]
    fn expected_uses_latest_flow_count() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::Ipfix, 100, 10), START);
        tracker.record(exporter, &packet(Version::Ipfix, 110, 4), START);

        let state = tracker.get(&exporter).unwrap();
        assert_eq!(state.expected_flows, 14);
        assert_eq!(state.received_flows, 14);
    }

    #[test]
    fn first_packet_quantizes_report_time() {
        let mut tracker = LossTracker::new(60);
        tracker.record(key(1, 0), &packet(Version::NetflowV5, 0, 1), 1_600_000_030);

        assert_eq!(tracker.last_report_time(), Some(1_600_000_020));
    }

    #[test]
    fn window_elapsed_reports_every_exporter() {
        let mut tracker = LossTracker::new(60);
        let (a, b, idle) = (key(1, 0), key(2, 0), key(3, 0));

        tracker.record(idle, &packet(Version::NetflowV9, 1, 0), START);
        tracker.record(a, &packet(Version::NetflowV9, 1, 1), START);
        tracker.record(b, &packet(Version::NetflowV5, 100, 10), START + 5);
        tracker.record(a, &packet(Version::NetflowV9, 3, 1), START + 10);

        assert_eq!(tracker.record(b, &packet(Version::NetflowV5, 105, 0), START + 59), None);

        let report = tracker.record(b, &packet(Version::NetflowV5, 110, 10), START + 61).unwrap();

        assert_eq!(report.timestamp, START + 61);
        assert_eq!(tracker.last_report_time(), Some(START + 61));
        assert_eq!(
            report.rows,
            vec![
                ReportRow { address: a.address, version: Version::NetflowV9, exporter_id: 0, expected: 3, received: 2, loss_percent: 100.0 / 3.0 },
                ReportRow { address: b.address, version: Version::NetflowV5, exporter_id: 0, expected: 20, received: 20, loss_percent: 0.0 },
            ]
        );
        // idle exporters are skipped, never dropped
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn report_time_follows_triggering_packet() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::NetflowV9, 1, 1), 1_600_000_010);
        assert_eq!(tracker.record(exporter, &packet(Version::NetflowV9, 2, 1), 1_600_000_019), None);
        assert!(tracker.record(exporter, &packet(Version::NetflowV9, 3, 1), 1_600_000_150).is_some());
        assert_eq!(tracker.record(exporter, &packet(Version::NetflowV9, 4, 1), 1_600_000_209), None);
        assert!(tracker.record(exporter, &packet(Version::NetflowV9, 5, 1), 1_600_000_210).is_some());
    }

    #[test]
    fn clock_going_backwards_never_reports() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::NetflowV9, 1, 1), START);
        assert_eq!(tracker.record(exporter, &packet(Version::NetflowV9, 2, 1), START - 600), None);
    }

    #[test]
    fn counters_self_correct_after_reset() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::NetflowV5, 1000, 30), START);
        tracker.record(exporter, &packet(Version::NetflowV5, 1090, 30), START + 10);
        assert!(tracker.record(exporter, &packet(Version::NetflowV5, 1120, 30), START + 60).is_some());

        let state = tracker.get(&exporter).unwrap();
        assert_eq!((state.lowest_sequence, state.highest_sequence), (u32::MAX, 0));
        assert_eq!((state.expected_flows, state.received_flows), (0, 0));
        assert_eq!(state.version, Version::NetflowV5);

        tracker.record(exporter, &packet(Version::NetflowV5, 5000, 17), START + 70);

        let state = tracker.get(&exporter).unwrap();
        assert_eq!((state.lowest_sequence, state.highest_sequence), (5000, 5000));
        assert_eq!(state.expected_flows, 17);
        assert_eq!(state.received_flows, 17);
        assert_eq!(state.loss_percent(), 0.0);
    }

    #[test]
    fn exporters_are_independent() {
        let mut tracker = LossTracker::new(60);
        let (a, b) = (key(1, 1), key(1, 2));

        for sequence in 1..=10 {
            tracker.record(b, &packet(Version::Ipfix, sequence * 5, 5), START);
            if sequence != 4 && sequence != 7 {
                tracker.record(a, &packet(Version::Ipfix, sequence * 5, 5), START);
            }
        }

        let state_a = tracker.get(&a).unwrap();
        assert_eq!((state_a.expected_flows, state_a.received_flows), (50, 40));
        assert_eq!(state_a.loss_percent(), 20.0);

        let state_b = tracker.get(&b).unwrap();
        assert_eq!((state_b.expected_flows, state_b.received_flows), (50, 50));
        assert_eq!(state_b.loss_percent(), 0.0);
    }

    #[test]
    fn version_follows_latest_packet() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::NetflowV9, 1, 1), START);
        tracker.record(exporter, &packet(Version::Ipfix, 2, 1), START);

        assert_eq!(tracker.get(&exporter).unwrap().version, Version::Ipfix);
    }

    #[test]
    fn finish_flushes_partial_window_once() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::NetflowV9, 1, 1), START);
        tracker.record(exporter, &packet(Version::NetflowV9, 2, 1), START + 15);

        let report = tracker.finish().unwrap();
        assert_eq!(report.timestamp, START + 15);
        assert_eq!(tracker.last_report_time(), Some(START + 15));
        assert_eq!(report.rows.len(), 1);
        assert_eq!((report.rows[0].expected, report.rows[0].received), (2, 2));
    }

    #[test]
    fn finish_without_packets_reports_nothing() {
        assert_eq!(LossTracker::new(60).finish(), None);
    }

    #[test]
    fn zero_expected_is_not_loss() {
        let mut tracker = LossTracker::new(60);
        let exporter = key(1, 0);

        tracker.record(exporter, &packet(Version::Ipfix, 7, 3), START);
        tracker.record(exporter, &packet(Version::Ipfix, 7, 0), START);

        let state = tracker.get(&exporter).unwrap();
        assert_eq!((state.expected_flows, state.received_flows), (0, 3));
        assert_eq!(state.loss_percent(), 0.0);
    }

    #[test]
    fn idle_exporters_kept_by_default() {
        let mut tracker = LossTracker::new(10);
        let (busy, quiet) = (key(1, 0), key(2, 0));

        tracker.record(quiet, &packet(Version::NetflowV9, 1, 1), START);
        for i in 1..=5 {
            tracker.record(busy, &packet(Version::NetflowV9, i, 1), START + i as u64 * 10);
        }

        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn idle_exporters_evicted_when_configured() {
        let mut tracker = LossTracker::new(10).with_idle_eviction(Some(2));
        let (busy, quiet) = (key(1, 0), key(2, 0));

        tracker.record(quiet, &packet(Version::NetflowV9, 1, 1), START);
        // reports at +10 (quiet reported), +20 (idle 1), +30 (idle 2, evicted)
        tracker.record(busy, &packet(Version::NetflowV9, 1, 1), START + 10);
        tracker.record(busy, &packet(Version::NetflowV9, 2, 1), START + 20);
        assert!(tracker.get(&quiet).is_some());
        tracker.record(busy, &packet(Version::NetflowV9, 3, 1), START + 30);

        assert!(tracker.get(&quiet).is_none());
        assert!(tracker.get(&busy).is_some());
    }
}
