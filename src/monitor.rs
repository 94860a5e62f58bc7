use log::debug;

use crate::flow::Decoder;
use crate::report::Report;
use crate::source::Packet;
use crate::tracker::{ExporterKey, LossTracker};

/// Runs every packet through decoding and loss accounting, one at a time.
pub struct LossMonitor {
    decoder: Decoder,
    tracker: LossTracker,
    decoded: u64,
    skipped: u64,
}

impl LossMonitor {
    pub fn new(decoder: Decoder, tracker: LossTracker) -> Self {
        LossMonitor { decoder, tracker, decoded: 0, skipped: 0 }
    }

    /// Packets that fail to decode are counted and dropped, they never touch the exporter state.
    pub fn process(&mut self, packet: &Packet) -> Option<Report> {
        match self.decoder.decode(&packet.payload) {
            Ok(export) => {
                self.decoded += 1;
                let key = ExporterKey::new(packet.source, export.exporter_id);
                self.tracker.record(key, &export, packet.timestamp)
            }
            Err(e) => {
                self.skipped += 1;
                debug!("Skipping {} bytes from {}: {}", packet.payload.len(), packet.source, e);
                None
            }
        }
    }

    pub fn finish(&mut self) -> Option<Report> {
        self.tracker.finish()
    }

    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &LossTracker {
        &self.tracker
    }
}
