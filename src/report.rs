use ansi_term::Colour;
use chrono::{Local, TimeZone};
use std::io::{self, Write};
use std::net::IpAddr;

use crate::flow::Version;

/// Rows losing more than this percentage of flows are highlighted.
pub const LOSS_ALERT_THRESHOLD: f64 = 5.0;

/// Statistics of one exporter over one snapshot window.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub address: IpAddr,
    pub version: Version,
    pub exporter_id: u32,
    pub expected: u64,
    pub received: u64,
    pub loss_percent: f64,
}

impl ReportRow {
    #[inline]
    pub fn is_flagged(&self) -> bool {
        self.loss_percent > LOSS_ALERT_THRESHOLD
    }

    fn line(&self) -> String {
        format!(
            "{:<18}{:<10}{:<12}{:<10.2}{:<10}{:<10}",
            self.address.to_string(),
            self.version,
            self.exporter_id,
            self.loss_percent,
            self.expected,
            self.received
        )
    }
}

/// Everything emitted at one window boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Unix time of the window boundary, in seconds.
    pub timestamp: u64,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn write_to<W: Write>(&self, out: &mut W, color: bool) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "Timestamp: {}", boundary_label(self.timestamp))?;
        writeln!(out, "{:<18}{:<10}{:<12}{:<10}{:<10}{:<10}", "Device", "Version", "Source ID", "Loss (%)", "Expected", "Received")?;

        for row in &self.rows {
            if color && row.is_flagged() {
                writeln!(out, "{}", Colour::Red.paint(row.line()))?;
            } else {
                writeln!(out, "{}", row.line())?;
            }
        }

        out.flush()
    }
}

fn boundary_label(timestamp: u64) -> String {
    match Local.timestamp_opt(timestamp as i64, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{}s", timestamp),
    }
}
