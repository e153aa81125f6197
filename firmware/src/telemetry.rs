//! Mirrors node telemetry onto the RTT log.

use defmt::info;
use dispenser_core::telemetry::{TelemetryRecord, TelemetrySink};

pub struct DefmtSink;

impl TelemetrySink for DefmtSink {
    fn emit(&mut self, record: &TelemetryRecord) {
        info!(
            "telemetry:{=str} id={} t={}ms {}",
            record.event.label(),
            record.id,
            record.timestamp,
            record.details
        );
    }
}
