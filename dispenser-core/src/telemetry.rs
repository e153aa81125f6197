//! Node telemetry event catalog and ring buffer.
//!
//! The main loop records what the node did (address assignment, dispenses,
//! trips, storage flushes) into a fixed-capacity ring and mirrors each record
//! to a [`TelemetrySink`]. The firmware sink forwards to `defmt`; the emulator
//! prints to stdout.

use core::fmt;

use heapless::HistoryBuf;

/// Identifier assigned to each telemetry record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    Boot,
    BusReset,
    Negotiating,
    AddressAssigned,
    ConfigFault,
    IdConflict,
    DispenseStarted,
    DispenseRejected,
    DispenseComplete,
    TimedDispenseComplete,
    TimedDispenseCancelled,
    CurrentSenseTrip,
    CommandSuppressed,
    CrcFailure,
    LiquidLevel,
    LiquidLevelRefused,
    TickFlush,
    TickStoreError,
    TickTotalReset,
    LoopbackStarted,
}

impl TelemetryEventKind {
    const ALL: [TelemetryEventKind; 20] = [
        TelemetryEventKind::Boot,
        TelemetryEventKind::BusReset,
        TelemetryEventKind::Negotiating,
        TelemetryEventKind::AddressAssigned,
        TelemetryEventKind::ConfigFault,
        TelemetryEventKind::IdConflict,
        TelemetryEventKind::DispenseStarted,
        TelemetryEventKind::DispenseRejected,
        TelemetryEventKind::DispenseComplete,
        TelemetryEventKind::TimedDispenseComplete,
        TelemetryEventKind::TimedDispenseCancelled,
        TelemetryEventKind::CurrentSenseTrip,
        TelemetryEventKind::CommandSuppressed,
        TelemetryEventKind::CrcFailure,
        TelemetryEventKind::LiquidLevel,
        TelemetryEventKind::LiquidLevelRefused,
        TelemetryEventKind::TickFlush,
        TelemetryEventKind::TickStoreError,
        TelemetryEventKind::TickTotalReset,
        TelemetryEventKind::LoopbackStarted,
    ];

    /// Compact numeric code for transport over diagnostics channels.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        self as u16
    }

    /// Decodes a numeric code.
    #[must_use]
    pub fn from_raw(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_raw() == code)
    }

    /// Kebab-case label used in log output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            TelemetryEventKind::Boot => "boot",
            TelemetryEventKind::BusReset => "bus-reset",
            TelemetryEventKind::Negotiating => "negotiating",
            TelemetryEventKind::AddressAssigned => "address-assigned",
            TelemetryEventKind::ConfigFault => "config-fault",
            TelemetryEventKind::IdConflict => "id-conflict",
            TelemetryEventKind::DispenseStarted => "dispense-started",
            TelemetryEventKind::DispenseRejected => "dispense-rejected",
            TelemetryEventKind::DispenseComplete => "dispense-complete",
            TelemetryEventKind::TimedDispenseComplete => "timed-dispense-complete",
            TelemetryEventKind::TimedDispenseCancelled => "timed-dispense-cancelled",
            TelemetryEventKind::CurrentSenseTrip => "current-sense-trip",
            TelemetryEventKind::CommandSuppressed => "command-suppressed",
            TelemetryEventKind::CrcFailure => "crc-failure",
            TelemetryEventKind::LiquidLevel => "liquid-level",
            TelemetryEventKind::LiquidLevelRefused => "liquid-level-refused",
            TelemetryEventKind::TickFlush => "tick-flush",
            TelemetryEventKind::TickStoreError => "tick-store-error",
            TelemetryEventKind::TickTotalReset => "tick-total-reset",
            TelemetryEventKind::LoopbackStarted => "loopback-started",
        }
    }
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryPayload {
    None,
    /// Raw node id byte.
    Node(u8),
    /// Tick count (target, delta or total depending on the event).
    Ticks(u32),
    /// Raw analog reading.
    Reading(u16),
    /// Packet type code.
    Command(u8),
    /// Elapsed time-base units.
    Elapsed(u32),
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Node(id) => write!(f, "id={id}"),
            TelemetryPayload::Ticks(ticks) => write!(f, "ticks={ticks}"),
            TelemetryPayload::Reading(value) => write!(f, "reading={value}"),
            TelemetryPayload::Command(code) => write!(f, "type={code}"),
            TelemetryPayload::Elapsed(units) => write!(f, "elapsed={units}ms"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Time-base units (ms) since boot.
    pub timestamp: u32,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Destination mirrored with every recorded event.
pub trait TelemetrySink {
    fn emit(&mut self, record: &TelemetryRecord);
}

/// Sink that drops every record.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn emit(&mut self, _: &TelemetryRecord) {}
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event and returns the stored record.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        details: TelemetryPayload,
        timestamp: u32,
    ) -> TelemetryRecord {
        let record = TelemetryRecord {
            id: self.next_event_id,
            timestamp,
            event,
            details,
        };
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(record);
        record
    }

    /// Records in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns `true` when any retained record carries `event`.
    #[must_use]
    pub fn contains(&self, event: TelemetryEventKind) -> bool {
        self.ring.as_slice().iter().any(|record| record.event == event)
    }

    /// Number of retained records carrying `event`.
    #[must_use]
    pub fn count(&self, event: TelemetryEventKind) -> usize {
        self.ring.as_slice().iter().filter(|record| record.event == event).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
