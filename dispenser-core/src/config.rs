//! Tunable constants for a dispenser node.
//!
//! Every value has a compile-time default matching the deployed pump bus;
//! [`NodeConfig`] bundles them so tests and the emulator can override a
//! single knob without touching the others.

/// Default current-sense ADC threshold (raw counts).
pub const DEFAULT_CURRENT_THRESHOLD: u16 = 465;
/// Over-threshold samples required to trip the current-sense fault.
pub const CURRENT_SENSE_TRIP_COUNT: u8 = 3;
/// In-memory tick delta that must be exceeded before it is flushed to storage.
pub const TICKS_SAVE_THRESHOLD: u32 = 1_000;
/// Minimum width of a bus reset pulse, in time-base units (ms).
pub const RESET_PULSE_MIN: u32 = 1;
/// Number of conversions averaged for a liquid level reading.
pub const LIQUID_LEVEL_SAMPLES: u8 = 5;
/// Inter-byte gap after which a partial frame is discarded, in time-base units.
pub const FRAME_GAP: u32 = 5;
/// Motor level used for every dispense.
pub const FULL_SPEED: u8 = u8::MAX;

/// Runtime configuration for a node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    pub current_threshold: u16,
    pub trip_count: u8,
    pub ticks_save_threshold: u32,
    pub reset_pulse_min: u32,
    pub liquid_level_samples: u8,
    pub frame_gap: u32,
}

impl NodeConfig {
    /// Configuration used by deployed nodes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current_threshold: DEFAULT_CURRENT_THRESHOLD,
            trip_count: CURRENT_SENSE_TRIP_COUNT,
            ticks_save_threshold: TICKS_SAVE_THRESHOLD,
            reset_pulse_min: RESET_PULSE_MIN,
            liquid_level_samples: LIQUID_LEVEL_SAMPLES,
            frame_gap: FRAME_GAP,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}
