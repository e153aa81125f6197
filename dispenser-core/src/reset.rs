//! Debounced detector for the shared out-of-band bus reset line.
//!
//! The reset line idles high. A falling edge starts a pulse, the next rising
//! edge ends it; only pulses at least `min_width` time-base units wide latch a
//! reset. Shorter glitches are dropped.

use crate::config::RESET_PULSE_MIN;

/// Direction of a transition on the reset line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Falling,
    Rising,
}

impl Edge {
    /// Edge implied by the new line level.
    #[must_use]
    pub const fn from_level(high: bool) -> Self {
        if high { Edge::Rising } else { Edge::Falling }
    }
}

/// Pulse-width measurement state for the reset line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusResetDetector {
    min_width: u32,
    pulse_start: Option<u32>,
    reset_latched: bool,
}

impl BusResetDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_min_width(RESET_PULSE_MIN)
    }

    #[must_use]
    pub const fn with_min_width(min_width: u32) -> Self {
        Self {
            min_width,
            pulse_start: None,
            reset_latched: false,
        }
    }

    /// Processes a transition observed at time `now`; returns `true` when it latched a reset.
    pub fn on_edge(&mut self, edge: Edge, now: u32) -> bool {
        match edge {
            Edge::Falling => {
                self.pulse_start = Some(now);
                false
            }
            Edge::Rising => {
                let latched = match self.pulse_start.take() {
                    Some(start) => now.wrapping_sub(start) >= self.min_width,
                    None => false,
                };
                if latched {
                    self.reset_latched = true;
                }
                latched
            }
        }
    }

    /// Returns the latch without consuming it.
    #[must_use]
    pub const fn is_latched(&self) -> bool {
        self.reset_latched
    }

    /// Returns and clears the latch.
    pub fn check_and_clear(&mut self) -> bool {
        core::mem::take(&mut self.reset_latched)
    }

    /// Returns `true` while a pulse is in progress.
    #[must_use]
    pub const fn pulse_in_progress(&self) -> bool {
        self.pulse_start.is_some()
    }
}

impl Default for BusResetDetector {
    fn default() -> Self {
        Self::new()
    }
}
