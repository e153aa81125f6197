//! Motor current-sense stall detector.
//!
//! The monitor keeps a monotonically increasing count of over-threshold
//! samples rather than a consecutive run. The count survives across dispense
//! commands and is only cleared when a new addressing cycle begins, so a pump
//! that repeatedly brushes the threshold eventually trips.

use crate::config::{CURRENT_SENSE_TRIP_COUNT, DEFAULT_CURRENT_THRESHOLD};

/// Result of feeding one reading into the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleVerdict {
    /// Reading below threshold.
    Normal,
    /// Reading at or above threshold; the fault has not tripped yet.
    OverThreshold { count: u8 },
    /// This reading tripped the fault.
    Tripped,
    /// The fault had already latched; the reading was ignored.
    AlreadyTripped,
    /// No dispense was running when the reading arrived; it was discarded.
    Inactive,
}

/// Over-current accumulator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CurrentSenseMonitor {
    threshold: u16,
    trip_count: u8,
    over_count: u8,
    tripped: bool,
}

impl CurrentSenseMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limits(DEFAULT_CURRENT_THRESHOLD, CURRENT_SENSE_TRIP_COUNT)
    }

    #[must_use]
    pub const fn with_limits(threshold: u16, trip_count: u8) -> Self {
        Self {
            threshold,
            trip_count,
            over_count: 0,
            tripped: false,
        }
    }

    /// Feeds a raw ADC reading.
    pub fn sample(&mut self, reading: u16) -> SampleVerdict {
        if self.tripped {
            return SampleVerdict::AlreadyTripped;
        }

        if reading >= self.threshold {
            self.over_count = self.over_count.saturating_add(1);
        }

        if self.over_count >= self.trip_count {
            self.tripped = true;
            SampleVerdict::Tripped
        } else if reading >= self.threshold {
            SampleVerdict::OverThreshold {
                count: self.over_count,
            }
        } else {
            SampleVerdict::Normal
        }
    }

    /// Clears the accumulated count and the latched fault.
    pub fn reset(&mut self) {
        self.over_count = 0;
        self.tripped = false;
    }

    pub fn set_threshold(&mut self, threshold: u16) {
        self.threshold = threshold;
    }

    #[must_use]
    pub const fn threshold(&self) -> u16 {
        self.threshold
    }

    #[must_use]
    pub const fn over_count(&self) -> u8 {
        self.over_count
    }

    #[must_use]
    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }
}

impl Default for CurrentSenseMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_on_third_over_threshold_sample() {
        let mut monitor = CurrentSenseMonitor::with_limits(400, 3);

        assert_eq!(monitor.sample(400), SampleVerdict::OverThreshold { count: 1 });
        assert_eq!(monitor.sample(10), SampleVerdict::Normal);
        assert_eq!(monitor.sample(500), SampleVerdict::OverThreshold { count: 2 });
        assert!(!monitor.is_tripped());
        assert_eq!(monitor.sample(401), SampleVerdict::Tripped);
        assert!(monitor.is_tripped());
        assert_eq!(monitor.sample(900), SampleVerdict::AlreadyTripped);
    }

    #[test]
    fn below_threshold_samples_never_decrement() {
        let mut monitor = CurrentSenseMonitor::with_limits(100, 3);

        monitor.sample(150);
        for _ in 0..50 {
            monitor.sample(0);
        }

        assert_eq!(monitor.over_count(), 1);
    }

    #[test]
    fn reset_clears_count_and_fault() {
        let mut monitor = CurrentSenseMonitor::with_limits(100, 1);
        assert_eq!(monitor.sample(100), SampleVerdict::Tripped);

        monitor.reset();

        assert!(!monitor.is_tripped());
        assert_eq!(monitor.over_count(), 0);
        assert_eq!(monitor.sample(99), SampleVerdict::Normal);
    }

    #[test]
    fn threshold_update_applies_to_next_sample() {
        let mut monitor = CurrentSenseMonitor::new();
        assert_eq!(monitor.threshold(), DEFAULT_CURRENT_THRESHOLD);
        assert_eq!(monitor.sample(300), SampleVerdict::Normal);

        monitor.set_threshold(300);

        assert_eq!(monitor.sample(300), SampleVerdict::OverThreshold { count: 1 });
    }
}
