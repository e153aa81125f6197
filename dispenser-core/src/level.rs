//! Cached liquid level reading.

use core::fmt;

use crate::config::LIQUID_LEVEL_SAMPLES;
use crate::hal::LevelSensor;
use crate::shared::SharedState;

/// The level probe shares its analog front end with current sensing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LevelError {
    /// A dispense owns the converter.
    Busy,
}

impl fmt::Display for LevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelError::Busy => f.write_str("converter in use by current sensing"),
        }
    }
}

/// Averaged level reading, refreshed on demand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LiquidLevel {
    cached: u16,
    samples: u8,
}

impl LiquidLevel {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_samples(LIQUID_LEVEL_SAMPLES)
    }

    #[must_use]
    pub const fn with_samples(samples: u8) -> Self {
        Self { cached: 0, samples }
    }

    /// Takes a fresh averaged reading unless a dispense is running.
    pub fn refresh<S: LevelSensor>(&mut self, shared: &SharedState, sensor: &mut S) -> Result<u16, LevelError> {
        if shared.is_dispensing() {
            return Err(LevelError::Busy);
        }

        let samples = self.samples.max(1);
        let sum: u32 = (0..samples).map(|_| u32::from(sensor.read())).sum();
        // The mean of u16 readings always fits in u16.
        self.cached = u16::try_from(sum / u32::from(samples)).unwrap_or(u16::MAX);
        Ok(self.cached)
    }

    /// Last averaged reading.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.cached
    }
}

impl Default for LiquidLevel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sequence {
        values: [u16; 5],
        next: usize,
    }

    impl LevelSensor for Sequence {
        fn read(&mut self) -> u16 {
            let value = self.values[self.next % self.values.len()];
            self.next += 1;
            value
        }
    }

    #[test]
    fn averages_five_samples_and_caches() {
        let shared = SharedState::new();
        let mut level = LiquidLevel::new();
        let mut sensor = Sequence { values: [100, 200, 300, 400, 500], next: 0 };

        assert_eq!(level.refresh(&shared, &mut sensor), Ok(300));
        assert_eq!(sensor.next, 5);
        assert_eq!(level.value(), 300);
    }

    #[test]
    fn refuses_while_dispensing() {
        let shared = SharedState::new();
        let mut level = LiquidLevel::new();
        let mut sensor = Sequence { values: [10; 5], next: 0 };
        level.refresh(&shared, &mut sensor).expect("idle refresh");
        shared.begin_dispense(5).expect("dispense starts");

        let mut busy = Sequence { values: [900; 5], next: 0 };
        assert_eq!(level.refresh(&shared, &mut busy), Err(LevelError::Busy));
        assert_eq!(busy.next, 0);
        assert_eq!(level.value(), 10);
    }
}
