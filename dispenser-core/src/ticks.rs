//! Persistent lifetime tick total.
//!
//! The flow counter's delta is folded into the stored total only while no
//! dispense is running and only once it exceeds the save threshold, which
//! keeps flash/EEPROM wear proportional to the volume pumped.

use core::fmt;

use crate::config::TICKS_SAVE_THRESHOLD;
use crate::hal::NvStorage;
use crate::shared::SharedState;

/// Storage-side failures of the tick store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError<E> {
    /// A dispense is running; the total cannot be modified.
    Busy,
    Storage(E),
}

impl<E: fmt::Debug> fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Busy => f.write_str("dispense in progress"),
            StoreError::Storage(err) => write!(f, "tick storage failed: {err:?}"),
        }
    }
}

/// A completed flush.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Flushed {
    /// Ticks folded into the total by this flush.
    pub delta: u32,
    /// Stored total after the flush.
    pub total: u32,
}

/// Flushes the in-memory tick delta to non-volatile storage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TickStore {
    threshold: u32,
    /// Ticks taken from the flow counter whose write has not succeeded yet.
    pending: u32,
}

impl TickStore {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_threshold(TICKS_SAVE_THRESHOLD)
    }

    #[must_use]
    pub const fn with_threshold(threshold: u32) -> Self {
        Self { threshold, pending: 0 }
    }

    #[must_use]
    pub const fn pending(&self) -> u32 {
        self.pending
    }

    /// Folds the accumulated delta into the stored total when idle and above the threshold.
    ///
    /// On a storage error the delta stays pending and is retried on the next call.
    pub fn flush_if_due<N: NvStorage>(
        &mut self,
        shared: &SharedState,
        storage: &mut N,
    ) -> Result<Option<Flushed>, StoreError<N::Error>> {
        if let Some(delta) = shared.take_ticks_if_idle(self.threshold) {
            self.pending = self.pending.saturating_add(delta);
        } else if self.pending == 0 || shared.is_dispensing() {
            return Ok(None);
        }

        let stored = storage.read_tick_total().map_err(StoreError::Storage)?;
        let total = stored.saturating_add(self.pending);
        storage.write_tick_total(total).map_err(StoreError::Storage)?;

        let delta = core::mem::take(&mut self.pending);
        Ok(Some(Flushed { delta, total }))
    }

    /// Lifetime total including ticks that have not been flushed yet.
    pub fn saved_total<N: NvStorage>(
        &self,
        shared: &SharedState,
        storage: &mut N,
    ) -> Result<u32, StoreError<N::Error>> {
        let stored = storage.read_tick_total().map_err(StoreError::Storage)?;
        Ok(stored
            .saturating_add(self.pending)
            .saturating_add(shared.ticks()))
    }

    /// Zeroes both the in-memory delta and the stored total.
    pub fn reset_total<N: NvStorage>(
        &mut self,
        shared: &SharedState,
        storage: &mut N,
    ) -> Result<(), StoreError<N::Error>> {
        if !shared.clear_ticks_if_idle() {
            return Err(StoreError::Busy);
        }
        self.pending = 0;
        storage.write_tick_total(0).map_err(StoreError::Storage)
    }
}

impl Default for TickStore {
    fn default() -> Self {
        Self::new()
    }
}
