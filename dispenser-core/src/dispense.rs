//! Tick- and time-bounded dispensing.
//!
//! A tick-bounded dispense is a [`DispenseSession`] stored in the shared
//! state: the main loop opens it, and the sensor edge handler closes it the
//! moment the flow counter reaches the target. A timed dispense is a blocking
//! motor run that only a bus reset can cut short.

use core::fmt;

use crate::config::FULL_SPEED;
use crate::hal::{Delay, MotorDrive};
use crate::shared::SharedState;

/// Reason a tick-bounded dispense did not start.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DispenseError {
    /// A session is already running; its target is unchanged.
    AlreadyActive,
    /// A zero-tick target would never complete.
    ZeroTarget,
}

impl fmt::Display for DispenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispenseError::AlreadyActive => f.write_str("dispense already active"),
            DispenseError::ZeroTarget => f.write_str("dispense target is zero"),
        }
    }
}

/// Tick-bounded dispense bookkeeping. `target_ticks == 0` means idle.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DispenseSession {
    target_ticks: u32,
    active: bool,
}

impl DispenseSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            target_ticks: 0,
            active: false,
        }
    }

    /// Opens a session `target` ticks beyond `current_ticks`; returns the absolute target.
    pub fn begin(&mut self, current_ticks: u32, target: u32) -> Result<u32, DispenseError> {
        if self.active {
            return Err(DispenseError::AlreadyActive);
        }
        if target == 0 {
            return Err(DispenseError::ZeroTarget);
        }

        self.target_ticks = current_ticks.saturating_add(target);
        self.active = true;
        Ok(self.target_ticks)
    }

    /// Closes the session once `ticks` reaches the target; returns `true` on completion.
    pub fn poll_completion(&mut self, ticks: u32) -> bool {
        if self.target_ticks > 0 && ticks >= self.target_ticks {
            self.clear();
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.target_ticks = 0;
        self.active = false;
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn target_ticks(&self) -> u32 {
        self.target_ticks
    }
}

/// How a timed dispense ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimedOutcome {
    Completed,
    /// A bus reset cut the run short after `elapsed` time units.
    Cancelled { elapsed: u32 },
}

/// Main-loop side of the dispense state machine.
pub struct DispenseController<'a> {
    shared: &'a SharedState,
}

impl<'a> DispenseController<'a> {
    #[must_use]
    pub const fn new(shared: &'a SharedState) -> Self {
        Self { shared }
    }

    /// Starts a tick-bounded dispense and spins the motor up.
    ///
    /// Returns the absolute tick target. An active session is left untouched.
    ///
    /// The session may end (target edge or current trip) before the motor is
    /// spun up; the motor is stopped again if it did.
    pub fn start_ticks<M: MotorDrive>(&self, target: u32, motor: &mut M) -> Result<u32, DispenseError> {
        let absolute = self.shared.begin_dispense(target)?;
        motor.set_speed(FULL_SPEED);
        motor.start_current_sample();
        if !self.shared.is_dispensing() {
            motor.stop();
            motor.stop_current_sense();
        }
        Ok(absolute)
    }

    /// Runs the motor at full speed for `duration` ms or until a bus reset.
    pub fn start_timed<M, D>(&self, duration: u32, motor: &mut M, delay: &mut D) -> TimedOutcome
    where
        M: MotorDrive,
        D: Delay,
    {
        motor.set_speed(FULL_SPEED);

        let mut elapsed = 0;
        let outcome = loop {
            if self.shared.reset_pending() {
                break TimedOutcome::Cancelled { elapsed };
            }
            if elapsed >= duration {
                break TimedOutcome::Completed;
            }
            delay.delay_ms(1);
            elapsed += 1;
        };

        motor.stop();
        outcome
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.is_dispensing()
    }
}
