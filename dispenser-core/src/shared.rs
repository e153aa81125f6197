//! State shared between interrupt handlers and the main loop.
//!
//! Every field that an asynchronous handler touches lives in one
//! [`ControlState`] behind a `critical_section::Mutex`. Nothing outside this
//! module reaches into it directly; handlers and the main loop go through the
//! accessors below, each of which holds the critical section for a handful of
//! field accesses and never across a call that can block.
//!
//! Handler entry points take the motor collaborator by reference so they can
//! stop it from interrupt context. Those calls happen after the critical
//! section is released but before the handler returns, which keeps the stop
//! synchronous with the edge or sample that caused it.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::NodeConfig;
use crate::current::{CurrentSenseMonitor, SampleVerdict};
use crate::dispense::{DispenseError, DispenseSession};
use crate::flow::{FlowCounter, SensorLine};
use crate::hal::MotorDrive;
use crate::led::{LedAnimation, LedPattern};
use crate::reset::{BusResetDetector, Edge};

/// Raw state guarded by [`SharedState`].
#[derive(Clone, Debug)]
pub struct ControlState {
    flow: FlowCounter,
    session: DispenseSession,
    current: CurrentSenseMonitor,
    led: LedAnimation,
    reset: BusResetDetector,
    now: u32,
}

impl ControlState {
    const fn new(config: &NodeConfig) -> Self {
        Self {
            flow: FlowCounter::new(),
            session: DispenseSession::new(),
            current: CurrentSenseMonitor::with_limits(config.current_threshold, config.trip_count),
            led: LedAnimation::new(),
            reset: BusResetDetector::with_min_width(config.reset_pulse_min),
            now: 0,
        }
    }
}

/// Result of processing one sensor edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EdgeOutcome {
    /// The edge changed the line level and was counted.
    pub counted: bool,
    /// The edge completed the active dispense.
    pub completed: bool,
}

/// Critical-section guarded control state.
pub struct SharedState {
    state: Mutex<RefCell<ControlState>>,
}

impl SharedState {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_config(&NodeConfig::new())
    }

    #[must_use]
    pub const fn with_config(config: &NodeConfig) -> Self {
        Self {
            state: Mutex::new(RefCell::new(ControlState::new(config))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ControlState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    // Asynchronous handler entry points.

    /// Sensor edge handler: counts the edge and checks the dispense target.
    pub fn on_sensor_edge<M: MotorDrive>(&self, line: SensorLine, level: bool, motor: &mut M) -> EdgeOutcome {
        let outcome = self.with(|state| {
            let counted = state.flow.on_edge(line, level);
            let completed = state.session.poll_completion(state.flow.ticks());
            EdgeOutcome { counted, completed }
        });

        if outcome.completed {
            motor.stop();
            motor.stop_current_sense();
        }
        outcome
    }

    /// Re-evaluates the dispense target without a new edge.
    pub fn poll_completion<M: MotorDrive>(&self, motor: &mut M) -> bool {
        let completed = self.with(|state| state.session.poll_completion(state.flow.ticks()));
        if completed {
            motor.stop();
            motor.stop_current_sense();
        }
        completed
    }

    /// Current-sense conversion handler.
    ///
    /// Trips the fault after enough over-threshold readings and re-arms the
    /// next conversion while the dispense is still running.
    pub fn on_current_sample<M: MotorDrive>(&self, reading: u16, motor: &mut M) -> SampleVerdict {
        let (verdict, still_active) = self.with(|state| {
            if !state.session.is_active() {
                return (SampleVerdict::Inactive, false);
            }

            let verdict = state.current.sample(reading);
            if verdict == SampleVerdict::Tripped {
                state.session.clear();
                let pattern = LedPattern::CurrentSense;
                state.led.set_pattern(pattern, pattern.default_divisor());
            }
            (verdict, state.session.is_active())
        });

        match verdict {
            SampleVerdict::Tripped => {
                motor.stop();
                motor.stop_current_sense();
            }
            SampleVerdict::Inactive => motor.stop_current_sense(),
            _ if still_active => motor.start_current_sample(),
            _ => {}
        }
        verdict
    }

    /// Sync line handler.
    pub fn on_sync_edge(&self, level: bool) {
        self.with(|state| {
            state.led.on_sync_edge(level);
        });
    }

    /// Reset line handler; the edge is timestamped with the shared time base.
    pub fn on_reset_edge(&self, edge: Edge) -> bool {
        self.with(|state| {
            let now = state.now;
            state.reset.on_edge(edge, now)
        })
    }

    /// Periodic time-base handler (one call per millisecond).
    pub fn on_time_tick(&self) {
        self.with(|state| state.now = state.now.wrapping_add(1));
    }

    // Main-loop accessors.

    /// Seeds the recorded sensor levels so the first edge after boot is not miscounted.
    pub fn seed_sensor_levels(&self, levels: [bool; 4]) {
        self.with(|state| {
            for (line, level) in SensorLine::ALL.into_iter().zip(levels) {
                state.flow.on_edge(line, level);
            }
            state.flow.snapshot_and_clear();
        });
    }

    #[must_use]
    pub fn now(&self) -> u32 {
        self.with(|state| state.now)
    }

    /// Ticks accumulated since the last flush.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        self.with(|state| state.flow.ticks())
    }

    /// Takes the accumulated ticks if no dispense is running and the delta exceeds `threshold`.
    pub fn take_ticks_if_idle(&self, threshold: u32) -> Option<u32> {
        self.with(|state| {
            if !state.session.is_active() && state.flow.ticks() > threshold {
                Some(state.flow.snapshot_and_clear())
            } else {
                None
            }
        })
    }

    /// Clears the accumulated ticks unless a dispense is running.
    pub fn clear_ticks_if_idle(&self) -> bool {
        self.with(|state| {
            if state.session.is_active() {
                false
            } else {
                state.flow.snapshot_and_clear();
                true
            }
        })
    }

    /// Opens a tick-bounded session relative to the current tick count.
    pub fn begin_dispense(&self, target: u32) -> Result<u32, DispenseError> {
        self.with(|state| {
            let ticks = state.flow.ticks();
            state.session.begin(ticks, target)
        })
    }

    /// Aborts any open session.
    pub fn cancel_dispense(&self) {
        self.with(|state| state.session.clear());
    }

    #[must_use]
    pub fn is_dispensing(&self) -> bool {
        self.with(|state| state.session.is_active())
    }

    #[must_use]
    pub fn dispense_target(&self) -> u32 {
        self.with(|state| state.session.target_ticks())
    }

    #[must_use]
    pub fn fault_latched(&self) -> bool {
        self.with(|state| state.current.is_tripped())
    }

    #[must_use]
    pub fn over_count(&self) -> u8 {
        self.with(|state| state.current.over_count())
    }

    #[must_use]
    pub fn current_threshold(&self) -> u16 {
        self.with(|state| state.current.threshold())
    }

    pub fn set_current_threshold(&self, threshold: u16) {
        self.with(|state| state.current.set_threshold(threshold));
    }

    pub fn set_led_pattern(&self, pattern: LedPattern, sync_divisor: u8) {
        self.with(|state| state.led.set_pattern(pattern, sync_divisor));
    }

    #[must_use]
    pub fn led_pattern(&self) -> LedPattern {
        self.with(|state| state.led.pattern())
    }

    #[must_use]
    pub fn led_frame_counter(&self) -> u32 {
        self.with(|state| state.led.frame_counter())
    }

    /// Advances the animation clock; returns the frame to render, if one is due.
    pub fn led_frame_due(&self) -> Option<(LedPattern, u32)> {
        self.with(|state| state.led.advance())
    }

    /// Returns `true` while a bus reset is latched.
    #[must_use]
    pub fn reset_pending(&self) -> bool {
        self.with(|state| state.reset.is_latched())
    }

    /// Consumes a latched bus reset.
    pub fn check_and_clear_reset(&self) -> bool {
        self.with(|state| state.reset.check_and_clear())
    }

    /// Starts a new addressing epoch: clears the reset latch, the current-sense
    /// fault and its over-threshold count, and any open session.
    pub fn begin_epoch(&self) {
        self.with(|state| {
            state.reset.check_and_clear();
            state.current.reset();
            state.session.clear();
        });
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
