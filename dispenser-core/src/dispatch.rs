//! Top-level node state machine and command dispatcher.
//!
//! [`Node`] owns every main-loop collaborator and walks the node through
//! addressing epochs:
//!
//! ```text
//! Booting -> Negotiating -> Online(id) -> (bus reset) -> Negotiating -> ...
//!                              |-> Loopback   (until bus reset)
//!                              |-> IdConflict (until bus reset)
//! Booting/Negotiating -> ConfigFault (terminal)
//! ```
//!
//! [`Node::step`] does one non-blocking unit of work so hosts can interleave
//! several nodes; [`Node::run`] is the firmware's endless loop. The only
//! blocking paths are the boot splash, timed dispenses and the liquid level
//! refresh.

use crate::address::{AddressError, AddressNegotiator, NegotiationOutcome, NodeId};
use crate::config::NodeConfig;
use crate::dispense::{DispenseController, TimedOutcome};
use crate::hal::{Delay, LedOutput, LevelSensor, MotorDrive, NvStorage, SerialPort};
use crate::led::{BOOT_SPLASH, COLOR_FAULT, COLOR_LOOPBACK, COLOR_OFF, LedPattern};
use crate::level::LiquidLevel;
use crate::protocol::{Command, Packet, PacketLink, PacketType, Received};
use crate::shared::SharedState;
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder, TelemetrySink};
use crate::ticks::{StoreError, TickStore};

const SPLASH_CYCLES: u8 = 5;
const SPLASH_STEP_MS: u32 = 50;

/// Collaborator types bound to one node.
pub trait Board {
    type Link: PacketLink;
    type Motor: MotorDrive;
    type Led: LedOutput;
    type Storage: NvStorage;
    type Level: LevelSensor;
    type Delay: Delay;
    type Telemetry: TelemetrySink;
}

/// Main-loop owned collaborators.
pub struct Peripherals<B: Board> {
    pub link: B::Link,
    pub motor: B::Motor,
    pub led: B::Led,
    pub storage: B::Storage,
    pub level: B::Level,
    pub delay: B::Delay,
    pub telemetry: B::Telemetry,
}

/// Top-level node state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeState {
    Booting,
    Negotiating,
    Online(NodeId),
    /// Echoing every received byte until the next bus reset.
    Loopback,
    /// The coordinator reported a duplicate id; waits for a bus reset.
    IdConflict,
    /// The id slot is unusable. Terminal.
    ConfigFault,
}

impl NodeState {
    #[must_use]
    pub const fn id(self) -> Option<NodeId> {
        match self {
            NodeState::Online(id) => Some(id),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, NodeState::ConfigFault)
    }
}

/// One pump node.
pub struct Node<'a, B: Board> {
    shared: &'a SharedState,
    io: Peripherals<B>,
    state: NodeState,
    negotiator: Option<AddressNegotiator>,
    ticks: TickStore,
    level: LiquidLevel,
    telemetry: TelemetryRecorder,
    /// Requested tick count of the dispense the main loop last started.
    dispensing: Option<u32>,
    store_failing: bool,
}

impl<'a, B: Board> Node<'a, B> {
    #[must_use]
    pub fn new(shared: &'a SharedState, config: &NodeConfig, io: Peripherals<B>) -> Self {
        Self {
            shared,
            io,
            state: NodeState::Booting,
            negotiator: None,
            ticks: TickStore::with_threshold(config.ticks_save_threshold),
            level: LiquidLevel::with_samples(config.liquid_level_samples),
            telemetry: TelemetryRecorder::new(),
            dispensing: None,
            store_failing: false,
        }
    }

    /// Power-on sequence: motor off, splash, first level reading.
    pub fn boot(&mut self) {
        self.io.motor.stop();
        for _ in 0..SPLASH_CYCLES {
            for color in BOOT_SPLASH {
                self.io.led.set_color(color);
                self.io.delay.delay_ms(SPLASH_STEP_MS);
            }
        }
        self.io.led.set_color(COLOR_OFF);

        self.record(TelemetryEventKind::Boot, TelemetryPayload::None);
        self.refresh_level();
    }

    /// Firmware entry: boots, then services the bus forever.
    pub fn run(&mut self) -> ! {
        self.boot();
        loop {
            self.step();
        }
    }

    /// Performs one unit of work and returns the resulting state.
    pub fn step(&mut self) -> NodeState {
        match self.state {
            NodeState::ConfigFault => return self.state,
            NodeState::Booting => {
                self.start_epoch();
                return self.state;
            }
            _ => {}
        }

        if self.shared.check_and_clear_reset() {
            self.record(TelemetryEventKind::BusReset, TelemetryPayload::None);
            self.start_epoch();
            return self.state;
        }

        match self.state {
            NodeState::Negotiating => self.negotiate(),
            NodeState::Online(id) => self.service(id),
            NodeState::Loopback => self.echo(),
            NodeState::IdConflict | NodeState::Booting | NodeState::ConfigFault => {}
        }
        self.state
    }

    /// Clears per-epoch state and re-enters address negotiation.
    fn start_epoch(&mut self) {
        self.shared.begin_epoch();
        self.io.motor.stop();
        self.io.motor.stop_current_sense();
        self.install_pattern(LedPattern::Off);
        self.io.link.resync();
        self.dispensing = None;

        match AddressNegotiator::load(&mut self.io.storage) {
            Ok(negotiator) => {
                negotiator.begin(&mut self.io.led);
                self.negotiator = Some(negotiator);
                self.state = NodeState::Negotiating;
                self.record(
                    TelemetryEventKind::Negotiating,
                    TelemetryPayload::Node(negotiator.id().get()),
                );
            }
            Err(err) => {
                AddressNegotiator::signal_unconfigured(&mut self.io.led);
                self.negotiator = None;
                self.state = NodeState::ConfigFault;
                let details = match err {
                    AddressError::Unconfigured(raw) => TelemetryPayload::Node(raw),
                    AddressError::Storage(_) => TelemetryPayload::None,
                };
                self.record(TelemetryEventKind::ConfigFault, details);
            }
        }
    }

    fn negotiate(&mut self) {
        let Some(negotiator) = self.negotiator else {
            return;
        };

        let reset = self.shared.reset_pending();
        // A reset outcome is consumed by the next `step`.
        if let Some(NegotiationOutcome::Assigned(id)) = negotiator.step(self.io.link.port(), reset) {
            negotiator.finish(&mut self.io.led);
            self.state = NodeState::Online(id);
            self.record(TelemetryEventKind::AddressAssigned, TelemetryPayload::Node(id.get()));
        }
    }

    fn service(&mut self, id: NodeId) {
        let now = self.shared.now();
        match self.io.link.poll(now) {
            Some(Received::Packet(packet)) => {
                if packet.is_for(id.get()) {
                    self.handle_packet(&packet);
                }
            }
            Some(Received::CrcFailure) => {
                self.record(TelemetryEventKind::CrcFailure, TelemetryPayload::None);
            }
            Some(Received::Reset) => {
                self.record(TelemetryEventKind::BusReset, TelemetryPayload::None);
                self.start_epoch();
                return;
            }
            None => {}
        }

        if matches!(self.state, NodeState::Online(_)) {
            self.idle();
        }
    }

    /// Executes a packet already accepted by the address filter.
    pub fn handle_packet(&mut self, packet: &Packet) {
        let Some(command) = Command::decode(packet) else {
            return;
        };

        if self.shared.fault_latched() && (command.affects_motor() || command.affects_led()) {
            self.record(TelemetryEventKind::CommandSuppressed, TelemetryPayload::Command(packet.kind));
            return;
        }

        match command {
            Command::Ping => {}
            Command::SetMotorSpeed(speed) => self.io.motor.set_speed(speed),
            Command::DispenseTicks(target) => self.dispense_ticks(target),
            Command::DispenseTimed(duration) => self.dispense_timed(duration),
            Command::QueryIsDispensing => {
                let dispensing = u8::from(self.shared.is_dispensing());
                self.io.link.send_u8(PacketType::IsDispensing, dispensing);
            }
            Command::QueryLiquidLevel => {
                let level = self.level.value();
                self.io.link.send_u16(PacketType::LiquidLevel, level);
            }
            Command::RefreshLiquidLevel => self.refresh_level(),
            Command::LedOff => self.install_pattern(LedPattern::Off),
            Command::LedIdle => self.install_pattern(LedPattern::Idle),
            Command::LedDispense => self.install_pattern(LedPattern::Dispense),
            Command::LedDrinkDone => self.install_pattern(LedPattern::DrinkDone),
            Command::LedClean => self.install_pattern(LedPattern::Clean),
            Command::CommTest => {
                self.io.led.set_color(COLOR_LOOPBACK);
                self.state = NodeState::Loopback;
                self.record(TelemetryEventKind::LoopbackStarted, TelemetryPayload::None);
            }
            Command::IdConflict => {
                self.io.led.set_color(COLOR_FAULT);
                self.state = NodeState::IdConflict;
                self.record(TelemetryEventKind::IdConflict, TelemetryPayload::None);
            }
            Command::SetCurrentThreshold(threshold) => self.shared.set_current_threshold(threshold),
            Command::QuerySavedTicks => {
                match self.ticks.saved_total(self.shared, &mut self.io.storage) {
                    Ok(total) => self.io.link.send_u32(PacketType::SavedTickCount, total),
                    Err(_) => self.record(TelemetryEventKind::TickStoreError, TelemetryPayload::None),
                }
            }
            Command::ResetSavedTicks => {
                match self.ticks.reset_total(self.shared, &mut self.io.storage) {
                    Ok(()) => self.record(TelemetryEventKind::TickTotalReset, TelemetryPayload::None),
                    Err(StoreError::Busy) => self.record(
                        TelemetryEventKind::CommandSuppressed,
                        TelemetryPayload::Command(packet.kind),
                    ),
                    Err(StoreError::Storage(_)) => {
                        self.record(TelemetryEventKind::TickStoreError, TelemetryPayload::None);
                    }
                }
            }
        }
    }

    fn dispense_ticks(&mut self, target: u32) {
        let controller = DispenseController::new(self.shared);
        match controller.start_ticks(target, &mut self.io.motor) {
            Ok(_) => {
                self.dispensing = Some(target);
                self.record(TelemetryEventKind::DispenseStarted, TelemetryPayload::Ticks(target));
            }
            Err(_) => self.record(TelemetryEventKind::DispenseRejected, TelemetryPayload::Ticks(target)),
        }
    }

    fn dispense_timed(&mut self, duration: u32) {
        let controller = DispenseController::new(self.shared);
        match controller.start_timed(duration, &mut self.io.motor, &mut self.io.delay) {
            TimedOutcome::Completed => self.record(
                TelemetryEventKind::TimedDispenseComplete,
                TelemetryPayload::Elapsed(duration),
            ),
            TimedOutcome::Cancelled { elapsed } => self.record(
                TelemetryEventKind::TimedDispenseCancelled,
                TelemetryPayload::Elapsed(elapsed),
            ),
        }
    }

    fn refresh_level(&mut self) {
        match self.level.refresh(self.shared, &mut self.io.level) {
            Ok(reading) => self.record(TelemetryEventKind::LiquidLevel, TelemetryPayload::Reading(reading)),
            Err(_) => self.record(TelemetryEventKind::LiquidLevelRefused, TelemetryPayload::None),
        }
    }

    fn install_pattern(&mut self, pattern: LedPattern) {
        self.shared.set_led_pattern(pattern, pattern.default_divisor());
        if pattern == LedPattern::Off {
            self.io.led.set_color(COLOR_OFF);
        }
    }

    /// Loopback: echo whatever arrived, giving up on a blocked transmitter at reset.
    fn echo(&mut self) {
        let port = self.io.link.port();
        while let Some(byte) = port.read_byte() {
            while !port.try_write_byte(byte) {
                if self.shared.reset_pending() {
                    return;
                }
            }
        }
    }

    /// Work done between packets.
    fn idle(&mut self) {
        if let Some((pattern, frame)) = self.shared.led_frame_due() {
            self.io.led.set_color(pattern.color_at(frame));
        }

        if let Some(target) = self.dispensing.filter(|_| !self.shared.is_dispensing()) {
            self.dispensing = None;
            if self.shared.fault_latched() {
                let threshold = self.shared.current_threshold();
                self.record(TelemetryEventKind::CurrentSenseTrip, TelemetryPayload::Reading(threshold));
            } else {
                self.record(TelemetryEventKind::DispenseComplete, TelemetryPayload::Ticks(target));
            }
        }

        match self.ticks.flush_if_due(self.shared, &mut self.io.storage) {
            Ok(Some(flushed)) => {
                self.store_failing = false;
                self.record(TelemetryEventKind::TickFlush, TelemetryPayload::Ticks(flushed.delta));
            }
            Ok(None) => {}
            Err(_) => {
                if !self.store_failing {
                    self.store_failing = true;
                    self.record(TelemetryEventKind::TickStoreError, TelemetryPayload::None);
                }
            }
        }
    }

    fn record(&mut self, event: TelemetryEventKind, details: TelemetryPayload) {
        let record = self.telemetry.record(event, details, self.shared.now());
        self.io.telemetry.emit(&record);
    }

    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    #[must_use]
    pub fn shared(&self) -> &'a SharedState {
        self.shared
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    #[must_use]
    pub fn peripherals(&self) -> &Peripherals<B> {
        &self.io
    }

    pub fn peripherals_mut(&mut self) -> &mut Peripherals<B> {
        &mut self.io
    }

    /// Last cached liquid level.
    #[must_use]
    pub fn liquid_level(&self) -> u16 {
        self.level.value()
    }

    /// Ticks taken from the flow counter but not yet written to storage.
    #[must_use]
    pub fn unflushed_ticks(&self) -> u32 {
        self.ticks.pending()
    }
}
