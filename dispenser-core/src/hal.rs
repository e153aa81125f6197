//! Collaborator interfaces implemented by the firmware and the emulator.
//!
//! The core never touches registers. Each peripheral the node needs is
//! described here by the smallest trait the control logic can drive.

use rgb::RGB8;

/// Byte-level serial transport on the pump bus.
pub trait SerialPort {
    /// Returns the next received byte without blocking.
    fn read_byte(&mut self) -> Option<u8>;

    /// Transmits a byte, waiting for room in the transmitter.
    fn write_byte(&mut self, byte: u8);

    /// Transmits a byte only if the transmitter can take it right away.
    fn try_write_byte(&mut self, byte: u8) -> bool;
}

/// Motor PWM output plus the current-sense acquisition it feeds.
///
/// `stop` and `stop_current_sense` may be invoked from interrupt context and
/// must be idempotent.
pub trait MotorDrive {
    fn set_speed(&mut self, speed: u8);

    fn stop(&mut self) {
        self.set_speed(0);
    }

    /// Starts one current-sense conversion; the reading is delivered
    /// asynchronously to [`SharedState::on_current_sample`](crate::SharedState::on_current_sample).
    fn start_current_sample(&mut self);

    /// Powers the current-sense front end down.
    fn stop_current_sense(&mut self);
}

/// Single RGB status LED.
pub trait LedOutput {
    fn set_color(&mut self, color: RGB8);
}

/// Analog channel wired to the liquid level probe.
pub trait LevelSensor {
    /// Performs one blocking conversion.
    fn read(&mut self) -> u16;
}

/// Non-volatile storage slots used by the node.
pub trait NvStorage {
    type Error;

    /// Reads the configured node id slot.
    fn read_node_id(&mut self) -> Result<u8, Self::Error>;

    /// Reads the lifetime tick total slot.
    fn read_tick_total(&mut self) -> Result<u32, Self::Error>;

    /// Replaces the lifetime tick total slot.
    fn write_tick_total(&mut self, total: u32) -> Result<(), Self::Error>;
}

/// Blocking millisecond delay.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

impl<T: SerialPort + ?Sized> SerialPort for &mut T {
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte);
    }

    fn try_write_byte(&mut self, byte: u8) -> bool {
        (**self).try_write_byte(byte)
    }
}

impl<T: LedOutput + ?Sized> LedOutput for &mut T {
    fn set_color(&mut self, color: RGB8) {
        (**self).set_color(color);
    }
}
