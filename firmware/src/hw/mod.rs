//! Board support for the dispenser node (STM32G0B1).
//!
//! Pin map:
//!
//! | Signal          | Pin  | Peripheral        |
//! |-----------------|------|-------------------|
//! | Bus TX / RX     | PA2 / PA3 | USART2       |
//! | Bus reset       | PA0  | EXTI0             |
//! | Hall 0..3       | PB4..PB7 | EXTI4..EXTI7  |
//! | LED sync        | PB8  | EXTI8             |
//! | Current sense   | PA4  | ADC1              |
//! | Liquid level    | PA5  | ADC1              |
//! | Motor PWM       | PA6  | TIM3_CH1          |
//! | LED clock/data  | PA7 / PA8 | GPIO         |

mod analog;
mod led;
mod motor;
mod serial;
mod storage;

pub use analog::{AnalogFrontEnd, LevelProbe};
pub use led::TwoWireLed;
pub use motor::{MotorDriver, SharedMotor};
pub use serial::BusSerial;
pub use storage::FlashStore;

use dispenser_core::Board;
use dispenser_core::hal::Delay;
use dispenser_core::protocol::FramedLink;
use embassy_time::Duration;

use crate::telemetry::DefmtSink;

/// Busy-wait delay on the embassy time driver.
pub struct BlockingDelay;

impl Delay for BlockingDelay {
    fn delay_ms(&mut self, ms: u32) {
        embassy_time::block_for(Duration::from_millis(u64::from(ms)));
    }
}

/// Collaborators bound to the node main loop.
pub struct DispenserBoard;

impl Board for DispenserBoard {
    type Link = FramedLink<BusSerial>;
    type Motor = SharedMotor;
    type Led = TwoWireLed;
    type Storage = FlashStore;
    type Level = LevelProbe;
    type Delay = BlockingDelay;
    type Telemetry = DefmtSink;
}
