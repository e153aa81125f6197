//! Two-wire (clock + data) RGB LED, shifted out MSB first in R, G, B order.

use dispenser_core::hal::LedOutput;
use embassy_stm32::gpio::Output;
use embassy_time::Duration;
use rgb::RGB8;

/// Clock held low this long latches the shifted colour.
const LATCH: Duration = Duration::from_micros(500);

pub struct TwoWireLed {
    clock: Output<'static>,
    data: Output<'static>,
}

impl TwoWireLed {
    pub fn new(clock: Output<'static>, data: Output<'static>) -> Self {
        Self { clock, data }
    }

    fn shift(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            if byte & (1 << bit) == 0 {
                self.data.set_low();
            } else {
                self.data.set_high();
            }
            self.clock.set_high();
            self.clock.set_low();
        }
    }
}

impl LedOutput for TwoWireLed {
    fn set_color(&mut self, color: RGB8) {
        self.clock.set_low();
        self.shift(color.r);
        self.shift(color.g);
        self.shift(color.b);
        embassy_time::block_for(LATCH);
    }
}
