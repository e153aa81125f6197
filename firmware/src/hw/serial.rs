//! Pump bus UART.

use defmt::warn;
use dispenser_core::hal::SerialPort;
use embassy_stm32::usart::BufferedUart;
use embedded_io::{Read, ReadReady, Write};

pub struct BusSerial {
    uart: BufferedUart<'static>,
}

impl BusSerial {
    pub fn new(uart: BufferedUart<'static>) -> Self {
        Self { uart }
    }
}

impl SerialPort for BusSerial {
    fn read_byte(&mut self) -> Option<u8> {
        if !self.uart.read_ready().unwrap_or(false) {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.uart.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(err) => {
                warn!("bus: UART read error {}", err);
                None
            }
        }
    }

    fn write_byte(&mut self, byte: u8) {
        if let Err(err) = self.uart.write_all(&[byte]) {
            warn!("bus: UART write error {}", err);
        }
    }

    /// The transmit ring drains at line rate; a full ring only delays the
    /// caller for a byte time.
    fn try_write_byte(&mut self, byte: u8) -> bool {
        match self.uart.write(&[byte]) {
            Ok(count) => count == 1,
            Err(err) => {
                warn!("bus: UART write error {}", err);
                false
            }
        }
    }
}
