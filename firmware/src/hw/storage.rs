//! Node record in the last flash page.
//!
//! Layout (one double word, little endian):
//!
//! ```text
//! [0]    node id
//! [1..4] 0xFF padding
//! [4..8] lifetime tick total
//! ```
//!
//! The id byte is provisioned with the image and carried over on every
//! tick total rewrite.

use defmt::warn;
use dispenser_core::hal::NvStorage;
use embassy_stm32::flash::{Blocking, Error, FLASH_SIZE, Flash};

const PAGE_SIZE: u32 = 2 * 1024;
#[allow(clippy::cast_possible_truncation)]
const RECORD_OFFSET: u32 = FLASH_SIZE as u32 - PAGE_SIZE;
const RECORD_LEN: usize = 8;
const ERASED_TOTAL: u32 = u32::MAX;

pub struct FlashStore {
    flash: Flash<'static, Blocking>,
}

impl FlashStore {
    pub fn new(flash: Flash<'static, Blocking>) -> Self {
        Self { flash }
    }

    fn read_record(&mut self) -> Result<[u8; RECORD_LEN], Error> {
        let mut record = [0; RECORD_LEN];
        self.flash.blocking_read(RECORD_OFFSET, &mut record)?;
        Ok(record)
    }
}

impl NvStorage for FlashStore {
    type Error = Error;

    fn read_node_id(&mut self) -> Result<u8, Error> {
        Ok(self.read_record()?[0])
    }

    fn read_tick_total(&mut self) -> Result<u32, Error> {
        let record = self.read_record()?;
        let total = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        Ok(if total == ERASED_TOTAL { 0 } else { total })
    }

    fn write_tick_total(&mut self, total: u32) -> Result<(), Error> {
        let mut record = self.read_record()?;
        record[1..4].fill(0xFF);
        record[4..].copy_from_slice(&total.to_le_bytes());

        self.flash
            .blocking_erase(RECORD_OFFSET, RECORD_OFFSET + PAGE_SIZE)
            .inspect_err(|err| warn!("storage: erase failed: {}", err))?;
        self.flash
            .blocking_write(RECORD_OFFSET, &record)
            .inspect_err(|err| warn!("storage: write failed: {}", err))
    }
}
