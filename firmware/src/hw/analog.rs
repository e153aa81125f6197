//! ADC1 front end: motor current sense and the liquid level probe.
//!
//! Both channels share one converter. The sampler task and the main loop
//! each take it inside a critical section for the length of a conversion.

use core::cell::RefCell;

use critical_section::Mutex;
use dispenser_core::hal::LevelSensor;
use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime};
use embassy_stm32::peripherals::ADC1;

static ANALOG: Mutex<RefCell<Option<AnalogFrontEnd>>> = Mutex::new(RefCell::new(None));

pub struct AnalogFrontEnd {
    adc: Adc<'static, ADC1>,
    current: AnyAdcChannel<ADC1>,
    level: AnyAdcChannel<ADC1>,
}

impl AnalogFrontEnd {
    pub fn new(
        mut adc: Adc<'static, ADC1>,
        current: impl AdcChannel<ADC1>,
        level: impl AdcChannel<ADC1>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        Self {
            adc,
            current: current.degrade_adc(),
            level: level.degrade_adc(),
        }
    }

    pub fn install(self) {
        critical_section::with(|cs| {
            ANALOG.borrow_ref_mut(cs).replace(self);
        });
    }

    /// One current-sense conversion, or `None` before [`install`](Self::install).
    pub fn read_current() -> Option<u16> {
        critical_section::with(|cs| {
            ANALOG
                .borrow_ref_mut(cs)
                .as_mut()
                .map(|front| front.adc.blocking_read(&mut front.current))
        })
    }

    fn read_level() -> Option<u16> {
        critical_section::with(|cs| {
            ANALOG
                .borrow_ref_mut(cs)
                .as_mut()
                .map(|front| front.adc.blocking_read(&mut front.level))
        })
    }
}

/// Liquid level channel as seen by the main loop.
#[derive(Copy, Clone, Default)]
pub struct LevelProbe;

impl LevelSensor for LevelProbe {
    fn read(&mut self) -> u16 {
        AnalogFrontEnd::read_level().unwrap_or(0)
    }
}
