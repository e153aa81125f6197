//! Asynchronous event handlers.
//!
//! These run on the interrupt executor and preempt the main loop. Each one
//! forwards its event to [`SHARED`] and returns to waiting; none of them
//! blocks inside a critical section for longer than one ADC conversion.

use dispenser_core::flow::SensorLine;
use dispenser_core::hal::MotorDrive;
use dispenser_core::reset::Edge;
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Ticker, Timer};

use super::{SAMPLE_REQUEST, SHARED};
use crate::hw::{AnalogFrontEnd, SharedMotor};

/// Spacing between current-sense conversions while a dispense runs.
const SAMPLE_INTERVAL: Duration = Duration::from_micros(500);

#[embassy_executor::task(pool_size = 4)]
pub async fn hall_edges(mut pin: ExtiInput<'static>, line: SensorLine) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        SHARED.on_sensor_edge(line, pin.is_high(), &mut SharedMotor);
    }
}

#[embassy_executor::task]
pub async fn sync_edges(mut pin: ExtiInput<'static>) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        SHARED.on_sync_edge(pin.is_high());
    }
}

#[embassy_executor::task]
pub async fn reset_edges(mut pin: ExtiInput<'static>) -> ! {
    loop {
        pin.wait_for_any_edge().await;
        if SHARED.on_reset_edge(Edge::from_level(pin.is_high())) {
            defmt::debug!("bus reset latched at {}ms", SHARED.now());
        }
    }
}

#[embassy_executor::task]
pub async fn time_base() -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        SHARED.on_time_tick();
    }
}

#[embassy_executor::task]
pub async fn current_sense() -> ! {
    loop {
        SAMPLE_REQUEST.wait().await;
        // Readings re-arm the request; pace them so lower priorities run.
        Timer::after(SAMPLE_INTERVAL).await;
        match AnalogFrontEnd::read_current() {
            Some(reading) => {
                SHARED.on_current_sample(reading, &mut SharedMotor);
            }
            None => SharedMotor.stop_current_sense(),
        }
    }
}
