//! Motor PWM shared between the main loop and the flow handlers.

use core::cell::RefCell;

use critical_section::Mutex;
use dispenser_core::hal::MotorDrive;
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::timer::simple_pwm::SimplePwm;

use crate::runtime::SAMPLE_REQUEST;

static MOTOR: Mutex<RefCell<Option<MotorDriver>>> = Mutex::new(RefCell::new(None));

/// PWM channel 1 of TIM3 driving the pump motor gate.
pub struct MotorDriver {
    pwm: SimplePwm<'static, TIM3>,
}

impl MotorDriver {
    pub fn new(mut pwm: SimplePwm<'static, TIM3>) -> Self {
        let mut channel = pwm.ch1();
        channel.set_duty_cycle_fully_off();
        channel.enable();
        Self { pwm }
    }

    fn set_speed(&mut self, speed: u8) {
        self.pwm
            .ch1()
            .set_duty_cycle_fraction(u16::from(speed), u16::from(u8::MAX));
    }

    /// Parks the driver where every [`SharedMotor`] handle can reach it.
    pub fn install(self) {
        critical_section::with(|cs| {
            MOTOR.borrow_ref_mut(cs).replace(self);
        });
    }
}

/// Handle to the installed [`MotorDriver`]; safe to use from any context.
#[derive(Copy, Clone, Default)]
pub struct SharedMotor;

impl MotorDrive for SharedMotor {
    fn set_speed(&mut self, speed: u8) {
        critical_section::with(|cs| {
            if let Some(motor) = MOTOR.borrow_ref_mut(cs).as_mut() {
                motor.set_speed(speed);
            }
        });
    }

    fn start_current_sample(&mut self) {
        SAMPLE_REQUEST.signal(());
    }

    fn stop_current_sense(&mut self) {
        SAMPLE_REQUEST.reset();
    }
}
