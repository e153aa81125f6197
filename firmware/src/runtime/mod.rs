use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt::{error, info};
use defmt_rtt as _;
use dispenser_core::config::NodeConfig;
use dispenser_core::flow::SensorLine;
use dispenser_core::protocol::FramedLink;
use dispenser_core::{Node, Peripherals, SharedState};
use embassy_executor::InterruptExecutor;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, OutputType, Pull, Speed};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::time::khz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;

use crate::hw::{
    AnalogFrontEnd, BlockingDelay, BusSerial, DispenserBoard, FlashStore, LevelProbe, MotorDriver,
    SharedMotor, TwoWireLed,
};
use crate::telemetry::DefmtSink;

mod handlers;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const BUS_BAUD: u32 = 9_600;
const BUS_BUFFER_SIZE: usize = 64;

pub(crate) static SHARED: SharedState = SharedState::new();
/// Raised to request one current-sense conversion.
pub(crate) static SAMPLE_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static HANDLER_EXECUTOR: InterruptExecutor = InterruptExecutor::new();
static BUS_TX_BUFFER: StaticCell<[u8; BUS_BUFFER_SIZE]> = StaticCell::new();
static BUS_RX_BUFFER: StaticCell<[u8; BUS_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct BusIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

#[hal::interrupt]
unsafe fn SPI2_3() {
    unsafe { HANDLER_EXECUTOR.on_interrupt() }
}

macro_rules! spawn_or_log {
    ($spawner:expr, $task:expr, $name:literal) => {
        if let Err(err) = $spawner.spawn($task) {
            error!("failed to spawn {=str} task: {}", $name, err);
        }
    };
}

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = hal::init(hal::Config::default());
    let config = NodeConfig::new();

    let motor = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new(p.PA6, OutputType::PushPull)),
        None,
        None,
        None,
        khz(20),
        CountingMode::EdgeAlignedUp,
    );
    MotorDriver::new(motor).install();
    AnalogFrontEnd::new(Adc::new(p.ADC1), p.PA4, p.PA5).install();

    let halls = [
        ExtiInput::new(p.PB4, p.EXTI4, Pull::Up),
        ExtiInput::new(p.PB5, p.EXTI5, Pull::Up),
        ExtiInput::new(p.PB6, p.EXTI6, Pull::Up),
        ExtiInput::new(p.PB7, p.EXTI7, Pull::Up),
    ];
    SHARED.seed_sensor_levels([
        halls[0].is_high(),
        halls[1].is_high(),
        halls[2].is_high(),
        halls[3].is_high(),
    ]);
    let sync = ExtiInput::new(p.PB8, p.EXTI8, Pull::None);
    let reset = ExtiInput::new(p.PA0, p.EXTI0, Pull::Up);

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = BUS_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = match BufferedUart::new(
        p.USART2,
        p.PA3,
        p.PA2,
        BUS_TX_BUFFER.init([0; BUS_BUFFER_SIZE]),
        BUS_RX_BUFFER.init([0; BUS_BUFFER_SIZE]),
        BusIrqs,
        uart_config,
    ) {
        Ok(uart) => uart,
        Err(err) => {
            error!("failed to initialize bus UART: {}", err);
            loop {
                cortex_m::asm::wfi();
            }
        }
    };

    hal::interrupt::SPI2_3.set_priority(Priority::P1);
    let spawner = HANDLER_EXECUTOR.start(hal::interrupt::SPI2_3);
    for (pin, line) in halls.into_iter().zip(SensorLine::ALL) {
        spawn_or_log!(spawner, handlers::hall_edges(pin, line), "hall");
    }
    spawn_or_log!(spawner, handlers::sync_edges(sync), "sync");
    spawn_or_log!(spawner, handlers::reset_edges(reset), "reset");
    spawn_or_log!(spawner, handlers::time_base(), "time base");
    spawn_or_log!(spawner, handlers::current_sense(), "current sense");

    let io = Peripherals::<DispenserBoard> {
        link: FramedLink::new(BusSerial::new(uart), config.frame_gap),
        motor: SharedMotor,
        led: TwoWireLed::new(
            Output::new(p.PA7, Level::Low, Speed::VeryHigh),
            Output::new(p.PA8, Level::Low, Speed::VeryHigh),
        ),
        storage: FlashStore::new(Flash::new_blocking(p.FLASH)),
        level: LevelProbe,
        delay: BlockingDelay,
        telemetry: DefmtSink,
    };

    info!("dispenser node starting");
    Node::new(&SHARED, &config, io).run()
}
