//! NFC launch-app tag firmware for ESP32-S3 + PN5180.
//!
//! Boot order: LED, PN5180 and T2T emulation, NDEF message, emulation start.
//! Afterwards a 5 s wake-up timer runs in the background and the main task
//! sleeps in a loop while the NFC thread answers readers.

mod nfc;

use std::convert::Infallible;
use std::time::Duration;

use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{Gpio1, Gpio15, Gpio2, Input, Output, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::spi::config::Config as SpiConfig;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::timer::EspTaskTimerService;
use launchapp_tag::config::{LaunchAppConfig, NdefBuffer, NDEF_MSG_BUF_SIZE};
use launchapp_tag::frontend::FrontendError;
use launchapp_tag::launch::{self, errno, FailurePolicy, LaunchAppEmulator, SetupError};
use launchapp_tag::t2t::T2tError;
use launchapp_tag::wake::{SleepCycle, WakeTimer};
use log::{error, info, warn};

use crate::nfc::Pn5180;

#[cfg(feature = "reboot")]
const FAILURE_POLICY: FailurePolicy = FailurePolicy::Reboot;
#[cfg(not(feature = "reboot"))]
const FAILURE_POLICY: FailurePolicy = FailurePolicy::ReturnCode;

/// PN5180 SPI clock, the chip allows up to 7 MHz
const NFC_SPI_HZ: u32 = 5_000_000;

/// Stack of the NFC thread, the default pthread stack is too small for
/// the tag memory plus driver frames
const NFC_STACK_SIZE: usize = 8 * 1024;

/// Emulation thread back-off when no IRQ is pending
const NFC_POLL_IDLE_MS: u32 = 1;
const NFC_ERROR_BACKOFF_MS: u32 = 100;

type NfcFrontend = Pn5180<
    SpiDeviceDriver<'static, SpiDriver<'static>>,
    PinDriver<'static, Gpio2, Input>,
    PinDriver<'static, Gpio15, Output>,
    Ets,
>;
type Led = PinDriver<'static, Gpio1, Output>;
type Emulator = LaunchAppEmulator<NfcFrontend, Led>;

fn main() {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("========================================");
    info!("NFC Launch App tag v{}", env!("CARGO_PKG_VERSION"));
    info!("ESP32-S3 + PN5180");
    info!("========================================");

    let config = LaunchAppConfig::default().with_failure_policy(FAILURE_POLICY);
    let Err(err) = run(&config);
    let code = match err.downcast_ref::<SetupError>() {
        Some(setup_err) => config.failure_policy.resolve(setup_err, reboot),
        None => {
            error!("Firmware failed: {err:#}");
            config.failure_policy.resolve_code(-errno::EIO, reboot)
        }
    };
    error!("main returns {code}");
}

fn reboot() -> ! {
    warn!("Rebooting...");
    FreeRtos::delay_ms(100);
    esp_idf_hal::reset::restart()
}

fn millis(period: Duration) -> u32 {
    u32::try_from(period.as_millis()).unwrap_or(u32::MAX)
}

fn run(config: &LaunchAppConfig) -> anyhow::Result<Infallible> {
    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    // LED1 lights while a reader field is present
    let led = PinDriver::output(pins.gpio1).map_err(|err| {
        error!("Cannot init LEDs! ({err})");
        SetupError::Leds
    })?;

    let spi = SpiDeviceDriver::new_single(
        peripherals.spi2,
        pins.gpio5,       // SCK
        pins.gpio6,       // MOSI
        Some(pins.gpio4), // MISO
        Some(pins.gpio8), // NSS
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(Hertz(NFC_SPI_HZ)),
    );
    let busy = PinDriver::input(pins.gpio2);
    let rst = PinDriver::output(pins.gpio15);
    let frontend = match (spi, busy, rst) {
        (Ok(spi), Ok(busy), Ok(rst)) => Pn5180::new(spi, busy, rst, Ets),
        (spi, busy, rst) => {
            error!(
                "PN5180 bus setup failed (spi: {:?}, busy: {:?}, rst: {:?})",
                spi.err(),
                busy.err(),
                rst.err()
            );
            return Err(SetupError::NfcSetup(T2tError::Frontend(FrontendError::Bus)).into());
        }
    };

    let mut ndef_msg_buf: NdefBuffer = [0u8; NDEF_MSG_BUF_SIZE];
    let emulator = launch::setup(config, led, frontend, &mut ndef_msg_buf)?;
    let (major, minor) = emulator.frontend().firmware_version();
    info!("Tag emulation running on PN5180 firmware {major}.{minor}");

    std::thread::Builder::new()
        .name("nfc".into())
        .stack_size(NFC_STACK_SIZE)
        .spawn(move || run_emulation(emulator))?;

    let timer_service = EspTaskTimerService::new()?;
    let mut wake = WakeTimer::new(config.wake_interval);
    let wake_timer = timer_service.timer(move || wake.on_tick())?;
    wake_timer.every(config.wake_interval)?;

    let mut sleep_cycle = SleepCycle::new(config.sleep_period);
    loop {
        sleep_cycle.run_once(|period| FreeRtos::delay_ms(millis(period)));
    }
}

fn run_emulation(mut emulator: Emulator) {
    loop {
        match emulator.process() {
            Ok(true) => {}
            Ok(false) => FreeRtos::delay_ms(NFC_POLL_IDLE_MS),
            Err(err) => {
                warn!("NFC emulation error: {err}");
                FreeRtos::delay_ms(NFC_ERROR_BACKOFF_MS);
            }
        }
    }
}
