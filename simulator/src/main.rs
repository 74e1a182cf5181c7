//! NFC launch-app tag simulator
//!
//! Runs the tag's boot sequence on the desktop. The NFC controller is replaced
//! by an in-process radio link and a simulated phone taps the tag.
//!
//! # Usage
//! ```bash
//! # Boot, let a phone tap once, sleep forever
//! cargo run -p launchapp-simulator
//!
//! # Three taps, stop after two sleep cycles
//! cargo run -p launchapp-simulator -- --taps 3 --cycles 2
//!
//! # Break a boot step and return its error code instead of rebooting
//! cargo run -p launchapp-simulator -- --fail-at nfc --no-reboot
//! ```

mod led;
mod radio;

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use launchapp_tag::config::{LaunchAppConfig, NdefBuffer, NDEF_MSG_BUF_SIZE};
use launchapp_tag::launch::{self, FailurePolicy, LaunchAppEmulator};
use launchapp_tag::ndef::LaunchAction;
use launchapp_tag::wake::{SleepCycle, WakeTimer};
use log::{error, info, warn};

use crate::led::SimLed;
use crate::radio::AirFrontend;

/// Exit status standing in for a cold reboot
const REBOOT_EXIT_CODE: i32 = 75;

/// Emulation thread back-off when the link is quiet
const POLL_IDLE: Duration = Duration::from_millis(1);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

const TAP_DWELL: Duration = Duration::from_millis(300);
const TAP_SPACING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Leds,
    Nfc,
    Encode,
    Payload,
    Emulation,
}

#[derive(Debug)]
struct Args {
    taps: u32,
    cycles: Option<u64>,
    fail_at: Option<Step>,
    reboot: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut parsed = Args {
            taps: 1,
            cycles: None,
            fail_at: None,
            reboot: true,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--taps" => {
                    let value = args.next().context("--taps needs a count")?;
                    parsed.taps = value.parse().context("--taps needs a count")?;
                }
                "--cycles" => {
                    let value = args.next().context("--cycles needs a count")?;
                    parsed.cycles = Some(value.parse().context("--cycles needs a count")?);
                }
                "--fail-at" => {
                    let value = args.next().context("--fail-at needs a step")?;
                    parsed.fail_at = Some(match value.as_str() {
                        "leds" => Step::Leds,
                        "nfc" => Step::Nfc,
                        "encode" => Step::Encode,
                        "payload" => Step::Payload,
                        "emulation" => Step::Emulation,
                        other => bail!(
                            "unknown step '{other}' (leds, nfc, encode, payload, emulation)"
                        ),
                    });
                }
                "--no-reboot" => parsed.reboot = false,
                other => bail!("unknown argument '{other}'"),
            }
        }
        Ok(parsed)
    }
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            error!("{err:#}");
            info!("Usage: launchapp-simulator [--taps N] [--cycles N] [--fail-at STEP] [--no-reboot]");
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(status) => ExitCode::from(status),
        Err(err) => {
            error!("Simulator failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn simulated_reboot() -> ! {
    warn!("Cold reboot requested, simulator exits");
    std::process::exit(REBOOT_EXIT_CODE)
}

/// Answers the phone until the process exits
fn run_emulation(mut emulator: LaunchAppEmulator<AirFrontend, SimLed>) {
    loop {
        match emulator.process() {
            Ok(true) => {}
            Ok(false) => thread::sleep(POLL_IDLE),
            Err(err) => {
                warn!("NFC emulation error: {err}");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

/// Boots the tag and returns the process exit status
fn run(args: Args) -> anyhow::Result<u8> {
    let policy = if args.reboot {
        FailurePolicy::Reboot
    } else {
        FailurePolicy::ReturnCode
    };
    let mut config = LaunchAppConfig::default().with_failure_policy(policy);

    let led = match args.fail_at {
        Some(Step::Leds) => SimLed::broken("LED1"),
        _ => SimLed::new("LED1"),
    };
    let (mut frontend, phone) = radio::link();
    match args.fail_at {
        Some(Step::Nfc) => frontend = frontend.unresponsive(),
        Some(Step::Emulation) => frontend = frontend.refusing_to_sense(),
        Some(Step::Encode) => {
            config.android_package = None;
            config.universal_link = None;
        }
        // 64 byte tag, the launch-app message does not fit
        Some(Step::Payload) => config.data_area_size = 64,
        Some(Step::Leds) | None => {}
    }

    let mut ndef_msg_buf: NdefBuffer = [0u8; NDEF_MSG_BUF_SIZE];
    let emulator = match launch::setup(&config, led.clone(), frontend, &mut ndef_msg_buf) {
        Ok(emulator) => emulator,
        Err(err) => {
            let code = config.failure_policy.resolve(&err, simulated_reboot);
            warn!("Boot failed with {code}");
            return Ok(code.unsigned_abs().min(255) as u8);
        }
    };

    // Field events arrive here, the LED is switched from this thread
    thread::Builder::new()
        .name("nfc".into())
        .spawn(move || run_emulation(emulator))
        .context("spawning NFC thread")?;

    let mut timer = WakeTimer::new(config.wake_interval);
    thread::Builder::new()
        .name("wake-timer".into())
        .spawn(move || timer.run(thread::sleep, None))
        .context("spawning wake timer")?;

    let taps = args.taps;
    thread::Builder::new()
        .name("phone".into())
        .spawn(move || {
            for _ in 0..taps {
                thread::sleep(TAP_SPACING);
                match phone.tap(TAP_DWELL) {
                    Ok(LaunchAction::OpenApp(package)) => info!("Phone opens app {package}"),
                    Ok(LaunchAction::OpenUri(uri)) => info!("Phone opens {uri}"),
                    Ok(LaunchAction::None) => info!("Phone found nothing to open"),
                    Err(err) => warn!("Tap failed: {err:#}"),
                }
            }
        })
        .context("spawning phone")?;

    let mut sleep_cycle = SleepCycle::new(config.sleep_period);
    while args.cycles.is_none_or(|limit| sleep_cycle.cycles() < limit) {
        sleep_cycle.run_once(thread::sleep);
    }

    info!(
        "Done after {} sleep cycles, LED1 is {}",
        sleep_cycle.cycles(),
        if led.is_lit() { "on" } else { "off" }
    );
    Ok(0)
}
