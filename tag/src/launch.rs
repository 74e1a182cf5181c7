//! Boot sequence: LEDs, T2T library, message encoding, payload, emulation.
//!
//! Every step either succeeds or ends the boot cycle. The wake timer and the
//! sleep loop belong to the caller and must only be started once [`setup`]
//! returned `Ok`.

use embedded_hal::digital::OutputPin;
use log::{error, info};
use thiserror::Error;

use crate::config::{LaunchAppConfig, NdefBuffer};
use crate::frontend::TagFrontend;
use crate::indicator::FieldIndicator;
use crate::ndef::{self, NdefError};
use crate::t2t::{T2tEmulator, T2tError};

/// errno values reported by [`SetupError::code`]
pub mod errno {
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SetupError {
    #[error("Cannot init LEDs!")]
    Leds,
    #[error("Cannot setup NFC T2T library!")]
    NfcSetup(#[source] T2tError),
    #[error("Cannot encode message!")]
    Encode(#[source] NdefError),
    #[error("Cannot set payload!")]
    Payload(#[source] T2tError),
    #[error("Cannot start emulation!")]
    Emulation(#[source] T2tError),
}

fn t2t_code(err: &T2tError) -> i32 {
    match err {
        T2tError::Frontend(_) => errno::EIO,
        T2tError::PayloadTooLarge { .. } => errno::ENOMEM,
        T2tError::InvalidPayload | T2tError::InvalidDataArea(_) => errno::EINVAL,
        T2tError::EmulationRunning | T2tError::NotRunning | T2tError::NoPayload => errno::EFAULT,
    }
}

impl SetupError {
    /// Negative errno, what `main` returns when rebooting is not an option
    pub fn code(&self) -> i32 {
        let code = match self {
            SetupError::Leds => errno::EIO,
            SetupError::Encode(NdefError::BufferTooSmall { .. }) => errno::ENOMEM,
            SetupError::Encode(_) => errno::EINVAL,
            SetupError::NfcSetup(err) | SetupError::Payload(err) | SetupError::Emulation(err) => {
                t2t_code(err)
            }
        };
        -code
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Cold reboot, the next boot cycle starts over
    Reboot,
    /// Give the error code back to the caller
    ReturnCode,
}

impl FailurePolicy {
    pub fn resolve(self, err: &SetupError, reboot: fn() -> !) -> i32 {
        if self == FailurePolicy::Reboot {
            error!("Setup failed ({err}), rebooting");
        }
        self.resolve_code(err.code(), reboot)
    }

    /// Same decision for failures outside the boot steps, reported as `code`
    pub fn resolve_code(self, code: i32, reboot: fn() -> !) -> i32 {
        match self {
            FailurePolicy::Reboot => reboot(),
            FailurePolicy::ReturnCode => code,
        }
    }
}

pub type LaunchAppEmulator<F, P> = T2tEmulator<F, FieldIndicator<P>>;

/// Runs the boot steps up to and including emulation start.
///
/// `buf` receives the encoded launch-app message and is only read afterwards.
pub fn setup<F, P>(
    config: &LaunchAppConfig,
    led: P,
    frontend: F,
    buf: &mut NdefBuffer,
) -> Result<LaunchAppEmulator<F, P>, SetupError>
where
    F: TagFrontend,
    P: OutputPin,
{
    info!("Starting NFC Launch app example with sleep");

    let indicator = FieldIndicator::new(led).map_err(|err| {
        error!("Cannot init LEDs! ({err:?})");
        SetupError::Leds
    })?;

    let mut emulator = T2tEmulator::setup(frontend, indicator).map_err(|err| {
        error!("Cannot setup NFC T2T library! ({err})");
        SetupError::NfcSetup(err)
    })?;

    let len = ndef::encode_launchapp(config.android_package, config.universal_link, buf)
        .map_err(|err| {
            error!("Cannot encode message! ({err})");
            SetupError::Encode(err)
        })?;

    emulator
        .data_area_set(config.data_area_size)
        .and_then(|()| emulator.payload_set(&buf[..len]))
        .map_err(|err| {
            error!("Cannot set payload! ({err})");
            SetupError::Payload(err)
        })?;

    emulator.emulation_start().map_err(|err| {
        error!("Cannot start emulation! ({err})");
        SetupError::Emulation(err)
    })?;

    info!("NFC configuration done");
    Ok(emulator)
}
