use core::time::Duration;

use crate::launch::FailurePolicy;
use crate::t2t::DATA_AREA_SIZE;

/// Capacity of the buffer the launch-app message is encoded into
pub const NDEF_MSG_BUF_SIZE: usize = 256;

/// Period of the background wake-up timer
pub const WAKEUP_INTERVAL: Duration = Duration::from_millis(5000);

/// How long the main loop sleeps between log lines
pub const SLEEP_PERIOD: Duration = Duration::from_secs(5);

/// Instagram Android package name
pub const ANDROID_PACKAGE: &[u8] = b"com.instagram.android";

/// Profile opened by the universal link
pub const UNIVERSAL_LINK: &[u8] = b"https://www.instagram.com/code.homemade/";

/// Buffer that receives the encoded NDEF message
pub type NdefBuffer = [u8; NDEF_MSG_BUF_SIZE];

#[derive(Debug, Clone)]
pub struct LaunchAppConfig {
    pub android_package: Option<&'static [u8]>,
    pub universal_link: Option<&'static [u8]>,
    pub wake_interval: Duration,
    pub sleep_period: Duration,
    /// Data area announced to readers, 1008 bytes unless a smaller tag is emulated
    pub data_area_size: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for LaunchAppConfig {
    fn default() -> Self {
        Self {
            android_package: Some(ANDROID_PACKAGE),
            universal_link: Some(UNIVERSAL_LINK),
            wake_interval: WAKEUP_INTERVAL,
            sleep_period: SLEEP_PERIOD,
            data_area_size: DATA_AREA_SIZE,
            failure_policy: FailurePolicy::Reboot,
        }
    }
}

impl LaunchAppConfig {
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}
