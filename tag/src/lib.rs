// host tests link std, everything else stays no_std
#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod config;
pub mod frontend;
pub mod indicator;
pub mod launch;
pub mod ndef;
pub mod reader;
pub mod t2t;
pub mod wake;

pub use config::LaunchAppConfig;
pub use launch::{setup, FailurePolicy, SetupError};
