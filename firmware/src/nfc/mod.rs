//! NFC module for the PN5180 NFC frontend.
//!
//! The PN5180 emulates the Type 2 Tag in ISO14443-A target mode.
//!
//! Interface: SPI (up to 7 MHz) + BUSY + RST pins
//!
//! Hardware connection on the ESP32-S3 board:
//!
//! - IO5  -> SPI SCK
//! - IO4  -> SPI MISO
//! - IO6  -> SPI MOSI
//! - IO8  -> NSS chip select
//! - IO2  -> BUSY signal
//! - IO15 -> RST reset

pub mod pn5180;

pub use pn5180::Pn5180;
