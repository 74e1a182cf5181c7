//! PN5180 NFC controller driver, card emulation side.
//!
//! The PN5180 communicates via SPI with the following pins:
//! - MOSI, MISO, SCLK - Standard SPI
//! - NSS - Chip select (active low, owned by the SPI device)
//! - BUSY - Indicates when chip is processing (active high)
//! - RST - Hardware reset (active low)
//!
//! Commands are sent as:
//! [CMD_BYTE] [PAYLOAD...]
//!
//! Responses are read in a second frame after BUSY goes low.
//!
//! In target mode the chip runs ISO14443-A anticollision on its own
//! (autocoll). SENS_RES, NFCID1 and SEL_RES come from EEPROM, everything
//! after activation is answered by the host through SEND_DATA.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use launchapp_tag::frontend::{FrontendError, Incoming, Reply, TagFrontend, ACK};
use launchapp_tag::t2t::TagUid;
use log::{debug, trace, warn};

/// PN5180 command codes
pub mod commands {
    pub const WRITE_REGISTER: u8 = 0x00;
    pub const WRITE_REGISTER_OR_MASK: u8 = 0x01;
    pub const WRITE_REGISTER_AND_MASK: u8 = 0x02;
    pub const READ_REGISTER: u8 = 0x04;
    pub const WRITE_EEPROM: u8 = 0x06;
    pub const READ_EEPROM: u8 = 0x07;
    pub const SEND_DATA: u8 = 0x09;
    pub const READ_DATA: u8 = 0x0A;
    pub const SWITCH_MODE: u8 = 0x0B;
}

/// PN5180 register addresses
pub mod registers {
    pub const SYSTEM_CONFIG: u8 = 0x00;
    pub const IRQ_STATUS: u8 = 0x02;
    pub const IRQ_CLEAR: u8 = 0x03;
    pub const RX_STATUS: u8 = 0x13;
}

/// EEPROM addresses of the autocoll answers
pub mod eeprom {
    pub const FIRMWARE_VERSION: u8 = 0x12;
    pub const SENS_RES: u8 = 0x40;
    pub const NFCID1: u8 = 0x42;
    pub const SEL_RES: u8 = 0x45;
}

/// IRQ_STATUS bits
pub mod irq {
    pub const RX: u32 = 1 << 0;
    pub const TX: u32 = 1 << 1;
    pub const IDLE: u32 = 1 << 2;
    pub const MODE_DETECTED: u32 = 1 << 3;
    pub const CARD_ACTIVATED: u32 = 1 << 4;
    pub const STATE_CHANGE: u32 = 1 << 5;
    pub const RFOFF_DET: u32 = 1 << 6;
    pub const RFON_DET: u32 = 1 << 7;
    pub const ALL: u32 = 0x000F_FFFF;
}

const MODE_AUTOCOLL: u8 = 0x02;
const AUTOCOLL_NFC_A: u8 = 0x01;
const AUTOCOLL_NO_STANDBY: u8 = 0x00;

/// ATQA of an NTAG21x, least significant byte first
const SENS_RES: [u8; 2] = [0x44, 0x00];
/// Type 2 Tag, not ISO14443-4 compliant
const SEL_RES: u8 = 0x00;

const SYSTEM_CONFIG_COMMAND_MASK: u32 = 0xFFFF_FFF8;
const SYSTEM_CONFIG_TRANSCEIVE: u32 = 0x0000_0003;
const RX_STATUS_BYTES_MASK: u32 = 0x1FF;

/// ACK and NAK are 4-bit frames
const SHORT_FRAME_BITS: u8 = 4;

const BUSY_POLL_US: u32 = 10;
const BUSY_TIMEOUT_US: u32 = 100_000;
const RESET_PULSE_MS: u32 = 10;

/// PN5180 errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pn5180Error {
    SpiError,
    GpioError,
    Timeout,
    InvalidResponse,
}

impl From<Pn5180Error> for FrontendError {
    fn from(err: Pn5180Error) -> Self {
        match err {
            Pn5180Error::SpiError | Pn5180Error::GpioError => FrontendError::Bus,
            Pn5180Error::Timeout => FrontendError::Timeout,
            Pn5180Error::InvalidResponse => FrontendError::InvalidResponse,
        }
    }
}

pub struct Pn5180<SPI, BUSY, RST, D> {
    spi: SPI,
    busy: BUSY,
    rst: RST,
    delay: D,
    /// Firmware version (major, minor)
    firmware_version: (u8, u8),
    configured: bool,
}

impl<SPI, BUSY, RST, D> Pn5180<SPI, BUSY, RST, D>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, busy: BUSY, rst: RST, delay: D) -> Self {
        Self {
            spi,
            busy,
            rst,
            delay,
            firmware_version: (0, 0),
            configured: false,
        }
    }

    pub fn firmware_version(&self) -> (u8, u8) {
        self.firmware_version
    }

    fn wait_ready(&mut self) -> Result<(), Pn5180Error> {
        let mut waited = 0;
        while self.busy.is_high().map_err(|_| Pn5180Error::GpioError)? {
            if waited >= BUSY_TIMEOUT_US {
                return Err(Pn5180Error::Timeout);
            }
            self.delay.delay_us(BUSY_POLL_US);
            waited += BUSY_POLL_US;
        }
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<(), Pn5180Error> {
        self.rst.set_low().map_err(|_| Pn5180Error::GpioError)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.rst.set_high().map_err(|_| Pn5180Error::GpioError)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.wait_ready()
    }

    fn send_command(&mut self, frame: &[u8]) -> Result<(), Pn5180Error> {
        self.wait_ready()?;
        self.spi.write(frame).map_err(|_| Pn5180Error::SpiError)?;
        self.wait_ready()
    }

    /// Command frame followed by a response frame of `response.len()` bytes
    fn query(&mut self, frame: &[u8], response: &mut [u8]) -> Result<(), Pn5180Error> {
        self.send_command(frame)?;
        response.fill(0xFF);
        self.spi
            .transfer_in_place(response)
            .map_err(|_| Pn5180Error::SpiError)?;
        self.wait_ready()
    }

    fn write_register(&mut self, reg: u8, value: u32) -> Result<(), Pn5180Error> {
        let v = value.to_le_bytes();
        self.send_command(&[commands::WRITE_REGISTER, reg, v[0], v[1], v[2], v[3]])
    }

    fn write_register_or_mask(&mut self, reg: u8, mask: u32) -> Result<(), Pn5180Error> {
        let m = mask.to_le_bytes();
        self.send_command(&[commands::WRITE_REGISTER_OR_MASK, reg, m[0], m[1], m[2], m[3]])
    }

    fn write_register_and_mask(&mut self, reg: u8, mask: u32) -> Result<(), Pn5180Error> {
        let m = mask.to_le_bytes();
        self.send_command(&[commands::WRITE_REGISTER_AND_MASK, reg, m[0], m[1], m[2], m[3]])
    }

    fn read_register(&mut self, reg: u8) -> Result<u32, Pn5180Error> {
        let mut value = [0u8; 4];
        self.query(&[commands::READ_REGISTER, reg], &mut value)?;
        Ok(u32::from_le_bytes(value))
    }

    fn write_eeprom(&mut self, addr: u8, data: &[u8]) -> Result<(), Pn5180Error> {
        let mut frame = heapless::Vec::<u8, 8>::new();
        frame
            .extend_from_slice(&[commands::WRITE_EEPROM, addr])
            .and_then(|_| frame.extend_from_slice(data))
            .map_err(|_| Pn5180Error::InvalidResponse)?;
        self.send_command(&frame)
    }

    fn read_eeprom(&mut self, addr: u8, data: &mut [u8]) -> Result<(), Pn5180Error> {
        let len = u8::try_from(data.len()).map_err(|_| Pn5180Error::InvalidResponse)?;
        self.query(&[commands::READ_EEPROM, addr, len], data)
    }

    fn send_data(&mut self, valid_bits: u8, data: &[u8]) -> Result<(), Pn5180Error> {
        let mut frame = heapless::Vec::<u8, 20>::new();
        frame
            .extend_from_slice(&[commands::SEND_DATA, valid_bits])
            .and_then(|_| frame.extend_from_slice(data))
            .map_err(|_| Pn5180Error::InvalidResponse)?;
        self.send_command(&frame)
    }

    fn clear_irq(&mut self, mask: u32) -> Result<(), Pn5180Error> {
        self.write_register(registers::IRQ_CLEAR, mask)
    }

    fn enter_autocoll(&mut self) -> Result<(), Pn5180Error> {
        self.clear_irq(irq::ALL)?;
        self.send_command(&[
            commands::SWITCH_MODE,
            MODE_AUTOCOLL,
            AUTOCOLL_NFC_A,
            AUTOCOLL_NO_STANDBY,
        ])
    }

    /// Puts the transceiver back into receive after activation or a reply
    fn start_transceive(&mut self) -> Result<(), Pn5180Error> {
        self.write_register_and_mask(registers::SYSTEM_CONFIG, SYSTEM_CONFIG_COMMAND_MASK)?;
        self.write_register_or_mask(registers::SYSTEM_CONFIG, SYSTEM_CONFIG_TRANSCEIVE)
    }

    fn idle(&mut self) -> Result<(), Pn5180Error> {
        self.write_register_and_mask(registers::SYSTEM_CONFIG, SYSTEM_CONFIG_COMMAND_MASK)?;
        self.clear_irq(irq::ALL)
    }

    fn receive(&mut self, rx: &mut [u8]) -> Result<usize, Pn5180Error> {
        let status = self.read_register(registers::RX_STATUS)?;
        let len = (status & RX_STATUS_BYTES_MASK) as usize;
        if len == 0 || len > rx.len() {
            debug!("PN5180 RX_STATUS 0x{status:08x}, dropping frame");
            self.clear_irq(irq::RX)?;
            self.start_transceive()?;
            return Ok(0);
        }
        self.query(&[commands::READ_DATA, 0x00], &mut rx[..len])?;
        self.clear_irq(irq::RX)?;
        Ok(len)
    }
}

impl<SPI, BUSY, RST, D> TagFrontend for Pn5180<SPI, BUSY, RST, D>
where
    SPI: SpiDevice,
    BUSY: InputPin,
    RST: OutputPin,
    D: DelayNs,
{
    fn configure(&mut self, uid: &TagUid) -> Result<(), FrontendError> {
        self.hard_reset()?;

        let mut version = [0u8; 2];
        self.read_eeprom(eeprom::FIRMWARE_VERSION, &mut version)?;
        if version == [0x00, 0x00] || version == [0xFF, 0xFF] {
            warn!("PN5180 firmware version reads {version:02x?}, chip not answering");
            return Err(FrontendError::InvalidResponse);
        }
        self.firmware_version = (version[1], version[0]);
        debug!("PN5180 firmware {}.{}", version[1], version[0]);

        // NFCID1 holds three bytes, the chip prepends a fixed first byte
        self.write_eeprom(eeprom::SENS_RES, &SENS_RES)?;
        self.write_eeprom(eeprom::NFCID1, &uid.0[..3])?;
        self.write_eeprom(eeprom::SEL_RES, &[SEL_RES])?;
        self.clear_irq(irq::ALL)?;
        self.configured = true;
        Ok(())
    }

    fn start_sensing(&mut self) -> Result<(), FrontendError> {
        if !self.configured {
            return Err(FrontendError::NotConfigured);
        }
        self.enter_autocoll()?;
        debug!("PN5180 in autocoll, waiting for a reader");
        Ok(())
    }

    fn stop_sensing(&mut self) -> Result<(), FrontendError> {
        Ok(self.idle()?)
    }

    fn poll(&mut self, rx: &mut [u8]) -> Result<Option<Incoming>, FrontendError> {
        let status = self.read_register(registers::IRQ_STATUS)?;
        if status & irq::RFON_DET != 0 {
            self.clear_irq(irq::RFON_DET)?;
            return Ok(Some(Incoming::FieldOn));
        }
        if status & irq::CARD_ACTIVATED != 0 {
            self.clear_irq(irq::CARD_ACTIVATED | irq::MODE_DETECTED | irq::STATE_CHANGE)?;
            self.start_transceive()?;
            return Ok(Some(Incoming::Activated));
        }
        if status & irq::RX != 0 {
            let len = self.receive(rx)?;
            return Ok((len > 0).then_some(Incoming::Frame(len)));
        }
        if status & irq::RFOFF_DET != 0 {
            self.clear_irq(irq::ALL)?;
            // leaving the field drops the chip out of target mode
            self.enter_autocoll()?;
            return Ok(Some(Incoming::FieldOff));
        }
        if status & (irq::TX | irq::IDLE) != 0 {
            self.clear_irq(irq::TX | irq::IDLE)?;
        }
        Ok(None)
    }

    fn reply(&mut self, reply: Reply<'_>) -> Result<(), FrontendError> {
        trace!("PN5180 reply {reply:02x?}");
        match reply {
            Reply::Data(data) => self.send_data(0, data)?,
            Reply::Ack => self.send_data(SHORT_FRAME_BITS, &[ACK])?,
            Reply::Nak(code) => self.send_data(SHORT_FRAME_BITS, &[code])?,
            // HALT: stay quiet until the next WUPA runs anticollision again
            Reply::Silent => {
                self.enter_autocoll()?;
                return Ok(());
            }
        }
        Ok(self.start_transceive()?)
    }
}
