//! NFC Forum Type-2 Tag emulation.
//!
//! The tag is read-only: 256 pages of 4 bytes, UID and lock bytes in pages
//! 0-2, the capability container in page 3 and a 1008 byte data area
//! holding an NDEF TLV followed by a terminator TLV.

use alloc::vec::Vec;
use deku::prelude::*;
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::frontend::{
    FrontendError, Incoming, Reply, TagFrontend, MAX_COMMAND_FRAME, NAK_INVALID_ARGUMENT,
};

pub const PAGE_SIZE: usize = 4;
pub const PAGE_COUNT: usize = 256;
pub const TAG_MEMORY_SIZE: usize = PAGE_SIZE * PAGE_COUNT;
pub const READ_RESPONSE_SIZE: usize = 16;

pub const CC_PAGE: u8 = 3;
pub const DATA_AREA_PAGE: u8 = 4;
pub const DATA_AREA_OFFSET: usize = DATA_AREA_PAGE as usize * PAGE_SIZE;
pub const DATA_AREA_SIZE: usize = TAG_MEMORY_SIZE - DATA_AREA_OFFSET;

pub const NDEF_MAGIC: u8 = 0xE1;
const NDEF_VERSION_1_0: u8 = 0x10;
/// Read access granted, no write access
const CC_ACCESS_READ_ONLY: u8 = 0x0F;
const INTERNAL_BYTE: u8 = 0x48;
const STATIC_LOCK_ALL: [u8; 2] = [0xFF, 0xFF];

pub const TLV_NULL: u8 = 0x00;
pub const TLV_LOCK_CONTROL: u8 = 0x01;
pub const TLV_MEMORY_CONTROL: u8 = 0x02;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_PROPRIETARY: u8 = 0xFD;
pub const TLV_TERMINATOR: u8 = 0xFE;
pub const TLV_LONG_LENGTH: u8 = 0xFF;

/// Largest NDEF message that fits with a 3-byte length field and a terminator
pub const MAX_PAYLOAD_SIZE: usize = DATA_AREA_SIZE - 4 - 1;

/// Cascade tag, first byte of BCC0
const CT: u8 = 0x88;

pub const CMD_READ: u8 = 0x30;
pub const CMD_HALT: u8 = 0x50;
pub const CMD_COMPATIBILITY_WRITE: u8 = 0xA0;
pub const CMD_WRITE: u8 = 0xA2;
pub const CMD_SECTOR_SELECT: u8 = 0xC2;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum T2tError {
    #[error("operation not allowed while emulation is running")]
    EmulationRunning,
    #[error("emulation is not running")]
    NotRunning,
    #[error("no payload set")]
    NoPayload,
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("payload could not be laid out as TLV")]
    InvalidPayload,
    #[error("data area of {0} bytes is not a multiple of 8 up to 1008")]
    InvalidDataArea(usize),
    #[error(transparent)]
    Frontend(#[from] FrontendError),
}

/// Double-size (7 byte) ISO14443-3 UID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagUid(pub [u8; 7]);

pub const DEFAULT_UID: TagUid = TagUid([0x5F, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E, 0x6F]);

impl TagUid {
    pub fn bcc0(&self) -> u8 {
        CT ^ self.0[0] ^ self.0[1] ^ self.0[2]
    }

    pub fn bcc1(&self) -> u8 {
        self.0[3] ^ self.0[4] ^ self.0[5] ^ self.0[6]
    }
}

fn message_size_writer<W: no_std_io::io::Write>(
    writer: &mut deku::writer::Writer<W>,
    message_size: usize,
) -> Result<(), DekuError> {
    if message_size < TLV_LONG_LENGTH as usize {
        let u8_val: u8 = message_size as u8;
        u8_val.to_writer(writer, deku::ctx::Endian::Big)?;
    } else {
        TLV_LONG_LENGTH.to_writer(writer, deku::ctx::Endian::Big)?;
        let u16_val: u16 = message_size.try_into()?;
        u16_val.to_writer(writer, deku::ctx::Endian::Big)?;
    }
    Ok(())
}

/// NDEF message TLV plus terminator TLV as laid out from page 4
#[derive(Debug, PartialEq, DekuWrite)]
struct NdefTlv {
    tlv_type: u8,
    #[deku(writer = "message_size_writer(deku::writer, *message_size)")]
    message_size: usize,
    message: Vec<u8>,
    terminator: u8,
}

impl NdefTlv {
    fn new(message: &[u8]) -> Self {
        NdefTlv {
            tlv_type: TLV_NDEF,
            message_size: message.len(),
            message: Vec::from(message),
            terminator: TLV_TERMINATOR,
        }
    }
}

/// Walks TLVs in a data area and returns the offset one past the NDEF TLV
fn ndef_tlv_end(data: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while pos < data.len() {
        let tlv_type = data[pos];
        match tlv_type {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return None,
            _ => {}
        }
        let (len, header) = match *data.get(pos + 1)? {
            TLV_LONG_LENGTH => {
                let hi = *data.get(pos + 2)?;
                let lo = *data.get(pos + 3)?;
                (usize::from(u16::from_be_bytes([hi, lo])), 4)
            }
            short => (usize::from(short), 2),
        };
        let end = pos + header + len;
        if tlv_type == TLV_NDEF {
            return (end <= data.len()).then_some(end);
        }
        pos = end;
    }
    None
}

pub struct TagMemory {
    bytes: [u8; TAG_MEMORY_SIZE],
    /// Size announced in the CC, bytes past it are never used
    data_area_size: usize,
    /// One past the last byte of the NDEF TLV, absolute offset
    ndef_end: Option<usize>,
}

impl TagMemory {
    pub fn new(uid: &TagUid) -> Self {
        let mut memory = TagMemory {
            bytes: [0u8; TAG_MEMORY_SIZE],
            data_area_size: DATA_AREA_SIZE,
            ndef_end: None,
        };
        memory.set_uid(uid);
        memory.bytes[12..16].copy_from_slice(&[
            NDEF_MAGIC,
            NDEF_VERSION_1_0,
            (DATA_AREA_SIZE / 8) as u8,
            CC_ACCESS_READ_ONLY,
        ]);
        memory
    }

    pub fn set_uid(&mut self, uid: &TagUid) {
        let u = &uid.0;
        self.bytes[0..4].copy_from_slice(&[u[0], u[1], u[2], uid.bcc0()]);
        self.bytes[4..8].copy_from_slice(&u[3..7]);
        self.bytes[8..12].copy_from_slice(&[
            uid.bcc1(),
            INTERNAL_BYTE,
            STATIC_LOCK_ALL[0],
            STATIC_LOCK_ALL[1],
        ]);
    }

    /// Shrinks (or restores) the data area announced in the CC, e.g. 144
    /// bytes for an NTAG213. Clears the data area.
    pub fn set_data_area_size(&mut self, size: usize) -> Result<(), T2tError> {
        if size == 0 || size % 8 != 0 || size > DATA_AREA_SIZE {
            return Err(T2tError::InvalidDataArea(size));
        }
        self.data_area_size = size;
        self.bytes[14] = (size / 8) as u8;
        self.bytes[DATA_AREA_OFFSET..].fill(0);
        self.ndef_end = None;
        Ok(())
    }

    pub fn data_area_size(&self) -> usize {
        self.data_area_size
    }

    /// Largest NDEF message the data area takes, long TLV header included
    pub fn max_payload(&self) -> usize {
        self.data_area_size.saturating_sub(5)
    }

    pub fn set_ndef(&mut self, message: &[u8]) -> Result<(), T2tError> {
        let max = self.max_payload();
        if message.len() > max {
            return Err(T2tError::PayloadTooLarge {
                len: message.len(),
                max,
            });
        }
        let tlv = NdefTlv::new(message).to_bytes().map_err(|err| {
            debug!("NDEF TLV serialize failed: {err:?}");
            T2tError::InvalidPayload
        })?;
        let data_area = &mut self.bytes[DATA_AREA_OFFSET..];
        data_area.fill(0);
        data_area[..tlv.len()].copy_from_slice(&tlv);
        // tlv ends with the terminator, which is not part of the message
        self.ndef_end = Some(DATA_AREA_OFFSET + tlv.len() - 1);
        Ok(())
    }

    pub fn set_raw(&mut self, data: &[u8]) -> Result<(), T2tError> {
        if data.len() > self.data_area_size {
            return Err(T2tError::PayloadTooLarge {
                len: data.len(),
                max: self.data_area_size,
            });
        }
        let data_area = &mut self.bytes[DATA_AREA_OFFSET..];
        data_area.fill(0);
        data_area[..data.len()].copy_from_slice(data);
        self.ndef_end = ndef_tlv_end(data).map(|end| DATA_AREA_OFFSET + end);
        Ok(())
    }

    /// READ response: 16 bytes from `page`, rolling over to page 0
    pub fn read(&self, page: u8) -> [u8; READ_RESPONSE_SIZE] {
        let start = usize::from(page) * PAGE_SIZE;
        let mut out = [0u8; READ_RESPONSE_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.bytes[(start + i) % TAG_MEMORY_SIZE];
        }
        out
    }

    /// Whether a READ at `page` returns the last byte of the NDEF TLV
    pub fn read_reaches_ndef_end(&self, page: u8) -> bool {
        let Some(end) = self.ndef_end else {
            return false;
        };
        let last = end - 1;
        let start = usize::from(page) * PAGE_SIZE;
        (0..READ_RESPONSE_SIZE).any(|i| (start + i) % TAG_MEMORY_SIZE == last)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum T2tEvent {
    FieldOn,
    FieldOff,
    /// A reader fetched the whole NDEF message during the current field session
    DataRead,
    Stopped,
}

pub trait T2tHandler {
    fn on_event(&mut self, event: T2tEvent);
}

impl<F: FnMut(T2tEvent)> T2tHandler for F {
    fn on_event(&mut self, event: T2tEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulationState {
    Idle,
    Sensing { field_present: bool },
}

pub struct T2tEmulator<F: TagFrontend, H: T2tHandler> {
    frontend: F,
    handler: H,
    uid: TagUid,
    memory: TagMemory,
    has_payload: bool,
    running: bool,
    field_present: bool,
    halted: bool,
    data_read_reported: bool,
    rx: [u8; MAX_COMMAND_FRAME],
}

impl<F: TagFrontend, H: T2tHandler> T2tEmulator<F, H> {
    /// Prepares the frontend and registers `handler` for tag events
    pub fn setup(mut frontend: F, handler: H) -> Result<Self, T2tError> {
        frontend.configure(&DEFAULT_UID)?;
        Ok(T2tEmulator {
            frontend,
            handler,
            uid: DEFAULT_UID,
            memory: TagMemory::new(&DEFAULT_UID),
            has_payload: false,
            running: false,
            field_present: false,
            halted: false,
            data_read_reported: false,
            rx: [0u8; MAX_COMMAND_FRAME],
        })
    }

    fn ensure_stopped(&self) -> Result<(), T2tError> {
        if self.running {
            return Err(T2tError::EmulationRunning);
        }
        Ok(())
    }

    /// Wraps `ndef` in an NDEF TLV and places it in the data area
    pub fn payload_set(&mut self, ndef: &[u8]) -> Result<(), T2tError> {
        self.ensure_stopped()?;
        self.memory.set_ndef(ndef)?;
        self.has_payload = true;
        debug!("T2T payload set, {} bytes NDEF", ndef.len());
        Ok(())
    }

    /// Places pre-built TLV data verbatim in the data area
    pub fn payload_raw_set(&mut self, data: &[u8]) -> Result<(), T2tError> {
        self.ensure_stopped()?;
        self.memory.set_raw(data)?;
        self.has_payload = true;
        debug!("T2T raw payload set, {} bytes", data.len());
        Ok(())
    }

    /// Sets the data area size, which drops any payload set before
    pub fn data_area_set(&mut self, size: usize) -> Result<(), T2tError> {
        self.ensure_stopped()?;
        self.memory.set_data_area_size(size)?;
        self.has_payload = false;
        debug!("T2T data area {size} bytes");
        Ok(())
    }

    pub fn uid_set(&mut self, uid: TagUid) -> Result<(), T2tError> {
        self.ensure_stopped()?;
        self.frontend.configure(&uid)?;
        self.memory.set_uid(&uid);
        self.uid = uid;
        Ok(())
    }

    pub fn uid(&self) -> &TagUid {
        &self.uid
    }

    pub fn emulation_start(&mut self) -> Result<(), T2tError> {
        self.ensure_stopped()?;
        if !self.has_payload {
            return Err(T2tError::NoPayload);
        }
        self.frontend.start_sensing()?;
        self.running = true;
        self.field_present = false;
        self.halted = false;
        info!("T2T emulation started");
        Ok(())
    }

    pub fn emulation_stop(&mut self) -> Result<(), T2tError> {
        if !self.running {
            return Err(T2tError::NotRunning);
        }
        self.frontend.stop_sensing()?;
        self.running = false;
        self.field_present = false;
        info!("T2T emulation stopped");
        self.handler.on_event(T2tEvent::Stopped);
        Ok(())
    }

    pub fn state(&self) -> EmulationState {
        if self.running {
            EmulationState::Sensing {
                field_present: self.field_present,
            }
        } else {
            EmulationState::Idle
        }
    }

    pub fn memory(&self) -> &TagMemory {
        &self.memory
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn frontend(&self) -> &F {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut F {
        &mut self.frontend
    }

    /// Stops emulation if needed and hands the frontend back
    pub fn done(mut self) -> F {
        if self.running {
            if let Err(err) = self.frontend.stop_sensing() {
                warn!("Failed to stop NFC sensing: {err}");
            }
        }
        self.frontend
    }

    /// One poll of the frontend. Returns whether anything happened.
    pub fn process(&mut self) -> Result<bool, T2tError> {
        if !self.running {
            return Ok(false);
        }
        let Some(incoming) = self.frontend.poll(&mut self.rx)? else {
            return Ok(false);
        };
        match incoming {
            Incoming::FieldOn => {
                self.field_present = true;
                self.halted = false;
                self.data_read_reported = false;
                trace!("NFC field on");
                self.handler.on_event(T2tEvent::FieldOn);
            }
            Incoming::FieldOff => {
                self.field_present = false;
                self.halted = false;
                trace!("NFC field off");
                self.handler.on_event(T2tEvent::FieldOff);
            }
            Incoming::Activated => {
                self.halted = false;
            }
            Incoming::Frame(len) => {
                let frame = self.rx;
                self.handle_frame(&frame[..len.min(MAX_COMMAND_FRAME)])?;
            }
        }
        Ok(true)
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<(), T2tError> {
        trace!("T2T frame {frame:02x?}");
        if self.halted {
            return Ok(self.frontend.reply(Reply::Silent)?);
        }
        match frame {
            [CMD_READ, page] => {
                let data = self.memory.read(*page);
                self.frontend.reply(Reply::Data(&data))?;
                if !self.data_read_reported && self.memory.read_reaches_ndef_end(*page) {
                    self.data_read_reported = true;
                    debug!("NDEF message fully read");
                    self.handler.on_event(T2tEvent::DataRead);
                }
            }
            [CMD_HALT, 0x00] => {
                self.halted = true;
                self.frontend.reply(Reply::Silent)?;
            }
            [CMD_WRITE, ..] | [CMD_COMPATIBILITY_WRITE, ..] | [CMD_SECTOR_SELECT, ..] => {
                debug!("Rejecting write to read-only tag");
                self.frontend.reply(Reply::Nak(NAK_INVALID_ARGUMENT))?;
            }
            _ => {
                debug!("Unsupported T2T command {frame:02x?}");
                self.frontend.reply(Reply::Nak(NAK_INVALID_ARGUMENT))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{ScriptedFrontend, SentReply};
    use alloc::rc::Rc;
    use core::cell::RefCell;

    type Events = Rc<RefCell<Vec<T2tEvent>>>;

    fn emulator() -> (T2tEmulator<ScriptedFrontend, impl FnMut(T2tEvent)>, Events) {
        let events: Events = Rc::default();
        let sink = events.clone();
        let emulator =
            T2tEmulator::setup(ScriptedFrontend::new(), move |e: T2tEvent| {
                sink.borrow_mut().push(e)
            })
                .unwrap();
        (emulator, events)
    }

    fn drain<F: TagFrontend, H: T2tHandler>(emulator: &mut T2tEmulator<F, H>) {
        while emulator.process().unwrap() {}
    }

    #[test]
    fn header_pages() {
        let uid = TagUid([0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let memory = TagMemory::new(&uid);
        let block = memory.read(0);
        assert_eq!(&block[0..4], &[0x04, 0x11, 0x22, 0x88 ^ 0x04 ^ 0x11 ^ 0x22]);
        assert_eq!(&block[4..8], &[0x33, 0x44, 0x55, 0x66]);
        assert_eq!(block[8], 0x33 ^ 0x44 ^ 0x55 ^ 0x66);
        assert_eq!(&block[10..12], &[0xFF, 0xFF]);
        assert_eq!(&block[12..16], &[0xE1, 0x10, 0x7E, 0x0F]);
    }

    #[test]
    fn short_tlv_layout() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory.set_ndef(&[0xD1, 0x01, 0x01, b'U', 0x00]).unwrap();
        let block = memory.read(DATA_AREA_PAGE);
        assert_eq!(
            &block[..9],
            &[0x03, 0x05, 0xD1, 0x01, 0x01, b'U', 0x00, 0xFE, 0x00]
        );
        assert!(memory.read_reaches_ndef_end(DATA_AREA_PAGE));
        assert!(!memory.read_reaches_ndef_end(DATA_AREA_PAGE + 4));
    }

    #[test]
    fn long_tlv_layout() {
        let message = alloc::vec![0x42u8; 300];
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory.set_ndef(&message).unwrap();
        let bytes = memory.as_bytes();
        assert_eq!(&bytes[16..20], &[0x03, 0xFF, 0x01, 0x2C]);
        assert_eq!(bytes[20 + 300], 0xFE);
        // last message byte at absolute offset 319, page 79
        assert!(memory.read_reaches_ndef_end(79));
        assert!(memory.read_reaches_ndef_end(76));
        assert!(!memory.read_reaches_ndef_end(75));
        assert!(!memory.read_reaches_ndef_end(80));
    }

    #[test]
    fn payload_limits() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        assert!(memory.set_ndef(&alloc::vec![0u8; MAX_PAYLOAD_SIZE]).is_ok());
        assert_eq!(
            memory.set_ndef(&alloc::vec![0u8; MAX_PAYLOAD_SIZE + 1]),
            Err(T2tError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE
            })
        );
        assert!(memory.set_raw(&alloc::vec![0u8; DATA_AREA_SIZE + 1]).is_err());
    }

    #[test]
    fn smaller_data_area_limits_payload() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory.set_data_area_size(144).unwrap();
        assert_eq!(&memory.read(CC_PAGE)[..4], &[0xE1, 0x10, 0x12, 0x0F]);
        assert!(memory.set_ndef(&alloc::vec![0u8; 139]).is_ok());
        assert_eq!(
            memory.set_ndef(&alloc::vec![0u8; 140]),
            Err(T2tError::PayloadTooLarge { len: 140, max: 139 })
        );
        assert!(memory.set_raw(&alloc::vec![0u8; 145]).is_err());
        for size in [0, 100, DATA_AREA_SIZE + 8] {
            assert_eq!(
                memory.set_data_area_size(size),
                Err(T2tError::InvalidDataArea(size))
            );
        }
        assert_eq!(memory.data_area_size(), 144);
    }

    #[test]
    fn data_area_change_needs_stopped_emulation_and_new_payload() {
        let (mut emulator, _events) = emulator();
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.data_area_set(504).unwrap();
        assert_eq!(emulator.emulation_start(), Err(T2tError::NoPayload));
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.emulation_start().unwrap();
        assert_eq!(
            emulator.data_area_set(DATA_AREA_SIZE),
            Err(T2tError::EmulationRunning)
        );
        assert_eq!(emulator.memory().read(CC_PAGE)[2], 0x3F);
    }

    #[test]
    fn raw_payload_locates_ndef_after_other_tlvs() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        // lock control TLV, NULL, then a 2 byte NDEF TLV
        memory
            .set_raw(&[0x01, 0x03, 0xA0, 0x0C, 0x34, 0x00, 0x03, 0x02, 0xAA, 0xBB, 0xFE])
            .unwrap();
        assert_eq!(memory.ndef_end, Some(DATA_AREA_OFFSET + 10));
        memory.set_raw(&[0xFE]).unwrap();
        assert_eq!(memory.ndef_end, None);
    }

    #[test]
    fn read_wraps_past_last_page() {
        let memory = TagMemory::new(&DEFAULT_UID);
        let block = memory.read(255);
        assert_eq!(&block[4..8], &memory.read(0)[0..4]);
    }

    #[test]
    fn start_requires_payload_and_stop_requires_start() {
        let (mut emulator, events) = emulator();
        assert_eq!(emulator.emulation_start(), Err(T2tError::NoPayload));
        assert_eq!(emulator.emulation_stop(), Err(T2tError::NotRunning));
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.emulation_start().unwrap();
        assert!(emulator.frontend().is_sensing());
        assert_eq!(emulator.emulation_start(), Err(T2tError::EmulationRunning));
        assert_eq!(
            emulator.payload_set(&[0xD0, 0x00, 0x00]),
            Err(T2tError::EmulationRunning)
        );
        assert_eq!(emulator.uid_set(DEFAULT_UID), Err(T2tError::EmulationRunning));
        emulator.emulation_stop().unwrap();
        assert_eq!(emulator.state(), EmulationState::Idle);
        assert_eq!(*events.borrow(), [T2tEvent::Stopped]);
    }

    #[test]
    fn raw_payload_served_through_emulator() {
        let (mut emulator, events) = emulator();
        // lock control TLV, then a 3 byte NDEF TLV and the terminator
        let raw = [0x01, 0x03, 0xA0, 0x0C, 0x34, 0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE];
        assert_eq!(
            emulator.payload_raw_set(&alloc::vec![0u8; DATA_AREA_SIZE + 1]),
            Err(T2tError::PayloadTooLarge {
                len: DATA_AREA_SIZE + 1,
                max: DATA_AREA_SIZE
            })
        );
        assert_eq!(emulator.emulation_start(), Err(T2tError::NoPayload));

        emulator.payload_raw_set(&raw).unwrap();
        emulator.emulation_start().unwrap();
        assert_eq!(
            emulator.payload_raw_set(&raw),
            Err(T2tError::EmulationRunning)
        );

        emulator
            .frontend_mut()
            .push_tap(&[&[CMD_READ, DATA_AREA_PAGE]]);
        drain(&mut emulator);
        let replies = emulator.frontend().replies();
        let SentReply::Data(block) = &replies[0] else {
            panic!("expected data reply");
        };
        assert_eq!(&block[..raw.len()], &raw);
        assert_eq!(*events.borrow(), [T2tEvent::FieldOn, T2tEvent::DataRead]);
    }

    #[test]
    fn field_events_and_read_session() {
        let (mut emulator, events) = emulator();
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.emulation_start().unwrap();
        emulator
            .frontend_mut()
            .push_event(Incoming::FieldOn)
            .push_event(Incoming::Activated)
            .push_frame(&[CMD_READ, CC_PAGE])
            .push_frame(&[CMD_READ, DATA_AREA_PAGE])
            .push_frame(&[CMD_READ, DATA_AREA_PAGE])
            .push_event(Incoming::FieldOff);
        drain(&mut emulator);

        assert_eq!(
            *events.borrow(),
            [T2tEvent::FieldOn, T2tEvent::DataRead, T2tEvent::FieldOff]
        );
        let replies = emulator.frontend().replies();
        assert_eq!(replies.len(), 3);
        let SentReply::Data(block) = &replies[1] else {
            panic!("expected data reply");
        };
        assert_eq!(&block[..6], &[0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE]);
    }

    #[test]
    fn data_read_reported_again_in_next_session() {
        let (mut emulator, events) = emulator();
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.emulation_start().unwrap();
        for _ in 0..2 {
            emulator
                .frontend_mut()
                .push_event(Incoming::FieldOn)
                .push_frame(&[CMD_READ, DATA_AREA_PAGE])
                .push_event(Incoming::FieldOff);
        }
        drain(&mut emulator);
        let data_reads = events
            .borrow()
            .iter()
            .filter(|e| **e == T2tEvent::DataRead)
            .count();
        assert_eq!(data_reads, 2);
    }

    #[test]
    fn writes_are_refused_and_halt_silences() {
        let (mut emulator, _events) = emulator();
        emulator.payload_set(&[0xD0, 0x00, 0x00]).unwrap();
        emulator.emulation_start().unwrap();
        emulator
            .frontend_mut()
            .push_event(Incoming::FieldOn)
            .push_frame(&[CMD_WRITE, 0x04, 0x00, 0x00, 0x00, 0x00])
            .push_frame(&[CMD_SECTOR_SELECT, 0xFF])
            .push_frame(&[0x60])
            .push_frame(&[CMD_HALT, 0x00])
            .push_frame(&[CMD_READ, 0x00])
            .push_event(Incoming::Activated)
            .push_frame(&[CMD_READ, 0x00]);
        drain(&mut emulator);

        let replies = emulator.frontend().replies();
        assert_eq!(replies[0], SentReply::Nak(0));
        assert_eq!(replies[1], SentReply::Nak(0));
        assert_eq!(replies[2], SentReply::Nak(0));
        assert_eq!(replies[3], SentReply::Silent);
        assert_eq!(replies[4], SentReply::Silent);
        assert!(matches!(replies[5], SentReply::Data(_)));
    }

    #[test]
    fn uid_set_reconfigures_frontend() {
        let (mut emulator, _events) = emulator();
        let uid = TagUid([1, 2, 3, 4, 5, 6, 7]);
        emulator.uid_set(uid).unwrap();
        assert_eq!(emulator.frontend().uid(), Some(&uid));
        assert_eq!(&emulator.memory().read(0)[..3], &[1, 2, 3]);
    }

    #[test]
    fn setup_surfaces_frontend_failure() {
        let result = T2tEmulator::setup(ScriptedFrontend::unresponsive(), |_e: T2tEvent| {});
        assert!(matches!(
            result,
            Err(T2tError::Frontend(FrontendError::Timeout))
        ));
    }
}
