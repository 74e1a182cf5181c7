//! Reader side of a Type-2 Tag: what a phone does after selecting the tag.

use alloc::vec::Vec;
use log::{debug, trace};
use thiserror::Error;

use crate::ndef::{LaunchAction, Message, NdefError};
use crate::t2t::{
    CC_PAGE, DATA_AREA_PAGE, NDEF_MAGIC, PAGE_COUNT, PAGE_SIZE, READ_RESPONSE_SIZE,
    TLV_LONG_LENGTH, TLV_NDEF, TLV_NULL, TLV_TERMINATOR,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("tag is not NDEF formatted")]
    NotNdefFormatted,
    #[error("TLV runs past the data area")]
    Truncated,
    #[error("tag answered NAK 0x{0:x}")]
    Nak(u8),
    #[error("no answer from tag")]
    Transport,
    #[error(transparent)]
    Ndef(#[from] NdefError),
}

/// Lazily fetched data area, 16 bytes per READ
struct DataArea<R> {
    read_block: R,
    size: usize,
    cache: Vec<u8>,
}

impl<R> DataArea<R>
where
    R: FnMut(u8) -> Result<[u8; READ_RESPONSE_SIZE], ReadError>,
{
    fn byte(&mut self, offset: usize) -> Result<u8, ReadError> {
        if offset >= self.size {
            return Err(ReadError::Truncated);
        }
        while self.cache.len() <= offset {
            let page = usize::from(DATA_AREA_PAGE) + self.cache.len() / PAGE_SIZE;
            if page >= PAGE_COUNT {
                return Err(ReadError::Truncated);
            }
            let block = (self.read_block)(page as u8)?;
            self.cache.extend_from_slice(&block);
        }
        Ok(self.cache[offset])
    }
}

/// Reads the NDEF message through `read_block` (a READ command at the given page).
/// `Ok(None)` when the tag holds no NDEF TLV or an empty one.
pub fn read_ndef<R>(mut read_block: R) -> Result<Option<Vec<u8>>, ReadError>
where
    R: FnMut(u8) -> Result<[u8; READ_RESPONSE_SIZE], ReadError>,
{
    let cc = read_block(CC_PAGE)?;
    if cc[0] != NDEF_MAGIC {
        debug!("CC magic is 0x{:02x}, not NDEF", cc[0]);
        return Err(ReadError::NotNdefFormatted);
    }
    let size = usize::from(cc[2]) * 8;
    trace!("T2T data area {size} bytes, version 0x{:02x}", cc[1]);

    let mut area = DataArea {
        read_block,
        size,
        cache: Vec::from(&cc[PAGE_SIZE..]),
    };

    let mut pos = 0;
    loop {
        let tlv_type = area.byte(pos)?;
        match tlv_type {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return Ok(None),
            _ => {}
        }
        let mut len = usize::from(area.byte(pos + 1)?);
        let mut header = 2;
        if len == usize::from(TLV_LONG_LENGTH) {
            len = usize::from(u16::from_be_bytes([area.byte(pos + 2)?, area.byte(pos + 3)?]));
            header = 4;
        }
        if tlv_type == TLV_NDEF {
            if len == 0 {
                return Ok(None);
            }
            let start = pos + header;
            let mut message = Vec::with_capacity(len);
            for offset in start..start + len {
                message.push(area.byte(offset)?);
            }
            return Ok(Some(message));
        }
        trace!("Skipping TLV 0x{tlv_type:02x}, {len} bytes");
        pos += header + len;
    }
}

/// Reads and decodes the message, then picks what a phone would open
pub fn read_launch_action<R>(read_block: R) -> Result<LaunchAction, ReadError>
where
    R: FnMut(u8) -> Result<[u8; READ_RESPONSE_SIZE], ReadError>,
{
    match read_ndef(read_block)? {
        Some(bytes) => Ok(Message::from_bytes(&bytes)?.launch_action()),
        None => Ok(LaunchAction::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndef::encode_launchapp;
    use crate::t2t::{TagMemory, DEFAULT_UID};
    use alloc::string::String;

    fn reads_from(memory: &TagMemory) -> impl FnMut(u8) -> Result<[u8; 16], ReadError> + '_ {
        move |page| Ok(memory.read(page))
    }

    #[test]
    fn reads_launchapp_message() {
        let mut buf = [0u8; 256];
        let len = encode_launchapp(
            Some(b"com.instagram.android"),
            Some(b"https://www.instagram.com/code.homemade/"),
            &mut buf,
        )
        .unwrap();
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory.set_ndef(&buf[..len]).unwrap();

        let mut pages = Vec::new();
        let message = read_ndef(|page| {
            pages.push(page);
            Ok(memory.read(page))
        })
        .unwrap()
        .unwrap();
        assert_eq!(message, &buf[..len]);
        // CC block already holds pages 4-6, 86 TLV bytes need pages up to 25
        assert_eq!(pages, [3, 7, 11, 15, 19, 23]);

        assert_eq!(
            read_launch_action(reads_from(&memory)).unwrap(),
            LaunchAction::OpenApp(String::from("com.instagram.android"))
        );
    }

    #[test]
    fn skips_leading_tlvs() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory
            .set_raw(&[0x00, 0x01, 0x03, 0xA0, 0x0C, 0x34, 0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE])
            .unwrap();
        assert_eq!(
            read_ndef(reads_from(&memory)).unwrap(),
            Some(alloc::vec![0xD0, 0x00, 0x00])
        );
    }

    #[test]
    fn empty_or_missing_ndef() {
        let mut memory = TagMemory::new(&DEFAULT_UID);
        memory.set_raw(&[0x03, 0x00, 0xFE]).unwrap();
        assert_eq!(read_ndef(reads_from(&memory)).unwrap(), None);
        memory.set_raw(&[0xFE]).unwrap();
        assert_eq!(read_ndef(reads_from(&memory)).unwrap(), None);
        assert_eq!(
            read_launch_action(reads_from(&memory)).unwrap(),
            LaunchAction::None
        );
    }

    #[test]
    fn unformatted_tag_rejected() {
        let result = read_ndef(|_page| Ok([0u8; 16]));
        assert_eq!(result, Err(ReadError::NotNdefFormatted));
    }

    #[test]
    fn tlv_past_data_area_is_truncated() {
        let mut block = [0u8; 16];
        // CC claims an 8 byte data area, NDEF TLV claims 20 bytes
        block[0..4].copy_from_slice(&[0xE1, 0x10, 0x01, 0x0F]);
        block[4..6].copy_from_slice(&[0x03, 0x14]);
        assert_eq!(read_ndef(|_page| Ok(block)), Err(ReadError::Truncated));
    }

    #[test]
    fn nak_propagates() {
        let result = read_ndef(|page| {
            if page == CC_PAGE {
                Ok([0xE1, 0x10, 0x7E, 0x0F, 0x03, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            } else {
                Err(ReadError::Nak(0))
            }
        });
        assert_eq!(result, Err(ReadError::Nak(0)));
    }
}
