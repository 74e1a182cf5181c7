//! Radio frontend seam between the Type-2 Tag logic and an NFC controller.
//!
//! A frontend handles everything below ISO14443-3 layer 4: field detection,
//! anticollision with the configured UID and framing. The emulator only
//! sees field changes and complete command frames.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use thiserror::Error;

use crate::t2t::TagUid;

/// Receive buffer for command frames, CRC is stripped by the frontend
pub const MAX_COMMAND_FRAME: usize = 16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrontendError {
    #[error("bus error talking to the NFC controller")]
    Bus,
    #[error("NFC controller timed out")]
    Timeout,
    #[error("unexpected response from the NFC controller")]
    InvalidResponse,
    #[error("NFC controller used before configuration")]
    NotConfigured,
}

/// Something the frontend observed on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    FieldOn,
    FieldOff,
    /// Anticollision finished, the tag was selected (also after WUPA)
    Activated,
    /// A command frame of this many bytes sits in the receive buffer
    Frame(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    Data(&'a [u8]),
    /// 4-bit ACK (0xA)
    Ack,
    /// 4-bit NAK code
    Nak(u8),
    /// No answer at all, e.g. after HALT
    Silent,
}

pub const ACK: u8 = 0x0A;
pub const NAK_INVALID_ARGUMENT: u8 = 0x00;

pub trait TagFrontend {
    /// Load the anticollision parameters
    fn configure(&mut self, uid: &TagUid) -> Result<(), FrontendError>;

    fn start_sensing(&mut self) -> Result<(), FrontendError>;

    fn stop_sensing(&mut self) -> Result<(), FrontendError>;

    /// Non-blocking, `Ok(None)` when nothing happened since the last call
    fn poll(&mut self, rx: &mut [u8]) -> Result<Option<Incoming>, FrontendError>;

    fn reply(&mut self, reply: Reply<'_>) -> Result<(), FrontendError>;
}

/// Owned copy of a [`Reply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentReply {
    Data(Vec<u8>),
    Ack,
    Nak(u8),
    Silent,
}

impl From<Reply<'_>> for SentReply {
    fn from(reply: Reply<'_>) -> Self {
        match reply {
            Reply::Data(data) => SentReply::Data(Vec::from(data)),
            Reply::Ack => SentReply::Ack,
            Reply::Nak(code) => SentReply::Nak(code),
            Reply::Silent => SentReply::Silent,
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Event(Incoming),
    Frame(Vec<u8>),
}

/// In-memory frontend that replays queued air events and records every reply.
#[derive(Debug, Default)]
pub struct ScriptedFrontend {
    script: VecDeque<Scripted>,
    replies: Vec<SentReply>,
    uid: Option<TagUid>,
    sensing: bool,
    fail_configure: bool,
    fail_sensing: bool,
}

impl ScriptedFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frontend whose `configure` fails, as if the controller did not answer
    pub fn unresponsive() -> Self {
        Self {
            fail_configure: true,
            ..Self::default()
        }
    }

    /// Frontend that configures fine but cannot start field sensing
    pub fn refusing_to_sense() -> Self {
        Self {
            fail_sensing: true,
            ..Self::default()
        }
    }

    pub fn push_event(&mut self, event: Incoming) -> &mut Self {
        self.script.push_back(Scripted::Event(event));
        self
    }

    pub fn push_frame(&mut self, frame: &[u8]) -> &mut Self {
        self.script.push_back(Scripted::Frame(Vec::from(frame)));
        self
    }

    /// Field on, selected, then the given command frames
    pub fn push_tap(&mut self, frames: &[&[u8]]) -> &mut Self {
        self.push_event(Incoming::FieldOn);
        self.push_event(Incoming::Activated);
        for frame in frames {
            self.push_frame(frame);
        }
        self
    }

    pub fn replies(&self) -> &[SentReply] {
        &self.replies
    }

    pub fn take_replies(&mut self) -> Vec<SentReply> {
        core::mem::take(&mut self.replies)
    }

    pub fn uid(&self) -> Option<&TagUid> {
        self.uid.as_ref()
    }

    pub fn is_sensing(&self) -> bool {
        self.sensing
    }

    pub fn is_drained(&self) -> bool {
        self.script.is_empty()
    }
}

impl TagFrontend for ScriptedFrontend {
    fn configure(&mut self, uid: &TagUid) -> Result<(), FrontendError> {
        if self.fail_configure {
            return Err(FrontendError::Timeout);
        }
        self.uid = Some(*uid);
        Ok(())
    }

    fn start_sensing(&mut self) -> Result<(), FrontendError> {
        if self.uid.is_none() {
            return Err(FrontendError::NotConfigured);
        }
        if self.fail_sensing {
            return Err(FrontendError::Bus);
        }
        self.sensing = true;
        Ok(())
    }

    fn stop_sensing(&mut self) -> Result<(), FrontendError> {
        self.sensing = false;
        Ok(())
    }

    fn poll(&mut self, rx: &mut [u8]) -> Result<Option<Incoming>, FrontendError> {
        if !self.sensing {
            return Ok(None);
        }
        match self.script.pop_front() {
            None => Ok(None),
            Some(Scripted::Event(event)) => Ok(Some(event)),
            Some(Scripted::Frame(frame)) => {
                let len = frame.len().min(rx.len());
                rx[..len].copy_from_slice(&frame[..len]);
                Ok(Some(Incoming::Frame(len)))
            }
        }
    }

    fn reply(&mut self, reply: Reply<'_>) -> Result<(), FrontendError> {
        self.replies.push(reply.into());
        Ok(())
    }
}
