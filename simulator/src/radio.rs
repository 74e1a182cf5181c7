//! Simulated 13.56 MHz link between the emulated tag and a phone.
//!
//! Anticollision is not modelled: the phone announces the field, then
//! `Activated`, then exchanges command frames with the tag.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use anyhow::Context;
use launchapp_tag::frontend::{FrontendError, Incoming, Reply, SentReply, TagFrontend};
use launchapp_tag::ndef::LaunchAction;
use launchapp_tag::reader::{self, ReadError};
use launchapp_tag::t2t::{TagUid, CMD_READ, READ_RESPONSE_SIZE};
use log::{debug, info, trace};

/// Frame delay budget of a real phone is well below this
const REPLY_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
enum Air {
    FieldOn,
    FieldOff,
    Activated,
    Frame(Vec<u8>),
}

pub fn link() -> (AirFrontend, Phone) {
    let (to_tag, from_phone) = mpsc::channel();
    let (to_phone, from_tag) = mpsc::channel();
    (
        AirFrontend {
            rx: from_phone,
            tx: to_phone,
            uid: None,
            sensing: false,
            fail_configure: false,
            fail_sensing: false,
        },
        Phone {
            tx: to_tag,
            rx: from_tag,
        },
    )
}

/// Tag side of the link
pub struct AirFrontend {
    rx: Receiver<Air>,
    tx: Sender<SentReply>,
    uid: Option<TagUid>,
    sensing: bool,
    fail_configure: bool,
    fail_sensing: bool,
}

impl AirFrontend {
    /// Controller that never answers its configuration
    pub fn unresponsive(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// Controller that refuses to enter card emulation
    pub fn refusing_to_sense(mut self) -> Self {
        self.fail_sensing = true;
        self
    }
}

impl TagFrontend for AirFrontend {
    fn configure(&mut self, uid: &TagUid) -> Result<(), FrontendError> {
        if self.fail_configure {
            return Err(FrontendError::Timeout);
        }
        debug!("Simulated frontend answers anticollision with UID {:02x?}", uid.0);
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
        let air = match self.rx.try_recv() {
            Ok(air) => air,
            // a phone that went away leaves the air quiet
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(None),
        };
        Ok(Some(match air {
            Air::FieldOn => Incoming::FieldOn,
            Air::FieldOff => Incoming::FieldOff,
            Air::Activated => Incoming::Activated,
            Air::Frame(frame) => {
                let len = frame.len().min(rx.len());
                rx[..len].copy_from_slice(&frame[..len]);
                Incoming::Frame(len)
            }
        }))
    }

    fn reply(&mut self, reply: Reply<'_>) -> Result<(), FrontendError> {
        self.tx.send(reply.into()).map_err(|_| FrontendError::Bus)
    }
}

/// Reader side of the link, behaves like a phone's NFC stack
pub struct Phone {
    tx: Sender<Air>,
    rx: Receiver<SentReply>,
}

impl Phone {
    fn send(&self, air: Air) -> Result<(), ReadError> {
        self.tx.send(air).map_err(|_| ReadError::Transport)
    }

    fn read_block(&self, page: u8) -> Result<[u8; READ_RESPONSE_SIZE], ReadError> {
        trace!("Phone READ page {page}");
        self.send(Air::Frame(vec![CMD_READ, page]))?;
        match self.rx.recv_timeout(REPLY_TIMEOUT) {
            Ok(SentReply::Data(data)) => data.try_into().map_err(|_| ReadError::Transport),
            Ok(SentReply::Nak(code)) => Err(ReadError::Nak(code)),
            Ok(SentReply::Ack | SentReply::Silent) => Err(ReadError::Transport),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                Err(ReadError::Transport)
            }
        }
    }

    /// Brings the phone into the field, reads the tag and leaves again
    pub fn tap(&self, dwell: Duration) -> anyhow::Result<LaunchAction> {
        info!("Phone enters the field");
        self.send(Air::FieldOn).context("tag link closed")?;
        self.send(Air::Activated).context("tag link closed")?;
        let action = reader::read_launch_action(|page| self.read_block(page));
        std::thread::sleep(dwell);
        info!("Phone leaves the field");
        self.send(Air::FieldOff).context("tag link closed")?;
        action.context("phone could not read the tag")
    }
}
