use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use deku::prelude::*;
use log::debug;
use thiserror::Error;

///////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(id_type = "u8", bits = 3)]
pub enum TypeNameFormat {
    #[deku(id = 0)]
    Empty,
    #[deku(id = 1)]
    WellKnown,
    #[deku(id = 2)]
    MimeMediaType,
    #[deku(id = 3)]
    AbsoluteUri,
    #[deku(id = 4)]
    External,
    #[deku(id = 5)]
    Unknown,
    #[deku(id = 6)]
    Unchanged,
    #[deku(id = 7)]
    Reserved,
}

const RTD_TEXT: &[u8] = b"T";
const RTD_URI: &[u8] = b"U";
const ANDROID_APPLICATION_TYPE: &[u8] = b"android.com:pkg";

/// URI identifier codes from the NFC Forum URI record type definition, indexed by code
pub const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// Stores the URI as-is, no abbreviation
pub const URI_PREFIX_NONE: u8 = 0x00;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NdefError {
    #[error("encoded message needs {needed} bytes but buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
    #[error("launch-app message needs a package name or a universal link")]
    EmptyLaunchApp,
    #[error("message has no records")]
    EmptyMessage,
    #[error("unknown URI identifier code 0x{0:02x}")]
    UnknownUriPrefix(u8),
    #[error("malformed NDEF record")]
    Malformed,
    #[error("message ended without a record flagged ME")]
    Truncated,
}

fn payload_length_reader<R: no_std_io::io::Read>(
    reader: &mut deku::reader::Reader<R>,
    short_record: bool,
) -> Result<u32, DekuError> {
    Ok(if short_record {
        u8::from_reader_with_ctx(reader, deku::ctx::Endian::Big)?.into()
    } else {
        u32::from_reader_with_ctx(reader, deku::ctx::Endian::Big)?
    })
}

fn payload_length_writer<W: no_std_io::io::Write>(
    writer: &mut deku::writer::Writer<W>,
    payload_length: u32,
    short_record: bool,
) -> Result<(), DekuError> {
    if short_record {
        let short_val: u8 = payload_length.try_into()?;
        short_val.to_writer(writer, deku::ctx::Endian::Big)?;
    } else {
        payload_length.to_writer(writer, deku::ctx::Endian::Big)?;
    }
    Ok(())
}

/// One NDEF record. Flags and length fields are derived from the data on `update()`,
/// MB/ME are owned by the enclosing [`Message`].
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
pub struct Record {
    // TNF and Flags
    #[deku(bits = 1)]
    message_begin: bool,
    #[deku(bits = 1)]
    message_end: bool,
    #[deku(bits = 1)]
    chunk_flag: bool,
    #[deku(bits = 1)]
    #[deku(update = "self.payload_data.len() <= 255")]
    short_record: bool,
    #[deku(bits = 1)]
    #[deku(update = "!self.id_data.is_empty()")]
    id_length_is_present: bool,
    type_name_format: TypeNameFormat,
    //
    #[deku(update = "self.type_data.len()")]
    type_length: u8,
    //
    #[deku(update = "self.payload_data.len()")]
    #[deku(
        reader = "payload_length_reader(deku::reader, *short_record)",
        writer = "payload_length_writer(deku::writer, *payload_length, *short_record)"
    )]
    payload_length: u32, // one byte for short records, four otherwise
    //
    #[deku(skip, cond = "!*id_length_is_present", default = "0")]
    #[deku(update = "self.id_data.len()")]
    id_length: u8,
    //
    #[deku(count = "type_length")]
    type_data: Vec<u8>,
    //
    #[deku(count = "id_length")]
    id_data: Vec<u8>,
    //
    #[deku(count = "payload_length")]
    payload_data: Vec<u8>,
}

impl Record {
    pub fn new(type_name_format: TypeNameFormat, type_data: &[u8], payload: Vec<u8>) -> Self {
        Record {
            message_begin: false,
            message_end: false,
            chunk_flag: false,
            short_record: true,
            id_length_is_present: false,
            type_name_format,
            type_length: 0,
            payload_length: 0,
            id_length: 0,
            type_data: Vec::from(type_data),
            id_data: Vec::new(),
            payload_data: payload,
        }
    }

    pub fn with_id(mut self, id: &[u8]) -> Self {
        self.id_data = Vec::from(id);
        self
    }

    pub fn text_en(text: &str) -> Self {
        let mut payload = Vec::<u8>::with_capacity(3 + text.len());
        payload.extend_from_slice(&[0x02, b'e', b'n']);
        payload.extend_from_slice(text.as_bytes());
        Self::new(TypeNameFormat::WellKnown, RTD_TEXT, payload)
    }

    /// URI record with an explicit identifier code. `rest` is what follows the prefix.
    pub fn uri(prefix_code: u8, rest: &[u8]) -> Result<Self, NdefError> {
        if usize::from(prefix_code) >= URI_PREFIXES.len() {
            return Err(NdefError::UnknownUriPrefix(prefix_code));
        }
        let mut payload = Vec::<u8>::with_capacity(1 + rest.len());
        payload.push(prefix_code);
        payload.extend_from_slice(rest);
        Ok(Self::new(TypeNameFormat::WellKnown, RTD_URI, payload))
    }

    /// URI record using the longest identifier code that matches `uri`
    pub fn uri_abbreviated(uri: &str) -> Self {
        let (code, prefix) = URI_PREFIXES
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, prefix)| uri.starts_with(*prefix))
            .max_by_key(|(_, prefix)| prefix.len())
            .map(|(code, prefix)| (code as u8, prefix.len()))
            .unwrap_or((URI_PREFIX_NONE, 0));
        let mut payload = Vec::<u8>::with_capacity(1 + uri.len() - prefix);
        payload.push(code);
        payload.extend_from_slice(&uri.as_bytes()[prefix..]);
        Self::new(TypeNameFormat::WellKnown, RTD_URI, payload)
    }

    /// Android Application Record
    pub fn android_application(package: &[u8]) -> Self {
        Self::new(
            TypeNameFormat::External,
            ANDROID_APPLICATION_TYPE,
            Vec::from(package),
        )
    }

    pub fn type_name_format(&self) -> TypeNameFormat {
        self.type_name_format
    }

    pub fn record_type(&self) -> &[u8] {
        &self.type_data
    }

    pub fn id(&self) -> &[u8] {
        &self.id_data
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload_data
    }

    pub fn is_short(&self) -> bool {
        self.short_record
    }

    fn is_well_known(&self, rtd: &[u8]) -> bool {
        self.type_name_format == TypeNameFormat::WellKnown && self.type_data == rtd
    }

    /// Expanded URI, `None` if this is not a URI record
    pub fn uri_payload(&self) -> Option<String> {
        if !self.is_well_known(RTD_URI) {
            return None;
        }
        let (code, rest) = self.payload_data.split_first()?;
        let prefix = URI_PREFIXES.get(usize::from(*code))?;
        let rest = core::str::from_utf8(rest).ok()?;
        let mut uri = String::with_capacity(prefix.len() + rest.len());
        uri.push_str(prefix);
        uri.push_str(rest);
        Some(uri)
    }

    pub fn android_package(&self) -> Option<&str> {
        if self.type_name_format != TypeNameFormat::External
            || self.type_data != ANDROID_APPLICATION_TYPE
        {
            return None;
        }
        core::str::from_utf8(&self.payload_data).ok()
    }

    pub fn text_payload(&self) -> Option<&str> {
        if !self.is_well_known(RTD_TEXT) {
            return None;
        }
        let status = *self.payload_data.first()?;
        let lang_len = usize::from(status & 0x3F);
        self.payload_data
            .get(1 + lang_len..)
            .and_then(|text| core::str::from_utf8(text).ok())
    }
}

/// What a phone does when it reads a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchAction {
    OpenApp(String),
    OpenUri(String),
    None,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    records: Vec<Record>,
}

impl From<Record> for Message {
    fn from(record: Record) -> Self {
        Message {
            records: alloc::vec![record],
        }
    }
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>, NdefError> {
        if self.records.is_empty() {
            return Err(NdefError::EmptyMessage);
        }
        let last = self.records.len() - 1;
        let mut out = Vec::new();
        for (i, record) in self.records.iter_mut().enumerate() {
            record.message_begin = i == 0;
            record.message_end = i == last;
            record.chunk_flag = false;
            record.update().map_err(|err| {
                debug!("NDEF record update failed: {err:?}");
                NdefError::Malformed
            })?;
            let bytes = record.to_bytes().map_err(|err| {
                debug!("NDEF record serialize failed: {err:?}");
                NdefError::Malformed
            })?;
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    /// Encodes into `buf`, leaving it untouched when the message does not fit
    pub fn encode_into(&mut self, buf: &mut [u8]) -> Result<usize, NdefError> {
        let bytes = self.to_bytes()?;
        if bytes.len() > buf.len() {
            return Err(NdefError::BufferTooSmall {
                needed: bytes.len(),
                capacity: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, NdefError> {
        if data.is_empty() {
            return Err(NdefError::EmptyMessage);
        }
        let mut records = Vec::new();
        let mut rest = data;
        loop {
            if rest.is_empty() {
                return Err(NdefError::Truncated);
            }
            let ((remaining, _), record) = Record::from_bytes((rest, 0)).map_err(|err| {
                debug!("NDEF record parse failed: {err:?}");
                NdefError::Malformed
            })?;
            let last = record.message_end;
            records.push(record);
            if last {
                break;
            }
            rest = remaining;
        }
        Ok(Message { records })
    }

    /// Android honors an AAR anywhere in the message over any URI
    pub fn launch_action(&self) -> LaunchAction {
        if let Some(package) = self.records.iter().find_map(Record::android_package) {
            return LaunchAction::OpenApp(String::from(package));
        }
        match self.records.iter().find_map(Record::uri_payload) {
            Some(uri) => LaunchAction::OpenUri(uri),
            None => LaunchAction::None,
        }
    }
}

/// Encodes the universal-link URI record followed by the Android Application Record
pub fn encode_launchapp(
    android_package: Option<&[u8]>,
    universal_link: Option<&[u8]>,
    buf: &mut [u8],
) -> Result<usize, NdefError> {
    let mut message = Message::new();
    if let Some(link) = universal_link {
        message.push(Record::uri(URI_PREFIX_NONE, link)?);
    }
    if let Some(package) = android_package {
        message.push(Record::android_application(package));
    }
    if message.records.is_empty() {
        return Err(NdefError::EmptyLaunchApp);
    }
    message.encode_into(buf)
}
