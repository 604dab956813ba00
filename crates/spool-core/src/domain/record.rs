//! On-disk spool record: 4-byte header, metadata block, optional payload.
//!
//! ```text
//! offset 0  tag       (SPOOL_RECORD_TAG)
//! offset 1  flags     (0, reserved)
//! offset 2  metadata length, u16 little-endian
//! offset 4  metadata bytes
//! ...       payload: every remaining byte of the file
//! ```

use std::io::{self, Read, Write};

use thiserror::Error;

use super::Metadata;

pub const SPOOL_RECORD_TAG: u8 = 17;
pub const HEADER_LEN: usize = 4;

/// Why a spool file could not be decoded. Corrupt files are destroyed, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptRecord {
    #[error("truncated {section}: expected {expected} bytes")]
    Truncated {
        section: &'static str,
        expected: u64,
    },

    #[error("unknown record tag {0}")]
    UnknownTag(u8),

    #[error("unreadable: {0}")]
    Unreadable(String),
}

/// Failure while reading a record from a file: either the bytes are bad, or
/// the file could not be read at all. Only the first means the file is garbage.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Corrupt(#[from] CorruptRecord),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub tag: u8,
    pub flags: u8,
    pub metadata_len: u16,
}

impl RecordHeader {
    pub fn for_metadata(metadata: &Metadata) -> Self {
        Self {
            tag: SPOOL_RECORD_TAG,
            flags: 0,
            metadata_len: metadata.wire_len(),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let [lo, hi] = self.metadata_len.to_le_bytes();
        [self.tag, self.flags, lo, hi]
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Result<Self, CorruptRecord> {
        if bytes[0] != SPOOL_RECORD_TAG {
            return Err(CorruptRecord::UnknownTag(bytes[0]));
        }
        Ok(Self {
            tag: bytes[0],
            flags: bytes[1],
            metadata_len: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// A decoded (or to-be-encoded) spool record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolRecord {
    metadata: Metadata,
    payload: Vec<u8>,
}

impl SpoolRecord {
    pub fn new(metadata: Metadata, payload: Vec<u8>) -> Self {
        Self { metadata, payload }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (Metadata, Vec<u8>) {
        (self.metadata, self.payload)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.metadata.len() + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        // writing into a Vec cannot fail
        let _ = write_record(&mut out, &self.metadata, &self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CorruptRecord> {
        let mut reader = bytes;
        Self::read_from(&mut reader, bytes.len() as u64).map_err(|e| match e {
            ReadError::Corrupt(reason) => reason,
            ReadError::Io(e) => CorruptRecord::Unreadable(e.to_string()),
        })
    }

    /// Decode a record from `reader`, where `file_size` is the size of the
    /// whole file. Anything beyond header + metadata is the payload.
    pub fn read_from<R: Read>(reader: &mut R, file_size: u64) -> Result<Self, ReadError> {
        let mut raw = [0u8; HEADER_LEN];
        read_section(reader, &mut raw, "header")?;
        let header = RecordHeader::from_bytes(raw)?;

        let mut metadata = vec![0u8; usize::from(header.metadata_len)];
        read_section(reader, &mut metadata, "metadata")?;

        let consumed = (HEADER_LEN + metadata.len()) as u64;
        let payload = match file_size.checked_sub(consumed) {
            Some(len) if len > 0 => {
                let len = usize::try_from(len)
                    .map_err(|_| CorruptRecord::Unreadable(format!("payload of {len} bytes")))?;
                let mut payload = vec![0u8; len];
                read_section(reader, &mut payload, "payload")?;
                payload
            }
            _ => Vec::new(),
        };

        Ok(Self {
            // the length came from a u16, it cannot exceed the limit
            metadata: Metadata::new(metadata)
                .map_err(|e| CorruptRecord::Unreadable(e.to_string()))?,
            payload,
        })
    }
}

/// Write header, metadata and payload in that order.
pub(crate) fn write_record<W: Write>(
    writer: &mut W,
    metadata: &Metadata,
    payload: &[u8],
) -> io::Result<()> {
    writer.write_all(&RecordHeader::for_metadata(metadata).to_bytes())?;
    writer.write_all(metadata.as_bytes())?;
    if !payload.is_empty() {
        writer.write_all(payload)?;
    }
    Ok(())
}

fn read_section<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), ReadError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ReadError::Corrupt(CorruptRecord::Truncated {
            section,
            expected: buf.len() as u64,
        }),
        _ => ReadError::Io(e),
    })
}
