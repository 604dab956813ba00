//! Metadata block of a spool record.
//!
//! The queue never looks inside the metadata; it only guarantees the block
//! fits the 16-bit length field of the on-disk header.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SpoolError;

/// Largest metadata block the record header can describe.
pub const MAX_METADATA_LEN: usize = u16::MAX as usize;

/// Opaque metadata bytes, bounded to [`MAX_METADATA_LEN`].
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Metadata(Vec<u8>);

impl Metadata {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, SpoolError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_METADATA_LEN {
            return Err(SpoolError::MetadataTooLarge(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Serialize `value` as JSON metadata.
    pub fn to_json<T: Serialize>(value: &T) -> Result<Self, SpoolError> {
        Self::new(serde_json::to_vec(value)?)
    }

    pub fn from_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length as stored in the record header. Always fits by construction.
    pub(crate) fn wire_len(&self) -> u16 {
        self.0.len() as u16
    }
}

impl AsRef<[u8]> for Metadata {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for Metadata {
    type Error = SpoolError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(bytes)
    }
}

impl TryFrom<&str> for Metadata {
    type Error = SpoolError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s.as_bytes())
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) if text.len() <= 64 => write!(f, "Metadata({text:?})"),
            _ => write!(f, "Metadata({} bytes)", self.0.len()),
        }
    }
}
