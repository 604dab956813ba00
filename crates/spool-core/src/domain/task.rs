use std::path::{Path, PathBuf};

use super::{Metadata, SpoolRecord};

/// A claimed spool file, as handed to handlers.
#[derive(Debug, Clone)]
pub struct SpoolTask {
    name: String,
    path: PathBuf,
    metadata: Metadata,
    payload: Vec<u8>,
}

impl SpoolTask {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, record: SpoolRecord) -> Self {
        let (metadata, payload) = record.into_parts();
        Self {
            name: name.into(),
            path: path.into(),
            metadata,
            payload,
        }
    }

    /// File name inside its directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the spool file; handlers that checkpoint rewrite it.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
