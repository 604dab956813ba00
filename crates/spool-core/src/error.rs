use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::domain::{CorruptRecord, MAX_METADATA_LEN};

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("the spooler is inactive: no spool directory configured")]
    Inactive,

    #[error("invalid spooler configuration: {0}")]
    Config(String),

    #[error("metadata is {0} bytes, at most {max} bytes allowed", max = MAX_METADATA_LEN)]
    MetadataTooLarge(usize),

    #[error("{op}() failed on {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt spool file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: CorruptRecord },

    #[error("spool directory {} is unavailable: {source}", .path.display())]
    SpoolRootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to destroy spool file {}: {source}", .path.display())]
    Destroy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to roll back spool file {}: {source}", .path.display())]
    Rollback {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("harakiri: handler `{handler}` exceeded {budget:?} on {task}")]
    Harakiri {
        handler: String,
        task: String,
        budget: Duration,
    },

    #[error("duplicate spooler handler `{0}`")]
    DuplicateHandler(String),

    #[error("spooler handler `{handler}` failed to initialize: {reason}")]
    HandlerInit { handler: String, reason: String },

    #[error("no action registered for control signal {0}")]
    UnknownSignal(u8),

    #[error("task encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SpoolError {
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the consumer must stop and leave recovery to its supervisor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SpoolRootUnavailable { .. }
                | Self::Destroy { .. }
                | Self::Rollback { .. }
                | Self::Harakiri { .. }
        )
    }
}
