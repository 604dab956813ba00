//! Domain model: the record format, file naming, and dispatch results.

pub mod metadata;
pub mod name;
pub mod outcome;
pub mod record;
pub mod task;

pub use metadata::{MAX_METADATA_LEN, Metadata};
pub use name::{NameGenerator, Priority, SPOOL_FILE_PREFIX, SpoolName};
pub use outcome::{DispatchOutcome, PassReport, Verdict};
pub use record::{CorruptRecord, HEADER_LEN, ReadError, RecordHeader, SPOOL_RECORD_TAG, SpoolRecord};
pub use task::SpoolTask;
