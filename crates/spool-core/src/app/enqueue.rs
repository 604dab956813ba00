//! Enqueue - producers deposit task files into the spool.
//!
//! A new file is created exclusively, locked, written, optionally
//! future-dated through its modification time, and only then closed. The
//! consumer claims files by taking the same lock, so it blocks on a file that
//! is still being written instead of reading half of it.

use std::fs::{self, File, OpenOptions};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tracing::{debug, error, info, warn};

use super::context::SpoolContext;
use super::wake::{self, WakeDelivery};
use crate::domain::record::write_record;
use crate::domain::{HEADER_LEN, Metadata, Priority};
use crate::error::SpoolError;
use crate::typed::{Task, TaskEnvelope};

/// Everything a producer supplies for one task.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    metadata: Metadata,
    sequence: u64,
    slot: u32,
    priority: Option<Priority>,
    scheduled_at: Option<DateTime<Utc>>,
    payload: Option<Vec<u8>>,
}

impl EnqueueRequest {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            sequence: 0,
            slot: 0,
            priority: None,
            scheduled_at: None,
            payload: None,
        }
    }

    /// Request carrying a typed task as its metadata.
    pub fn task<T: Task>(task: &T) -> Result<Self, SpoolError> {
        Ok(Self::new(TaskEnvelope::wrap(task)?.into_metadata()?))
    }

    /// Request counter of the producing process.
    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Execution slot (core / async id) of the producer.
    pub fn slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Not eligible for dispatch before `at`. Times at or before the epoch mean "now".
    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Producer side of the spool.
pub struct Spool {
    ctx: Arc<SpoolContext>,
    sequence: AtomicU64,
}

impl Spool {
    pub fn new(ctx: Arc<SpoolContext>) -> Self {
        Self {
            ctx,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<SpoolContext> {
        &self.ctx
    }

    /// Process-local request counter for callers that do not keep their own.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write a task file and wake the consumer. Returns the path used.
    ///
    /// On any I/O failure the partial file is removed and the error returned;
    /// the process keeps running.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<PathBuf, SpoolError> {
        let dir = match request.priority {
            Some(priority) => self.priority_dir(priority),
            None => self.ctx.spool_dir().to_path_buf(),
        };
        let name = self
            .ctx
            .names()
            .next(self.ctx.clock(), request.sequence, request.slot);
        let path = dir.join(name.to_string());

        let file = create_exclusive(&path)?;

        if let Err(e) = file.lock_exclusive() {
            discard(&path);
            return Err(SpoolError::io("flock", &path, e));
        }

        let payload = request.payload.as_deref().unwrap_or_default();
        let mut writer = &file;
        if let Err(e) = write_record(&mut writer, &request.metadata, payload) {
            // unlink while still holding the lock, a blocked consumer then
            // finds a short file and destroys it
            discard(&path);
            return Err(SpoolError::io("write", &path, e));
        }

        if let Some(at) = request.scheduled_at.filter(|at| at.timestamp() > 0) {
            if let Err(e) = file.set_modified(SystemTime::from(at)) {
                warn!(path = %path.display(), error = %e, "unable to schedule spool file");
            }
        }

        // closing releases the lock: from here on the consumer may claim it
        drop(file);

        let written = HEADER_LEN + request.metadata.len() + payload.len();
        info!(
            bytes = written,
            path = %path.display(),
            "written {written} bytes to spool file"
        );

        match wake::notify_consumer(&self.ctx) {
            WakeDelivery::Nobody => debug!("no spooler to wake"),
            delivery => debug!(?delivery, "spooler woken"),
        }

        Ok(path)
    }

    /// Enqueue a typed task with the next process-local sequence number.
    pub fn enqueue_task<T: Task>(&self, task: &T) -> Result<PathBuf, SpoolError> {
        let request = EnqueueRequest::task(task)?.sequence(self.next_sequence());
        self.enqueue(request)
    }

    /// Remove a task whose requester went away before learning it was queued.
    ///
    /// Failure here means the spool no longer matches what callers were
    /// told, so it is reported as fatal.
    pub fn rollback(&self, path: &Path) -> Result<(), SpoolError> {
        fs::remove_file(path).map_err(|source| {
            error!(
                path = %path.display(),
                error = %source,
                "unable to roll back spool file, check the spooler as soon as possible"
            );
            SpoolError::Rollback {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn priority_dir(&self, priority: Priority) -> PathBuf {
        let dir = self.ctx.spool_dir().join(priority.to_string());
        // an existing bucket is the common case
        if let Err(e) = fs::create_dir(&dir) {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                debug!(dir = %dir.display(), error = %e, "unable to create priority bucket");
            }
        }
        dir
    }
}

fn create_exclusive(path: &Path) -> Result<File, SpoolError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options
        .open(path)
        .map_err(|e| SpoolError::io("open", path, e))
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        error!(path = %path.display(), error = %e, "unable to remove partial spool file");
    }
}
