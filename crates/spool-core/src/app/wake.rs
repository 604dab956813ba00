//! Wake notifications from producers to the consumer.
//!
//! Inside one process the consumer publishes a [`ConsumerHandle`] whose
//! `Notify` holds at most one permit, so any number of wake-ups before the
//! run loop gets to them collapse into a single extra pass. Producers living
//! in other processes fall back to the pid file and SIGUSR1.
//!
//! Delivery is best-effort and unacknowledged either way.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::context::SpoolContext;
use crate::error::SpoolError;

pub const PID_FILE_NAME: &str = ".spooler.pid";

/// Identity of the running consumer.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    pid: u32,
    incarnation: u64,
    waker: Arc<Notify>,
}

impl ConsumerHandle {
    pub fn new(pid: u32, incarnation: u64, waker: Arc<Notify>) -> Self {
        Self {
            pid,
            incarnation,
            waker,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    pub fn wake(&self) {
        self.waker.notify_one();
    }
}

/// Process-wide slot holding the current consumer, if any.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    current: RwLock<Option<ConsumerHandle>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, handle: ConsumerHandle) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Clear the slot, unless a newer incarnation already replaced it.
    pub fn unpublish(&self, incarnation: u64) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|h| h.incarnation == incarnation) {
            *current = None;
        }
    }

    pub fn current(&self) -> Option<ConsumerHandle> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns whether a consumer was there to notify.
    pub fn wake(&self) -> bool {
        match self.current() {
            Some(handle) => {
                handle.wake();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeDelivery {
    InProcess,
    Signal(u32),
    Nobody,
}

/// Wake whichever consumer is reachable. A missing consumer is not an error.
pub fn notify_consumer(ctx: &SpoolContext) -> WakeDelivery {
    if ctx.consumers().wake() {
        return WakeDelivery::InProcess;
    }
    let Some(pid) = read_pid_file(&ctx.pid_file()) else {
        return WakeDelivery::Nobody;
    };
    // our own pid without a published consumer means a stale file
    if pid == std::process::id() {
        return WakeDelivery::Nobody;
    }
    if send_wake_signal(pid) {
        WakeDelivery::Signal(pid)
    } else {
        debug!(pid, "spooler pid file is stale");
        WakeDelivery::Nobody
    }
}

pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), SpoolError> {
    fs::write(path, format!("{pid}\n")).map_err(|e| SpoolError::io("write", path, e))
}

pub fn read_pid_file(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok().filter(|pid| *pid > 1)
}

pub fn remove_pid_file(path: &Path, pid: u32) {
    if read_pid_file(path) != Some(pid) {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "unable to remove spooler pid file");
    }
}

/// Pid file owned by a running consumer, removed when dropped.
///
/// Dropping also runs while a panic unwinds, so a dead consumer does not leave
/// its pid behind for producers to signal.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    pid: u32,
}

impl PidFileGuard {
    pub fn write(path: PathBuf, pid: u32) -> Result<Self, SpoolError> {
        write_pid_file(&path, pid)?;
        Ok(Self { path, pid })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        remove_pid_file(&self.path, self.pid);
    }
}

#[cfg(unix)]
fn send_wake_signal(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, libc::SIGUSR1) == 0 }
}

#[cfg(not(unix))]
fn send_wake_signal(_pid: u32) -> bool {
    false
}
