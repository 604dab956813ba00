//! spool-core
//!
//! A durable, filesystem-backed task queue with a single consumer.
//!
//! Producers drop self-describing files into a spool directory; a supervised
//! consumer thread scans the directory, locks each due file, and offers it to
//! an ordered chain of handlers.
//!
//! # Modules
//! - **domain**: record format, file naming, verdicts
//! - **ports**: clock and handler seams
//! - **app**: enqueue, scanner, dispatcher, consumer loop, supervisor
//! - **typed**: typed task API on top of the raw handler chain
//! - **config**: TOML configuration
//! - **error**: `SpoolError`

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod typed;

pub use app::{EnqueueRequest, HandlerRegistry, Spool, SpoolContext, Supervisor, SupervisorHandle};
pub use config::SpoolConfig;
pub use domain::{Metadata, Priority, SpoolTask, Verdict};
pub use error::SpoolError;
pub use ports::SpoolHandler;
