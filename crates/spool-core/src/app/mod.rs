//! App - the queue itself, assembled from domain types and ports.
//!
//! # Components
//! - **Spool**: producer side (`enqueue`)
//! - **Scanner**: finds due spool files
//! - **Dispatcher**: lock, decode, run the handler chain, apply the verdict
//! - **Consumer**: the scan/dispatch/wait loop
//! - **Supervisor**: runs the consumer on its own thread and respawns it

pub mod consumer;
pub mod context;
pub mod control;
pub mod dispatcher;
pub mod enqueue;
pub mod harakiri;
pub mod registry;
pub mod restart;
pub mod scanner;
pub mod supervisor;
pub mod wake;

pub use self::consumer::{Consumer, ConsumerExit};
pub use self::context::SpoolContext;
pub use self::control::ControlSignals;
pub use self::dispatcher::Dispatcher;
pub use self::enqueue::{EnqueueRequest, Spool};
pub use self::harakiri::{HARAKIRI_EXIT_CODE, Harakiri};
pub use self::registry::HandlerRegistry;
pub use self::restart::RestartPolicy;
pub use self::scanner::{Candidate, Scan, ScanMode, Scanner};
pub use self::supervisor::{Supervisor, SupervisorHandle};
pub use self::wake::{ConsumerHandle, ConsumerRegistry, WakeDelivery};
