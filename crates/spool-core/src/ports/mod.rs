//! Ports - seams between the queue and its surroundings.

pub mod clock;
pub mod handler;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::SpoolHandler;
