//! Typed - task types with JSON arguments on top of the raw handler chain.
//!
//! # Two layers
//! - **Typed**: `Task` trait, `Handler<T>` trait
//! - **Erased**: `TypedHandler<T, H>` implements `SpoolHandler`

pub mod handler;
pub mod task;

pub use self::handler::{Handler, TypedHandler};
pub use self::task::{Task, TaskEnvelope};
