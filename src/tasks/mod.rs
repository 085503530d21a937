//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Fallback sweep: removes expired fallback entries at configured intervals

mod cleanup;

pub use cleanup::spawn_cleanup_task;
