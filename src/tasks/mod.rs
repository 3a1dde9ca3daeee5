//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry sweep: purges expired storage records at the configured interval

mod sweep;

pub use sweep::spawn_sweep_task;
