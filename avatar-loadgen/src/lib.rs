//! A load generator for the avatar upload/download service.
//!
//! The [`LoadDriver`] keeps a fixed number of transactions in flight. Every transaction uploads
//! an image, downloads it again from the URL returned by the service, and validates that the
//! service served a 600×600 PNG. Throughput is tracked both cumulatively and over a
//! [`RollingWindow`] of recent transfers, so memory use stays constant however long the run.
//!
//! The budget counts successful uploads. Failed transactions are abandoned and restarted with a
//! fresh upload, without backoff.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod driver;
pub mod observability;
pub mod report;
pub mod stats;
pub mod window;

pub use crate::driver::{DriverOptions, LoadDriver, LoadDriverState};
pub use crate::window::RollingWindow;
