//! # Farmhand Slicer
//!
//! Typed client for the external slicer service:
//! - `auto_rotate_upload`: server-side printability rotation
//! - `slice`: mesh bytes + profile id → G-code bytes
//!
//! Both calls share one retry discipline: bounded attempts with a fixed
//! delay, retrying network faults and 5xx responses only.

mod client;
mod error;

pub use client::{HttpSlicerClient, RetryPolicy, Retrying, SlicerGateway};
pub use error::{SlicerError, SlicerResult};
