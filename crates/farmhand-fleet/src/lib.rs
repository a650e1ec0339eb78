//! # Farmhand Fleet
//!
//! The printer side of the farm:
//! - `HttpPrinterClient`: Moonraker-shaped HTTP client for one
//!   controller (info, temperatures, commands) with per-call timeouts
//! - `FleetService`: the in-memory printer registry with batched
//!   refresh, bulk commands, impact analysis, and JSON persistence
//!   (volatile telemetry excluded)

mod client;
mod error;
mod service;

pub use client::{HomeAxes, HttpPrinterClient, PrinterCommand, PrinterProbe};
pub use error::{FleetError, FleetResult};
pub use service::{BulkImpact, BulkOutcome, BulkSelector, FleetService};
