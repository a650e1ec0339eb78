//! # Farmhand Realtime
//!
//! Live fleet state for UI clients:
//! - `WebSocketHub`: connection registry, per-printer subscriptions,
//!   liveness sweeping, and ordered fan-out
//! - `RealtimeMonitor`: the supervised poll loop that diffs fleet
//!   snapshots and schedules broadcasts
//! - `protocol`: the tagged-union message schema on the wire

pub mod hub;
pub mod monitor;
pub mod protocol;

pub use hub::{Outbound, WebSocketHub};
pub use monitor::{FleetView, MonitorSettings, RealtimeMonitor};
pub use protocol::{ClientMessage, ServerMessage};
