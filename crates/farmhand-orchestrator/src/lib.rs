//! # Farmhand Orchestrator
//!
//! Drives a batch of mesh files through the pre-rotate → pack → slice
//! pipeline:
//! - Units run in parallel under a semaphore of `max_concurrent`
//! - Progress is published to the task registry as units settle
//! - Per-unit failures never fail sibling units; only setup errors
//!   (missing session, unusable working directory) fail the task
//!
//! The decision table, accounting rules and failure semantics live in
//! `pipeline`; plate combination lives in `plating`.

mod pipeline;
mod plating;

pub use pipeline::{BatchOrchestrator, BatchRequest};
