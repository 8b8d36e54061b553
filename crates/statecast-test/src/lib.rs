//! Statecast Test Harness - end-to-end replication checks
//!
//! This crate provides:
//! - Port pairs wiring a source to a sink in-process
//! - Helpers for waiting on deliveries and asserting pending futures
//! - A convergence scenario runner for late joiners and live updates

pub mod harness;
pub mod integration;

pub use harness::*;
pub use integration::*;
