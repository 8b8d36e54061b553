//! Statecast State Engine - asynchronous value caches
//!
//! This crate implements the local side of replication:
//! - Futures with an observable status
//! - Keyed stores with stable per-key futures
//! - Single-value cells
//! - The store contract consumed by the source/sink bindings

pub mod cell;
pub mod contract;
pub mod status;
pub mod store;

pub use cell::*;
pub use contract::*;
pub use status::*;
pub use store::*;
