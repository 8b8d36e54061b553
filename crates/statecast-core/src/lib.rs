//! Statecast Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every replication component:
//! - Message envelope and detail payload (wire format)
//! - Namespaces and timestamps
//! - Synchronous notification fan-out with group cancellation
//! - Error types

pub mod error;
pub mod message;
pub mod notify;
pub mod time;

pub use error::*;
pub use message::*;
pub use notify::*;
pub use time::*;
