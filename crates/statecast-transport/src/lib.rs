//! Statecast Transport Layer - namespaced message channels
//!
//! This crate provides:
//! - The `Channel` contract (send, on_message, detach)
//! - Peer selection: single, fixed list, or computed per message
//! - In-process ports with asynchronous delivery
//! - UDP channel carrying JSON envelopes

pub mod channel;
pub mod port;
pub mod udp;

pub use channel::*;
pub use port::*;
pub use udp::*;
