//! Statecast Sync - replicating stores over channels
//!
//! A [`Source`] publishes an authoritative store's changes on a channel and
//! answers value requests. A [`Sink`] applies those changes to a mirror store
//! and asks upstream for keys it is missing. Both only react to messages in
//! their own namespace, so several sessions can share one channel.

pub mod sink;
pub mod source;

pub use sink::*;
pub use source::*;
