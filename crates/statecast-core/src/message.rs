//! Message envelope definitions
//!
//! Every message on a channel is an [`Envelope`]: a type tag, the namespace
//! of the replication session it belongs to, and a [`Detail`] payload.
//! Envelopes are JSON on the wire so that sessions with different key and
//! value types can share one physical channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{StatecastError, StatecastResult, Timestamp};

pub const STATE_UPDATE: &str = "state:update";
pub const STATE_RESET: &str = "state:reset";
pub const STATE_REQUEST: &str = "state:request";
pub const STATE_MISSING: &str = "state:missing";

/// Message type tag
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Authoritative value for a key changed
    Update,
    /// Authoritative store was cleared
    Reset,
    /// Peer asks the source to re-publish a key
    Request,
    /// Any other tag, passed through untouched
    Other(String),
}

impl MessageKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            STATE_UPDATE => MessageKind::Update,
            STATE_RESET => MessageKind::Reset,
            STATE_REQUEST => MessageKind::Request,
            other => MessageKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Update => STATE_UPDATE,
            MessageKind::Reset => STATE_RESET,
            MessageKind::Request => STATE_REQUEST,
            MessageKind::Other(tag) => tag,
        }
    }

    /// Is this one of the three replication protocol messages?
    pub fn is_protocol(&self) -> bool {
        !matches!(self, MessageKind::Other(_))
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        MessageKind::parse(&tag)
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical partition of traffic on a shared channel
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Namespace(name.to_string())
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Namespace(name)
    }
}

impl From<&Namespace> for Namespace {
    fn from(ns: &Namespace) -> Self {
        ns.clone()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message payload
///
/// `key` is absent for single-value stores. `value` is only meaningful on
/// updates; a JSON `null` value and an absent value decode the same way.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Detail {
    pub fn empty() -> Self {
        Detail::default()
    }

    pub fn update(key: Option<Value>, value: Value) -> Self {
        Detail {
            key,
            value: Some(value),
            ..Detail::default()
        }
    }

    pub fn request(key: Option<Value>) -> Self {
        Detail {
            key,
            ..Detail::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Tagged, namespaced message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub namespace: Namespace,
    #[serde(default)]
    pub detail: Detail,
}

impl Envelope {
    pub fn new(kind: MessageKind, namespace: impl Into<Namespace>, detail: Detail) -> Self {
        Envelope {
            kind,
            namespace: namespace.into(),
            detail,
        }
    }

    /// Does this envelope belong to the given session?
    #[inline]
    pub fn in_namespace(&self, namespace: &Namespace) -> bool {
        &self.namespace == namespace
    }

    /// Encode for byte-oriented transports
    pub fn encode(&self) -> StatecastResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StatecastError::InvalidEnvelope(e.to_string()))
    }

    /// Decode from a byte-oriented transport
    pub fn decode(bytes: &[u8]) -> StatecastResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StatecastError::InvalidEnvelope(e.to_string()))
    }
}
