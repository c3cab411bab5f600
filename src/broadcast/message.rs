//! Message and identity types for fan-out
//!
//! This module defines the opaque event payload handed to subscribers and
//! the key used to identify each subscriber in the registry.

use bytes::Bytes;

/// Unique identifier for a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Create an id from its raw value
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A single sampled event
///
/// The payload is never parsed or re-encoded. It is created once by copying
/// out of the ingestion receive buffer and is immutable afterwards; cloning
/// for fan-out only bumps the `Bytes` reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    data: Bytes,
}

impl EventMessage {
    /// Create a message owning an independent copy of `data`
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Create a message from static bytes
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload as a cheaply clonable `Bytes`
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consume the message, returning the payload
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Bytes> for EventMessage {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for EventMessage {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl AsRef<[u8]> for EventMessage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
