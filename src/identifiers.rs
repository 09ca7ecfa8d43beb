//! Type-safe identifiers.
//!
//! Newtype wrappers keep acknowledgement ids, transport ids and socket keys
//! from being mixed up with each other or with plain integers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// AckId
// ============================================================================

/// Acknowledgement id, unique per socket.
///
/// Allocated from a per-socket counter so ids are strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AckId(u64);

impl AckId {
    /// Wraps a raw id received on the wire.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`AckId`]s.
#[derive(Debug, Default)]
pub struct AckIdGenerator {
    next: u64,
}

impl AckIdGenerator {
    /// Returns the next id and advances the counter.
    #[inline]
    pub fn next_id(&mut self) -> AckId {
        let id = AckId(self.next);
        self.next += 1;
        id
    }
}

// ============================================================================
// TransportId
// ============================================================================

/// Process-wide counter for transport ids.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one transport instance.
///
/// Events are tagged with the id of the transport that produced them so
/// the engine can ignore events from transports it no longer listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocates a fresh id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

// ============================================================================
// SocketKey
// ============================================================================

/// Process-wide counter for socket keys.
static NEXT_SOCKET_KEY: AtomicU64 = AtomicU64::new(1);

/// Identifies one socket instance within its manager.
///
/// Two sockets for the same namespace can briefly coexist when one is
/// dropped and the namespace is reopened; the key tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketKey(u64);

impl SocketKey {
    /// Allocates a fresh key.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SOCKET_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_ids_are_monotonic() {
        let mut ids = AckIdGenerator::default();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first.as_u64(), 0);
        assert!(second > first);
    }

    #[test]
    fn test_transport_ids_are_unique() {
        assert_ne!(TransportId::next(), TransportId::next());
    }

    #[test]
    fn test_socket_keys_are_unique() {
        assert_ne!(SocketKey::next(), SocketKey::next());
    }
}
