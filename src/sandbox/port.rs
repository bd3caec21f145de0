use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out strictly increasing ports starting at a base.
///
/// Construct one per process and share it by reference (or `Arc`) with every
/// task setup. Ports are never returned; exhausting the range is not checked.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    next: AtomicU32,
}

/// A port issued to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortLease {
    pub port: u16,
    pub held_by: String,
}

impl fmt::Display for PortLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (held by {})", self.port, self.held_by)
    }
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            next: AtomicU32::new(u32::from(base)),
        }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// Returns a port greater than every port previously returned.
    pub fn allocate(&self) -> u16 {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // Past 65535 the range is exhausted; clamp rather than wrap below the base.
        u16::try_from(raw).unwrap_or_else(|_| {
            if raw == u32::from(u16::MAX) + 1 {
                tracing::warn!(
                    base = self.base,
                    "Port range exhausted, further allocations repeat port 65535"
                );
            }
            u16::MAX
        })
    }

    /// True once allocations have run past the top of the port range.
    pub fn is_exhausted(&self) -> bool {
        self.next.load(Ordering::Relaxed) > u32::from(u16::MAX) + 1
    }

    /// Allocates a port and records which task holds it.
    pub fn lease(&self, task_id: impl Into<String>) -> PortLease {
        let lease = PortLease {
            port: self.allocate(),
            held_by: task_id.into(),
        };
        tracing::debug!(port = lease.port, task_id = %lease.held_by, "Port leased");
        lease
    }
}
