//! Free-port discovery over a configured range
//!
//! Allocation is a sequential scan: starting at `max(desired, min_port)`,
//! candidates are probed upward by binding and immediately dropping a
//! transient listener. The scan is deterministic (lowest free candidate
//! wins) at the cost of O(range) probes when the range is nearly full.
//!
//! A successful probe is advisory only: another tunnel creation or an
//! unrelated process can grab the port before the relay engine binds it,
//! so callers must treat a later bind failure as a normal, retryable
//! creation failure.

use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, TcpListener};
use thiserror::Error;
use tracing::trace;

/// Port allocation errors
#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("no free port in range {min_port}-{max_port}")]
    Exhausted { min_port: u16, max_port: u16 },

    #[error("port probe failed: {0}")]
    Probe(#[from] io::Error),
}

/// Finds free TCP ports within `[min_port, max_port]`
#[derive(Debug, Clone)]
pub struct PortAllocator {
    min_port: u16,
    max_port: u16,
}

impl PortAllocator {
    pub fn new(min_port: u16, max_port: u16) -> Self {
        debug_assert!(min_port <= max_port);
        Self { min_port, max_port }
    }

    pub fn min_port(&self) -> u16 {
        self.min_port
    }

    pub fn max_port(&self) -> u16 {
        self.max_port
    }

    /// Find a free port, skipping any in `exclude`.
    ///
    /// A `desired` of 0 means "any": the scan starts at `min_port`. A
    /// `desired` below the range is clamped up to `min_port`; one above the
    /// range fails with [`AllocatorError::Exhausted`].
    pub fn allocate(&self, desired: u16, exclude: &HashSet<u16>) -> Result<u16, AllocatorError> {
        let start = if desired == 0 {
            self.min_port
        } else {
            desired.max(self.min_port)
        };

        if start <= self.max_port {
            for port in start..=self.max_port {
                if exclude.contains(&port) {
                    trace!(port, "candidate excluded by registry");
                    continue;
                }
                if Self::probe(port)? {
                    trace!(port, "allocated free port");
                    return Ok(port);
                }
            }
        }

        Err(AllocatorError::Exhausted {
            min_port: self.min_port,
            max_port: self.max_port,
        })
    }

    /// Probe a single port by bind-then-drop.
    ///
    /// `AddrInUse` is a normal negative result; any other bind error (e.g.
    /// permission denied on privileged ports) is fatal.
    fn probe(port: u16) -> io::Result<bool> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(addr) {
            Ok(listener) => {
                drop(listener);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_any_in_range() {
        let allocator = PortAllocator::new(41200, 41300);
        let port = allocator.allocate(0, &HashSet::new()).unwrap();
        assert!((41200..=41300).contains(&port));
    }

    #[test]
    fn test_allocate_honors_desired_port() {
        let allocator = PortAllocator::new(41310, 41390);
        let port = allocator.allocate(41350, &HashSet::new()).unwrap();
        assert!(port >= 41350);
    }

    #[test]
    fn test_desired_below_range_clamps_to_min() {
        let allocator = PortAllocator::new(41400, 41450);
        let port = allocator.allocate(2000, &HashSet::new()).unwrap();
        assert!((41400..=41450).contains(&port));
    }

    #[test]
    fn test_desired_above_range_is_exhausted() {
        let allocator = PortAllocator::new(41460, 41470);
        let result = allocator.allocate(50000, &HashSet::new());
        assert!(matches!(result, Err(AllocatorError::Exhausted { .. })));
    }

    #[test]
    fn test_exclusion_set_is_skipped() {
        let allocator = PortAllocator::new(41480, 41490);
        let first = allocator.allocate(0, &HashSet::new()).unwrap();

        let exclude: HashSet<u16> = [first].into_iter().collect();
        let second = allocator.allocate(0, &exclude).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_fully_excluded_range_is_exhausted() {
        let allocator = PortAllocator::new(41500, 41502);
        let exclude: HashSet<u16> = (41500..=41502).collect();
        let result = allocator.allocate(0, &exclude);
        assert!(matches!(result, Err(AllocatorError::Exhausted { .. })));
    }

    #[test]
    fn test_occupied_port_is_skipped() {
        let allocator = PortAllocator::new(41510, 41540);
        let port = allocator.allocate(0, &HashSet::new()).unwrap();

        // Hold a real listener on the allocated port; the next scan from the
        // same desired port must move past it.
        let _occupant = TcpListener::bind(("0.0.0.0", port)).unwrap();
        let next = allocator.allocate(port, &HashSet::new()).unwrap();
        assert!(next > port);
    }
}
