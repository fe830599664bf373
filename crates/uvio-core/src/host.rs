//! Descriptor bridge for embedding hosts
//!
//! An embedder that manages its own resource table (descriptor → managed
//! object) plugs in here. The loop calls the bridge when a filesystem open
//! yields a descriptor and when a descriptor the host may know about is
//! released.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use crate::id::RequestId;

/// Opaque value the host returns for a wrapped descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceToken(pub u64);

/// Host-side resource table.
///
/// # Contract
///
/// - Both methods are called on the loop thread only.
/// - `wrap_descriptor` is called once per successful open, while the
///   originating request is still live; the request is released after it
///   returns.
/// - `remove_descriptor` may be called for descriptors the host never saw
///   and must tolerate that.
pub trait HostBridge {
    /// Record a newly opened descriptor and hand back its token
    fn wrap_descriptor(&mut self, fd: RawFd, request: RequestId) -> ResourceToken;

    /// Forget a descriptor that is being closed
    fn remove_descriptor(&mut self, fd: RawFd);
}

/// Default bridge: a plain descriptor → token map.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    next_token: u64,
    entries: HashMap<RawFd, ResourceToken>,
}

impl DescriptorTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Token recorded for `fd`
    pub fn lookup(&self, fd: RawFd) -> Option<ResourceToken> {
        self.entries.get(&fd).copied()
    }

    /// Number of tracked descriptors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HostBridge for DescriptorTable {
    fn wrap_descriptor(&mut self, fd: RawFd, _request: RequestId) -> ResourceToken {
        self.next_token += 1;
        let token = ResourceToken(self.next_token);
        self.entries.insert(fd, token);
        token
    }

    fn remove_descriptor(&mut self, fd: RawFd) {
        self.entries.remove(&fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_and_remove() {
        let mut table = DescriptorTable::new();
        let t1 = table.wrap_descriptor(5, RequestId::NONE);
        let t2 = table.wrap_descriptor(6, RequestId::NONE);
        assert_ne!(t1, t2);
        assert_eq!(table.lookup(5), Some(t1));

        table.remove_descriptor(5);
        assert_eq!(table.lookup(5), None);
        assert_eq!(table.len(), 1);

        // unknown descriptors are ignored
        table.remove_descriptor(99);
        assert_eq!(table.len(), 1);
    }
}
