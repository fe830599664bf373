//! Deadline heap shared by Timer and FsPoll handles
//!
//! # Complexity
//!
//! - Arm: O(log n)
//! - Disarm: O(1) (lazy)
//! - Pop expired: O(k log n) for k expired entries
//! - Next deadline: O(1)
//!
//! # Cancellation Strategy
//!
//! Every arm gets a fresh sequence number, which the owning handle stores.
//! Disarming only clears the handle's copy; the heap entry stays until it
//! surfaces and is discarded because its sequence no longer matches.
//! Sequence numbers also break deadline ties, so timers armed for the same
//! instant fire in the order they were started.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use uvio_core::HandleId;

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    handle: HandleId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest deadline, then lowest seq
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// Entry that reached its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Expired {
    pub handle: HandleId,
    pub seq: u64,
}

/// Heap statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    pub armed: u64,
    pub fired: u64,
    pub pending: usize,
}

pub(crate) struct TimerHeap {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    total_armed: u64,
    total_fired: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::with_capacity(64),
            next_seq: 1,
            total_armed: 0,
            total_fired: 0,
        }
    }

    /// Arm `handle` for `deadline`; the returned sequence identifies this arm
    pub(crate) fn arm(&mut self, handle: HandleId, deadline: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_armed += 1;
        self.heap.push(HeapEntry {
            deadline,
            seq,
            handle,
        });
        seq
    }

    /// Earliest deadline in the heap (may belong to a disarmed entry)
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Pop one entry whose deadline is at or before `now`.
    ///
    /// The caller checks `seq` against the handle's current arm.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<Expired> {
        if self.heap.peek()?.deadline > now {
            return None;
        }
        let entry = self.heap.pop()?;
        self.total_fired += 1;
        Some(Expired {
            handle: entry.handle,
            seq: entry.seq,
        })
    }

    /// Drop stale entries at the top of the heap.
    ///
    /// `is_live(handle, seq)` reports whether an entry is still armed.
    pub(crate) fn prune<F>(&mut self, mut is_live: F)
    where
        F: FnMut(HandleId, u64) -> bool,
    {
        while let Some(top) = self.heap.peek() {
            if is_live(top.handle, top.seq) {
                break;
            }
            self.heap.pop();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn stats(&self) -> TimerStats {
        TimerStats {
            armed: self.total_armed,
            fired: self.total_fired,
            pending: self.heap.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uvio_core::SlotId;

    fn h(n: u32) -> HandleId {
        HandleId::new(SlotId::new(n, 0))
    }

    #[test]
    fn test_earliest_first() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        heap.arm(h(1), now + Duration::from_millis(30));
        heap.arm(h(2), now + Duration::from_millis(10));
        heap.arm(h(3), now + Duration::from_millis(20));

        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(10)));

        let later = now + Duration::from_millis(25);
        assert_eq!(heap.pop_expired(later).map(|e| e.handle), Some(h(2)));
        assert_eq!(heap.pop_expired(later).map(|e| e.handle), Some(h(3)));
        assert_eq!(heap.pop_expired(later), None);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_ties_fire_in_arm_order() {
        let mut heap = TimerHeap::new();
        let at = Instant::now();
        let s1 = heap.arm(h(5), at);
        let s2 = heap.arm(h(4), at);
        assert!(s1 < s2);
        assert_eq!(heap.pop_expired(at).map(|e| e.handle), Some(h(5)));
        assert_eq!(heap.pop_expired(at).map(|e| e.handle), Some(h(4)));
    }

    #[test]
    fn test_prune_stale() {
        let mut heap = TimerHeap::new();
        let now = Instant::now();
        let stale = heap.arm(h(1), now);
        let live = heap.arm(h(2), now + Duration::from_millis(5));

        heap.prune(|_, seq| seq != stale);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_millis(5)));
        heap.prune(|_, seq| seq == live);
        assert_eq!(heap.len(), 1);

        let stats = heap.stats();
        assert_eq!(stats.armed, 2);
        assert_eq!(stats.pending, 1);
    }
}
