//! Slot table for loop-owned objects
//!
//! Stores handles and requests in a dense vector. Released slots are reused
//! in LIFO order (better cache locality) and carry a generation counter so
//! stale ids fail lookups instead of aliasing the next occupant.

use crate::id::SlotId;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-checked arena.
///
/// Single-threaded: the loop is the only owner.
pub struct SlotTable<T> {
    slots: Vec<Slot<T>>,
    /// Free slot stack (LIFO for cache locality)
    free_stack: Vec<u32>,
    /// Number of occupied slots
    len: usize,
}

impl<T> SlotTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty table with room for `capacity` objects
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_stack: Vec::new(),
            len: 0,
        }
    }

    /// Store a value, returning its id.
    ///
    /// Returns `None` only when the index space (u32::MAX - 1 slots) is exhausted.
    pub fn insert(&mut self, value: T) -> Option<SlotId> {
        if let Some(index) = self.free_stack.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            self.len += 1;
            return Some(SlotId::new(index, slot.generation));
        }

        let index = self.slots.len();
        if index >= (u32::MAX - 1) as usize {
            return None;
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Some(SlotId::new(index as u32, 0))
    }

    fn slot(&self, id: SlotId) -> Option<&Slot<T>> {
        self.slots
            .get(id.as_usize())
            .filter(|s| s.generation == id.generation())
    }

    /// Borrow the value named by `id`, if it is still live
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slot(id).and_then(|s| s.value.as_ref())
    }

    /// Mutably borrow the value named by `id`, if it is still live
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots
            .get_mut(id.as_usize())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.value.as_mut())
    }

    /// Check whether `id` names a live value
    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Remove the value named by `id`, invalidating every copy of the id.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self
            .slots
            .get_mut(id.as_usize())
            .filter(|s| s.generation == id.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_stack.push(id.index());
        self.len -= 1;
        Some(value)
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no values are stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshot of live ids in slot order.
    ///
    /// Used where the caller needs `&mut` access to something else while
    /// walking the table (callbacks may insert or remove entries).
    pub fn ids(&self) -> Vec<SlotId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Iterate live values in slot order
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value
                .as_ref()
                .map(|v| (SlotId::new(i as u32, s.generation), v))
        })
    }

    /// Iterate live values mutably in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.value
                .as_mut()
                .map(|v| (SlotId::new(i as u32, generation), v))
        })
    }

    /// Remove every live value, returning them with their ids
    pub fn drain(&mut self) -> Vec<(SlotId, T)> {
        let ids = self.ids();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|v| (id, v)))
            .collect()
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let mut table = SlotTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();

        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_reuse_lifo() {
        let mut table = SlotTable::new();
        let a = table.insert(1).unwrap();
        let b = table.insert(2).unwrap();

        table.remove(a);
        table.remove(b);

        // LIFO: last removed comes back first
        let c = table.insert(3).unwrap();
        assert_eq!(c.index(), b.index());
        let d = table.insert(4).unwrap();
        assert_eq!(d.index(), a.index());
    }

    #[test]
    fn test_stale_id_rejected() {
        let mut table = SlotTable::new();
        let old = table.insert("old").unwrap();
        assert_eq!(table.remove(old), Some("old"));

        let new = table.insert("new").unwrap();
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert!(table.get(old).is_none());
        assert!(table.get_mut(old).is_none());
        assert!(table.remove(old).is_none());
        assert_eq!(table.get(new), Some(&"new"));
    }

    #[test]
    fn test_double_remove() {
        let mut table = SlotTable::new();
        let id = table.insert(10).unwrap();
        assert_eq!(table.remove(id), Some(10));
        assert_eq!(table.remove(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_iter_and_drain() {
        let mut table = SlotTable::new();
        let a = table.insert('a').unwrap();
        let _b = table.insert('b').unwrap();
        let _c = table.insert('c').unwrap();
        table.remove(a);

        let seen: Vec<char> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(seen, vec!['b', 'c']);

        for (_, v) in table.iter_mut() {
            *v = v.to_ascii_uppercase();
        }
        let drained: Vec<char> = table.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(drained, vec!['B', 'C']);
        assert!(table.is_empty());
    }
}
