//! Owned byte buffers
//!
//! A [`Buffer`] is handed to read and write operations by value. While an
//! operation holds it the storage never moves (the heap allocation backing a
//! `Vec` is stable) and it is released exactly once, when its last owner
//! drops it.
//!
//! Stream and datagram reads obtain buffers through a [`BufferProvider`],
//! called with a suggested size before every read attempt.

use std::ops::{Deref, DerefMut};

/// Owned byte region with a length and a capacity.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    storage: Vec<u8>,
}

impl Buffer {
    /// Empty buffer with no capacity
    pub const fn empty() -> Self {
        Buffer {
            storage: Vec::new(),
        }
    }

    /// Zero-filled buffer of `len` bytes
    pub fn alloc(len: usize) -> Self {
        Buffer {
            storage: vec![0u8; len],
        }
    }

    /// Empty buffer with room for at least `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            storage: Vec::with_capacity(capacity),
        }
    }

    /// Copy `data` into a new buffer
    pub fn from_slice(data: &[u8]) -> Self {
        Buffer {
            storage: data.to_vec(),
        }
    }

    /// Number of valid bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Bytes the storage can hold without reallocating
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Valid bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.storage
    }

    /// Valid bytes, mutable
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// Extend the valid region to the full capacity and return it.
    ///
    /// Read paths fill this slice, then [`truncate`](Self::truncate) to the
    /// byte count the OS reported.
    pub fn read_target(&mut self) -> &mut [u8] {
        let cap = self.storage.capacity();
        self.storage.resize(cap, 0);
        &mut self.storage
    }

    /// Shorten the valid region to `len` bytes
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.storage.truncate(len);
    }

    /// Append bytes
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.storage.extend_from_slice(data);
    }

    /// Copy of the first `len` bytes (or all of them) decoded as UTF-8, lossily
    pub fn to_string_lossy(&self, len: Option<usize>) -> String {
        let end = len.map_or(self.len(), |n| n.min(self.len()));
        String::from_utf8_lossy(&self.storage[..end]).into_owned()
    }

    /// Take the storage out
    pub fn into_vec(self) -> Vec<u8> {
        self.storage
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.storage
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(storage: Vec<u8>) -> Self {
        Buffer { storage }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Buffer::from_slice(data)
    }
}

impl From<&str> for Buffer {
    fn from(data: &str) -> Self {
        Buffer::from_slice(data.as_bytes())
    }
}

impl From<String> for Buffer {
    fn from(data: String) -> Self {
        Buffer {
            storage: data.into_bytes(),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Supplies the buffer for each read attempt.
///
/// # Contract
///
/// - Called on the loop thread, once per read attempt, before the data is
///   delivered.
/// - `suggested` is a hint; a returned buffer with zero capacity makes the
///   read fail with `ENOBUFS`.
/// - Ownership of the returned buffer passes to the read callback.
pub trait BufferProvider {
    /// Produce a buffer for a read of up to `suggested` bytes
    fn acquire(&mut self, suggested: usize) -> Buffer;
}

impl<F> BufferProvider for F
where
    F: FnMut(usize) -> Buffer,
{
    fn acquire(&mut self, suggested: usize) -> Buffer {
        self(suggested)
    }
}

/// Default provider: a fresh heap allocation per read.
///
/// Honors the suggested size, falling back to `min_size` when the
/// suggestion is smaller.
#[derive(Debug, Clone)]
pub struct HeapBuffers {
    min_size: usize,
    handed_out: u64,
}

impl HeapBuffers {
    /// Provider that never hands out less than `min_size` bytes
    pub fn new(min_size: usize) -> Self {
        Self {
            min_size,
            handed_out: 0,
        }
    }

    /// Number of buffers produced so far
    pub fn handed_out(&self) -> u64 {
        self.handed_out
    }
}

impl Default for HeapBuffers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BufferProvider for HeapBuffers {
    fn acquire(&mut self, suggested: usize) -> Buffer {
        self.handed_out += 1;
        Buffer::with_capacity(suggested.max(self.min_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_in() {
        let buf = Buffer::from("hello");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_slice(), b"hello");
        assert_eq!(buf.to_string_lossy(Some(4)), "hell");
        assert_eq!(buf.to_string_lossy(Some(100)), "hello");
    }

    #[test]
    fn test_read_target_then_truncate() {
        let mut buf = Buffer::with_capacity(16);
        assert!(buf.is_empty());
        let target = buf.read_target();
        assert!(target.len() >= 16);
        target[..3].copy_from_slice(b"abc");
        buf.truncate(3);
        assert_eq!(buf.as_slice(), b"abc");
        assert!(buf.capacity() >= 16);
    }

    #[test]
    fn test_heap_buffers_honor_suggested() {
        let mut provider = HeapBuffers::default();
        let buf = provider.acquire(4096);
        assert!(buf.capacity() >= 4096);

        let mut floor = HeapBuffers::new(8192);
        assert!(floor.acquire(10).capacity() >= 8192);
        assert_eq!(floor.handed_out(), 1);
    }

    #[test]
    fn test_closure_provider() {
        let mut calls = 0;
        let mut provider = |n: usize| {
            calls += 1;
            Buffer::with_capacity(n)
        };
        let buf = provider.acquire(32);
        assert!(buf.capacity() >= 32);
        drop(provider);
        assert_eq!(calls, 1);
    }
}
