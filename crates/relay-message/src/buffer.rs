//! Fixed-capacity pooled byte buffers and the FIFO chain a message's wire
//! bytes live in.

use relay_pool::{pool_type, PoolBox};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

static CAPACITY: AtomicUsize = AtomicUsize::new(512);
static CAPACITY_LOCKED: AtomicBool = AtomicBool::new(false);

/// Process-wide buffer capacity in bytes.
pub fn buffer_capacity() -> usize {
    CAPACITY.load(Ordering::Relaxed)
}

/// Overrides the buffer capacity. May be called at most until the first
/// buffer is allocated; the capacity is locked from then on.
///
/// # Panics
///
/// Panics if a buffer has already been allocated or if `capacity` is zero.
pub fn set_buffer_capacity(capacity: usize) {
    assert!(capacity > 0, "buffer capacity must be non-zero");
    assert!(
        !CAPACITY_LOCKED.load(Ordering::SeqCst),
        "buffer capacity is locked after the first buffer is allocated"
    );
    CAPACITY.store(capacity, Ordering::SeqCst);
}

fn locked_capacity() -> usize {
    CAPACITY_LOCKED.store(true, Ordering::SeqCst);
    buffer_capacity()
}

/// A fixed-capacity byte segment. The storage lives inline in the pooled
/// item, right after this header.
pub struct Buffer {
    size: usize,
}

pool_type!(Buffer, "relay_buffer", extra = locked_capacity);

impl Buffer {
    /// Allocates an empty buffer from the pool. `None` means the heap is
    /// exhausted.
    pub fn alloc() -> Option<PoolBox<Buffer>> {
        relay_pool::alloc(Buffer { size: 0 })
    }

    /// Valid bytes from the base of the storage.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes still writable at the tail.
    pub fn free_capacity(&self) -> usize {
        buffer_capacity() - self.size
    }

    /// Extends the valid region by `len` bytes just written through
    /// [`BufferBytes::free_space_mut`].
    pub fn insert(&mut self, len: usize) {
        self.size += len;
        debug_assert!(self.size <= buffer_capacity(), "buffer overfilled");
    }
}

/// Byte access for a pooled buffer. Lives on the owning handle because the
/// storage sits in the pool item's extra region.
pub trait BufferBytes {
    /// The valid bytes.
    fn data(&self) -> &[u8];
    /// The writable tail.
    fn free_space_mut(&mut self) -> &mut [u8];
}

impl BufferBytes for PoolBox<Buffer> {
    fn data(&self) -> &[u8] {
        &self.extra()[..self.size]
    }

    fn free_space_mut(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.extra_mut()[size..]
    }
}

/// FIFO chain of buffers holding a message's bytes in wire order.
#[derive(Default)]
pub struct BufferChain {
    bufs: VecDeque<PoolBox<Buffer>>,
}

impl BufferChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PoolBox<Buffer>> {
        self.bufs.get(index)
    }

    pub fn back(&self) -> Option<&PoolBox<Buffer>> {
        self.bufs.back()
    }

    pub fn back_mut(&mut self) -> Option<&mut PoolBox<Buffer>> {
        self.bufs.back_mut()
    }

    pub fn push_back(&mut self, buf: PoolBox<Buffer>) {
        self.bufs.push_back(buf);
    }

    pub fn pop_back(&mut self) -> Option<PoolBox<Buffer>> {
        self.bufs.pop_back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoolBox<Buffer>> {
        self.bufs.iter()
    }

    /// Total valid bytes across the chain.
    pub fn total_size(&self) -> usize {
        self.bufs.iter().map(|b| b.size()).sum()
    }

    /// Appends `bytes`, filling the tail buffer's free capacity before
    /// allocating new buffers. Returns `false` on heap exhaustion.
    pub fn append_bytes(&mut self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            let needs_fresh = self.bufs.back().map_or(true, |b| b.free_capacity() == 0);
            if needs_fresh {
                match Buffer::alloc() {
                    Some(buf) => self.bufs.push_back(buf),
                    None => return false,
                }
            }
            let Some(buf) = self.bufs.back_mut() else {
                return false;
            };
            let n = buf.free_capacity().min(bytes.len());
            buf.free_space_mut()[..n].copy_from_slice(&bytes[..n]);
            buf.insert(n);
            bytes = &bytes[n..];
        }
        true
    }

    /// Moves every buffer of `other` onto the tail of `self`, leaving
    /// `other` empty.
    pub fn splice_back(&mut self, other: &mut BufferChain) {
        self.bufs.append(&mut other.bufs);
    }

    /// Takes the whole chain, leaving `self` empty.
    pub fn take(&mut self) -> BufferChain {
        BufferChain {
            bufs: std::mem::take(&mut self.bufs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_rolls_into_fresh_buffers() {
        let cap = buffer_capacity();
        let mut chain = BufferChain::new();
        let payload: Vec<u8> = (0..cap + 7).map(|i| i as u8).collect();

        assert!(chain.append_bytes(&payload));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.total_size(), cap + 7);
        assert_eq!(chain.get(0).unwrap().size(), cap);
        assert_eq!(chain.get(1).unwrap().size(), 7);

        let flat: Vec<u8> = chain.iter().flat_map(|b| b.data().to_vec()).collect();
        assert_eq!(flat, payload);
    }

    #[test]
    fn splice_back_empties_the_source() {
        let mut a = BufferChain::new();
        let mut b = BufferChain::new();
        assert!(a.append_bytes(b"head"));
        assert!(b.append_bytes(b"tail"));

        a.splice_back(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.total_size(), 8);
    }
}
