//! Fixed-capacity byte ring holding decoded 16-bit PCM (or raw 8-bit PCM).

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

/// One second of 44.1 kHz stereo 16-bit audio.
pub const DEFAULT_RING_CAPACITY: usize = 44_100 * 4;

pub struct AudioRing {
    rb: HeapRb<u8>,
}

impl AudioRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    /// Bytes waiting to be drained.
    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn free(&self) -> usize {
        self.rb.vacant_len()
    }

    /// Below the half-full refill threshold.
    pub fn wants_refill(&self) -> bool {
        self.len() < self.capacity() / 2
    }

    /// Append as much of `data` as fits. Returns bytes written.
    pub fn push(&mut self, data: &[u8]) -> usize {
        self.rb.push_slice(data)
    }

    /// Drain up to `out.len()` bytes. Returns bytes read.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        self.rb.pop_slice(out)
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }
}

impl std::fmt::Debug for AudioRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRing")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
