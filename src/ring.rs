//! Lock-free single-producer/single-consumer byte ring
//!
//! Connects the decode worker (producer) to the output callback (consumer).
//! Neither side ever blocks or allocates: a full or empty ring shows up as a
//! short count and the caller decides whether to retry or fill with silence.
//!
//! One byte of capacity is always kept free, so `head - tail == capacity - 1`
//! means full and `head == tail` means empty.
//!
//! # Example
//!
//! ```
//! use funkwelle::TransportRing;
//!
//! let ring = TransportRing::new(16);
//! assert_eq!(ring.write(&[1, 2, 3]), 3);
//!
//! let mut out = [0u8; 8];
//! assert_eq!(ring.read(&mut out), 3);
//! assert_eq!(&out[..3], &[1, 2, 3]);
//! ```

use core::cell::UnsafeCell;
use core::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Default capacity used by the player: 256 KiB, about 1.5 s of 44.1 kHz stereo.
pub const DEFAULT_RING_CAPACITY: usize = 262_144;

pub struct TransportRing {
    /// Write cursor, only advanced by the producer
    head: CachePadded<AtomicU64>,
    /// Read cursor, only advanced by the consumer
    tail: CachePadded<AtomicU64>,
    mask: u64,
    storage: Box<[UnsafeCell<u8>]>,
}

// The producer only touches bytes in [head, tail + capacity) and the consumer
// only touches [tail, head); the cursors' release/acquire pairs hand the
// regions over.
unsafe impl Sync for TransportRing {}

impl TransportRing {
    /// Allocate a zero-filled ring.
    ///
    /// # Panics
    ///
    /// If `capacity` is not a power of two or is smaller than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "ring capacity must be a power of two, got {}",
            capacity
        );

        let storage = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            mask: capacity as u64 - 1,
            storage,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    /// Copy as much of `data` as currently fits. Returns the number of bytes written.
    ///
    /// Must only be called from the producer side.
    pub fn write(&self, data: &[u8]) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        let used = head.wrapping_sub(tail) as usize;
        let free = self.capacity() - 1 - used;
        let n = data.len().min(free);
        if n == 0 {
            return 0;
        }

        let start = (head & self.mask) as usize;
        let first = n.min(self.capacity() - start);

        // SAFETY: [start, start + first) and [0, n - first) lie inside storage
        // and belong to the free region, which the consumer does not read.
        unsafe {
            let base = self.base();
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, n - first);
        }

        self.head.store(head.wrapping_add(n as u64), Ordering::Release);
        n
    }

    /// Copy up to `out.len()` buffered bytes into `out`. Returns the number of bytes read.
    ///
    /// Must only be called from the consumer side.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let used = head.wrapping_sub(tail) as usize;
        let n = out.len().min(used);
        if n == 0 {
            return 0;
        }

        let start = (tail & self.mask) as usize;
        let first = n.min(self.capacity() - start);

        // SAFETY: the bytes in [tail, tail + n) were published by the
        // producer's release store of `head`, observed above.
        unsafe {
            let base = self.base();
            ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), n - first);
        }

        self.tail.store(tail.wrapping_add(n as u64), Ordering::Release);
        n
    }

    pub fn available_to_read(&self) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.wrapping_sub(tail) as usize
    }

    pub fn available_to_write(&self) -> usize {
        self.capacity() - 1 - self.available_to_read()
    }

    /// Discard everything buffered by moving the read cursor onto the write cursor.
    ///
    /// Called by whoever currently plays the consumer role, before playback starts.
    pub fn clear_from_consumer(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }

    /// Discard everything buffered by moving the write cursor back onto the read cursor.
    ///
    /// Called by the producer after its last write, once the consumer is quiet.
    pub fn clear_from_producer(&self) {
        let tail = self.tail.load(Ordering::Acquire);
        self.head.store(tail, Ordering::Release);
    }
}

impl Default for TransportRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl core::fmt::Debug for TransportRing {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransportRing")
            .field("capacity", &self.capacity())
            .field("available_to_read", &self.available_to_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn full_ring_keeps_one_byte_free() {
        let ring = TransportRing::new(64);
        assert_eq!(ring.write(&[7u8; 100]), 63);
        assert_eq!(ring.available_to_write(), 0);
        assert_eq!(ring.write(&[1]), 0);

        let mut out = [0u8; 100];
        assert_eq!(ring.read(&mut out), 63);
        assert_eq!(ring.read(&mut out), 0);
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let cap = 1024;
        let ring = TransportRing::new(cap);

        let first = pattern(cap - 10, 3);
        assert_eq!(ring.write(&first), cap - 10);
        let mut sink = vec![0u8; cap - 10];
        assert_eq!(ring.read(&mut sink), cap - 10);
        assert_eq!(sink, first);

        let wrapped = pattern(20, 99);
        assert_eq!(ring.write(&wrapped), 20);
        let mut out = [0u8; 20];
        assert_eq!(ring.read(&mut out), 20);
        assert_eq!(&out[..], &wrapped[..]);
    }

    #[test]
    fn occupancy_always_sums_to_capacity_minus_one() {
        let ring = TransportRing::new(256);
        let mut scratch = [0u8; 256];
        let sizes = [17usize, 200, 3, 255, 90, 1, 128, 64];

        for (i, &n) in sizes.iter().enumerate() {
            if i % 2 == 0 {
                ring.write(&pattern(n, i as u8));
            } else {
                ring.read(&mut scratch[..n]);
            }
            assert_eq!(ring.available_to_read() + ring.available_to_write(), 255);
        }
    }

    #[test]
    fn clears_from_either_side() {
        let ring = TransportRing::new(128);
        ring.write(&[1u8; 50]);
        ring.clear_from_consumer();
        assert_eq!(ring.available_to_read(), 0);

        ring.write(&[2u8; 70]);
        ring.clear_from_producer();
        assert_eq!(ring.available_to_write(), 127);

        // cursors stay usable after a clear
        assert_eq!(ring.write(&[3u8; 10]), 10);
        let mut out = [0u8; 10];
        assert_eq!(ring.read(&mut out), 10);
        assert_eq!(out, [3u8; 10]);
    }

    #[test]
    #[should_panic]
    fn rejects_non_power_of_two() {
        TransportRing::new(1000);
    }

    #[test]
    fn threads_see_bytes_in_order() {
        let ring = Arc::new(TransportRing::new(512));
        let total = 100_000usize;

        let producer = {
            let ring = ring.clone();
            std::thread::spawn(move || {
                let data: Vec<u8> = (0..total).map(|i| i as u8).collect();
                let mut offset = 0;
                while offset < total {
                    let end = (offset + 97).min(total);
                    offset += ring.write(&data[offset..end]);
                    if offset < end {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = 0usize;
        let mut buf = [0u8; 61];
        while received < total {
            let n = ring.read(&mut buf);
            for (j, b) in buf[..n].iter().enumerate() {
                assert_eq!(*b, (received + j) as u8);
            }
            received += n;
            if n == 0 {
                std::thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert_eq!(ring.available_to_read(), 0);
    }
}
