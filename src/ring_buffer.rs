//! Single-producer, single-consumer byte ring buffer.
//!
//! Backed by an anonymous memory map. The usual use is handing audio from a
//! capture callback to a playback callback, or from a callback thread to an
//! ordinary thread, without locks on either side.

use crate::error::{Result, SoundIoError};
use memmap2::MmapMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Capacities are rounded up to a multiple of this
pub const PAGE_SIZE: usize = 4096;

struct Shared {
    _map: MmapMut,
    ptr: *mut u8,
    capacity: usize,
    // Monotonic byte counters; position in the buffer is `counter % capacity`.
    write: AtomicUsize,
    read: AtomicUsize,
}

// SAFETY: the producer only touches bytes in the free region and the
// consumer only touches bytes in the filled region. The regions never
// overlap because each side publishes its cursor with release ordering
// after it finishes with the bytes.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn fill(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

pub struct RingBuffer {
    shared: Arc<Shared>,
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl RingBuffer {
    /// Allocate at least `requested_bytes`, rounded up to whole pages
    pub fn new(requested_bytes: usize) -> Result<Self> {
        Self::with_unit(requested_bytes, PAGE_SIZE)
    }

    /// Room for at least `min_frames` frames where capacity is also a
    /// multiple of `bytes_per_frame`, so no frame straddles the wrap point
    pub fn with_frame_alignment(min_frames: usize, bytes_per_frame: usize) -> Result<Self> {
        if bytes_per_frame == 0 {
            return Err(SoundIoError::Invalid);
        }
        let unit = PAGE_SIZE / gcd(PAGE_SIZE, bytes_per_frame) * bytes_per_frame;
        Self::with_unit(min_frames * bytes_per_frame, unit)
    }

    fn with_unit(requested_bytes: usize, unit: usize) -> Result<Self> {
        let capacity = requested_bytes.max(1).div_ceil(unit) * unit;
        let mut map = MmapMut::map_anon(capacity).map_err(|_| SoundIoError::NoMem)?;
        let ptr = map.as_mut_ptr();
        debug!(capacity, "ring buffer allocated");
        Ok(Self {
            shared: Arc::new(Shared {
                _map: map,
                ptr,
                capacity,
                write: AtomicUsize::new(0),
                read: AtomicUsize::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn split(self) -> (Producer, Consumer) {
        (
            Producer {
                shared: self.shared.clone(),
            },
            Consumer {
                shared: self.shared,
            },
        )
    }
}

/// Writing half
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn fill_count(&self) -> usize {
        self.shared.fill()
    }

    pub fn free_count(&self) -> usize {
        self.shared.capacity - self.shared.fill()
    }

    /// Contiguous free space starting at the write position. May be shorter
    /// than `free_count()` when the free region wraps.
    pub fn writable_slice(&mut self) -> &mut [u8] {
        let shared = &self.shared;
        let start = shared.write.load(Ordering::Relaxed) % shared.capacity;
        let len = self.free_count().min(shared.capacity - start);
        // SAFETY: [start, start + len) is inside the mapping and in the free
        // region, which the consumer does not read until `commit`.
        unsafe { std::slice::from_raw_parts_mut(shared.ptr.add(start), len) }
    }

    /// Publish `count` bytes written through `writable_slice`.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds `free_count()`.
    pub fn commit(&mut self, count: usize) {
        assert!(count <= self.free_count(), "commit past free space");
        self.shared.write.fetch_add(count, Ordering::Release);
    }

    /// Copy as much of `data` as fits, returning the bytes written
    pub fn push(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        while written < data.len() {
            let slice = self.writable_slice();
            let n = slice.len().min(data.len() - written);
            if n == 0 {
                break;
            }
            slice[..n].copy_from_slice(&data[written..written + n]);
            self.commit(n);
            written += n;
        }
        written
    }
}

/// Reading half
pub struct Consumer {
    shared: Arc<Shared>,
}

impl Consumer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn fill_count(&self) -> usize {
        self.shared.fill()
    }

    pub fn free_count(&self) -> usize {
        self.shared.capacity - self.shared.fill()
    }

    /// Contiguous filled bytes starting at the read position
    pub fn readable_slice(&self) -> &[u8] {
        let shared = &self.shared;
        let start = shared.read.load(Ordering::Relaxed) % shared.capacity;
        let len = self.fill_count().min(shared.capacity - start);
        // SAFETY: [start, start + len) is inside the mapping and in the filled
        // region, which the producer does not touch until `consume`.
        unsafe { std::slice::from_raw_parts(shared.ptr.add(start), len) }
    }

    /// Release `count` bytes back to the producer.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds `fill_count()`.
    pub fn consume(&mut self, count: usize) {
        assert!(count <= self.fill_count(), "consume past filled data");
        self.shared.read.fetch_add(count, Ordering::Release);
    }

    /// Copy filled bytes into `out` without consuming them
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let shared = &self.shared;
        let fill = self.fill_count().min(out.len());
        let start = shared.read.load(Ordering::Relaxed) % shared.capacity;
        let first = fill.min(shared.capacity - start);
        // SAFETY: both ranges lie in the filled region, see `readable_slice`.
        unsafe {
            std::ptr::copy_nonoverlapping(shared.ptr.add(start), out.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(shared.ptr, out.as_mut_ptr().add(first), fill - first);
        }
        fill
    }

    /// Copy and consume up to `out.len()` bytes
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        self.consume(n);
        n
    }

    /// Drop everything currently buffered
    pub fn clear(&mut self) {
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.read.store(write, Ordering::Release);
    }
}
