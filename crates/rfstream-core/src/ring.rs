//! Lock-free single-producer/single-consumer ring buffer.
//!
//! [`channel`] splits one pre-allocated buffer into a [`Producer`] and a
//! [`Consumer`] handle. Each side works in two steps:
//!
//! 1. **Reserve** a contiguous window (`reserve_write` / `reserve_read`). An
//!    empty window means the ring is full (producer) or empty (consumer).
//! 2. **Commit** how much of that window was used (`commit_write` /
//!    `commit_read`).
//!
//! The two sides share nothing but the two committed-size counters. The
//! producer publishes its counter with `Release` after the slot writes, and
//! the consumer loads it with `Acquire` before reading, so committed data is
//! always visible. The reverse pair protects slot reuse.
//!
//! Windows never wrap: a window ends at the physical end of the buffer and
//! the next reservation after draining it starts again at offset 0.
//!
//! Waiting on a full or empty ring is the caller's business; see
//! [`Backoff`](crate::Backoff).

#![allow(unsafe_code)]

use core::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    /// Total elements committed by the producer.
    written: AtomicUsize,
    /// Total elements committed by the consumer.
    read: AtomicUsize,
}

// SAFETY: the producer only touches slots in `[written, read + capacity)` and
// the consumer only touches slots in `[read, written)`. The ranges never
// overlap and ownership moves between them through the Release/Acquire pairs
// on the two counters, so sharing `Shared` is sound whenever `T` can move
// between threads.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut T {
        // UnsafeCell<T> is repr(transparent), so the slots are contiguous Ts.
        self.slots[index].get()
    }
}

/// Creates a ring with room for `capacity` elements.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn channel<T: Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let slots = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
    let shared = Arc::new(Shared {
        slots,
        written: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
            reserved: 0,
        },
        Consumer {
            shared,
            reserved: 0,
        },
    )
}

/// Writing half of a ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    reserved: usize,
}

impl<T> Producer<T> {
    /// Returns the writable window starting at the write cursor.
    ///
    /// The window only grows between commits (the consumer frees space), so
    /// a caller may write into it across several calls before committing.
    pub fn reserve_write(&mut self) -> &mut [T] {
        let cap = self.shared.capacity();
        let written = self.shared.written.load(Ordering::Relaxed);
        let read = self.shared.read.load(Ordering::Acquire);
        let free = cap - written.wrapping_sub(read);
        let start = written % cap;
        self.reserved = free.min(cap - start);
        // SAFETY: `[start, start + reserved)` lies inside the buffer and inside
        // the free region, which the consumer will not read until we publish
        // it. `&mut self` guarantees a single live window on this side.
        unsafe { core::slice::from_raw_parts_mut(self.shared.slot_ptr(start), self.reserved) }
    }

    /// Publishes `count` elements of the last reserved window.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the last reserved window.
    pub fn commit_write(&mut self, count: usize) {
        assert!(
            count <= self.reserved,
            "commit_write({count}) exceeds reserved window of {}",
            self.reserved
        );
        if count == 0 {
            return;
        }
        let written = self.shared.written.load(Ordering::Relaxed);
        self.shared
            .written
            .store(written.wrapping_add(count), Ordering::Release);
        self.reserved -= count;
    }

    /// Total ring capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Reading half of a ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    reserved: usize,
}

impl<T> Consumer<T> {
    /// Returns the readable window starting at the read cursor.
    pub fn reserve_read(&mut self) -> &[T] {
        let cap = self.shared.capacity();
        let read = self.shared.read.load(Ordering::Relaxed);
        let written = self.shared.written.load(Ordering::Acquire);
        let ready = written.wrapping_sub(read);
        let start = read % cap;
        self.reserved = ready.min(cap - start);
        self.window(start)
    }

    /// The window returned by the last [`reserve_read`](Self::reserve_read),
    /// minus anything committed since, without touching the shared counters.
    pub fn reserved(&self) -> &[T] {
        let start = self.shared.read.load(Ordering::Relaxed) % self.shared.capacity();
        self.window(start)
    }

    fn window(&self, start: usize) -> &[T] {
        // SAFETY: `[start, start + reserved)` was published by the producer
        // (observed through the Acquire load in `reserve_read`) and stays
        // untouched by it until we commit past it.
        unsafe { core::slice::from_raw_parts(self.shared.slot_ptr(start), self.reserved) }
    }

    /// Releases `count` elements of the last reserved window to the producer.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the last reserved window.
    pub fn commit_read(&mut self, count: usize) {
        assert!(
            count <= self.reserved,
            "commit_read({count}) exceeds reserved window of {}",
            self.reserved
        );
        if count == 0 {
            return;
        }
        let read = self.shared.read.load(Ordering::Relaxed);
        self.shared
            .read
            .store(read.wrapping_add(count), Ordering::Release);
        self.reserved -= count;
    }

    /// Total ring capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn empty_ring_has_no_read_window() {
        let (_tx, mut rx) = channel::<u32>(8);
        assert!(rx.reserve_read().is_empty());
    }

    #[test]
    fn full_ring_has_no_write_window() {
        let (mut tx, _rx) = channel::<u32>(4);
        let w = tx.reserve_write();
        assert_eq!(w.len(), 4);
        w.copy_from_slice(&[1, 2, 3, 4]);
        tx.commit_write(4);
        assert!(tx.reserve_write().is_empty());
    }

    #[test]
    fn windows_stop_at_buffer_end_and_rewind() {
        let (mut tx, mut rx) = channel::<u32>(4);
        tx.reserve_write()[..3].copy_from_slice(&[1, 2, 3]);
        tx.commit_write(3);
        assert_eq!(rx.reserve_read(), &[1, 2, 3]);
        rx.commit_read(3);

        // Write cursor sits at offset 3: only one slot before the end.
        let w = tx.reserve_write();
        assert_eq!(w.len(), 1);
        w[0] = 4;
        tx.commit_write(1);
        assert_eq!(tx.reserve_write().len(), 3);
        tx.reserve_write()[..2].copy_from_slice(&[5, 6]);
        tx.commit_write(2);

        assert_eq!(rx.reserve_read(), &[4]);
        rx.commit_read(1);
        assert_eq!(rx.reserve_read(), &[5, 6]);
    }

    #[test]
    fn staged_writes_are_invisible_until_committed() {
        let (mut tx, mut rx) = channel::<u32>(8);
        tx.reserve_write()[0] = 10;
        assert!(rx.reserve_read().is_empty());
        tx.reserve_write()[1] = 11;
        tx.commit_write(2);
        assert_eq!(rx.reserve_read(), &[10, 11]);
    }

    #[test]
    fn partial_commit_keeps_rest_of_window() {
        let (mut tx, mut rx) = channel::<u32>(8);
        tx.reserve_write()[..4].copy_from_slice(&[1, 2, 3, 4]);
        tx.commit_write(4);
        assert_eq!(rx.reserve_read().len(), 4);
        rx.commit_read(1);
        assert_eq!(rx.reserved(), &[2, 3, 4]);
        rx.commit_read(3);
        assert!(rx.reserved().is_empty());
    }

    #[test]
    #[should_panic]
    fn over_commit_panics() {
        let (mut tx, _rx) = channel::<u32>(2);
        let _ = tx.reserve_write();
        tx.commit_write(3);
    }

    #[test]
    fn transfers_in_order_across_threads() {
        const N: u32 = 100_000;
        let (mut tx, mut rx) = channel::<u32>(64);

        let producer = thread::spawn(move || {
            let mut next = 0;
            while next < N {
                let w = tx.reserve_write();
                let n = w.len().min((N - next) as usize);
                for slot in &mut w[..n] {
                    *slot = next;
                    next += 1;
                }
                tx.commit_write(n);
                if n == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < N {
            let r = rx.reserve_read();
            let n = r.len();
            for &v in r {
                assert_eq!(v, expected);
                expected += 1;
            }
            rx.commit_read(n);
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
