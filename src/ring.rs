//! Lock-free single-producer/single-consumer ring of fixed-size slots.
//!
//! The ring is split into a [`Producer`] and a [`Consumer`] half that share one
//! allocation made up front. Neither half ever blocks or allocates after
//! construction, which makes both safe to use from the audio callback.
//!
//! Indices grow monotonically and are wrapped with a bitmask, so the capacity
//! must be a power of two. Full and empty are detected purely by comparing the
//! two indices: the ring is empty when they are equal and full when they are
//! exactly `capacity` apart.
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Errors raised while constructing a ring.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Capacity was zero or not a power of two.
    #[error("ring capacity {0} must be a non-zero power of two")]
    InvalidCapacity(usize),
}

/// Index padded to its own cache line so producer and consumer do not
/// false-share.
#[repr(C, align(64))]
struct PaddedIndex(AtomicUsize);

struct RingShared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    write_index: PaddedIndex,
    read_index: PaddedIndex,
}

// Slots are only touched by the side that currently owns them according to the
// index protocol; the halves are the only handles into the storage.
unsafe impl<T: Send> Send for RingShared<T> {}
unsafe impl<T: Send> Sync for RingShared<T> {}

impl<T> RingShared<T> {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn len(&self) -> usize {
        let write = self.write_index.0.load(Ordering::Acquire);
        let read = self.read_index.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<T> Drop for RingShared<T> {
    fn drop(&mut self) {
        let write = *self.write_index.0.get_mut();
        let mut read = *self.read_index.0.get_mut();
        while read != write {
            let slot = &mut self.slots[read & self.mask];
            unsafe { slot.get_mut().assume_init_drop() };
            read = read.wrapping_add(1);
        }
    }
}

/// Writing half of a ring. Exactly one thread may own it at a time.
pub struct Producer<T> {
    shared: Arc<RingShared<T>>,
}

/// Reading half of a ring. Exactly one thread may own it at a time.
pub struct Consumer<T> {
    shared: Arc<RingShared<T>>,
}

/// Create a ring holding up to `capacity` elements.
pub fn ring<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), RingError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(RingError::InvalidCapacity(capacity));
    }
    let slots = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(RingShared {
        slots,
        mask: capacity - 1,
        write_index: PaddedIndex(AtomicUsize::new(0)),
        read_index: PaddedIndex(AtomicUsize::new(0)),
    });
    Ok((
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    ))
}

impl<T> Producer<T> {
    /// Push a value, handing it back if the ring is full.
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        // Only this half stores the write index.
        let write = shared.write_index.0.load(Ordering::Relaxed);
        let read = shared.read_index.0.load(Ordering::Acquire);
        if write.wrapping_sub(read) == shared.capacity() {
            return Err(value);
        }
        let slot = &shared.slots[write & shared.mask];
        unsafe { (*slot.get()).write(value) };
        shared
            .write_index
            .0
            .store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Push a value, returning `false` (and dropping the value) when full.
    pub fn push(&mut self, value: T) -> bool {
        self.try_push(value).is_ok()
    }

    /// Slots currently free for writing.
    pub fn free_slots(&self) -> usize {
        self.shared.capacity() - self.shared.len()
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl<T> Consumer<T> {
    /// Pop the oldest value, if any.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read_index.0.load(Ordering::Relaxed);
        let write = shared.write_index.0.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let slot = &shared.slots[read & shared.mask];
        let value = unsafe { (*slot.get()).assume_init_read() };
        shared
            .read_index
            .0
            .store(read.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Elements ready for reading.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slot count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn rejects_non_power_of_two() {
        assert_eq!(
            ring::<u32>(0).err(),
            Some(RingError::InvalidCapacity(0))
        );
        assert_eq!(
            ring::<u32>(100).err(),
            Some(RingError::InvalidCapacity(100))
        );
        assert!(ring::<u32>(128).is_ok());
    }

    #[test]
    fn wraps_many_times() {
        let (mut tx, mut rx) = ring::<usize>(4).unwrap();
        for round in 0..1_000usize {
            assert!(tx.push(round));
            assert!(tx.push(round + 1));
            assert_eq!(rx.pop(), Some(round));
            assert_eq!(rx.pop(), Some(round + 1));
            assert!(rx.is_empty());
        }
        assert_eq!(tx.free_slots(), 4);
    }

    #[test]
    fn pending_values_are_dropped_with_the_ring() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tx, mut rx) = ring::<Tracked>(8).unwrap();
        for _ in 0..5 {
            assert!(tx.push(Tracked));
        }
        drop(rx.pop());
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
        drop(tx);
        drop(rx);
        assert_eq!(DROPS.load(Ordering::SeqCst), 5);
    }
}
