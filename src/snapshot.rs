//! Latest-value handoff from one writer thread to one reader thread.
//!
//! Three buffers rotate between the writer, the reader and a shared middle
//! slot. The writer fills its back buffer in place and swaps it into the
//! middle; the reader swaps the middle out when it carries a fresh value.
//! Neither side ever waits for the other, and a slow reader only ever misses
//! intermediate values, never the newest one.
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const INDEX_MASK: u8 = 0b11;
const FRESH: u8 = 0b100;

struct SnapshotShared<T> {
    slots: [UnsafeCell<T>; 3],
    middle: AtomicU8,
}

// Each slot index is held by exactly one of writer, reader or middle at any
// time, and ownership only changes through the `middle` swap.
unsafe impl<T: Send> Send for SnapshotShared<T> {}
unsafe impl<T: Send> Sync for SnapshotShared<T> {}

/// Writing half. Exactly one thread may own it at a time.
pub struct SnapshotWriter<T> {
    shared: Arc<SnapshotShared<T>>,
    back: u8,
}

/// Reading half. Exactly one thread may own it at a time.
pub struct SnapshotReader<T> {
    shared: Arc<SnapshotShared<T>>,
    front: u8,
}

/// Create a snapshot cell whose three buffers are built by `make`.
///
/// Building each buffer separately lets callers reserve capacity up front so
/// the writer can refill in place without allocating.
pub fn snapshot<T>(mut make: impl FnMut() -> T) -> (SnapshotWriter<T>, SnapshotReader<T>) {
    let shared = Arc::new(SnapshotShared {
        slots: [
            UnsafeCell::new(make()),
            UnsafeCell::new(make()),
            UnsafeCell::new(make()),
        ],
        middle: AtomicU8::new(1),
    });
    (
        SnapshotWriter {
            shared: Arc::clone(&shared),
            back: 0,
        },
        SnapshotReader { shared, front: 2 },
    )
}

impl<T> SnapshotWriter<T> {
    /// The back buffer. It holds an older value and must be overwritten
    /// completely before [`publish`](Self::publish).
    pub fn back_mut(&mut self) -> &mut T {
        unsafe { &mut *self.shared.slots[self.back as usize].get() }
    }

    /// Hand the back buffer to the reader as the newest value.
    pub fn publish(&mut self) {
        let previous = self.shared.middle.swap(self.back | FRESH, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
    }
}

impl<T> SnapshotReader<T> {
    /// Whether a value newer than the last [`read`](Self::read) is waiting.
    pub fn has_update(&self) -> bool {
        self.shared.middle.load(Ordering::Relaxed) & FRESH != 0
    }

    /// Newest published value, or the value from the previous read when the
    /// writer has published nothing since.
    pub fn read(&mut self) -> &T {
        if self.has_update() {
            let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
            self.front = previous & INDEX_MASK;
        }
        unsafe { &*self.shared.slots[self.front as usize].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sees_only_the_newest_value() {
        let (mut writer, mut reader) = snapshot(|| 0u64);
        assert_eq!(*reader.read(), 0);
        for value in 1..=5 {
            *writer.back_mut() = value;
            writer.publish();
        }
        assert!(reader.has_update());
        assert_eq!(*reader.read(), 5);
        assert!(!reader.has_update());
        assert_eq!(*reader.read(), 5);

        *writer.back_mut() = 6;
        writer.publish();
        assert_eq!(*reader.read(), 6);
    }

    #[test]
    fn buffers_keep_reserved_capacity() {
        let (mut writer, mut reader) = snapshot(|| Vec::<u32>::with_capacity(8));
        for round in 0..10u32 {
            let back = writer.back_mut();
            back.clear();
            back.extend(0..=round % 8);
            assert!(back.capacity() >= 8);
            writer.publish();
            assert_eq!(reader.read().last(), Some(&(round % 8)));
        }
    }

    #[test]
    fn values_are_never_torn_across_threads() {
        let (mut writer, mut reader) = snapshot(|| [0u64; 16]);
        let handle = std::thread::spawn(move || {
            for value in 1..=50_000u64 {
                *writer.back_mut() = [value; 16];
                writer.publish();
            }
        });
        let mut last = 0;
        while last < 50_000 {
            let frame = *reader.read();
            assert!(frame.iter().all(|&v| v == frame[0]), "torn frame {frame:?}");
            assert!(frame[0] >= last, "went backwards");
            last = frame[0];
        }
        handle.join().unwrap();
    }
}
