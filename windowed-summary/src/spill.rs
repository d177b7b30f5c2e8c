//! Lock-free storage for observations diverted while a snapshot is in flight.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{mem, slice};

use crossbeam_epoch::{pin as epoch_pin, Atomic, Guard, Owned, Shared};

// Small enough that an idle queue stays cheap, large enough that a burst of
// diverted observers doesn't allocate per value.  Must not exceed the bit
// width of the ready bitmap on 32-bit targets.
const BLOCK_CAP: usize = 32;

// A fixed-size chunk of values with a write cursor and a ready bitmap.  The
// cursor claims slots; the bitmap publishes them, so a reader never sees a
// slot whose value hasn't landed yet.
struct Block {
    write: AtomicUsize,
    ready: AtomicUsize,
    slots: [UnsafeCell<f64>; BLOCK_CAP],
    // The block that filled up before this one.
    prev: Atomic<Block>,
}

impl Block {
    fn new() -> Block {
        Block {
            write: AtomicUsize::new(0),
            ready: AtomicUsize::new(0),
            slots: unsafe { mem::zeroed() },
            prev: Atomic::null(),
        }
    }

    // Number of published values, counted as the contiguous prefix of set
    // ready bits.
    fn len(&self) -> usize {
        self.ready.load(Ordering::Acquire).trailing_ones() as usize
    }

    fn values(&self) -> &[f64] {
        let len = self.len();
        unsafe { slice::from_raw_parts(self.slots[0].get() as *const f64, len) }
    }

    fn link_prev(&self, prev: Shared<'_, Block>, guard: &Guard) {
        let _ = self.prev.compare_exchange(
            Shared::null(),
            prev,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        );
    }

    // Returns the value back if this block is already full.
    fn push(&self, value: f64) -> Result<(), f64> {
        let index = self.write.fetch_add(1, Ordering::AcqRel);
        if index >= BLOCK_CAP {
            return Err(value);
        }

        unsafe {
            self.slots[index].get().write(value);
        }
        self.ready.fetch_or(1 << index, Ordering::AcqRel);

        Ok(())
    }
}

unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Drop for Block {
    fn drop(&mut self) {
        let guard = &epoch_pin();
        let prev = self.prev.swap(Shared::null(), Ordering::AcqRel, guard);
        if !prev.is_null() {
            unsafe {
                guard.defer_destroy(prev);
            }
            guard.flush();
        }
    }
}

/// A multi-producer, append-only value queue.
///
/// Writers push concurrently and never block.  The queue is drained
/// wholesale; `drain` must only run while no push is in progress, which the
/// observation buffer's collect protocol guarantees (it waits for every
/// diverted observer before draining).  The published length is tracked
/// separately to make that wait cheap.
pub(crate) struct SpillQueue {
    tail: Atomic<Block>,
    len: AtomicUsize,
}

impl SpillQueue {
    pub(crate) fn new() -> SpillQueue {
        SpillQueue { tail: Atomic::null(), len: AtomicUsize::new(0) }
    }

    /// Number of values pushed and published since the last drain.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Appends a value, allocating a fresh block if the current one is full.
    pub(crate) fn push(&self, value: f64) {
        loop {
            let guard = &epoch_pin();
            let mut tail = self.tail.load(Ordering::Acquire, guard);
            if tail.is_null() {
                match self.tail.compare_exchange(
                    Shared::null(),
                    Owned::new(Block::new()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                ) {
                    // We won the race to install the first block.
                    Ok(ptr) => tail = ptr,
                    // Somebody else beat us to it.
                    Err(e) => tail = e.current,
                }
            }

            let block = unsafe { tail.deref() };
            match block.push(value) {
                Ok(()) => {
                    self.len.fetch_add(1, Ordering::Release);
                    return;
                }
                Err(_) => {
                    // The block was full; try to install a successor, then
                    // retry from the top against whichever block won.
                    if let Ok(ptr) = self.tail.compare_exchange(
                        tail,
                        Owned::new(Block::new()),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        guard,
                    ) {
                        let new_block = unsafe { ptr.deref() };
                        new_block.link_prev(tail, guard);
                    }
                }
            }
        }
    }

    /// Takes every value out of the queue.
    ///
    /// Values come back newest block first, original order within a block;
    /// callers that replay them do not depend on ordering.
    pub(crate) fn drain(&self) -> Vec<f64> {
        let guard = &epoch_pin();
        let head = self.tail.swap(Shared::null(), Ordering::AcqRel, guard);
        if head.is_null() {
            return Vec::new();
        }
        self.len.store(0, Ordering::Release);

        let mut values = Vec::new();
        let mut node = head;
        while !node.is_null() {
            let block = unsafe { node.deref() };
            values.extend_from_slice(block.values());
            node = block.prev.load(Ordering::Acquire, guard);
        }

        // Destroying the head cascades through the prev chain.
        unsafe {
            guard.defer_destroy(head);
        }
        guard.flush();

        values
    }
}

impl Drop for SpillQueue {
    fn drop(&mut self) {
        let guard = &epoch_pin();
        let head = self.tail.swap(Shared::null(), Ordering::AcqRel, guard);
        if !head.is_null() {
            unsafe {
                guard.defer_destroy(head);
            }
            guard.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_utils::thread::scope;

    use super::{SpillQueue, BLOCK_CAP};

    #[test]
    fn fresh_queue_is_empty() {
        let queue = SpillQueue::new();
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn push_then_drain() {
        let queue = SpillQueue::new();
        queue.push(42.0);
        assert_eq!(queue.len(), 1);

        let values = queue.drain();
        assert_eq!(values, vec![42.0]);
        assert_eq!(queue.len(), 0);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn drain_spans_multiple_blocks() {
        let queue = SpillQueue::new();
        let target = BLOCK_CAP * 3 + BLOCK_CAP / 2;
        let mut total = 0.0;
        for i in 0..target {
            queue.push(i as f64);
            total += i as f64;
        }

        assert_eq!(queue.len(), target);
        let values = queue.drain();
        assert_eq!(values.len(), target);
        assert_eq!(values.iter().sum::<f64>(), total);
    }

    #[test]
    fn concurrent_pushes_conserve_every_value() {
        let queue = SpillQueue::new();

        let pushed = scope(|s| {
            let handles: Vec<_> = (0..4usize)
                .map(|t| {
                    let queue = &queue;
                    s.spawn(move |_| {
                        let mut total = 0.0;
                        for i in 0..(BLOCK_CAP * 50) {
                            let value = (t * 100_000 + i) as f64;
                            queue.push(value);
                            total += value;
                        }
                        total
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum::<f64>()
        })
        .unwrap();

        assert_eq!(queue.len(), BLOCK_CAP * 50 * 4);
        let values = queue.drain();
        assert_eq!(values.len(), BLOCK_CAP * 50 * 4);
        assert_eq!(values.iter().sum::<f64>(), pushed);
    }
}
