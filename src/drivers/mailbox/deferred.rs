//! Interrupt-to-deferred handoff
//!
//! The interrupt handler drains the read FIFO into a `WordBatch` and pushes
//! it here; the deferred pass pops batches and resolves them against the
//! channel table. The ring is lock-free so the handler never waits on a
//! lock held by a submitter.
//!
//! ```text
//!            push (ISR)                 pop (deferred pass)
//!                │                              │
//!   ┌────┬────┬──▼─┬────┬────┬────┬────┬────┬──▼─┐
//!   │    │    │tail│    │    │    │    │    │head│
//!   └────┴────┴────┴────┴────┴────┴────┴────┴────┘
//! ```
//!
//! One slot is always left free to tell full from empty.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::videocore::RawWord;

/// Most words the handler moves per interrupt
pub const BATCH_CAPACITY: usize = 8;

/// Ring slots (must be power of 2)
pub const QUEUE_SLOTS: usize = 16;

/// Words read in one interrupt
#[derive(Debug, Clone, Copy)]
pub struct WordBatch {
    words: [u32; BATCH_CAPACITY],
    len: usize,
}

impl WordBatch {
    pub const fn new() -> Self {
        Self {
            words: [0; BATCH_CAPACITY],
            len: 0,
        }
    }

    /// Append a word; false if the batch is full
    pub fn push(&mut self, word: RawWord) -> bool {
        if self.is_full() {
            return false;
        }
        self.words[self.len] = word.value();
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == BATCH_CAPACITY
    }

    /// Words in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = RawWord> + '_ {
        self.words[..self.len].iter().map(|&w| RawWord::new(w))
    }
}

impl Default for WordBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-producer single-consumer ring of word batches
pub struct DeferredQueue {
    slots: [UnsafeCell<WordBatch>; QUEUE_SLOTS],
    /// Next slot to pop (consumer owned)
    head: AtomicUsize,
    /// Next slot to fill (producer owned)
    tail: AtomicUsize,
}

// SAFETY: A slot is written only by the producer while it lies between
// tail and head, and read only by the consumer after the producer's
// Release store of tail publishes it. The engine guarantees a single
// producer (interrupt handler claim) and a single consumer (deferred claim).
unsafe impl Sync for DeferredQueue {}

impl DeferredQueue {
    pub const fn new() -> Self {
        Self {
            slots: [const { UnsafeCell::new(WordBatch::new()) }; QUEUE_SLOTS],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Append a batch, giving it back if the ring is full
    ///
    /// # Safety
    ///
    /// Caller must be the only producer for the duration of the call.
    pub unsafe fn push(&self, batch: WordBatch) -> Result<(), WordBatch> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & (QUEUE_SLOTS - 1);

        if next == self.head.load(Ordering::Acquire) {
            return Err(batch);
        }

        // SAFETY: Slot `tail` is outside the consumer's window until the
        // store below publishes it
        unsafe { *self.slots[tail].get() = batch };
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Remove the oldest batch
    ///
    /// # Safety
    ///
    /// Caller must be the only consumer for the duration of the call.
    pub unsafe fn pop(&self) -> Option<WordBatch> {
        let head = self.head.load(Ordering::Relaxed);

        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: Acquire load of tail makes the producer's write visible,
        // and the producer will not reuse the slot until head moves past it
        let batch = unsafe { *self.slots[head].get() };
        self.head
            .store((head + 1) & (QUEUE_SLOTS - 1), Ordering::Release);
        Some(batch)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.len() == QUEUE_SLOTS - 1
    }

    /// Batches waiting
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & (QUEUE_SLOTS - 1)
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
