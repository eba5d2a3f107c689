//! Mailbox engine
//!
//! Ties the register interface, the channel table and the deferred queue
//! into one interrupt-driven driver.
//!
//! # Data Flow
//!
//! ```text
//! submit() ──▶ ChannelTable ──write──▶ mailbox 1 ──▶ VideoCore
//!                   ▲                                    │
//!                   │ complete()                         ▼
//!            run_deferred() ◀── DeferredQueue ◀── handle_interrupt()
//!                                                   (reads mailbox 0)
//! ```
//!
//! # Context Rules
//!
//! - `handle_interrupt` runs in interrupt context. It only reads mailbox 0
//!   and pushes to the lock-free queue; it never takes the table lock.
//! - `run_deferred` runs outside interrupt context (a bottom half, a
//!   polling loop, or a waiter) and is the only place responses reach the
//!   channel table.
//! - Mailbox 1 is only written under the table lock.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//! ```

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use super::buffer::MessageBuffer;
use super::channel::{ChannelSnapshot, ChannelTable};
use super::config::MailboxConfig;
use super::deferred::{DeferredQueue, WordBatch};
use super::error::{MailboxError, SubmitError};
use super::exchange::{ExchangeHandle, ExchangeResult};
use super::videocore::{MailboxHardware, RawWord, RegisterInterface};
use crate::println;
use crate::sync::Mutex;

/// Interrupt handler verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Mailbox had data for us
    Handled,
    /// Not ours (nothing pending, or handler already running)
    NotClaimed,
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStats {
    /// Exchanges finished as Completed
    pub completed: u64,
    /// Accepted exchanges finished as Failed
    pub failed: u64,
    /// Response words with no matching exchange in flight on their channel
    pub unexpected_responses: u32,
    /// Interrupts with no word to read
    pub spurious_interrupts: u32,
    /// Interrupts that found the deferred queue full
    pub overruns: u32,
    /// Batches handed from the interrupt handler to the deferred pass
    pub batches: u32,
}

/// Interrupt-driven mailbox driver
pub struct MailboxEngine<H> {
    regs: RegisterInterface<H>,
    table: Mutex<ChannelTable>,
    deferred: DeferredQueue,
    lifecycle: AtomicU8,
    /// Interrupt handler claim (single producer for `deferred`)
    isr_active: AtomicBool,
    /// Deferred pass claim (single consumer for `deferred`)
    dpc_active: AtomicBool,
    stale_drain_limit: usize,
    unexpected: AtomicU32,
    spurious: AtomicU32,
    overruns: AtomicU32,
    batches: AtomicU32,
}

impl<H: MailboxHardware> MailboxEngine<H> {
    /// Create a stopped engine over `hw`
    pub fn new(hw: H, config: &MailboxConfig) -> Self {
        Self {
            regs: RegisterInterface::new(hw, config.write_retry_limit),
            table: Mutex::new(ChannelTable::new()),
            deferred: DeferredQueue::new(),
            lifecycle: AtomicU8::new(LifecycleState::Stopped as u8),
            isr_active: AtomicBool::new(false),
            dpc_active: AtomicBool::new(false),
            stale_drain_limit: config.stale_drain_limit,
            unexpected: AtomicU32::new(0),
            spurious: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            batches: AtomicU32::new(0),
        }
    }

    /// Underlying hardware backend
    pub fn hardware(&self) -> &H {
        self.regs.hardware()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Bring the engine up
    ///
    /// Discards words left in mailbox 0 by the firmware or a previous
    /// owner, opens the channel table and unmasks the interrupt.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` unless the engine is Stopped.
    pub fn start(&self) -> Result<(), MailboxError> {
        // Held across the whole bring-up so no submission sees a half-open table
        let mut table = self.table.lock();

        if self
            .lifecycle
            .compare_exchange(
                LifecycleState::Stopped as u8,
                LifecycleState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(MailboxError::AlreadyRunning);
        }

        let stale = self.regs.drain_stale(self.stale_drain_limit);
        table.open();
        self.regs.set_interrupt_enabled(true);
        drop(table);

        if stale > 0 {
            println!("[MBOX] Discarded {} stale words", stale);
        }
        println!("[MBOX] Running");
        Ok(())
    }

    /// Tear the engine down
    ///
    /// Masks the interrupt, fails every in-flight and queued exchange with
    /// `ShuttingDown`, then waits for a running interrupt handler and
    /// deferred pass to finish. Safe to call repeatedly and concurrently:
    /// a second caller waits until the first caller's teardown is done, even
    /// if the engine has been started again by then.
    pub fn stop(&self) {
        match self.lifecycle.compare_exchange(
            LifecycleState::Running as u8,
            LifecycleState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(s) if s == LifecycleState::Stopping as u8 => {
                while self.state() == LifecycleState::Stopping {
                    core::hint::spin_loop();
                }
                return;
            }
            Err(_) => return,
        }

        // Under the IRQ-masking lock: the GIC lock is also taken on IRQ entry
        let failed = {
            let mut table = self.table.lock();
            self.regs.set_interrupt_enabled(false);
            table.drain_and_fail_all()
        };

        // Let a running handler finish, then claim the consumer side so
        // no deferred pass starts while leftover batches are discarded
        while self.isr_active.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        while self
            .dpc_active
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        let mut discarded = 0;
        // SAFETY: dpc_active claimed above, we are the only consumer
        while let Some(batch) = unsafe { self.deferred.pop() } {
            discarded += batch.len();
        }
        self.dpc_active.store(false, Ordering::Release);

        self.lifecycle
            .store(LifecycleState::Stopped as u8, Ordering::Release);
        println!(
            "[MBOX] Stopped ({} exchanges failed, {} words discarded)",
            failed, discarded
        );
    }

    /// Submit `buffer` on `channel`
    ///
    /// Returns once the exchange is issued or queued; use the handle to
    /// collect the response.
    ///
    /// # Errors
    ///
    /// See [`ChannelTable::submit`]. A stopped engine reports `ShuttingDown`.
    pub fn submit(
        &self,
        channel: u32,
        buffer: MessageBuffer,
    ) -> Result<ExchangeHandle, SubmitError> {
        self.table.lock().submit(&self.regs, channel, buffer)
    }

    /// Submit and wait for the outcome
    ///
    /// Drives the deferred pass while waiting so the call also completes
    /// on a single core with the interrupt routed but no separate bottom
    /// half.
    pub fn call(&self, channel: u32, buffer: MessageBuffer) -> ExchangeResult {
        let handle = self.submit(channel, buffer)?;
        handle.wait_with(|| {
            self.run_deferred();
            core::hint::spin_loop();
        })
    }

    /// Mailbox interrupt handler
    ///
    /// Moves up to one batch of words from mailbox 0 into the deferred
    /// queue. Never blocks and never touches the channel table. Re-entry
    /// (another core taking the same line) is refused with `NotClaimed`.
    pub fn handle_interrupt(&self) -> IrqReturn {
        if self.isr_active.swap(true, Ordering::Acquire) {
            return IrqReturn::NotClaimed;
        }
        let ret = self.drain_fifo();
        self.isr_active.store(false, Ordering::Release);
        ret
    }

    fn drain_fifo(&self) -> IrqReturn {
        if self.deferred.is_full() {
            // Words stay in the FIFO; the line re-asserts once the deferred
            // pass makes room
            if self.regs.status().read_available {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                return IrqReturn::Handled;
            }
            self.spurious.fetch_add(1, Ordering::Relaxed);
            return IrqReturn::NotClaimed;
        }

        let mut batch = WordBatch::new();
        while !batch.is_full() {
            match self.regs.read_response() {
                Ok(word) => {
                    batch.push(word);
                }
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            return IrqReturn::NotClaimed;
        }

        // SAFETY: isr_active makes this the only producer
        if unsafe { self.deferred.push(batch) }.is_err() {
            // Unreachable with a single producer, but the words are gone
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        IrqReturn::Handled
    }

    /// Deferred completion pass
    ///
    /// Resolves every queued response against the channel table. Runs at
    /// most once at a time; a caller that finds another pass active
    /// returns immediately and leaves the work to it. Returns the number
    /// of words processed by this call.
    pub fn run_deferred(&self) -> usize {
        let mut processed = 0;

        loop {
            if self
                .dpc_active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return processed;
            }

            // SAFETY: dpc_active makes this the only consumer
            while let Some(batch) = unsafe { self.deferred.pop() } {
                self.batches.fetch_add(1, Ordering::Relaxed);
                for word in batch.iter() {
                    self.resolve(word);
                    processed += 1;
                }
            }

            self.dpc_active.store(false, Ordering::Release);

            // A batch pushed after the last pop but before the release
            // would otherwise wait for the next interrupt
            if self.deferred.is_empty() {
                return processed;
            }
        }
    }

    fn resolve(&self, word: RawWord) {
        let channel = word.channel();
        let result = self.table.lock().complete(&self.regs, channel, word);

        match result {
            Ok(_) => {}
            Err(MailboxError::UnexpectedResponse) => {
                self.unexpected.fetch_add(1, Ordering::Relaxed);
                println!(
                    "[MBOX] Unexpected response {:#010x} on channel {}, discarded",
                    word.value(),
                    channel
                );
            }
            Err(MailboxError::ShuttingDown) => {
                println!(
                    "[MBOX] Response {:#010x} on channel {} after shutdown, discarded",
                    word.value(),
                    channel
                );
            }
            Err(e) => {
                println!("[MBOX] Channel {}: {}", channel, e);
            }
        }
    }

    /// True while responses wait for the deferred pass
    pub fn deferred_pending(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// State of `channel`, `None` if out of range
    pub fn channel_snapshot(&self, channel: u32) -> Option<ChannelSnapshot> {
        self.table.lock().snapshot(channel)
    }

    pub fn stats(&self) -> MailboxStats {
        let (completed, failed) = {
            let table = self.table.lock();
            (table.completed(), table.failed())
        };
        MailboxStats {
            completed,
            failed,
            unexpected_responses: self.unexpected.load(Ordering::Relaxed),
            spurious_interrupts: self.spurious.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
