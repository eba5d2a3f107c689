//! Exchanges and completion handles
//!
//! An exchange is one request/response round trip on one channel. The
//! channel table owns the `PendingExchange` (and with it the caller's
//! buffer) until it finishes; the caller holds an `ExchangeHandle` that
//! observes the state and collects the outcome.
//!
//! ```text
//! Queued ──issue──▶ Issued ──response──▶ Completed
//!   │                  │
//!   └──────────────────┴──error/teardown──▶ Failed
//! ```
//!
//! Completed and Failed are terminal. The outcome is stored before the
//! terminal state is published, so a handle that sees a terminal state
//! always finds the outcome waiting.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

use super::buffer::MessageBuffer;
use super::error::{ExchangeFailure, MailboxError, SubmitError};
use super::videocore::{MailboxHardware, RawWord, RegisterInterface};

/// Exchange identifier, unique for the life of a channel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(pub u64);

/// Exchange lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExchangeState {
    /// Waiting behind the in-flight exchange of its channel
    Queued = 0,
    /// Address written to the mailbox, response pending
    Issued = 1,
    /// Response received, buffer holds the coprocessor's reply
    Completed = 2,
    /// Ended without a valid response
    Failed = 3,
}

impl ExchangeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExchangeState::Queued,
            1 => ExchangeState::Issued,
            2 => ExchangeState::Completed,
            _ => ExchangeState::Failed,
        }
    }

    /// Completed or Failed
    pub fn is_finished(self) -> bool {
        matches!(self, ExchangeState::Completed | ExchangeState::Failed)
    }
}

/// Outcome delivered to the submitter
pub type ExchangeResult = Result<MessageBuffer, ExchangeFailure>;

/// State shared between the table's exchange and the caller's handle
struct CompletionSlot {
    state: AtomicU8,
    outcome: Mutex<Option<ExchangeResult>>,
}

/// Exchange owned by the channel table
pub(crate) struct PendingExchange {
    id: ExchangeId,
    channel: u32,
    buffer: MessageBuffer,
    /// Bus address posted in the request word
    posted: u32,
    slot: Arc<CompletionSlot>,
}

impl PendingExchange {
    /// Create a Queued exchange and the caller's handle to it
    pub(crate) fn new(
        id: ExchangeId,
        channel: u32,
        buffer: MessageBuffer,
        posted: u32,
    ) -> (Self, ExchangeHandle) {
        let slot = Arc::new(CompletionSlot {
            state: AtomicU8::new(ExchangeState::Queued as u8),
            outcome: Mutex::new(None),
        });
        let handle = ExchangeHandle {
            id,
            channel,
            slot: Arc::clone(&slot),
        };
        (
            Self {
                id,
                channel,
                buffer,
                posted,
                slot,
            },
            handle,
        )
    }

    pub(crate) fn id(&self) -> ExchangeId {
        self.id
    }

    /// Does `word` answer this exchange?
    pub(crate) fn matches(&self, word: RawWord) -> bool {
        word.data() == self.posted
    }

    /// Post the request word and move to Issued
    ///
    /// On failure the exchange is untouched and still Queued.
    pub(crate) fn issue<H: MailboxHardware>(
        &self,
        regs: &RegisterInterface<H>,
    ) -> Result<(), MailboxError> {
        self.buffer.clean_dcache();
        regs.write_request(RawWord::pack(self.channel, self.posted))?;
        self.slot
            .state
            .store(ExchangeState::Issued as u8, Ordering::Release);
        Ok(())
    }

    /// Finish as Completed, handing the response buffer to the caller
    pub(crate) fn complete(self) {
        self.buffer.invalidate_dcache();
        self.finish(ExchangeState::Completed, Ok);
    }

    /// Finish as Failed with `reason`
    pub(crate) fn fail(self, reason: MailboxError) {
        self.finish(ExchangeState::Failed, |buffer| {
            Err(ExchangeFailure { reason, buffer })
        });
    }

    /// Abandon an exchange that was never accepted
    pub(crate) fn reject(self, error: MailboxError) -> SubmitError {
        SubmitError {
            error,
            buffer: self.buffer,
        }
    }

    fn finish(self, state: ExchangeState, outcome: impl FnOnce(MessageBuffer) -> ExchangeResult) {
        let Self { buffer, slot, .. } = self;
        *slot.outcome.lock() = Some(outcome(buffer));
        slot.state.store(state as u8, Ordering::Release);
    }
}

/// Caller's view of a submitted exchange
///
/// Dropping the handle abandons interest in the outcome; the exchange
/// still runs to completion and its buffer is freed then.
pub struct ExchangeHandle {
    id: ExchangeId,
    channel: u32,
    slot: Arc<CompletionSlot>,
}

impl ExchangeHandle {
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Current lifecycle state
    pub fn state(&self) -> ExchangeState {
        ExchangeState::from_u8(self.slot.state.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Take the outcome if the exchange has finished
    ///
    /// Gives the handle back if it has not.
    pub fn try_result(self) -> Result<ExchangeResult, ExchangeHandle> {
        if !self.is_finished() {
            return Err(self);
        }
        let outcome = self.slot.outcome.lock().take();
        match outcome {
            Some(result) => Ok(result),
            None => Err(self),
        }
    }

    /// Spin until the exchange finishes
    ///
    /// Something else must drive completions (the deferred pass on another
    /// core, or an interrupt). On a single core use `wait_with`.
    pub fn wait(self) -> ExchangeResult {
        self.wait_with(core::hint::spin_loop)
    }

    /// Wait, calling `idle` between polls
    pub fn wait_with(self, mut idle: impl FnMut()) -> ExchangeResult {
        let mut handle = self;
        loop {
            match handle.try_result() {
                Ok(result) => return result,
                Err(pending) => handle = pending,
            }
            idle();
        }
    }

    /// Poll at most `spins` times
    ///
    /// Gives the handle back if the exchange is still running; the
    /// exchange itself keeps going.
    pub fn wait_timeout(self, spins: u32) -> Result<ExchangeResult, ExchangeHandle> {
        let mut handle = self;
        for _ in 0..spins {
            match handle.try_result() {
                Ok(result) => return Ok(result),
                Err(pending) => handle = pending,
            }
            core::hint::spin_loop();
        }
        handle.try_result()
    }
}

impl core::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mailbox::sim::SimulatedMailbox;

    fn exchange(bytes: &[u8]) -> (PendingExchange, ExchangeHandle) {
        PendingExchange::new(ExchangeId(7), 2, MessageBuffer::from_bytes(bytes), 0x40)
    }

    #[test]
    fn test_new_exchange_is_queued() {
        let (_exchange, handle) = exchange(&[0; 4]);
        assert_eq!(handle.id(), ExchangeId(7));
        assert_eq!(handle.channel(), 2);
        assert_eq!(handle.state(), ExchangeState::Queued);
        assert!(!handle.is_finished());
    }

    #[test]
    fn test_issue_posts_word() {
        let regs = RegisterInterface::new(SimulatedMailbox::new(), 4);
        let (exchange, handle) = exchange(&[0; 4]);
        exchange.issue(&regs).unwrap();
        assert_eq!(handle.state(), ExchangeState::Issued);
        assert_eq!(regs.hardware().outstanding(2), 1);
    }

    #[test]
    fn test_failed_issue_stays_queued() {
        let regs = RegisterInterface::new(SimulatedMailbox::new(), 4);
        regs.hardware().set_write_stalled(true);
        let (exchange, handle) = exchange(&[0; 4]);
        assert_eq!(exchange.issue(&regs), Err(MailboxError::HardwareBusy));
        assert_eq!(handle.state(), ExchangeState::Queued);

        let err = exchange.reject(MailboxError::HardwareBusy);
        assert_eq!(err.buffer.len(), 4);
    }

    #[test]
    fn test_complete_delivers_buffer() {
        let (exchange, handle) = exchange(&[1, 2, 3]);
        assert!(exchange.matches(RawWord::pack(2, 0x40)));
        exchange.complete();

        assert_eq!(handle.state(), ExchangeState::Completed);
        let buffer = handle.wait().unwrap();
        assert_eq!(buffer.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_fail_delivers_reason_and_buffer() {
        let (exchange, handle) = exchange(&[9; 8]);
        exchange.fail(MailboxError::ShuttingDown);

        let failure = handle.wait().unwrap_err();
        assert_eq!(failure.reason, MailboxError::ShuttingDown);
        assert_eq!(failure.buffer.as_bytes(), &[9; 8]);
    }

    #[test]
    fn test_wait_timeout_returns_handle() {
        let (exchange, handle) = exchange(&[0; 4]);
        let handle = handle.wait_timeout(10).unwrap_err();
        assert_eq!(handle.state(), ExchangeState::Queued);

        exchange.complete();
        assert!(handle.wait_timeout(0).unwrap().is_ok());
    }

    #[test]
    fn test_wait_with_runs_idle_until_done() {
        let (exchange, handle) = exchange(&[0; 4]);
        let mut exchange = Some(exchange);
        let mut polls = 0;
        let result = handle.wait_with(|| {
            polls += 1;
            if polls == 3 {
                if let Some(e) = exchange.take() {
                    e.complete();
                }
            }
        });
        assert!(result.is_ok());
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_mismatched_word() {
        let (exchange, _handle) = exchange(&[0; 4]);
        assert!(!exchange.matches(RawWord::pack(2, 0x50)));
    }
}
