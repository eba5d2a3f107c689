//! Channel table
//!
//! The VideoCore answers requests on a channel strictly in order and has
//! no way to tag which request a response belongs to, so each channel
//! carries at most one exchange at a time. Later submissions wait in a
//! per-channel FIFO and are issued as the one ahead of them completes.
//!
//! ```text
//! channel 1:  inflight ─▶ [#4 Issued]     waiters ─▶ [#5] [#7]
//! channel 2:  inflight ─▶ (none)          waiters ─▶ (empty)
//! channel 8:  inflight ─▶ [#6 Issued]     waiters ─▶ (empty)
//! ```
//!
//! An idle channel never has waiters: every path that empties `inflight`
//! immediately promotes the next waiter or fails it.
//!
//! The table is not thread-safe by itself; the engine keeps it behind the
//! IRQ-masking mutex and every write to mailbox 1 happens under that lock.

use alloc::collections::VecDeque;

use super::buffer::MessageBuffer;
use super::error::{MailboxError, SubmitError};
use super::exchange::{ExchangeHandle, ExchangeId, PendingExchange};
use super::videocore::{CHANNEL_MASK, MailboxHardware, RawWord, RegisterInterface};
use crate::println;

/// Channels in the table
///
/// The hardware channel field is 4 bits wide. `submit` rejects channels
/// 10..=15 with `InvalidChannel`; a response word on one of them is dropped
/// by `complete` as `UnexpectedResponse`.
pub const MAX_CHANNELS: usize = 10;

/// Firmware mailbox channels
/// Source: <https://github.com/raspberrypi/firmware/wiki/Mailboxes>
pub mod channels {
    pub const POWER: u32 = 0;
    pub const FRAMEBUFFER: u32 = 1;
    pub const VIRTUAL_UART: u32 = 2;
    pub const VCHIQ: u32 = 3;
    pub const LEDS: u32 = 4;
    pub const BUTTONS: u32 = 5;
    pub const TOUCHSCREEN: u32 = 6;
    pub const PROPERTY_ARM_TO_VC: u32 = 8;
    pub const PROPERTY_VC_TO_ARM: u32 = 9;
}

/// Observable state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSnapshot {
    /// Exchange currently owning the hardware channel
    pub inflight: Option<ExchangeId>,
    /// Exchanges waiting behind it
    pub queued: usize,
}

struct Channel {
    inflight: Option<PendingExchange>,
    waiters: VecDeque<PendingExchange>,
}

impl Channel {
    const fn new() -> Self {
        Self {
            inflight: None,
            waiters: VecDeque::new(),
        }
    }
}

/// Per-channel dispatch state
pub struct ChannelTable {
    channels: [Channel; MAX_CHANNELS],
    accepting: bool,
    next_id: u64,
    completed: u64,
    failed: u64,
}

fn channel_index(channel: u32) -> Option<usize> {
    let index = channel as usize;
    (index < MAX_CHANNELS).then_some(index)
}

impl ChannelTable {
    /// Create a closed table; `open` before submitting
    pub const fn new() -> Self {
        Self {
            channels: [const { Channel::new() }; MAX_CHANNELS],
            accepting: false,
            next_id: 0,
            completed: 0,
            failed: 0,
        }
    }

    /// Start accepting submissions
    pub fn open(&mut self) {
        self.accepting = true;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Submit `buffer` on `channel`
    ///
    /// Issues immediately if the channel is idle, otherwise queues behind
    /// the in-flight exchange.
    ///
    /// # Errors
    ///
    /// - `InvalidChannel` if `channel >= MAX_CHANNELS`
    /// - `ShuttingDown` if the table is closed
    /// - `InvalidBuffer` if the buffer is empty or the coprocessor cannot
    ///   address it
    /// - `HardwareBusy` if the channel was idle and the write FIFO never
    ///   drained
    ///
    /// On error the table is unchanged and the buffer comes back in the
    /// `SubmitError`.
    pub fn submit<H: MailboxHardware>(
        &mut self,
        regs: &RegisterInterface<H>,
        channel: u32,
        buffer: MessageBuffer,
    ) -> Result<ExchangeHandle, SubmitError> {
        let reject = |error, buffer| Err(SubmitError { error, buffer });

        let Some(index) = channel_index(channel) else {
            return reject(MailboxError::InvalidChannel, buffer);
        };
        if !self.accepting {
            return reject(MailboxError::ShuttingDown, buffer);
        }
        if buffer.is_empty() {
            return reject(MailboxError::InvalidBuffer, buffer);
        }
        let bus_addr = regs.bus_address(&buffer);
        let posted = match bus_addr {
            Some(addr) if addr & CHANNEL_MASK == 0 => addr,
            _ => return reject(MailboxError::InvalidBuffer, buffer),
        };

        let id = ExchangeId(self.next_id);
        let (exchange, handle) = PendingExchange::new(id, channel, buffer, posted);
        let slot = &mut self.channels[index];

        if slot.inflight.is_none() {
            if let Err(error) = exchange.issue(regs) {
                return Err(exchange.reject(error));
            }
            slot.inflight = Some(exchange);
        } else {
            slot.waiters.push_back(exchange);
        }

        self.next_id += 1;
        Ok(handle)
    }

    /// Resolve a response word read from `channel`
    ///
    /// Completes the in-flight exchange and issues the next waiter.
    /// Returns the id of the exchange the word resolved.
    ///
    /// # Errors
    ///
    /// - `ShuttingDown` if the table is closed; the word is dropped
    /// - `UnexpectedResponse` if nothing is in flight on the channel, the
    ///   channel is outside the table, or the word carries a different
    ///   address than was posted; the word is dropped and the channel is
    ///   left as it was
    pub fn complete<H: MailboxHardware>(
        &mut self,
        regs: &RegisterInterface<H>,
        channel: u32,
        word: RawWord,
    ) -> Result<ExchangeId, MailboxError> {
        if !self.accepting {
            return Err(MailboxError::ShuttingDown);
        }
        let index = channel_index(channel).ok_or(MailboxError::UnexpectedResponse)?;

        // The coprocessor still owns the in-flight buffer until its own
        // answer arrives
        let slot = &mut self.channels[index].inflight;
        let exchange = match slot.take_if(|exchange| exchange.matches(word)) {
            Some(exchange) => exchange,
            None => return Err(MailboxError::UnexpectedResponse),
        };

        let id = exchange.id();
        exchange.complete();
        self.completed += 1;

        self.promote(regs, index);
        Ok(id)
    }

    /// Issue waiters on an idle channel until one sticks or none remain
    fn promote<H: MailboxHardware>(&mut self, regs: &RegisterInterface<H>, index: usize) {
        let channel = &mut self.channels[index];

        while channel.inflight.is_none() {
            let Some(next) = channel.waiters.pop_front() else {
                break;
            };
            match next.issue(regs) {
                Ok(()) => channel.inflight = Some(next),
                Err(e) => {
                    println!("[MBOX] channel {}: exchange {} not issued: {}", index, next.id().0, e);
                    next.fail(e);
                    self.failed += 1;
                }
            }
        }
    }

    /// Close the table and fail every exchange with `ShuttingDown`
    ///
    /// Returns the number of exchanges failed. Their handles observe the
    /// failure; nothing is left in flight or queued.
    pub fn drain_and_fail_all(&mut self) -> usize {
        self.accepting = false;

        let mut drained = 0;
        for channel in self.channels.iter_mut() {
            if let Some(exchange) = channel.inflight.take() {
                exchange.fail(MailboxError::ShuttingDown);
                drained += 1;
            }
            for exchange in channel.waiters.drain(..) {
                exchange.fail(MailboxError::ShuttingDown);
                drained += 1;
            }
        }
        self.failed += drained as u64;
        drained
    }

    /// State of `channel`, `None` if out of range
    pub fn snapshot(&self, channel: u32) -> Option<ChannelSnapshot> {
        let slot = &self.channels[channel_index(channel)?];
        Some(ChannelSnapshot {
            inflight: slot.inflight.as_ref().map(PendingExchange::id),
            queued: slot.waiters.len(),
        })
    }

    /// Exchanges issued and awaiting a response, across all channels
    pub fn inflight_count(&self) -> usize {
        self.channels.iter().filter(|c| c.inflight.is_some()).count()
    }

    /// Exchanges finished as Completed
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Exchanges finished as Failed after acceptance
    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
