//! Simulated VideoCore mailbox for host tests
//!
//! Behaves like the coprocessor end of the FIFOs: posted words are held
//! until a test answers them, answers write into the posted buffer
//! through its address and push the same word back into the read FIFO.
//!
//! Bus addresses are opaque tokens rather than real addresses so the
//! model works on any host pointer width.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::vec::Vec;

use super::buffer::MessageBuffer;
use super::videocore::{CHANNEL_MASK, MailboxHardware, RawWord, STATUS_READ_EMPTY, STATUS_WRITE_FULL};

/// Coprocessor model
pub(crate) struct SimulatedMailbox {
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    /// VideoCore → ARM words not yet read
    read_fifo: VecDeque<u32>,
    /// ARM → VideoCore words not yet answered, in posting order
    posted: VecDeque<RawWord>,
    /// Unanswered requests per hardware channel
    outstanding: [usize; 16],
    /// Highest `outstanding` value ever seen on any channel
    max_outstanding: usize,
    write_stalled: bool,
    irq_enabled: bool,
    writes: usize,
    write_status_reads: usize,
    /// Buffers that have been handed a bus token: (address, length)
    regions: Vec<(usize, usize)>,
}

impl SimulatedMailbox {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the model from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push an arbitrary word into the read FIFO
    pub(crate) fn inject(&self, word: u32) {
        self.state().read_fifo.push_back(word);
    }

    /// Keep the write FIFO reporting FULL
    pub(crate) fn set_write_stalled(&self, stalled: bool) {
        self.state().write_stalled = stalled;
    }

    pub(crate) fn irq_enabled(&self) -> bool {
        self.state().irq_enabled
    }

    /// Words accepted by the write FIFO so far
    pub(crate) fn writes(&self) -> usize {
        self.state().writes
    }

    /// Times the write status register was polled
    pub(crate) fn write_status_reads(&self) -> usize {
        self.state().write_status_reads
    }

    /// Unanswered requests on `channel`
    pub(crate) fn outstanding(&self, channel: u32) -> usize {
        self.state().outstanding[(channel & CHANNEL_MASK) as usize]
    }

    /// Worst per-channel overlap seen since creation
    pub(crate) fn max_outstanding(&self) -> usize {
        self.state().max_outstanding
    }

    /// Words sitting in the read FIFO
    pub(crate) fn pending_reads(&self) -> usize {
        self.state().read_fifo.len()
    }

    /// Answer the oldest unanswered request on `channel`
    ///
    /// `fill` receives the request buffer and rewrites it as the response.
    /// Returns false if nothing is posted on that channel.
    pub(crate) fn respond(&self, channel: u32, fill: impl FnOnce(&mut [u8])) -> bool {
        let mut state = self.state();
        let Some(pos) = state.posted.iter().position(|w| w.channel() == channel) else {
            return false;
        };
        let Some(word) = state.posted.remove(pos) else {
            return false;
        };
        Self::answer(&mut state, word, fill);
        true
    }

    /// Answer the oldest unanswered request on any channel
    ///
    /// Returns the channel answered.
    pub(crate) fn respond_next(&self, fill: impl FnOnce(&mut [u8])) -> Option<u32> {
        let mut state = self.state();
        let word = state.posted.pop_front()?;
        Self::answer(&mut state, word, fill);
        Some(word.channel())
    }

    fn answer(state: &mut SimState, word: RawWord, fill: impl FnOnce(&mut [u8])) {
        let index = (word.data() >> 4) as usize;
        if let Some(&(addr, len)) = index.checked_sub(1).and_then(|i| state.regions.get(i)) {
            // SAFETY: The engine keeps the buffer alive and untouched while
            // the exchange is Issued, which is the only time it is posted
            let bytes = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len) };
            fill(bytes);
        }
        state.outstanding[word.channel() as usize] -= 1;
        state.read_fifo.push_back(word.value());
    }
}

impl MailboxHardware for SimulatedMailbox {
    fn read_status(&self) -> u32 {
        if self.state().read_fifo.is_empty() {
            STATUS_READ_EMPTY
        } else {
            0
        }
    }

    fn read_data(&self) -> u32 {
        // Hardware returns the last value on an empty read; zero is close enough
        self.state().read_fifo.pop_front().unwrap_or(0)
    }

    fn write_status(&self) -> u32 {
        let mut state = self.state();
        state.write_status_reads += 1;
        if state.write_stalled { STATUS_WRITE_FULL } else { 0 }
    }

    fn write_data(&self, value: u32) {
        let mut state = self.state();
        let word = RawWord::new(value);
        let channel = word.channel() as usize;
        state.outstanding[channel] += 1;
        state.max_outstanding = state.max_outstanding.max(state.outstanding[channel]);
        state.writes += 1;
        state.posted.push_back(word);
    }

    fn set_interrupt_enabled(&self, enabled: bool) {
        self.state().irq_enabled = enabled;
    }

    fn bus_address(&self, buffer: &MessageBuffer) -> Option<u32> {
        let mut state = self.state();
        let addr = buffer.as_ptr() as usize;
        let index = match state.regions.iter().position(|&(a, _)| a == addr) {
            Some(i) => {
                state.regions[i].1 = buffer.len();
                i
            }
            None => {
                state.regions.push((addr, buffer.len()));
                state.regions.len() - 1
            }
        };
        Some(((index + 1) as u32) << 4)
    }
}
