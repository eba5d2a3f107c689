//! Mailbox error taxonomy

use core::fmt;

use super::buffer::MessageBuffer;

/// Mailbox engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// Channel id outside the channel table
    InvalidChannel,

    /// Write FIFO stayed full for the whole bounded retry window
    ///
    /// The coprocessor stopped draining requests. Not retried by the
    /// engine; retry policy belongs to the caller.
    HardwareBusy,

    /// Response arrived for a channel with nothing in flight
    ///
    /// Logged and discarded by the deferred pass, never handed to a caller.
    UnexpectedResponse,

    /// Engine is stopping or stopped
    ShuttingDown,

    /// Read FIFO has no word available
    Empty,

    /// Buffer is empty or cannot be addressed by the coprocessor
    InvalidBuffer,

    /// `start()` called while the engine is not stopped
    AlreadyRunning,
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::InvalidChannel => write!(f, "Invalid mailbox channel"),
            MailboxError::HardwareBusy => write!(f, "Mailbox write FIFO full (coprocessor unresponsive)"),
            MailboxError::UnexpectedResponse => write!(f, "Unexpected mailbox response"),
            MailboxError::ShuttingDown => write!(f, "Mailbox shutting down"),
            MailboxError::Empty => write!(f, "Mailbox read FIFO empty"),
            MailboxError::InvalidBuffer => write!(f, "Invalid message buffer"),
            MailboxError::AlreadyRunning => write!(f, "Mailbox already running"),
        }
    }
}

/// Rejected submission
///
/// The exchange never entered the channel table; the buffer goes back to
/// the caller untouched.
#[derive(Debug)]
pub struct SubmitError {
    pub error: MailboxError,
    pub buffer: MessageBuffer,
}

impl SubmitError {
    /// Recover the caller's buffer
    pub fn into_buffer(self) -> MessageBuffer {
        self.buffer
    }
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submit rejected: {}", self.error)
    }
}

/// Exchange that reached the Failed state
///
/// Carries the buffer back so the caller keeps ownership regardless of
/// how the exchange ended. Buffer contents are unspecified.
#[derive(Debug)]
pub struct ExchangeFailure {
    pub reason: MailboxError,
    pub buffer: MessageBuffer,
}

impl From<SubmitError> for ExchangeFailure {
    fn from(err: SubmitError) -> Self {
        Self {
            reason: err.error,
            buffer: err.buffer,
        }
    }
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exchange failed: {}", self.reason)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MailboxError::InvalidChannel.to_string(),
            "Invalid mailbox channel"
        );
        assert_eq!(
            MailboxError::ShuttingDown.to_string(),
            "Mailbox shutting down"
        );
    }

    #[test]
    fn test_submit_error_returns_buffer() {
        let buffer = MessageBuffer::from_bytes(&[1, 2, 3, 4]);
        let err = SubmitError {
            error: MailboxError::HardwareBusy,
            buffer,
        };
        assert_eq!(err.to_string(), "submit rejected: Mailbox write FIFO full (coprocessor unresponsive)");

        let failure = ExchangeFailure::from(err);
        assert_eq!(failure.reason, MailboxError::HardwareBusy);
        assert_eq!(failure.buffer.as_bytes(), &[1, 2, 3, 4]);
    }
}
