//! Retry budgets and error classification
//!
//! Listeners and writers retry at a fixed interval against a fixed budget.
//! The budget is a plain value so exhaustion and reset can be tested without
//! running a loop.

use std::time::Duration;

/// Default listener budget per block
pub const BLOCK_RETRY_LIMIT: u32 = 5;
/// Default pause between listener retries
pub const BLOCK_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Default writer budget per transaction
pub const TX_RETRY_LIMIT: u32 = 10;
/// Default pause between writer retries
pub const TX_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: u32,
    remaining: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, interval: Duration) -> Self {
        Self {
            limit,
            remaining: limit,
            interval,
        }
    }

    /// Default listener budget
    pub fn blocks() -> Self {
        Self::new(BLOCK_RETRY_LIMIT, BLOCK_RETRY_INTERVAL)
    }

    /// Default writer budget
    pub fn transactions() -> Self {
        Self::new(TX_RETRY_LIMIT, TX_RETRY_INTERVAL)
    }

    /// Use up one attempt. Returns false when nothing was left to use.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Restore the full budget
    pub fn reset(&mut self) {
        self.remaining = self.limit;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Replacement transaction underpriced
    Underpriced,
    /// Nonce already used, usually by our own previous submission
    NonceTooLow,
    /// Nonce ahead of the chain, pending transactions must clear
    NonceTooHigh,
    /// Contract rejected the call (revert, bad params, out of funds)
    Permanent,
    /// Anything else
    Unknown,
}

impl ErrorClass {
    /// Races between our own submissions. Expected under load, resolved by
    /// refreshing the nonce/fee and trying again.
    pub fn is_benign_race(&self) -> bool {
        matches!(self, ErrorClass::NonceTooLow | ErrorClass::Underpriced)
    }
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Nonce and gas errors first: node messages for these often also mention
    // "transaction" or "network", which would otherwise read as transient.
    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
