//! Typed errors crossing component boundaries
//!
//! Adapter and wiring code returns `eyre::Result`; the types here are the
//! ones callers match on: routing failures and the fatal reports that flow
//! over the shared error channel.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{ChainId, DepositNonce};

/// Capacity of the shared fatal-error channel
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("unknown destination chain {0}")]
    UnknownDestination(ChainId),

    #[error("a writer is already registered for chain {0}")]
    AlreadyRegistered(ChainId),
}

/// A chain component gave up. Reported exactly once per failing component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("chain {chain_id}: block retry limit reached while processing block {block}")]
    BlockRetryExhausted { chain_id: ChainId, block: u64 },

    #[error(
        "chain {chain_id}: vote for deposit {source_chain}/{deposit_nonce} failed after {attempts} attempts"
    )]
    VoteRetryExhausted {
        chain_id: ChainId,
        source_chain: ChainId,
        deposit_nonce: DepositNonce,
        attempts: u32,
    },

    #[error(
        "chain {chain_id}: execution of deposit {source_chain}/{deposit_nonce} failed after {attempts} attempts"
    )]
    ExecuteRetryExhausted {
        chain_id: ChainId,
        source_chain: ChainId,
        deposit_nonce: DepositNonce,
        attempts: u32,
    },
}

impl FatalError {
    /// The chain whose component stopped
    pub fn chain_id(&self) -> ChainId {
        match self {
            FatalError::BlockRetryExhausted { chain_id, .. }
            | FatalError::VoteRetryExhausted { chain_id, .. }
            | FatalError::ExecuteRetryExhausted { chain_id, .. } => *chain_id,
        }
    }
}

pub type ErrorSender = mpsc::Sender<FatalError>;
pub type ErrorReceiver = mpsc::Receiver<FatalError>;

/// Create the shared channel every listener and writer reports fatal errors on
pub fn error_channel() -> (ErrorSender, ErrorReceiver) {
    mpsc::channel(ERROR_CHANNEL_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_error_chain_id() {
        let err = FatalError::VoteRetryExhausted {
            chain_id: 1,
            source_chain: 2,
            deposit_nonce: 5,
            attempts: 10,
        };
        assert_eq!(err.chain_id(), 1);
        assert_eq!(
            err.to_string(),
            "chain 1: vote for deposit 2/5 failed after 10 attempts"
        );
    }

    #[test]
    fn test_router_error_display() {
        assert_eq!(
            RouterError::UnknownDestination(9).to_string(),
            "unknown destination chain 9"
        );
    }
}
