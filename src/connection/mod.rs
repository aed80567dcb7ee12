//! Chain adapter boundary
//!
//! Listeners and writers talk to a chain only through [`Connection`]. The
//! adapter owns RPC clients, contract bindings, the signer and the
//! nonce/fee state; the core never sees a native encoding.

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::MutexGuard;

use crate::proposal::{Proposal, ProposalKey, ProposalStatus};
use crate::types::{ChainId, DepositNonce, Message, ResourceId};

pub mod mock;

pub use mock::MockConnection;

/// Nonce and fee state used to sign the next transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOpts {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// Exclusive access to a chain's [`TxOpts`]. Dropping the guard unlocks.
pub type OptsGuard<'a> = MutexGuard<'a, TxOpts>;

/// A deposit decoded from a chain-native event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub source: ChainId,
    pub destination: ChainId,
    pub deposit_nonce: DepositNonce,
    pub resource_id: ResourceId,
    /// Big-endian amount bytes
    pub amount: Vec<u8>,
    pub recipient: Vec<u8>,
}

impl DepositEvent {
    pub fn into_message(self) -> Message {
        Message::fungible_transfer(
            self.source,
            self.destination,
            self.deposit_nonce,
            self.resource_id,
            self.amount,
            self.recipient,
        )
    }
}

/// Everything a listener and writer need from one chain
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Bridge-level id of this chain
    fn chain_id(&self) -> ChainId;

    /// The relayer's account on this chain, as a printable address
    fn relayer_address(&self) -> String;

    async fn connect(&self) -> Result<()>;

    async fn close(&self);

    /// Current chain head
    async fn latest_block(&self) -> Result<u64>;

    /// Highest block the chain itself considers final
    async fn finalized_block(&self) -> Result<u64>;

    /// Lock the nonce/fee state and refresh it from the chain. Held across
    /// build-and-submit; released by dropping the guard.
    async fn lock_and_update_opts<'a>(&'a self) -> Result<OptsGuard<'a>>;

    /// Deposits emitted in exactly one block
    async fn deposit_events(&self, block: u64) -> Result<Vec<DepositEvent>>;

    async fn proposal_status(&self, key: &ProposalKey) -> Result<ProposalStatus>;

    /// Whether this relayer already voted on `key`
    async fn has_voted(&self, key: &ProposalKey) -> Result<bool>;

    /// Number of votes a proposal needs, read from the destination chain
    async fn relayer_threshold(&self) -> Result<u64>;

    /// Submit a vote. Returns the transaction hash.
    async fn submit_vote(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String>;

    /// Submit execution of a passed proposal. Returns the transaction hash.
    async fn submit_execute(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String>;
}
