//! Scripted in-memory chain adapter
//!
//! Backs listener, writer and end-to-end tests: block heights, per-block
//! deposits and proposal states are set up front, failures are injected by
//! count, and every submission is recorded for assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use eyre::{eyre, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{Connection, DepositEvent, OptsGuard, TxOpts};
use crate::proposal::{Proposal, ProposalKey, ProposalStatus};
use crate::types::ChainId;

const MOCK_GAS_PRICE: u128 = 1_000_000_000;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    latest_block: u64,
    finalized_block: u64,
    threshold: u64,
    events: HashMap<u64, Vec<DepositEvent>>,
    statuses: HashMap<ProposalKey, ProposalStatus>,
    voted: HashSet<ProposalKey>,
    head_failures: u32,
    event_failures: u32,
    vote_failures: VecDeque<String>,
    vote_error: Option<String>,
    execute_error: Option<String>,
    status_after_vote: Option<ProposalStatus>,
    status_after_failed_votes: Option<(usize, ProposalStatus)>,
    event_queries: Vec<u64>,
    vote_attempts: Vec<Instant>,
    votes: Vec<Proposal>,
    executions: Vec<Proposal>,
}

/// In-memory [`Connection`] with scripted chain state
#[derive(Debug)]
pub struct MockConnection {
    chain_id: ChainId,
    relayer: String,
    opts: Mutex<TxOpts>,
    state: StdMutex<MockState>,
}

impl MockConnection {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            relayer: format!("0x{:040x}", chain_id as u64 + 0xbeef),
            opts: Mutex::new(TxOpts::default()),
            state: StdMutex::new(MockState {
                threshold: 1,
                ..MockState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Set the chain head. The finalized head follows unless set separately.
    pub fn set_latest_block(&self, block: u64) {
        let mut state = self.state();
        state.latest_block = block;
        state.finalized_block = block;
    }

    pub fn set_finalized_block(&self, block: u64) {
        self.state().finalized_block = block;
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.state().threshold = threshold;
    }

    pub fn add_deposit(&self, block: u64, event: DepositEvent) {
        self.state().events.entry(block).or_default().push(event);
    }

    pub fn set_status(&self, key: ProposalKey, status: ProposalStatus) {
        self.state().statuses.insert(key, status);
    }

    pub fn mark_voted(&self, key: ProposalKey) {
        self.state().voted.insert(key);
    }

    /// The next `count` head queries fail with a transient error
    pub fn fail_head_queries(&self, count: u32) {
        self.state().head_failures = count;
    }

    /// The next `count` event queries fail with a transient error
    pub fn fail_event_queries(&self, count: u32) {
        self.state().event_failures = count;
    }

    /// Fail the next vote submissions with these messages, in order
    pub fn fail_next_votes<I, S>(&self, errors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .vote_failures
            .extend(errors.into_iter().map(Into::into));
    }

    /// Fail every vote submission with `error`
    pub fn fail_all_votes(&self, error: &str) {
        self.state().vote_error = Some(error.to_string());
    }

    pub fn fail_all_executions(&self, error: &str) {
        self.state().execute_error = Some(error.to_string());
    }

    /// Status a proposal moves to when our vote lands
    pub fn status_after_vote(&self, status: ProposalStatus) {
        self.state().status_after_vote = Some(status);
    }

    /// After `failures` failed vote attempts the proposal moves to `status`,
    /// as if other relayers reached the threshold first.
    pub fn status_after_failed_votes(&self, failures: usize, status: ProposalStatus) {
        self.state().status_after_failed_votes = Some((failures, status));
    }

    pub fn status_of(&self, key: &ProposalKey) -> ProposalStatus {
        self.state()
            .statuses
            .get(key)
            .copied()
            .unwrap_or(ProposalStatus::Inactive)
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Successful votes, in submission order
    pub fn votes(&self) -> Vec<Proposal> {
        self.state().votes.clone()
    }

    /// When each vote submission was attempted, successful or not
    pub fn vote_attempts(&self) -> Vec<Instant> {
        self.state().vote_attempts.clone()
    }

    pub fn executions(&self) -> Vec<Proposal> {
        self.state().executions.clone()
    }

    /// Blocks whose events were requested, in request order
    pub fn queried_blocks(&self) -> Vec<u64> {
        self.state().event_queries.clone()
    }

    fn record_failed_vote(state: &mut MockState, key: ProposalKey, error: String) -> eyre::Report {
        let failed = state.vote_attempts.len() - state.votes.len();
        if let Some((after, status)) = state.status_after_failed_votes {
            if failed >= after {
                state.statuses.insert(key, status);
            }
        }
        eyre!(error)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn relayer_address(&self) -> String {
        self.relayer.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.state().connected = true;
        Ok(())
    }

    async fn close(&self) {
        self.state().connected = false;
    }

    async fn latest_block(&self) -> Result<u64> {
        let mut state = self.state();
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(eyre!("connection timeout"));
        }
        Ok(state.latest_block)
    }

    async fn finalized_block(&self) -> Result<u64> {
        let mut state = self.state();
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(eyre!("connection timeout"));
        }
        Ok(state.finalized_block)
    }

    async fn lock_and_update_opts<'a>(&'a self) -> Result<OptsGuard<'a>> {
        let mut opts = self.opts.lock().await;
        let state = self.state();
        opts.nonce = (state.votes.len() + state.executions.len()) as u64;
        opts.gas_price = MOCK_GAS_PRICE;
        Ok(opts)
    }

    async fn deposit_events(&self, block: u64) -> Result<Vec<DepositEvent>> {
        let mut state = self.state();
        state.event_queries.push(block);
        if state.event_failures > 0 {
            state.event_failures -= 1;
            return Err(eyre!("failed to fetch logs for block {}: connection reset", block));
        }
        Ok(state.events.get(&block).cloned().unwrap_or_default())
    }

    async fn proposal_status(&self, key: &ProposalKey) -> Result<ProposalStatus> {
        Ok(self.status_of(key))
    }

    async fn has_voted(&self, key: &ProposalKey) -> Result<bool> {
        Ok(self.state().voted.contains(key))
    }

    async fn relayer_threshold(&self) -> Result<u64> {
        Ok(self.state().threshold)
    }

    async fn submit_vote(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String> {
        let mut state = self.state();
        state.vote_attempts.push(Instant::now());

        if let Some(error) = state.vote_failures.pop_front() {
            return Err(Self::record_failed_vote(&mut state, proposal.key, error));
        }
        if let Some(error) = state.vote_error.clone() {
            return Err(Self::record_failed_vote(&mut state, proposal.key, error));
        }

        state.votes.push(proposal.clone());
        state.voted.insert(proposal.key);
        let current = state
            .statuses
            .get(&proposal.key)
            .copied()
            .unwrap_or(ProposalStatus::Inactive);
        let next = match state.status_after_vote {
            Some(status) => status,
            None if current == ProposalStatus::Inactive => ProposalStatus::Active,
            None => current,
        };
        state.statuses.insert(proposal.key, next);

        opts.nonce += 1;
        Ok(format!("0x{:064x}", state.votes.len()))
    }

    async fn submit_execute(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String> {
        let mut state = self.state();
        if let Some(error) = state.execute_error.clone() {
            return Err(eyre!(error));
        }
        state.executions.push(proposal.clone());
        state
            .statuses
            .insert(proposal.key, ProposalStatus::Transferred);

        opts.nonce += 1;
        Ok(format!("0x{:064x}", 0xe000 + state.executions.len()))
    }
}
