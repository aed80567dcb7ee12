//! Destination-side proposal voting
//!
//! A writer owns the bounded queue of messages bound for its chain and
//! processes them one at a time: build the proposal, check on-chain state,
//! vote with bounded retries, and execute once the proposal has passed.
//! On-chain state is the source of truth; a proposal that is already
//! finished, or that this relayer already voted on, costs no transaction.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eyre::{eyre, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::Connection;
use crate::error::{ErrorSender, FatalError};
use crate::hash::bytes32_to_hex;
use crate::metrics;
use crate::proposal::{Proposal, ProposalStatus};
use crate::retry::{classify_error, RetryPolicy};
use crate::router::MessageWriter;
use crate::stop::StopSignal;
use crate::types::{ChainId, Message};

/// Default capacity of a writer's inbound queue
pub const WRITER_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Handler contract address on this chain, hashed into every proposal
    pub handler_address: Vec<u8>,
    /// Budget per transaction
    pub retry: RetryPolicy,
    pub queue_capacity: usize,
}

impl WriterConfig {
    pub fn new(handler_address: Vec<u8>) -> Self {
        Self {
            handler_address,
            retry: RetryPolicy::transactions(),
            queue_capacity: WRITER_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxKind {
    Vote,
    Execute,
}

impl TxKind {
    fn as_str(&self) -> &'static str {
        match self {
            TxKind::Vote => "vote",
            TxKind::Execute => "execute",
        }
    }
}

/// How a submission with retries ended, short of halting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Submitted {
    /// Our transaction went through
    Sent,
    /// Chain state made the transaction unnecessary
    Settled,
}

/// Why the processing loop must end
#[derive(Debug)]
enum Halt {
    Stopped,
    Fatal(FatalError),
}

pub struct Writer<C: Connection> {
    conn: Arc<C>,
    config: WriterConfig,
    sender: mpsc::Sender<Message>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
    errors: ErrorSender,
    stop: StopSignal,
}

impl<C: Connection> Writer<C> {
    pub fn new(conn: Arc<C>, config: WriterConfig, errors: ErrorSender, stop: StopSignal) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            conn,
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            errors,
            stop,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.conn.chain_id()
    }

    /// Messages waiting to be processed
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Spawn the processing loop. Can only be called once.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| eyre!("writer queue lock poisoned"))?
            .take()
            .ok_or_else(|| eyre!("writer for chain {} already started", self.chain_id()))?;

        let task = WriterTask {
            conn: self.conn.clone(),
            config: self.config.clone(),
            errors: self.errors.clone(),
            stop: self.stop.clone(),
        };
        Ok(tokio::spawn(task.run(receiver)))
    }
}

#[async_trait]
impl<C: Connection> MessageWriter for Writer<C> {
    async fn resolve_message(&self, message: Message) -> bool {
        let mut stop = self.stop.clone();
        if stop.is_stopped() {
            return false;
        }
        let accepted = tokio::select! {
            sent = self.sender.send(message) => sent.is_ok(),
            _ = stop.stopped() => false,
        };
        if accepted {
            metrics::set_writer_queue_depth(self.chain_id(), self.queue_len());
        }
        accepted
    }
}

struct WriterTask<C: Connection> {
    conn: Arc<C>,
    config: WriterConfig,
    errors: ErrorSender,
    stop: StopSignal,
}

impl<C: Connection> WriterTask<C> {
    fn chain_id(&self) -> ChainId {
        self.conn.chain_id()
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<Message>) {
        let chain_id = self.chain_id();
        match self.conn.relayer_threshold().await {
            Ok(threshold) => info!(chain_id, threshold, "Writer started"),
            Err(e) => warn!(chain_id, error = %e, "Writer started, relayer threshold unavailable"),
        }

        loop {
            let message = tokio::select! {
                biased;
                _ = self.stop.stopped() => break,
                message = receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            metrics::set_writer_queue_depth(chain_id, receiver.len());

            match self.process_message(message).await {
                Ok(()) => {}
                Err(Halt::Stopped) => break,
                Err(Halt::Fatal(fatal)) => {
                    error!(chain_id, error = %fatal, "Writer giving up, halting chain writer");
                    metrics::record_fatal_error(chain_id);
                    tokio::select! {
                        _ = self.errors.send(fatal) => {}
                        _ = self.stop.stopped() => {}
                    }
                    break;
                }
            }
        }

        receiver.close();
        info!(chain_id, "Writer stopped");
    }

    async fn process_message(&mut self, message: Message) -> Result<(), Halt> {
        let chain_id = self.chain_id();
        let proposal = match Proposal::from_message(&message, &self.config.handler_address) {
            Ok(proposal) => proposal,
            Err(e) => {
                error!(chain_id, message = %message, error = %e, "Cannot build proposal, dropping message");
                metrics::record_error(chain_id, "malformed_message");
                return Ok(());
            }
        };
        let key = proposal.key;

        let status = match self.conn.proposal_status(&key).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(chain_id, proposal = %key, error = %e, "Failed to query proposal status");
                None
            }
        };

        if let Some(status) = status.filter(ProposalStatus::is_terminal) {
            info!(chain_id, proposal = %key, %status, "Proposal already finished, skipping");
            metrics::record_proposal_skipped(chain_id, status.as_str());
            return Ok(());
        }

        if status == Some(ProposalStatus::Passed) {
            info!(chain_id, proposal = %key, "Proposal already passed, executing");
            return self.execute(&proposal).await;
        }

        match self.conn.has_voted(&key).await {
            Ok(true) => {
                info!(chain_id, proposal = %key, "Already voted on proposal, skipping");
                metrics::record_proposal_skipped(chain_id, "already_voted");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => warn!(chain_id, proposal = %key, error = %e, "Failed to query vote state"),
        }

        info!(
            chain_id,
            source = key.source,
            deposit_nonce = key.deposit_nonce,
            data_hash = %bytes32_to_hex(&key.data_hash),
            "Voting on proposal"
        );
        let submitted = self.submit_with_retry(TxKind::Vote, &proposal).await?;

        // A vote settled by another relayer may still leave the proposal passed
        match self.conn.proposal_status(&key).await {
            Ok(ProposalStatus::Passed) => self.execute(&proposal).await,
            Ok(status) => {
                debug!(chain_id, proposal = %key, %status, ?submitted, "Vote recorded");
                Ok(())
            }
            Err(e) => {
                warn!(chain_id, proposal = %key, error = %e, "Failed to query proposal after vote");
                Ok(())
            }
        }
    }

    async fn execute(&mut self, proposal: &Proposal) -> Result<(), Halt> {
        self.submit_with_retry(TxKind::Execute, proposal).await?;
        Ok(())
    }

    /// Submit under the nonce lock, retrying on any failure until the budget
    /// runs out. Chain state is re-read after every failed attempt.
    async fn submit_with_retry(&mut self, kind: TxKind, proposal: &Proposal) -> Result<Submitted, Halt> {
        let chain_id = self.chain_id();
        let key = proposal.key;
        let mut retry = self.config.retry;
        retry.reset();

        while retry.consume() {
            let attempt = retry.limit() - retry.remaining();
            let result = match self.conn.lock_and_update_opts().await {
                Ok(mut opts) => match kind {
                    TxKind::Vote => self.conn.submit_vote(&mut opts, proposal).await,
                    TxKind::Execute => self.conn.submit_execute(&mut opts, proposal).await,
                },
                Err(e) => Err(e),
            };

            match result {
                Ok(tx_hash) => {
                    info!(chain_id, proposal = %key, tx_hash = %tx_hash, attempt, "Submitted {}", kind.as_str());
                    record_submission(chain_id, kind, true);
                    return Ok(Submitted::Sent);
                }
                Err(e) => {
                    record_submission(chain_id, kind, false);
                    let class = classify_error(&format!("{:#}", e));
                    if class.is_benign_race() {
                        debug!(chain_id, proposal = %key, attempt, error = %e, class = ?class, "Nonce race, retrying {}", kind.as_str());
                    } else {
                        warn!(chain_id, proposal = %key, attempt, error = %e, class = ?class, "Failed to submit {}", kind.as_str());
                    }
                }
            }

            if self.settled(kind, proposal).await {
                return Ok(Submitted::Settled);
            }
            if retry.is_exhausted() {
                break;
            }
            if !self.stop.sleep(retry.interval()).await {
                return Err(Halt::Stopped);
            }
        }

        let attempts = retry.limit();
        let fatal = match kind {
            TxKind::Vote => FatalError::VoteRetryExhausted {
                chain_id,
                source_chain: key.source,
                deposit_nonce: key.deposit_nonce,
                attempts,
            },
            TxKind::Execute => FatalError::ExecuteRetryExhausted {
                chain_id,
                source_chain: key.source,
                deposit_nonce: key.deposit_nonce,
                attempts,
            },
        };
        Err(Halt::Fatal(fatal))
    }

    /// Whether chain state already makes `kind` unnecessary
    async fn settled(&self, kind: TxKind, proposal: &Proposal) -> bool {
        let chain_id = self.chain_id();
        let key = &proposal.key;
        match self.conn.proposal_status(key).await {
            Ok(status) if status.is_terminal() => {
                info!(chain_id, proposal = %key, %status, "Proposal finished by other relayers");
                return true;
            }
            Ok(ProposalStatus::Passed) if kind == TxKind::Vote => {
                info!(chain_id, proposal = %key, "Proposal passed by other relayers, no vote needed");
                return true;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(chain_id, proposal = %key, error = %e, "Failed to re-check proposal status");
                return false;
            }
        }
        if kind == TxKind::Vote {
            if let Ok(true) = self.conn.has_voted(key).await {
                info!(chain_id, proposal = %key, "Vote landed despite submission error");
                return true;
            }
        }
        false
    }
}

fn record_submission(chain_id: ChainId, kind: TxKind, success: bool) {
    match kind {
        TxKind::Vote => metrics::record_vote_submitted(chain_id, success),
        TxKind::Execute => metrics::record_execution_submitted(chain_id, success),
    }
}
