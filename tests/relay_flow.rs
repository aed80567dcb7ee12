//! End-to-end relaying over scripted chains
//!
//! A deposit seen by the listener on chain 2 travels through the router to
//! chain 1's writer, which votes and executes. Time is paused, so retry and
//! poll intervals cost nothing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relayer::blockstore::InMemoryBlockstore;
use relayer::chain::RelayChain;
use relayer::connection::{DepositEvent, MockConnection};
use relayer::listener::ListenerConfig;
use relayer::manager::RelayManager;
use relayer::proposal::{Proposal, ProposalKey, ProposalStatus};
use relayer::retry::RetryPolicy;
use relayer::types::ResourceId;
use relayer::writer::WriterConfig;

const SOURCE: u8 = 2;
const DESTINATION: u8 = 1;
const DEPOSIT_BLOCK: u64 = 10;

fn handler() -> Vec<u8> {
    hex::decode("3167776db165d8ea0f51790ca2bbf44db5105adf").unwrap()
}

fn deposit() -> DepositEvent {
    DepositEvent {
        source: SOURCE,
        destination: DESTINATION,
        deposit_nonce: 5,
        resource_id: ResourceId::from_hex(
            "0x000000000000000000000000000000a9e0095b8965c01e6a09c97938f3860901",
        )
        .unwrap(),
        amount: 15_000_000_000_000_000_000u128.to_be_bytes().to_vec(),
        recipient: hex::decode("26db25c52b007221331a844e5335e59874e17965").unwrap(),
    }
}

fn proposal_key() -> ProposalKey {
    Proposal::from_message(&deposit().into_message(), &handler())
        .unwrap()
        .key
}

struct Harness {
    manager: RelayManager,
    source: Arc<MockConnection>,
    destination: Arc<MockConnection>,
    source_blocks: InMemoryBlockstore,
}

impl Harness {
    fn new() -> Self {
        let mut manager = RelayManager::new();

        let source = Arc::new(MockConnection::new(SOURCE));
        source.set_latest_block(DEPOSIT_BLOCK + 10);
        source.add_deposit(DEPOSIT_BLOCK, deposit());

        let destination = Arc::new(MockConnection::new(DESTINATION));
        let source_blocks = InMemoryBlockstore::new();

        let source_chain = RelayChain::new(
            source.clone(),
            Arc::new(source_blocks.clone()),
            listener_config(DEPOSIT_BLOCK),
            WriterConfig::new(handler()),
            manager.error_sender(),
        );
        let destination_chain = RelayChain::new(
            destination.clone(),
            Arc::new(InMemoryBlockstore::new()),
            listener_config(0),
            WriterConfig {
                retry: RetryPolicy::new(3, Duration::from_secs(2)),
                ..WriterConfig::new(handler())
            },
            manager.error_sender(),
        );
        manager.add_chain(Box::new(source_chain)).unwrap();
        manager.add_chain(Box::new(destination_chain)).unwrap();

        Self {
            manager,
            source,
            destination,
            source_blocks,
        }
    }

    async fn run_until<F>(self, done: F) -> eyre::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::time::timeout(Duration::from_secs(600), self.manager.run(done))
            .await
            .expect("relay did not settle")
    }
}

fn listener_config(start_block: u64) -> ListenerConfig {
    ListenerConfig {
        start_block,
        retry: RetryPolicy::new(5, Duration::from_secs(1)),
        ..ListenerConfig::default()
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_deposit_is_voted_and_executed_on_destination() {
    let harness = Harness::new();
    let destination = harness.destination.clone();
    let source = harness.source.clone();
    let source_blocks = harness.source_blocks.clone();
    destination.status_after_vote(ProposalStatus::Passed);

    let done_dest = destination.clone();
    harness
        .run_until(wait_for(move || !done_dest.executions().is_empty()))
        .await
        .unwrap();

    let key = proposal_key();
    let votes = destination.votes();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].key, key);
    assert_eq!(votes[0].destination, DESTINATION);
    assert_eq!(destination.executions().len(), 1);
    assert_eq!(destination.status_of(&key), ProposalStatus::Transferred);

    assert!(source.votes().is_empty());
    assert!(source.queried_blocks().contains(&DEPOSIT_BLOCK));
    assert_eq!(source_blocks.latest(), Some(DEPOSIT_BLOCK));
}

#[tokio::test(start_paused = true)]
async fn test_transferred_proposal_gets_no_transactions() {
    let harness = Harness::new();
    let destination = harness.destination.clone();
    let source_blocks = harness.source_blocks.clone();
    destination.set_status(proposal_key(), ProposalStatus::Transferred);

    let blocks = source_blocks.clone();
    harness
        .run_until(async move {
            wait_for(move || blocks.latest() == Some(DEPOSIT_BLOCK)).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await
        .unwrap();

    assert!(destination.votes().is_empty());
    assert!(destination.executions().is_empty());
    assert!(destination.vote_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resending_after_transfer_costs_nothing() {
    let harness = Harness::new();
    let destination = harness.destination.clone();
    let router = harness.manager.router();
    destination.status_after_vote(ProposalStatus::Passed);

    let done_dest = destination.clone();
    harness
        .run_until(async move {
            wait_for(|| !done_dest.executions().is_empty()).await;
            assert_eq!(done_dest.status_of(&proposal_key()), ProposalStatus::Transferred);

            router.send(deposit().into_message()).unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await
        .unwrap();

    assert_eq!(destination.vote_attempts().len(), 1);
    assert_eq!(destination.votes().len(), 1);
    assert_eq!(destination.executions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vote_below_threshold_waits_for_other_relayers() {
    let harness = Harness::new();
    let destination = harness.destination.clone();
    destination.set_threshold(2);

    let done_dest = destination.clone();
    harness
        .run_until(async move {
            wait_for(move || !done_dest.votes().is_empty()).await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await
        .unwrap();

    assert_eq!(destination.votes().len(), 1);
    assert!(destination.executions().is_empty());
    assert_eq!(destination.status_of(&proposal_key()), ProposalStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_failing_destination_stops_the_relay() {
    let harness = Harness::new();
    let destination = harness.destination.clone();
    let source = harness.source.clone();
    destination.fail_all_votes("connection reset by peer");

    let result = harness.run_until(std::future::pending()).await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("vote"));
    assert_eq!(destination.vote_attempts().len(), 3);
    assert!(!source.is_connected());
    assert!(!destination.is_connected());
}
