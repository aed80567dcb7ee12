//! Resumable block poller
//!
//! A listener walks its chain one block at a time, turns every deposit in a
//! confirmed block into a [`Message`](crate::types::Message) and hands it to
//! the router. Progress is persisted after each block so a restart resumes
//! where the previous run stopped.

use std::sync::Arc;

use eyre::{eyre, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::blockstore::Blockstore;
use crate::connection::Connection;
use crate::error::{ErrorSender, FatalError};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::router::Router;
use crate::stop::StopSignal;
use crate::types::ChainId;

/// Default number of blocks a block must be buried under before it is read
pub const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 10;

/// When a block counts as safe to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// `block` is confirmed once `latest - block >= delay`
    BlockDelay(u64),
    /// `block` is confirmed once the chain reports it final
    FinalizedHead,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        ConfirmationPolicy::BlockDelay(DEFAULT_BLOCK_CONFIRMATIONS)
    }
}

impl ConfirmationPolicy {
    /// Highest confirmed block, or None when not even block 0 is confirmed
    pub async fn confirmed_head<C: Connection + ?Sized>(&self, conn: &C) -> Result<Option<u64>> {
        match self {
            ConfirmationPolicy::BlockDelay(delay) => {
                let latest = conn.latest_block().await?;
                Ok(latest.checked_sub(*delay))
            }
            ConfirmationPolicy::FinalizedHead => Ok(Some(conn.finalized_block().await?)),
        }
    }
}

/// Where a listener starts and how patient it is
#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    /// Lowest block ever processed
    pub start_block: u64,
    /// Ignore the blockstore and begin at `start_block`
    pub fresh_start: bool,
    /// Begin at the current chain head, ignoring both the store and `start_block`
    pub latest: bool,
    pub confirmation: ConfirmationPolicy,
    /// Budget per block. The interval doubles as the idle poll interval.
    pub retry: RetryPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            fresh_start: false,
            latest: false,
            confirmation: ConfirmationPolicy::default(),
            retry: RetryPolicy::blocks(),
        }
    }
}

pub struct Listener<C: Connection> {
    conn: Arc<C>,
    blockstore: Arc<dyn Blockstore>,
    router: Option<Arc<Router>>,
    config: ListenerConfig,
    errors: ErrorSender,
    stop: StopSignal,
}

impl<C: Connection> Listener<C> {
    pub fn new(
        conn: Arc<C>,
        blockstore: Arc<dyn Blockstore>,
        config: ListenerConfig,
        errors: ErrorSender,
        stop: StopSignal,
    ) -> Self {
        Self {
            conn,
            blockstore,
            router: None,
            config,
            errors,
            stop,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.conn.chain_id()
    }

    pub fn set_router(&mut self, router: Arc<Router>) {
        self.router = Some(router);
    }

    /// First block this listener will read
    pub async fn resolve_start_block(&self) -> Result<u64> {
        if self.config.latest {
            return self.conn.latest_block().await;
        }
        if self.config.fresh_start {
            return Ok(self.config.start_block);
        }
        let start = match self.blockstore.try_load_latest_block().await? {
            Some(last) => self.config.start_block.max(last.saturating_add(1)),
            None => self.config.start_block,
        };
        Ok(start)
    }

    /// Resolve the start block and spawn the polling loop. Errors here are
    /// startup errors; everything after goes to the error channel.
    pub async fn start(self) -> Result<JoinHandle<()>> {
        let router = self
            .router
            .clone()
            .ok_or_else(|| eyre!("listener for chain {} has no router", self.chain_id()))?;
        let start = self.resolve_start_block().await?;

        info!(
            chain_id = self.chain_id(),
            start_block = start,
            fresh_start = self.config.fresh_start,
            latest = self.config.latest,
            confirmation = ?self.config.confirmation,
            "Starting listener"
        );

        Ok(tokio::spawn(self.poll_blocks(router, start)))
    }

    async fn poll_blocks(mut self, router: Arc<Router>, mut current: u64) {
        let chain_id = self.chain_id();
        let interval = self.config.retry.interval();
        let mut retry = self.config.retry;
        retry.reset();

        loop {
            if self.stop.is_stopped() {
                info!(chain_id, block = current, "Listener stopped");
                return;
            }

            if retry.is_exhausted() {
                error!(
                    chain_id,
                    block = current,
                    attempts = retry.limit(),
                    "Block retry limit reached, stopping listener"
                );
                self.report(FatalError::BlockRetryExhausted {
                    chain_id,
                    block: current,
                })
                .await;
                return;
            }

            let head = match self.config.confirmation.confirmed_head(&*self.conn).await {
                Ok(head) => head,
                Err(e) => {
                    warn!(chain_id, block = current, error = %e, "Failed to query chain head");
                    metrics::record_error(chain_id, "head_query");
                    retry.consume();
                    self.stop.sleep(interval).await;
                    continue;
                }
            };

            if head.map_or(true, |head| current > head) {
                debug!(chain_id, block = current, confirmed_head = ?head, "Block not yet confirmed");
                self.stop.sleep(interval).await;
                continue;
            }

            match self.process_block(&router, current).await {
                Ok(deposits) => {
                    debug!(chain_id, block = current, deposits, "Processed block");
                }
                Err(e) => {
                    warn!(chain_id, block = current, error = %e, "Failed to process block, retrying");
                    metrics::record_error(chain_id, "block_events");
                    retry.consume();
                    self.stop.sleep(interval).await;
                    continue;
                }
            }

            if let Err(e) = self.blockstore.store_block(current).await {
                warn!(chain_id, block = current, error = %e, "Failed to persist block cursor");
            }
            metrics::record_block_processed(chain_id, current);

            current += 1;
            retry.reset();
        }
    }

    /// Route every deposit in `block`. Returns how many were found.
    async fn process_block(&self, router: &Router, block: u64) -> Result<usize> {
        let chain_id = self.chain_id();
        let events = self.conn.deposit_events(block).await?;
        let count = events.len();

        for event in events {
            let message = event.into_message();
            info!(
                chain_id,
                block,
                source = message.source(),
                destination = message.destination(),
                deposit_nonce = message.deposit_nonce(),
                resource_id = %message.resource_id(),
                "Deposit detected"
            );
            metrics::record_deposit_detected(chain_id);

            if let Err(e) = router.send(message) {
                warn!(chain_id, block, error = %e, "Failed to route deposit");
                metrics::record_error(chain_id, "routing");
            }
        }

        Ok(count)
    }

    async fn report(&mut self, fatal: FatalError) {
        metrics::record_fatal_error(fatal.chain_id());
        tokio::select! {
            _ = self.errors.send(fatal) => {}
            _ = self.stop.stopped() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockstore::InMemoryBlockstore;
    use crate::connection::{DepositEvent, MockConnection};
    use crate::error::error_channel;
    use crate::router::MessageWriter;
    use crate::stop::stop_channel;
    use crate::types::{Message, ResourceId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sink {
        received: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageWriter for Sink {
        async fn resolve_message(&self, message: Message) -> bool {
            self.received.lock().unwrap().push(message);
            true
        }
    }

    fn deposit(nonce: u64) -> DepositEvent {
        DepositEvent {
            source: 2,
            destination: 1,
            deposit_nonce: nonce,
            resource_id: ResourceId([1u8; 32]),
            amount: vec![0x01, 0x00],
            recipient: vec![0xab; 20],
        }
    }

    fn config(start_block: u64, delay: u64) -> ListenerConfig {
        ListenerConfig {
            start_block,
            confirmation: ConfirmationPolicy::BlockDelay(delay),
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            ..ListenerConfig::default()
        }
    }

    fn router_with_sink() -> (Arc<Router>, Arc<Sink>) {
        let router = Arc::new(Router::new());
        let sink = Arc::new(Sink::default());
        router.listen(1, sink.clone()).unwrap();
        (router, sink)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_block_resumes_after_stored() {
        let conn = Arc::new(MockConnection::new(2));
        let store = Arc::new(InMemoryBlockstore::with_block(41));
        let (errors, _rx) = error_channel();
        let (_handle, stop) = stop_channel();

        let listener = Listener::new(conn.clone(), store.clone(), config(10, 0), errors.clone(), stop.clone());
        assert_eq!(listener.resolve_start_block().await.unwrap(), 42);

        let below = Listener::new(conn.clone(), store.clone(), config(100, 0), errors.clone(), stop.clone());
        assert_eq!(below.resolve_start_block().await.unwrap(), 100);

        let mut fresh = config(10, 0);
        fresh.fresh_start = true;
        let fresh = Listener::new(conn.clone(), store.clone(), fresh, errors.clone(), stop.clone());
        assert_eq!(fresh.resolve_start_block().await.unwrap(), 10);

        conn.set_latest_block(500);
        let mut latest = config(10, 0);
        latest.latest = true;
        let latest = Listener::new(conn, store, latest, errors, stop);
        assert_eq!(latest.resolve_start_block().await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_empty_store_starts_at_start_block() {
        let conn = Arc::new(MockConnection::new(2));
        let (errors, _rx) = error_channel();
        let (_handle, stop) = stop_channel();
        let listener = Listener::new(conn, Arc::new(InMemoryBlockstore::new()), config(7, 0), errors, stop);
        assert_eq!(listener.resolve_start_block().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_start_requires_router() {
        let conn = Arc::new(MockConnection::new(2));
        let (errors, _rx) = error_channel();
        let (_handle, stop) = stop_channel();
        let listener = Listener::new(conn, Arc::new(InMemoryBlockstore::new()), config(0, 0), errors, stop);
        assert!(listener.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_and_processes_each_confirmed_block_once() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(20);
        conn.add_deposit(13, deposit(1));
        conn.add_deposit(15, deposit(2));
        let store = Arc::new(InMemoryBlockstore::with_block(10));
        let (router, sink) = router_with_sink();
        let (errors, _rx) = error_channel();
        let (handle, stop) = stop_channel();

        let mut listener = Listener::new(conn.clone(), store.clone(), config(0, 5), errors, stop);
        listener.set_router(router);
        let task = listener.start().await.unwrap();

        wait_for(|| store.latest() == Some(15)).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop();
        task.await.unwrap();

        assert_eq!(conn.queried_blocks(), vec![11, 12, 13, 14, 15]);
        let nonces: Vec<u64> = sink
            .received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.deposit_nonce())
            .collect();
        assert_eq!(nonces, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_confirmations() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(12);
        let store = Arc::new(InMemoryBlockstore::new());
        let (router, _sink) = router_with_sink();
        let (errors, _rx) = error_channel();
        let (handle, stop) = stop_channel();

        let mut listener = Listener::new(conn.clone(), store.clone(), config(10, 5), errors, stop);
        listener.set_router(router);
        let task = listener.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(conn.queried_blocks().is_empty());

        conn.set_latest_block(16);
        wait_for(|| store.latest() == Some(11)).await;
        handle.stop();
        task.await.unwrap();
        assert_eq!(conn.queried_blocks(), vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalized_head_policy() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(50);
        conn.set_finalized_block(4);
        let store = Arc::new(InMemoryBlockstore::new());
        let (router, _sink) = router_with_sink();
        let (errors, _rx) = error_channel();
        let (handle, stop) = stop_channel();

        let mut cfg = config(3, 0);
        cfg.confirmation = ConfirmationPolicy::FinalizedHead;
        let mut listener = Listener::new(conn.clone(), store.clone(), cfg, errors, stop);
        listener.set_router(router);
        let task = listener.start().await.unwrap();

        wait_for(|| store.latest() == Some(4)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop();
        task.await.unwrap();
        assert_eq!(conn.queried_blocks(), vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_same_block() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(5);
        conn.add_deposit(5, deposit(9));
        conn.fail_event_queries(2);
        let store = Arc::new(InMemoryBlockstore::new());
        let (router, sink) = router_with_sink();
        let (errors, mut rx) = error_channel();
        let (handle, stop) = stop_channel();

        let mut listener = Listener::new(conn.clone(), store.clone(), config(5, 0), errors, stop);
        listener.set_router(router);
        let task = listener.start().await.unwrap();

        wait_for(|| store.latest() == Some(5)).await;
        handle.stop();
        task.await.unwrap();

        assert_eq!(conn.queried_blocks(), vec![5, 5, 5]);
        wait_for(|| sink.received.lock().unwrap().len() == 1).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_is_fatal_once() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(5);
        conn.fail_event_queries(100);
        let store = Arc::new(InMemoryBlockstore::new());
        let (router, _sink) = router_with_sink();
        let (errors, mut rx) = error_channel();
        let (_handle, stop) = stop_channel();

        let mut listener = Listener::new(conn.clone(), store.clone(), config(5, 0), errors, stop);
        listener.set_router(router);
        listener.start().await.unwrap().await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(FatalError::BlockRetryExhausted { chain_id: 2, block: 5 })
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(conn.queried_blocks().len(), 3);
        assert_eq!(store.latest(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unroutable_deposit_does_not_abort_block() {
        let conn = Arc::new(MockConnection::new(2));
        conn.set_latest_block(1);
        let mut stray = deposit(1);
        stray.destination = 9;
        conn.add_deposit(1, stray);
        conn.add_deposit(1, deposit(2));
        let store = Arc::new(InMemoryBlockstore::new());
        let (router, sink) = router_with_sink();
        let (errors, _rx) = error_channel();
        let (handle, stop) = stop_channel();

        let mut listener = Listener::new(conn.clone(), store.clone(), config(1, 0), errors, stop);
        listener.set_router(router);
        let task = listener.start().await.unwrap();

        wait_for(|| store.latest() == Some(1)).await;
        handle.stop();
        task.await.unwrap();

        wait_for(|| sink.received.lock().unwrap().len() == 1).await;
        assert_eq!(sink.received.lock().unwrap()[0].deposit_nonce(), 2);
    }
}
