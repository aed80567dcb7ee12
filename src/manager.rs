//! Wires every configured chain to one router and supervises them

use std::future::Future;
use std::sync::Arc;

use eyre::{eyre, Result};
use futures::future::join_all;
use tracing::{error, info};

use crate::chain::Chain;
use crate::error::{error_channel, ErrorReceiver, ErrorSender};
use crate::router::Router;
use crate::types::ChainId;

/// Runs all chains until shutdown or the first fatal error
pub struct RelayManager {
    router: Arc<Router>,
    chains: Vec<Box<dyn Chain>>,
    errors_tx: ErrorSender,
    errors_rx: ErrorReceiver,
}

impl Default for RelayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayManager {
    pub fn new() -> Self {
        let (errors_tx, errors_rx) = error_channel();
        Self {
            router: Arc::new(Router::new()),
            chains: Vec::new(),
            errors_tx,
            errors_rx,
        }
    }

    /// Sender every chain reports fatal errors on
    pub fn error_sender(&self) -> ErrorSender {
        self.errors_tx.clone()
    }

    pub fn router(&self) -> Arc<Router> {
        self.router.clone()
    }

    /// Register the chain's writer with the router and hand it the router
    pub fn add_chain(&mut self, mut chain: Box<dyn Chain>) -> Result<()> {
        self.router.listen(chain.id(), chain.writer())?;
        chain.set_router(self.router.clone());
        self.chains.push(chain);
        Ok(())
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.iter().map(|chain| chain.id()).collect()
    }

    /// Start every chain, then wait for `shutdown` or a fatal error. All
    /// chains are stopped either way; a fatal error is returned as `Err`.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        if self.chains.is_empty() {
            return Err(eyre!("no chains configured"));
        }

        let mut started = Vec::with_capacity(self.chains.len());
        let mut startup_error = None;
        for mut chain in std::mem::take(&mut self.chains) {
            let result = chain.start().await;
            started.push(chain);
            if let Err(e) = result {
                startup_error = Some(e);
                break;
            }
        }

        let outcome = match startup_error {
            Some(e) => {
                error!(error = %e, "Failed to start chain");
                Err(e)
            }
            None => {
                info!(chains = ?self.router.chains(), "All chains started");
                tokio::select! {
                    _ = shutdown => {
                        info!("Shutdown signal received, stopping chains");
                        Ok(())
                    }
                    fatal = self.errors_rx.recv() => match fatal {
                        Some(fatal) => {
                            error!(chain_id = fatal.chain_id(), error = %fatal, "Fatal chain error, stopping all chains");
                            Err(eyre::Report::new(fatal))
                        }
                        None => Err(eyre!("error channel closed unexpectedly")),
                    },
                }
            }
        };

        join_all(started.iter_mut().map(|chain| chain.stop())).await;
        info!("All chains stopped");
        outcome
    }
}
