//! One relayed chain: its connection, listener, writer and stop signal

use std::sync::Arc;

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::blockstore::Blockstore;
use crate::connection::Connection;
use crate::error::ErrorSender;
use crate::listener::{Listener, ListenerConfig};
use crate::router::{MessageWriter, Router};
use crate::stop::{stop_channel, StopHandle};
use crate::types::ChainId;
use crate::writer::{Writer, WriterConfig};

/// What the orchestrator needs from a chain, whatever its adapter
#[async_trait]
pub trait Chain: Send + Sync {
    fn id(&self) -> ChainId;

    /// The writer other chains' messages are routed to
    fn writer(&self) -> Arc<dyn MessageWriter>;

    fn set_router(&mut self, router: Arc<Router>);

    /// Connect and spawn the listener and writer
    async fn start(&mut self) -> Result<()>;

    /// Signal both tasks, wait for them, then close the connection
    async fn stop(&mut self);
}

pub struct RelayChain<C: Connection> {
    conn: Arc<C>,
    listener: Option<Listener<C>>,
    writer: Arc<Writer<C>>,
    stop: StopHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: Connection> RelayChain<C> {
    pub fn new(
        conn: Arc<C>,
        blockstore: Arc<dyn Blockstore>,
        listener_config: ListenerConfig,
        writer_config: WriterConfig,
        errors: ErrorSender,
    ) -> Self {
        let (stop, signal) = stop_channel();
        let listener = Listener::new(
            conn.clone(),
            blockstore,
            listener_config,
            errors.clone(),
            signal.clone(),
        );
        let writer = Arc::new(Writer::new(conn.clone(), writer_config, errors, signal));
        Self {
            conn,
            listener: Some(listener),
            writer,
            stop,
            tasks: Vec::new(),
        }
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.conn
    }
}

#[async_trait]
impl<C: Connection> Chain for RelayChain<C> {
    fn id(&self) -> ChainId {
        self.conn.chain_id()
    }

    fn writer(&self) -> Arc<dyn MessageWriter> {
        self.writer.clone()
    }

    fn set_router(&mut self, router: Arc<Router>) {
        if let Some(listener) = self.listener.as_mut() {
            listener.set_router(router);
        }
    }

    async fn start(&mut self) -> Result<()> {
        let chain_id = self.id();
        let listener = self
            .listener
            .take()
            .ok_or_else(|| eyre!("chain {} already started", chain_id))?;

        self.conn
            .connect()
            .await
            .wrap_err_with(|| format!("Failed to connect chain {}", chain_id))?;

        self.tasks.push(self.writer.start()?);
        self.tasks.push(listener.start().await?);

        info!(
            chain_id,
            relayer = %self.conn.relayer_address(),
            "Chain started"
        );
        Ok(())
    }

    async fn stop(&mut self) {
        let chain_id = self.id();
        self.stop.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(chain_id, error = %e, "Chain task ended abnormally");
            }
        }
        self.conn.close().await;
        info!(chain_id, "Chain stopped");
    }
}
