//! Cross-chain message switchboard
//!
//! Listeners hand every decoded deposit to [`Router::send`]; the router finds
//! the writer registered for the message's destination and delivers it on a
//! separate task so a slow destination never stalls a listener.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::RouterError;
use crate::types::{ChainId, Message};

/// Anything that accepts messages bound for one chain
#[async_trait]
pub trait MessageWriter: Send + Sync + 'static {
    /// Accept `message` for processing. Returns false only when the writer
    /// has shut down and will never process it.
    async fn resolve_message(&self, message: Message) -> bool;
}

#[derive(Default)]
pub struct Router {
    registry: RwLock<HashMap<ChainId, Arc<dyn MessageWriter>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writer for chain `id`. Each chain registers once.
    pub fn listen(&self, id: ChainId, writer: Arc<dyn MessageWriter>) -> Result<(), RouterError> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if registry.contains_key(&id) {
            return Err(RouterError::AlreadyRegistered(id));
        }
        registry.insert(id, writer);
        info!(chain_id = id, "Registered writer with router");
        Ok(())
    }

    /// Hand `message` to its destination writer without waiting for it to be
    /// accepted. Writer-side failures are logged, never returned.
    ///
    /// Each delivery runs on its own task, so two sends to the same
    /// destination may reach its queue in either order.
    pub fn send(&self, message: Message) -> Result<(), RouterError> {
        let destination = message.destination();
        let writer = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.get(&destination).cloned()
        }
        .ok_or(RouterError::UnknownDestination(destination))?;

        debug!(
            source = message.source(),
            destination,
            deposit_nonce = message.deposit_nonce(),
            "Routing message"
        );

        tokio::spawn(async move {
            let source = message.source();
            let deposit_nonce = message.deposit_nonce();
            if !writer.resolve_message(message).await {
                warn!(
                    source,
                    destination,
                    deposit_nonce,
                    "Destination writer is shut down, message dropped"
                );
            }
        });

        Ok(())
    }

    pub fn supports_chain(&self, id: ChainId) -> bool {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }

    /// Registered chain ids, ascending
    pub fn chains(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("chains", &self.chains())
            .finish()
    }
}
