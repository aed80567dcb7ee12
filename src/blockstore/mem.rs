use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eyre::{eyre, Result};

use super::Blockstore;

/// Process-local blockstore. Clones share the same cursor.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlockstore {
    latest: Arc<Mutex<Option<u64>>>,
}

impl InMemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted cursor
    pub fn with_block(block: u64) -> Self {
        Self {
            latest: Arc::new(Mutex::new(Some(block))),
        }
    }

    pub fn latest(&self) -> Option<u64> {
        self.latest.lock().ok().and_then(|guard| *guard)
    }
}

#[async_trait]
impl Blockstore for InMemoryBlockstore {
    async fn store_block(&self, block: u64) -> Result<()> {
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| eyre!("in-memory blockstore lock poisoned"))?;
        if guard.map_or(true, |current| block > current) {
            *guard = Some(block);
        }
        Ok(())
    }

    async fn try_load_latest_block(&self) -> Result<Option<u64>> {
        Ok(self.latest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_store_loads_none() {
        let store = InMemoryBlockstore::new();
        assert_eq!(store.try_load_latest_block().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_is_monotonic() {
        let store = InMemoryBlockstore::new();
        store.store_block(10).await.unwrap();
        store.store_block(7).await.unwrap();
        assert_eq!(store.try_load_latest_block().await.unwrap(), Some(10));
        store.store_block(11).await.unwrap();
        assert_eq!(store.try_load_latest_block().await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn test_clones_share_cursor() {
        let store = InMemoryBlockstore::with_block(3);
        let clone = store.clone();
        clone.store_block(4).await.unwrap();
        assert_eq!(store.latest(), Some(4));
    }
}
