//! Persisted poll cursor
//!
//! A blockstore remembers the last block a listener fully processed, keyed
//! by `(chain_id, relayer_address)`. Writes are best-effort and monotonic:
//! a height lower than the one already persisted is ignored.

use async_trait::async_trait;
use eyre::Result;

pub mod file;
pub mod mem;
pub mod postgres;

pub use file::FileBlockstore;
pub use mem::InMemoryBlockstore;
pub use postgres::PgBlockstore;

#[async_trait]
pub trait Blockstore: Send + Sync + 'static {
    /// Record `block` as processed
    async fn store_block(&self, block: u64) -> Result<()>;

    /// Last processed block, if one was ever stored
    async fn try_load_latest_block(&self) -> Result<Option<u64>>;
}
