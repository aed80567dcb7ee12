use async_trait::async_trait;
use eyre::{eyre, Result};
use sqlx::PgPool;
use tracing::debug;

use super::Blockstore;
use crate::db;
use crate::types::ChainId;

/// Cursor kept in the `block_cursors` table, shared by relayers that point
/// at the same database
#[derive(Debug, Clone)]
pub struct PgBlockstore {
    pool: PgPool,
    chain_id: ChainId,
    relayer: String,
}

impl PgBlockstore {
    pub fn new(pool: PgPool, chain_id: ChainId, relayer: &str) -> Self {
        Self {
            pool,
            chain_id,
            relayer: relayer.to_lowercase(),
        }
    }
}

#[async_trait]
impl Blockstore for PgBlockstore {
    async fn store_block(&self, block: u64) -> Result<()> {
        let block = i64::try_from(block).map_err(|_| eyre!("block {} exceeds BIGINT", block))?;
        db::update_block_cursor(&self.pool, self.chain_id as i16, &self.relayer, block).await
    }

    async fn try_load_latest_block(&self) -> Result<Option<u64>> {
        let Some(cursor) =
            db::get_block_cursor(&self.pool, self.chain_id as i16, &self.relayer).await?
        else {
            return Ok(None);
        };
        debug!(
            chain_id = self.chain_id,
            block = cursor.block_number,
            updated_at = %cursor.updated_at,
            "Loaded block cursor"
        );
        u64::try_from(cursor.block_number)
            .map(Some)
            .map_err(|_| eyre!("negative block cursor {}", cursor.block_number))
    }
}
