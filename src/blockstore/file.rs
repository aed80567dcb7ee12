use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tokio::sync::Mutex;
use tracing::debug;

use super::Blockstore;
use crate::types::ChainId;

/// One decimal height per `(chain, relayer)` in a plain file
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous cursor intact.
#[derive(Debug)]
pub struct FileBlockstore {
    path: PathBuf,
    high_water: Mutex<Option<u64>>,
}

impl FileBlockstore {
    /// Cursor file for `chain_id`/`relayer` under `dir`. The directory is
    /// created on first write.
    pub fn new(dir: impl AsRef<Path>, chain_id: ChainId, relayer: &str) -> Self {
        let relayer = relayer.to_lowercase();
        let path = dir
            .as_ref()
            .join(format!("{}-{}.block", chain_id, relayer));
        Self {
            path,
            high_water: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<u64>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .wrap_err_with(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u64>()
            .map(Some)
            .map_err(|e| eyre!("Corrupt block file {}: {}", self.path.display(), e))
    }
}

#[async_trait]
impl Blockstore for FileBlockstore {
    async fn store_block(&self, block: u64) -> Result<()> {
        let mut high_water = self.high_water.lock().await;
        if high_water.is_none() {
            *high_water = self.read_file().await?;
        }
        if matches!(*high_water, Some(current) if block <= current) {
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("block.tmp");
        tokio::fs::write(&tmp, block.to_string())
            .await
            .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .wrap_err_with(|| format!("Failed to move block file into {}", self.path.display()))?;

        *high_water = Some(block);
        debug!(path = %self.path.display(), block, "Stored block cursor");
        Ok(())
    }

    async fn try_load_latest_block(&self) -> Result<Option<u64>> {
        let stored = self.read_file().await?;
        let mut high_water = self.high_water.lock().await;
        if high_water.is_none() {
            *high_water = stored;
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "relayer-blockstore-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = scratch_dir("missing");
        let store = FileBlockstore::new(&dir, 1, "0xABC");
        assert_eq!(store.try_load_latest_block().await.unwrap(), None);
        assert!(store.path().ends_with("1-0xabc.block"));
    }

    #[tokio::test]
    async fn test_store_and_reload() {
        let dir = scratch_dir("reload");
        let store = FileBlockstore::new(&dir, 2, "0xabc");
        store.store_block(41).await.unwrap();
        store.store_block(42).await.unwrap();

        let reopened = FileBlockstore::new(&dir, 2, "0xabc");
        assert_eq!(reopened.try_load_latest_block().await.unwrap(), Some(42));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_lower_height_ignored_across_instances() {
        let dir = scratch_dir("monotonic");
        FileBlockstore::new(&dir, 3, "0xabc")
            .store_block(100)
            .await
            .unwrap();

        let store = FileBlockstore::new(&dir, 3, "0xabc");
        store.store_block(90).await.unwrap();
        assert_eq!(store.try_load_latest_block().await.unwrap(), Some(100));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let store = FileBlockstore::new(&dir, 4, "0xabc");
        std::fs::write(store.path(), "not-a-number").unwrap();
        assert!(store.try_load_latest_block().await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
