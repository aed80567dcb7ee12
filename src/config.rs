use eyre::{eyre, Result, WrapErr};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::listener::{ConfirmationPolicy, ListenerConfig, DEFAULT_BLOCK_CONFIRMATIONS};
use crate::retry::{
    RetryPolicy, BLOCK_RETRY_INTERVAL, BLOCK_RETRY_LIMIT, TX_RETRY_INTERVAL, TX_RETRY_LIMIT,
};
use crate::types::ChainId;
use crate::writer::WRITER_QUEUE_CAPACITY;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    /// Every configured chain, enabled or not
    pub chains: Vec<ChainConfig>,
    pub relayer: RelayerConfig,
    pub blockstore: BlockstoreConfig,
    pub api_port: u16,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

/// One chain the relayer listens on and writes to
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Human-readable name (e.g., "ethereum", "bsc")
    pub name: String,
    /// Bridge-level chain id
    pub id: ChainId,
    pub rpc_url: String,
    pub bridge_address: String,
    pub erc20_handler: String,
    pub start_block: u64,
    pub block_confirmations: u64,
    /// Read only blocks the chain reports final, ignoring `block_confirmations`
    pub use_finalized_head: bool,
    pub gas_limit: u64,
    /// Upper bound on the gas price the relayer pays, in wei
    pub max_gas_price: u128,
    pub enabled: bool,
}

impl ChainConfig {
    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        if self.use_finalized_head {
            ConfirmationPolicy::FinalizedHead
        } else {
            ConfirmationPolicy::BlockDelay(self.block_confirmations)
        }
    }
}

/// Settings shared by every chain
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    pub fresh_start: bool,
    pub latest_block: bool,
    pub block_retry_limit: u32,
    pub block_retry_interval_ms: u64,
    pub tx_retry_limit: u32,
    pub tx_retry_interval_ms: u64,
    pub queue_capacity: usize,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("fresh_start", &self.fresh_start)
            .field("latest_block", &self.latest_block)
            .field("block_retry_limit", &self.block_retry_limit)
            .field("block_retry_interval_ms", &self.block_retry_interval_ms)
            .field("tx_retry_limit", &self.tx_retry_limit)
            .field("tx_retry_interval_ms", &self.tx_retry_interval_ms)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl RelayerConfig {
    pub fn block_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.block_retry_limit,
            Duration::from_millis(self.block_retry_interval_ms),
        )
    }

    pub fn tx_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tx_retry_limit,
            Duration::from_millis(self.tx_retry_interval_ms),
        )
    }

    /// Listener settings for `chain`
    pub fn listener_config(&self, chain: &ChainConfig) -> ListenerConfig {
        ListenerConfig {
            start_block: chain.start_block,
            fresh_start: self.fresh_start,
            latest: self.latest_block,
            confirmation: chain.confirmation_policy(),
            retry: self.block_retry(),
        }
    }
}

/// Where poll cursors are persisted
#[derive(Clone)]
pub enum BlockstoreConfig {
    File { path: PathBuf },
    Postgres { url: String },
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for BlockstoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockstoreConfig::File { path } => f
                .debug_struct("File")
                .field("path", path)
                .finish(),
            BlockstoreConfig::Postgres { .. } => f
                .debug_struct("Postgres")
                .field("url", &"<redacted>")
                .finish(),
        }
    }
}

/// Default functions
fn default_gas_limit() -> u64 {
    6_721_975
}

fn default_max_gas_price() -> u128 {
    20_000_000_000
}

fn default_blockstore_path() -> PathBuf {
    PathBuf::from("./blockstore")
}

fn default_api_port() -> u16 {
    9090
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let count: usize = required("RELAYER_CHAINS_COUNT")?
            .parse()
            .wrap_err("RELAYER_CHAINS_COUNT must be a valid number")?;

        let mut chains = Vec::with_capacity(count);
        for i in 1..=count {
            chains.push(load_chain(i)?);
        }

        let relayer = RelayerConfig {
            private_key: required("RELAYER_PRIVATE_KEY")?,
            fresh_start: parsed_or("FRESH_START", false),
            latest_block: parsed_or("LATEST_BLOCK", false),
            block_retry_limit: parsed_or("BLOCK_RETRY_LIMIT", BLOCK_RETRY_LIMIT),
            block_retry_interval_ms: parsed_or(
                "BLOCK_RETRY_INTERVAL_MS",
                BLOCK_RETRY_INTERVAL.as_millis() as u64,
            ),
            tx_retry_limit: parsed_or("TX_RETRY_LIMIT", TX_RETRY_LIMIT),
            tx_retry_interval_ms: parsed_or(
                "TX_RETRY_INTERVAL_MS",
                TX_RETRY_INTERVAL.as_millis() as u64,
            ),
            queue_capacity: WRITER_QUEUE_CAPACITY,
        };

        let blockstore = match env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => BlockstoreConfig::Postgres { url },
            _ => BlockstoreConfig::File {
                path: env::var("BLOCKSTORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_blockstore_path()),
            },
        };

        let config = Config {
            chains,
            relayer,
            blockstore,
            api_port: parsed_or("API_PORT", default_api_port()),
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Get all enabled chains
    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled_chains().next().is_none() {
            return Err(eyre!("At least one enabled chain must be configured"));
        }

        let mut seen_ids = HashSet::new();
        for chain in &self.chains {
            if !seen_ids.insert(chain.id) {
                return Err(eyre!("Duplicate chain ID: {}", chain.id));
            }

            if chain.rpc_url.is_empty() {
                return Err(eyre!("rpc_url for chain {} cannot be empty", chain.name));
            }

            if !is_evm_address(&chain.bridge_address) {
                return Err(eyre!(
                    "Invalid bridge address for chain {}: {}",
                    chain.name,
                    chain.bridge_address
                ));
            }

            if !is_evm_address(&chain.erc20_handler) {
                return Err(eyre!(
                    "Invalid ERC20 handler address for chain {}: {}",
                    chain.name,
                    chain.erc20_handler
                ));
            }
        }

        if self.relayer.private_key.len() != 66 || !self.relayer.private_key.starts_with("0x") {
            return Err(eyre!(
                "relayer.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.relayer.block_retry_limit == 0 || self.relayer.tx_retry_limit == 0 {
            return Err(eyre!("retry limits must be at least 1"));
        }

        if self.relayer.fresh_start && self.relayer.latest_block {
            return Err(eyre!("FRESH_START and LATEST_BLOCK cannot both be set"));
        }

        Ok(())
    }
}

/// 42 chars with 0x prefix
fn is_evm_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Load chain `i` from `CHAIN_{i}_*`
fn load_chain(i: usize) -> Result<ChainConfig> {
    let prefix = format!("CHAIN_{}", i);
    let key = |field: &str| format!("{}_{}", prefix, field);

    let id: ChainId = required(&key("ID"))?
        .parse()
        .map_err(|_| eyre!("Invalid {}_ID (expected 0-255)", prefix))?;

    Ok(ChainConfig {
        name: env::var(key("NAME")).unwrap_or_else(|_| format!("chain_{}", i)),
        id,
        rpc_url: required(&key("RPC_URL"))?,
        bridge_address: required(&key("BRIDGE_ADDRESS"))?,
        erc20_handler: required(&key("ERC20_HANDLER"))?,
        start_block: parsed_or(&key("START_BLOCK"), 0),
        block_confirmations: parsed_or(&key("BLOCK_CONFIRMATIONS"), DEFAULT_BLOCK_CONFIRMATIONS),
        use_finalized_head: parsed_or(&key("USE_FINALIZED_HEAD"), false),
        gas_limit: parsed_or(&key("GAS_LIMIT"), default_gas_limit()),
        max_gas_price: parsed_or(&key("MAX_GAS_PRICE"), default_max_gas_price()),
        enabled: parsed_or(&key("ENABLED"), true),
    })
}
