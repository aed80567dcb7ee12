//! [`Connection`] over an EVM bridge deployment
//!
//! Reads go through the same wallet-backed provider that signs votes and
//! executions. Nonce and gas price are refreshed from the node each time the
//! writer locks the transaction options.

use std::sync::RwLock;
use std::time::Duration;

use alloy::{
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{aliases::U72, Address, Bytes, U64},
    providers::{
        fillers::{FillProvider, JoinFill, WalletFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::{Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::contracts::{vote_key, Bridge, ERC20Handler};
use crate::config::ChainConfig;
use crate::connection::{Connection, DepositEvent, OptsGuard, TxOpts};
use crate::proposal::{Proposal, ProposalKey, ProposalStatus};
use crate::types::{ChainId, ResourceId};

/// How long a submitted transaction may take to be mined
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

type SignerProvider = FillProvider<
    JoinFill<Identity, WalletFiller<EthereumWallet>>,
    RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

/// Just the block number out of an `eth_getBlockByNumber` response
#[derive(Debug, Deserialize)]
struct BlockNumber {
    number: U64,
}

pub struct EvmConnection {
    id: ChainId,
    name: String,
    bridge: Address,
    handler: Address,
    relayer: Address,
    provider: SignerProvider,
    opts: Mutex<TxOpts>,
    max_gas_price: u128,
    /// EIP-155 chain id, read on connect
    native_chain_id: RwLock<Option<u64>>,
    threshold: RwLock<Option<u64>>,
}

impl EvmConnection {
    pub fn new(chain: &ChainConfig, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;
        let relayer = signer.address();

        let bridge: Address = chain
            .bridge_address
            .parse()
            .wrap_err_with(|| format!("Invalid bridge address for chain {}", chain.name))?;
        let handler: Address = chain
            .erc20_handler
            .parse()
            .wrap_err_with(|| format!("Invalid ERC20 handler address for chain {}", chain.name))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .on_http(
                chain
                    .rpc_url
                    .parse()
                    .map_err(|e| eyre!("Invalid RPC URL for chain {}: {}", chain.name, e))?,
            );

        Ok(Self {
            id: chain.id,
            name: chain.name.clone(),
            bridge,
            handler,
            relayer,
            provider,
            opts: Mutex::new(TxOpts {
                gas_limit: chain.gas_limit,
                ..TxOpts::default()
            }),
            max_gas_price: chain.max_gas_price,
            native_chain_id: RwLock::new(None),
            threshold: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bridge_address(&self) -> Address {
        self.bridge
    }

    fn native_chain_id(&self) -> Result<u64> {
        self.native_chain_id
            .read()
            .map_err(|_| eyre!("chain id lock poisoned"))?
            .ok_or_else(|| eyre!("chain {} is not connected", self.id))
    }

    /// Sign with the locked options, broadcast, and wait for a successful receipt
    async fn send(&self, opts: &mut TxOpts, tx: TransactionRequest) -> Result<String> {
        let tx = tx
            .with_from(self.relayer)
            .with_nonce(opts.nonce)
            .with_gas_price(opts.gas_price)
            .with_gas_limit(opts.gas_limit)
            .with_chain_id(self.native_chain_id()?);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .wrap_err("Failed to send transaction")?;
        opts.nonce += 1;

        let tx_hash = *pending.tx_hash();
        debug!(chain_id = self.id, tx_hash = %tx_hash, nonce = opts.nonce - 1, "Transaction broadcast");

        let receipt = tokio::time::timeout(RECEIPT_TIMEOUT, pending.get_receipt())
            .await
            .map_err(|_| eyre!("Transaction {} timed out after {:?}", tx_hash, RECEIPT_TIMEOUT))?
            .wrap_err("Failed to get transaction receipt")?;

        if !receipt.status() {
            return Err(eyre!("Transaction {} reverted", tx_hash));
        }
        Ok(tx_hash.to_string())
    }
}

#[async_trait]
impl Connection for EvmConnection {
    fn chain_id(&self) -> ChainId {
        self.id
    }

    fn relayer_address(&self) -> String {
        self.relayer.to_string()
    }

    async fn connect(&self) -> Result<()> {
        let native = self
            .provider
            .get_chain_id()
            .await
            .wrap_err_with(|| format!("Failed to reach RPC for chain {}", self.name))?;

        let bridge = Bridge::new(self.bridge, &self.provider);
        let bridge_chain = bridge
            ._chainID()
            .call()
            .await
            .wrap_err("Failed to read bridge chain id")?
            ._0;
        if bridge_chain != self.id {
            return Err(eyre!(
                "Bridge at {} reports chain id {}, configured as {}",
                self.bridge,
                bridge_chain,
                self.id
            ));
        }

        *self
            .native_chain_id
            .write()
            .map_err(|_| eyre!("chain id lock poisoned"))? = Some(native);

        info!(
            chain_id = self.id,
            name = %self.name,
            native_chain_id = native,
            bridge = %self.bridge,
            relayer = %self.relayer,
            "Connected to EVM chain"
        );
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut threshold) = self.threshold.write() {
            *threshold = None;
        }
        debug!(chain_id = self.id, "EVM connection closed");
    }

    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")
    }

    async fn finalized_block(&self) -> Result<u64> {
        let block: Option<BlockNumber> = self
            .provider
            .raw_request("eth_getBlockByNumber".into(), ("finalized", false))
            .await
            .wrap_err("Failed to get finalized block")?;
        block
            .map(|b| b.number.to::<u64>())
            .ok_or_else(|| eyre!("chain {} has no finalized block", self.id))
    }

    async fn lock_and_update_opts<'a>(&'a self) -> Result<OptsGuard<'a>> {
        let mut opts = self.opts.lock().await;

        opts.nonce = self
            .provider
            .get_transaction_count(self.relayer)
            .pending()
            .await
            .wrap_err("Failed to get nonce")?;

        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")?;
        if gas_price > self.max_gas_price {
            warn!(
                chain_id = self.id,
                gas_price,
                max_gas_price = self.max_gas_price,
                "Gas price above cap, using cap"
            );
        }
        opts.gas_price = gas_price.min(self.max_gas_price);

        Ok(opts)
    }

    async fn deposit_events(&self, block: u64) -> Result<Vec<DepositEvent>> {
        let filter = Filter::new()
            .address(self.bridge)
            .event_signature(Bridge::Deposit::SIGNATURE_HASH)
            .from_block(block)
            .to_block(block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("Failed to get deposit logs for block {}", block))?;

        let handler = ERC20Handler::new(self.handler, &self.provider);
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let deposit = log
                .log_decode::<Bridge::Deposit>()
                .wrap_err("Failed to decode Deposit event")?
                .inner
                .data;

            let record = handler
                .getDepositRecord(deposit.depositNonce, deposit.destinationChainID)
                .call()
                .await
                .wrap_err_with(|| {
                    format!("Failed to get deposit record {}", deposit.depositNonce)
                })?
                ._0;

            events.push(DepositEvent {
                source: self.id,
                destination: deposit.destinationChainID,
                deposit_nonce: deposit.depositNonce,
                resource_id: ResourceId(deposit.resourceID.0),
                amount: record._amount.to_be_bytes::<32>().to_vec(),
                recipient: record._destinationRecipientAddress.to_vec(),
            });
        }
        Ok(events)
    }

    async fn proposal_status(&self, key: &ProposalKey) -> Result<ProposalStatus> {
        let bridge = Bridge::new(self.bridge, &self.provider);
        let proposal = bridge
            .getProposal(key.source, key.deposit_nonce, key.data_hash.into())
            .call()
            .await
            .wrap_err_with(|| format!("Failed to get proposal {}", key))?
            ._0;
        ProposalStatus::from_u8(proposal._status)
            .ok_or_else(|| eyre!("unknown proposal status {} for {}", proposal._status, key))
    }

    async fn has_voted(&self, key: &ProposalKey) -> Result<bool> {
        let bridge = Bridge::new(self.bridge, &self.provider);
        let voted = bridge
            ._hasVotedOnProposal(
                U72::from(vote_key(key.source, key.deposit_nonce)),
                key.data_hash.into(),
                self.relayer,
            )
            .call()
            .await
            .wrap_err_with(|| format!("Failed to check vote on {}", key))?
            ._0;
        Ok(voted)
    }

    async fn relayer_threshold(&self) -> Result<u64> {
        let cached = *self
            .threshold
            .read()
            .map_err(|_| eyre!("threshold lock poisoned"))?;
        if let Some(threshold) = cached {
            return Ok(threshold);
        }

        let bridge = Bridge::new(self.bridge, &self.provider);
        let threshold = bridge
            ._relayerThreshold()
            .call()
            .await
            .wrap_err("Failed to get relayer threshold")?
            ._0
            .saturating_to::<u64>();

        *self
            .threshold
            .write()
            .map_err(|_| eyre!("threshold lock poisoned"))? = Some(threshold);
        Ok(threshold)
    }

    async fn submit_vote(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String> {
        let bridge = Bridge::new(self.bridge, &self.provider);
        let tx = bridge
            .voteProposal(
                proposal.key.source,
                proposal.key.deposit_nonce,
                proposal.resource_id.0.into(),
                proposal.key.data_hash.into(),
            )
            .into_transaction_request();
        self.send(opts, tx).await
    }

    async fn submit_execute(&self, opts: &mut TxOpts, proposal: &Proposal) -> Result<String> {
        let bridge = Bridge::new(self.bridge, &self.provider);
        let tx = bridge
            .executeProposal(
                proposal.key.source,
                proposal.key.deposit_nonce,
                Bytes::from(proposal.data.clone()),
                proposal.resource_id.0.into(),
            )
            .into_transaction_request();
        self.send(opts, tx).await
    }
}
