//! Common types for cross-chain relaying
//!
//! A [`Message`] is the chain-agnostic record of one deposit. Listeners build
//! it exactly once from a decoded event; the router and writers only read it.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a participating chain, as registered on every bridge contract.
pub type ChainId = u8;

/// Per-source-chain deposit counter. `(ChainId, DepositNonce)` identifies a deposit.
pub type DepositNonce = u64;

/// 32-byte identifier mapping a token/resource consistently across chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResourceId(pub [u8; 32]);

impl ResourceId {
    /// Create from hex string (with or without 0x prefix)
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = hex::decode(hex)?;
        if bytes.len() != 32 {
            return Err(eyre!("ResourceId must be 32 bytes, got {}", bytes.len()));
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(&bytes);
        Ok(ResourceId(result))
    }

    /// Convert to hex string with 0x prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for ResourceId {
    fn from(bytes: [u8; 32]) -> Self {
        ResourceId(bytes)
    }
}

/// Kind of transfer a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Payload: `[amount (big-endian bytes), recipient (raw bytes)]`
    FungibleTransfer,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::FungibleTransfer => "FungibleTransfer",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable cross-chain transfer record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    source: ChainId,
    destination: ChainId,
    message_type: MessageType,
    deposit_nonce: DepositNonce,
    resource_id: ResourceId,
    payload: Vec<Vec<u8>>,
}

impl Message {
    /// Build a fungible transfer message
    pub fn fungible_transfer(
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        resource_id: ResourceId,
        amount: Vec<u8>,
        recipient: Vec<u8>,
    ) -> Self {
        Self {
            source,
            destination,
            message_type: MessageType::FungibleTransfer,
            deposit_nonce,
            resource_id,
            payload: vec![amount, recipient],
        }
    }

    pub fn source(&self) -> ChainId {
        self.source
    }

    pub fn destination(&self) -> ChainId {
        self.destination
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn deposit_nonce(&self) -> DepositNonce {
        self.deposit_nonce
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn payload(&self) -> &[Vec<u8>] {
        &self.payload
    }

    /// `(source, deposit_nonce)`, the unique identity of the underlying deposit
    pub fn deposit_key(&self) -> (ChainId, DepositNonce) {
        (self.source, self.deposit_nonce)
    }

    /// Amount bytes of a fungible transfer
    pub fn amount(&self) -> Option<&[u8]> {
        match self.message_type {
            MessageType::FungibleTransfer => self.payload.first().map(Vec::as_slice),
        }
    }

    /// Recipient bytes of a fungible transfer
    pub fn recipient(&self) -> Option<&[u8]> {
        match self.message_type {
            MessageType::FungibleTransfer => self.payload.get(1).map(Vec::as_slice),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} -> {}, nonce {}, resource {})",
            self.message_type, self.source, self.destination, self.deposit_nonce, self.resource_id
        )
    }
}
