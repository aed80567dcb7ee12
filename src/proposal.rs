//! Destination-chain proposals as observed by the relayer
//!
//! The relayer never owns a proposal. The first vote on-chain creates it, the
//! contract counts votes against the relayer threshold, and the relayer only
//! reads its status to decide between voting, executing and skipping.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{bytes32_to_hex, keccak256_concat, left_pad_32, u64_word};
use crate::types::{ChainId, DepositNonce, Message, MessageType, ResourceId};

/// On-chain proposal status
///
/// ```text
/// Inactive --first vote--> Active --threshold--> Passed --execute--> Transferred
///                            |                     |
///                            +------- expiry ------+-----> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    Inactive,
    Active,
    Passed,
    Transferred,
    Cancelled,
}

impl ProposalStatus {
    /// Decode the contract's `ProposalStatus` enum discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ProposalStatus::Inactive),
            1 => Some(ProposalStatus::Active),
            2 => Some(ProposalStatus::Passed),
            3 => Some(ProposalStatus::Transferred),
            4 => Some(ProposalStatus::Cancelled),
            _ => None,
        }
    }

    /// No vote or execution can change a terminal proposal
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Transferred | ProposalStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Inactive => "inactive",
            ProposalStatus::Active => "active",
            ProposalStatus::Passed => "passed",
            ProposalStatus::Transferred => "transferred",
            ProposalStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a proposal on the destination chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalKey {
    pub source: ChainId,
    pub deposit_nonce: DepositNonce,
    pub data_hash: [u8; 32],
}

impl fmt::Display for ProposalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source,
            self.deposit_nonce,
            bytes32_to_hex(&self.data_hash)
        )
    }
}

/// A proposal ready to be voted on: everything the chain adapter needs to
/// encode a vote or execute transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub key: ProposalKey,
    pub destination: ChainId,
    pub resource_id: ResourceId,
    pub data: Vec<u8>,
}

impl Proposal {
    /// Build the proposal for `message` as handled by `handler_address` on the
    /// destination chain.
    pub fn from_message(message: &Message, handler_address: &[u8]) -> Result<Self> {
        let data = match message.message_type() {
            MessageType::FungibleTransfer => {
                let amount = message
                    .amount()
                    .ok_or_else(|| eyre!("fungible transfer {} has no amount", message))?;
                let recipient = message
                    .recipient()
                    .ok_or_else(|| eyre!("fungible transfer {} has no recipient", message))?;
                fungible_transfer_data(amount, recipient)?
            }
        };

        Ok(Self {
            key: ProposalKey {
                source: message.source(),
                deposit_nonce: message.deposit_nonce(),
                data_hash: data_hash(handler_address, &data),
            },
            destination: message.destination(),
            resource_id: message.resource_id(),
            data,
        })
    }
}

/// `leftpad32(amount) ‖ leftpad32(len(recipient)) ‖ recipient`
pub fn fungible_transfer_data(amount: &[u8], recipient: &[u8]) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(64 + recipient.len());
    data.extend_from_slice(&left_pad_32(amount)?);
    data.extend_from_slice(&u64_word(recipient.len() as u64));
    data.extend_from_slice(recipient);
    Ok(data)
}

/// `keccak256(handler_address ‖ proposal_data)`
pub fn data_hash(handler_address: &[u8], proposal_data: &[u8]) -> [u8; 32] {
    keccak256_concat(&[handler_address, proposal_data])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;

    fn recipient() -> Vec<u8> {
        hex::decode("26db25c52b007221331a844e5335e59874e17965").unwrap()
    }

    fn handler() -> Vec<u8> {
        hex::decode("3167776db165d8ea0f51790ca2bbf44db5105adf").unwrap()
    }

    #[test]
    fn test_status_from_u8() {
        assert_eq!(ProposalStatus::from_u8(0), Some(ProposalStatus::Inactive));
        assert_eq!(ProposalStatus::from_u8(3), Some(ProposalStatus::Transferred));
        assert_eq!(ProposalStatus::from_u8(4), Some(ProposalStatus::Cancelled));
        assert_eq!(ProposalStatus::from_u8(5), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ProposalStatus::Inactive.is_terminal());
        assert!(!ProposalStatus::Active.is_terminal());
        assert!(!ProposalStatus::Passed.is_terminal());
        assert!(ProposalStatus::Transferred.is_terminal());
        assert!(ProposalStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_fungible_transfer_data_layout() {
        let amount = 15_000_000_000_000_000_000u128.to_be_bytes();
        let data = fungible_transfer_data(&amount, &recipient()).unwrap();

        assert_eq!(data.len(), 32 + 32 + 20);
        assert_eq!(&data[..16], &[0u8; 16]);
        assert_eq!(&data[16..32], &amount);
        assert_eq!(data[63], 20);
        assert_eq!(&data[32..63], &[0u8; 31]);
        assert_eq!(&data[64..], recipient().as_slice());
    }

    #[test]
    fn test_proposal_from_message() {
        let resource_id = ResourceId::from_hex(
            "0x000000000000000000000000000000a9e0095b8965c01e6a09c97938f3860901",
        )
        .unwrap();
        let amount = 15_000_000_000_000_000_000u128.to_be_bytes().to_vec();
        let msg = Message::fungible_transfer(2, 1, 5, resource_id, amount.clone(), recipient());

        let proposal = Proposal::from_message(&msg, &handler()).unwrap();
        let expected_data = fungible_transfer_data(&amount, &recipient()).unwrap();

        let mut preimage = handler();
        preimage.extend_from_slice(&expected_data);

        assert_eq!(proposal.key.source, 2);
        assert_eq!(proposal.key.deposit_nonce, 5);
        assert_eq!(proposal.destination, 1);
        assert_eq!(proposal.resource_id, resource_id);
        assert_eq!(proposal.data, expected_data);
        assert_eq!(proposal.key.data_hash, keccak256(&preimage));
    }

    #[test]
    fn test_data_hash_depends_on_handler() {
        let data = fungible_transfer_data(&[1], &recipient()).unwrap();
        assert_ne!(data_hash(&handler(), &data), data_hash(&[0u8; 20], &data));
    }
}
