//! Bridge and ERC20 handler ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. Only the calls and
//! events the relayer touches are declared.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Bridge contract: deposits, relayer votes and proposal execution
    #[sol(rpc)]
    contract Bridge {
        /// Mirror of the contract's proposal record. `_status` is the
        /// `ProposalStatus` enum discriminant.
        struct Proposal {
            bytes32 _resourceID;
            bytes32 _dataHash;
            address[] _yesVotes;
            address[] _noVotes;
            uint8 _status;
            uint256 _proposedBlock;
        }

        /// Emitted once per deposit on the source chain
        event Deposit(
            uint8 indexed destinationChainID,
            bytes32 indexed resourceID,
            uint64 indexed depositNonce
        );

        /// Bridge-level id of the chain this contract lives on
        function _chainID() external view returns (uint8);

        /// Votes a proposal needs before it passes
        function _relayerThreshold() external view returns (uint256);

        /// Keyed by `(depositNonce << 8) | originChainID`
        function _hasVotedOnProposal(uint72 destNonce, bytes32 dataHash, address relayer)
            external view returns (bool);

        function getProposal(uint8 originChainID, uint64 depositNonce, bytes32 dataHash)
            external view returns (Proposal memory);

        /// Vote for a proposal; the first vote creates it
        function voteProposal(
            uint8 chainID,
            uint64 depositNonce,
            bytes32 resourceID,
            bytes32 dataHash
        ) external;

        /// Execute a passed proposal through its handler
        function executeProposal(
            uint8 chainID,
            uint64 depositNonce,
            bytes data,
            bytes32 resourceID
        ) external;
    }
}

sol! {
    /// ERC20 handler: holds the amount and recipient of every deposit
    #[sol(rpc)]
    contract ERC20Handler {
        struct DepositRecord {
            address _tokenAddress;
            uint8 _lenDestinationRecipientAddress;
            uint8 _destinationChainID;
            bytes32 _resourceID;
            bytes _destinationRecipientAddress;
            address _depositer;
            uint256 _amount;
        }

        function getDepositRecord(uint64 depositNonce, uint8 destId)
            external view returns (DepositRecord memory);
    }
}

/// `_hasVotedOnProposal` key for a deposit
pub fn vote_key(source: u8, deposit_nonce: u64) -> u128 {
    (u128::from(deposit_nonce) << 8) | u128::from(source)
}
