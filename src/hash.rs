//! Hashing and fixed-width encoding helpers
//!
//! Proposal data and data hashes must match the bridge contract byte for
//! byte, so every encoding here follows the EVM's 32-byte word layout.

use eyre::{eyre, Result};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// keccak256 over the concatenation of several slices, without an intermediate buffer
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Left-pad a big-endian byte string into one 32-byte word.
///
/// Leading zero bytes beyond the word width are accepted and dropped, so a
/// 33-byte `0x00 ‖ value` still fits.
pub fn left_pad_32(bytes: &[u8]) -> Result<[u8; 32]> {
    let significant = match bytes.iter().position(|b| *b != 0) {
        Some(first) => &bytes[first..],
        None => &[][..],
    };
    if significant.len() > 32 {
        return Err(eyre!(
            "value of {} bytes does not fit in a 32-byte word",
            significant.len()
        ));
    }
    let mut word = [0u8; 32];
    word[32 - significant.len()..].copy_from_slice(significant);
    Ok(word)
}

/// Encode an integer as a 32-byte big-endian word (uint256 layout)
pub fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}
