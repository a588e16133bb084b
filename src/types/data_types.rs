/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that uniquely identifies a blockchain.
///
/// The chain ID is folded into the [genesis block](super::block::Block::genesis), so replicas
/// configured with different chain IDs never agree on a common ancestor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Height of a block in the chain.
///
/// Starts at 0 for the genesis block, and increases by 1 for every block that extends its parent.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// The height directly above this one, or `None` if this is the highest representable height.
    pub fn checked_next(&self) -> Option<BlockHeight> {
        self.0.checked_add(1).map(BlockHeight)
    }

    /// Get the little-endian representation of the inner `u64` value of this `BlockHeight`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash.
///
/// Block hashes are always SHA256 digests (see [`Block::compute_hash`](super::block::Block::compute_hash)).
/// Transaction references are whatever 32-byte identifier the mempool hands out.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash. Used as the justify target of the genesis block, which has no predecessor.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
///
/// Produced using the [`ed25519_dalek`] crate, whose main definitions are re-exported from the
/// [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0[..8].fmt(f)
    }
}

/// Serialized form of an Ed25519 [`VerifyingKey`](super::crypto_primitives::VerifyingKey).
pub type VerifyingKeyBytes = [u8; 32];

/// Reference to a transaction held by the mempool. Blocks carry references, not bodies.
pub type TxRef = CryptoHash;

/// Wall-clock time in nanoseconds since the Unix Epoch, as stamped into blocks by their proposer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new `Timestamp` wrapping `nanos`.
    pub const fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();
        Self(nanos)
    }

    /// Get the inner `i64` value of this `Timestamp`.
    pub const fn int(&self) -> i64 {
        self.0
    }
}

/// A transaction body resolved by the mempool for execution.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Transaction {
    pub hash: TxRef,
    pub payload: Vec<u8>,
}

/// Capacity of a bounded channel, in number of messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSize(usize);

impl BufferSize {
    /// Create a new `BufferSize` wrapping `int`.
    pub const fn new(int: usize) -> Self {
        Self(int)
    }

    /// Get the inner `usize` of this `BufferSize`.
    pub const fn int(&self) -> usize {
        self.0
    }
}
