/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [`Block`] type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::{hash_parts, Keypair},
    data_types::{
        BlockHeight, ChainID, CryptoHash, SignatureBytes, Timestamp, TxRef, VerifyingKeyBytes,
    },
    quorum_cert::{QuorumCert, QuorumCertError},
    signature::Signature,
    validator_set::ValidatorSet,
};

/// A proposal for the next entry in the replicated log.
///
/// `hash` is a SHA256 digest over every field except `signature` and `hash` itself, and `signature`
/// is the proposer's signature over `hash`. `justify` is the QC of the block that this block's
/// proposer considered the highest certified block at the time of proposing; in the common case it
/// certifies `parent_hash`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub parent_hash: CryptoHash,
    pub proposer: VerifyingKeyBytes,
    pub justify: QuorumCert,
    pub exec_height: BlockHeight,
    pub state_root: CryptoHash,
    pub transactions: Vec<TxRef>,
    pub timestamp: Timestamp,
    pub signature: SignatureBytes,
    pub hash: CryptoHash,
}

/// Everything a proposer decides when building a block; turned into a [`Block`] by
/// [`Block::new`].
#[derive(Clone, Debug)]
pub struct BlockContents {
    pub height: BlockHeight,
    pub parent_hash: CryptoHash,
    pub justify: QuorumCert,
    pub exec_height: BlockHeight,
    pub state_root: CryptoHash,
    pub transactions: Vec<TxRef>,
    pub timestamp: Timestamp,
}

impl Block {
    /// Hash `contents` and sign the hash with `keypair`.
    pub fn new(keypair: &Keypair, contents: BlockContents) -> Block {
        let proposer = keypair.public_bytes();
        let hash = Block::compute_hash(
            contents.height,
            &contents.parent_hash,
            &proposer,
            &contents.justify,
            contents.exec_height,
            &contents.state_root,
            &contents.transactions,
            contents.timestamp,
        );
        let signature = keypair.sign(&hash.bytes());

        Block {
            height: contents.height,
            parent_hash: contents.parent_hash,
            proposer,
            justify: contents.justify,
            exec_height: contents.exec_height,
            state_root: contents.state_root,
            transactions: contents.transactions,
            timestamp: contents.timestamp,
            signature,
            hash,
        }
    }

    /// The deterministic height-0 block of the chain identified by `chain_id`.
    ///
    /// Its `parent_hash` commits to the chain ID, so two chains never share a genesis. It is unsigned
    /// and its `justify` points at the zero hash; it is never sent over the network.
    pub fn genesis(chain_id: ChainID) -> Block {
        let height = BlockHeight::new(0);
        let parent_hash = hash_parts(&[b"genesis", &chain_id.int().to_le_bytes()]);
        let proposer = [0u8; 32];
        let justify = QuorumCert::new(CryptoHash::zero(), Vec::new());
        let exec_height = BlockHeight::new(0);
        let state_root = CryptoHash::zero();
        let timestamp = Timestamp::new(0);
        let hash = Block::compute_hash(
            height,
            &parent_hash,
            &proposer,
            &justify,
            exec_height,
            &state_root,
            &[],
            timestamp,
        );

        Block {
            height,
            parent_hash,
            proposer,
            justify,
            exec_height,
            state_root,
            transactions: Vec::new(),
            timestamp,
            signature: SignatureBytes::new([0u8; 64]),
            hash,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compute_hash(
        height: BlockHeight,
        parent_hash: &CryptoHash,
        proposer: &VerifyingKeyBytes,
        justify: &QuorumCert,
        exec_height: BlockHeight,
        state_root: &CryptoHash,
        transactions: &[TxRef],
        timestamp: Timestamp,
    ) -> CryptoHash {
        hash_parts(&[
            &height.to_le_bytes(),
            &parent_hash.bytes(),
            proposer,
            &borsh_bytes(justify),
            &exec_height.to_le_bytes(),
            &state_root.bytes(),
            &borsh_bytes(&transactions.to_vec()),
            &timestamp.int().to_le_bytes(),
        ])
    }

    /// Check whether this is a height-0 block.
    pub fn is_genesis(&self) -> bool {
        self.height.int() == 0
    }

    /// Check that the block is well-formed: the hash recomputes, the proposer is a validator whose
    /// signature over the hash verifies, and `justify` is a valid QC (or the genesis QC).
    ///
    /// That `height` is one more than the parent's height can only be checked against the parent, and
    /// is done during ancestor sync.
    pub fn validate(
        &self,
        validator_set: &ValidatorSet,
        genesis_hash: &CryptoHash,
    ) -> Result<(), BlockError> {
        let expected = Block::compute_hash(
            self.height,
            &self.parent_hash,
            &self.proposer,
            &self.justify,
            self.exec_height,
            &self.state_root,
            &self.transactions,
            self.timestamp,
        );
        if expected != self.hash {
            return Err(BlockError::InvalidHash);
        }

        if !validator_set.contains(&self.proposer) {
            return Err(BlockError::InvalidProposer {
                proposer: self.proposer,
            });
        }

        let signature = Signature {
            bytes: self.signature,
            signer: self.proposer,
        };
        if !signature.verify(&self.hash.bytes()) {
            return Err(BlockError::InvalidSignature);
        }

        self.justify
            .validate_or_genesis(validator_set, genesis_hash)
            .map_err(BlockError::InvalidJustify)
    }
}

/// Borsh-encode `value` into a fresh buffer. Encoding into a `Vec` cannot fail for the types used
/// here, so an encoding error yields the bytes written so far.
pub(crate) fn borsh_bytes<T: BorshSerialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    let _ = value.serialize(&mut bytes);
    bytes
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("block hash does not match its contents")]
    InvalidHash,

    #[error("proposer {proposer:?} is not a validator")]
    InvalidProposer { proposer: VerifyingKeyBytes },

    #[error("invalid proposer signature")]
    InvalidSignature,

    #[error("invalid justify: {0}")]
    InvalidJustify(#[source] QuorumCertError),
}
