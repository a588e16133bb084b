/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`QuorumCert`] type: proof that a majority of validators voted for a block.

use std::collections::HashSet;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{data_types::CryptoHash, signature::Signature, validator_set::ValidatorSet};

/// Proof that at least [`majority_count`](ValidatorSet::majority_count) distinct validators have
/// voted for the block identified by `block_hash`.
///
/// A quorum certificate is the only way a block can become justified: every block carries the QC of
/// its parent in its [`justify`](super::block::Block::justify) field.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCert {
    pub block_hash: CryptoHash,
    pub signatures: Vec<Signature>,
}

impl QuorumCert {
    /// Create a QC for `block_hash` from an already-collected set of signatures.
    pub fn new(block_hash: CryptoHash, signatures: Vec<Signature>) -> QuorumCert {
        QuorumCert {
            block_hash,
            signatures,
        }
    }

    /// The certificate of the genesis block. It carries no signatures; it is trusted because every
    /// replica derives the genesis block locally.
    pub fn genesis(genesis_hash: CryptoHash) -> QuorumCert {
        QuorumCert {
            block_hash: genesis_hash,
            signatures: Vec::new(),
        }
    }

    /// Check whether this is the genesis QC of the chain whose genesis block is `genesis_hash`.
    pub fn is_genesis(&self, genesis_hash: &CryptoHash) -> bool {
        self.signatures.is_empty() && self.block_hash == *genesis_hash
    }

    /// Check that the certificate holds at least a majority of distinct validator signatures, each
    /// of which verifies against `block_hash`.
    ///
    /// The checks run in this order and the first failure is returned: signature count, duplicate
    /// signers, membership, signature correctness.
    pub fn validate(&self, validator_set: &ValidatorSet) -> Result<(), QuorumCertError> {
        let required = validator_set.majority_count();
        if self.signatures.len() < required {
            return Err(QuorumCertError::NotEnoughSignatures {
                required,
                got: self.signatures.len(),
            });
        }

        let mut signers = HashSet::with_capacity(self.signatures.len());
        for signature in &self.signatures {
            if !signers.insert(signature.signer) {
                return Err(QuorumCertError::DuplicateSigner {
                    signer: signature.signer,
                });
            }
        }

        for signature in &self.signatures {
            if !validator_set.contains(&signature.signer) {
                return Err(QuorumCertError::InvalidValidator {
                    signer: signature.signer,
                });
            }
        }

        let message = self.block_hash.bytes();
        for signature in &self.signatures {
            if !signature.verify(&message) {
                return Err(QuorumCertError::InvalidSignature {
                    signer: signature.signer,
                });
            }
        }

        Ok(())
    }

    /// Like [`validate`](Self::validate), but also accepts the genesis QC.
    pub fn validate_or_genesis(
        &self,
        validator_set: &ValidatorSet,
        genesis_hash: &CryptoHash,
    ) -> Result<(), QuorumCertError> {
        if self.is_genesis(genesis_hash) {
            return Ok(());
        }
        self.validate(validator_set)
    }
}

/// The ways a [`QuorumCert`] can fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumCertError {
    #[error("not enough signatures: required {required}, got {got}")]
    NotEnoughSignatures { required: usize, got: usize },

    #[error("duplicate signer {signer:?}")]
    DuplicateSigner { signer: [u8; 32] },

    #[error("invalid validator {signer:?}")]
    InvalidValidator { signer: [u8; 32] },

    #[error("invalid signature from {signer:?}")]
    InvalidSignature { signer: [u8; 32] },
}
