/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single validator's endorsement of a block.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use super::{
    crypto_primitives::Keypair,
    data_types::{CryptoHash, VerifyingKeyBytes},
    signature::Signature,
    validator_set::ValidatorSet,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub block_hash: CryptoHash,
    pub signature: Signature,
}

impl Vote {
    /// Sign a vote for `block_hash` with `keypair`.
    pub fn new(keypair: &Keypair, block_hash: CryptoHash) -> Vote {
        Vote {
            block_hash,
            signature: Signature::create(keypair, &block_hash.bytes()),
        }
    }

    /// The serialized key of the voter.
    pub fn voter(&self) -> VerifyingKeyBytes {
        self.signature.signer
    }

    /// Check that the voter is a validator and that the signature verifies against `block_hash`.
    pub fn validate(&self, validator_set: &ValidatorSet) -> Result<(), VoteError> {
        if !validator_set.contains(&self.signature.signer) {
            return Err(VoteError::InvalidValidator {
                signer: self.signature.signer,
            });
        }
        if !self.signature.verify(&self.block_hash.bytes()) {
            return Err(VoteError::InvalidSignature {
                signer: self.signature.signer,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("vote from invalid validator {signer:?}")]
    InvalidValidator { signer: VerifyingKeyBytes },

    #[error("invalid vote signature from {signer:?}")]
    InvalidSignature { signer: VerifyingKeyBytes },
}
