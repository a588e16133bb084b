/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A signature bundled with the public key that produced it.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{Keypair, Signature as DalekSignature, Verifier, VerifyingKey},
    data_types::{SignatureBytes, VerifyingKeyBytes},
};

/// Raw Ed25519 signature bytes together with the serialized key of the signer.
///
/// Carrying the signer alongside the bytes lets a [`QuorumCert`](super::quorum_cert::QuorumCert)
/// be checked for duplicate or non-validator signers without consulting anything but the
/// [`ValidatorSet`](super::validator_set::ValidatorSet).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature {
    pub bytes: SignatureBytes,
    pub signer: VerifyingKeyBytes,
}

impl Signature {
    /// Sign `message` with `keypair`.
    pub fn create(keypair: &Keypair, message: &[u8]) -> Signature {
        Signature {
            bytes: keypair.sign(message),
            signer: keypair.public_bytes(),
        }
    }

    /// Check that this signature over `message` was produced by `signer`.
    ///
    /// Returns false if `signer` is not a valid Ed25519 point.
    pub fn verify(&self, message: &[u8]) -> bool {
        let Ok(public_key) = VerifyingKey::from_bytes(&self.signer) else {
            return false;
        };
        let signature = DalekSignature::from_bytes(&self.bytes.bytes());
        public_key.verify(message, &signature).is_ok()
    }
}
