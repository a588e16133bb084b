/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fixed set of validators that vote in consensus.

use std::{collections::HashMap, slice};

use super::{crypto_primitives::VerifyingKey, data_types::VerifyingKeyBytes};

/// Stores the identities of validators in a fixed, stable order.
///
/// ## Ordering of validators
///
/// Validators keep the order in which they were provided to [`new`](ValidatorSet::new). The position of a
/// validator in this order is its *index*, which is used for round-robin leader selection by the
/// [rotator](crate::pacemaker::rotator) and for duplicate-signer detection when validating
/// [`QuorumCert`](super::quorum_cert::QuorumCert)s. Every replica must therefore be configured with
/// the same ordering.
///
/// ## Fixed membership
///
/// A `ValidatorSet` cannot be changed after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorSet {
    validators: Vec<VerifyingKey>,
    positions: HashMap<VerifyingKeyBytes, usize>,
}

impl ValidatorSet {
    /// Create a validator set from an ordered list of keys. Repeated keys after the first occurrence
    /// are ignored.
    pub fn new(validators: impl IntoIterator<Item = VerifyingKey>) -> ValidatorSet {
        let mut ordered = Vec::new();
        let mut positions = HashMap::new();
        for validator in validators {
            let bytes = validator.to_bytes();
            if !positions.contains_key(&bytes) {
                positions.insert(bytes, ordered.len());
                ordered.push(validator);
            }
        }

        Self {
            validators: ordered,
            positions,
        }
    }

    /// Get the number of validators in the set.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check whether the validator set is empty (i.e., `self.len() == 0`).
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// The number of votes required to form a quorum certificate in this validator set.
    pub fn majority_count(&self) -> usize {
        majority_count(self.len())
    }

    /// The number of Byzantine validators this set tolerates.
    pub fn max_faulty(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Check whether `validator` is a member of the validator set.
    pub fn contains(&self, validator: &VerifyingKeyBytes) -> bool {
        self.positions.contains_key(validator)
    }

    /// Get the index of `validator`, if it is a member of the validator set.
    pub fn position(&self, validator: &VerifyingKeyBytes) -> Option<usize> {
        self.positions.get(validator).copied()
    }

    /// Get the validator at `index`.
    pub fn get(&self, index: usize) -> Option<&VerifyingKey> {
        self.validators.get(index)
    }

    /// Iterate over the validators in index order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }
}

/// The minimum number of signatures a [`QuorumCert`](super::quorum_cert::QuorumCert) needs in a
/// validator set of size `n`: `⌈(2n + 1) / 3⌉`.
pub const fn majority_count(n: usize) -> usize {
    (2 * n + 1 + 2) / 3
}
