/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accumulation of votes into quorums.

use std::collections::{HashMap, HashSet};

use crate::types::data_types::{BlockHeight, CryptoHash, VerifyingKeyBytes};

use super::protocol::ProtocolVote;

/// Votes for a single block.
struct Tally<V> {
    height: BlockHeight,
    votes: Vec<V>,
    signers: HashSet<VerifyingKeyBytes>,
    certified: bool,
}

/// Collects votes per block hash until a block has gathered `majority_count` distinct signers.
///
/// Each block is certified at most once: once a quorum has been returned for a block, further votes
/// for it are dropped.
pub(crate) struct VoteCollector<V: ProtocolVote> {
    tallies: HashMap<CryptoHash, Tally<V>>,
}

impl<V: ProtocolVote> VoteCollector<V> {
    pub(crate) fn new() -> Self {
        Self {
            tallies: HashMap::new(),
        }
    }

    /// Add `vote` for a block at `height`. Returns the collected votes if this vote completes a quorum.
    pub(crate) fn collect(
        &mut self,
        vote: V,
        height: BlockHeight,
        majority_count: usize,
    ) -> Option<Vec<V>> {
        let tally = self.tallies.entry(vote.block_hash()).or_insert_with(|| Tally {
            height,
            votes: Vec::new(),
            signers: HashSet::new(),
            certified: false,
        });

        if tally.certified || !tally.signers.insert(vote.signer()) {
            return None;
        }
        tally.votes.push(vote);

        if tally.votes.len() >= majority_count {
            tally.certified = true;
            Some(tally.votes.clone())
        } else {
            None
        }
    }

    /// Undo the certification of `block_hash`, e.g. because building its QC failed, so that a later vote
    /// can complete it again.
    pub(crate) fn uncertify(&mut self, block_hash: &CryptoHash) {
        if let Some(tally) = self.tallies.get_mut(block_hash) {
            tally.certified = false;
        }
    }

    /// Forget every block at or below `height`.
    pub(crate) fn prune(&mut self, height: BlockHeight) {
        self.tallies.retain(|_, tally| tally.height > height);
    }
}
