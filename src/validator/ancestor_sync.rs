/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching the unknown ancestors of a block before it is accepted.
//!
//! A block may only enter the state pool once its whole parent chain is known, so that the state
//! machine can always walk from any pooled block down to the committed chain. [`sync_ancestors`]
//! walks down from a new block, requesting each unknown parent from the peer that sent the block,
//! until it reaches a known block. The walk is iterative and bounded by a maximum depth, so a
//! Byzantine peer cannot make a replica fetch an unbounded chain.
//!
//! Every fetched block is checked before the walk continues:
//! 1. Its hash is the one that was requested.
//! 2. It is [valid](Block::validate) on its own.
//! 3. The child's height is exactly one more than its height.
//!
//! Once the chain reaches a known block, the `justify` of every block in it must certify a block that
//! is known or was fetched.

use std::collections::HashSet;

use ed25519_dalek::VerifyingKey;
use thiserror::Error;

use crate::types::{
    block::{Block, BlockError},
    data_types::{BlockHeight, CryptoHash},
    validator_set::ValidatorSet,
};

/// Source of blocks requested from peers during ancestor sync.
pub trait BlockFetcher {
    /// Fetch the block with `hash` from `peer`. `Ok(None)` means the peer answered but does not know
    /// the block.
    fn fetch(&self, peer: &VerifyingKey, hash: &CryptoHash) -> Result<Option<Block>, SyncError>;
}

/// Parameters that stay fixed for every sync.
pub struct AncestorSync<'a> {
    pub validator_set: &'a ValidatorSet,
    pub genesis_hash: CryptoHash,
    pub max_depth: usize,
}

impl<'a> AncestorSync<'a> {
    /// Fetch the unknown ancestors of `block` from `peer`.
    ///
    /// `lookup` resolves blocks that are already known locally. Returns the fetched ancestors ordered
    /// from lowest to highest, so they can be inserted parent first. `block` itself is not included.
    pub fn sync_ancestors(
        &self,
        block: &Block,
        peer: &VerifyingKey,
        fetcher: &impl BlockFetcher,
        lookup: impl Fn(&CryptoHash) -> Option<Block>,
    ) -> Result<Vec<Block>, SyncError> {
        let mut fetched: Vec<Block> = Vec::new();
        let mut child = block.clone();

        loop {
            if let Some(parent) = lookup(&child.parent_hash) {
                check_height(&child, &parent)?;
                break;
            }

            if fetched.len() >= self.max_depth {
                return Err(SyncError::DepthExceeded {
                    max_depth: self.max_depth,
                });
            }

            let parent = fetcher
                .fetch(peer, &child.parent_hash)?
                .ok_or(SyncError::NotFound {
                    hash: child.parent_hash,
                })?;
            if parent.hash != child.parent_hash {
                return Err(SyncError::UnexpectedBlock {
                    requested: child.parent_hash,
                    got: parent.hash,
                });
            }
            parent
                .validate(self.validator_set, &self.genesis_hash)
                .map_err(SyncError::InvalidBlock)?;
            check_height(&child, &parent)?;

            fetched.push(parent.clone());
            child = parent;
        }

        let fetched_hashes: HashSet<CryptoHash> = fetched.iter().map(|b| b.hash).collect();
        for b in fetched.iter().chain(std::iter::once(block)) {
            let justified = b.justify.block_hash;
            if b.justify.is_genesis(&self.genesis_hash) {
                continue;
            }
            if !fetched_hashes.contains(&justified) && lookup(&justified).is_none() {
                return Err(SyncError::MissingJustify { hash: justified });
            }
        }

        fetched.reverse();
        Ok(fetched)
    }
}

fn check_height(child: &Block, parent: &Block) -> Result<(), SyncError> {
    let expected = parent
        .height
        .checked_next()
        .ok_or(SyncError::HeightOverflow { hash: parent.hash })?;
    if child.height != expected {
        return Err(SyncError::HeightMismatch {
            expected,
            got: child.height,
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("timed out waiting for block {hash:?}")]
    Timeout { hash: CryptoHash },

    #[error("peer does not know block {hash:?}")]
    NotFound { hash: CryptoHash },

    #[error("requested block {requested:?} but received {got:?}")]
    UnexpectedBlock { requested: CryptoHash, got: CryptoHash },

    #[error("expected a block at height {expected}, got height {got}")]
    HeightMismatch {
        expected: BlockHeight,
        got: BlockHeight,
    },

    #[error("block {hash:?} has no height above it")]
    HeightOverflow { hash: CryptoHash },

    #[error("more than {max_depth} unknown ancestors")]
    DepthExceeded { max_depth: usize },

    #[error("fetched an invalid block: {0}")]
    InvalidBlock(#[source] BlockError),

    #[error("block {hash:?} certified by a justify is unknown")]
    MissingJustify { hash: CryptoHash },

    #[error("block responses channel disconnected")]
    Disconnected,
}
