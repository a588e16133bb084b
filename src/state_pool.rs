/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory store of uncommitted blocks and their certificates.
//!
//! The pool holds every block the replica has accepted but not yet committed, across all forks, plus
//! the most recently committed block. Committed blocks below it are served by
//! [`Storage`](crate::pluggables::Storage) instead. After every commit the pool is pruned of committed
//! ancestors and of blocks that can no longer become committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::pluggables::Storage;
use crate::types::{block::Block, data_types::CryptoHash, quorum_cert::QuorumCert};

#[derive(Default)]
struct Pool {
    blocks: HashMap<CryptoHash, Block>,
    qcs: HashMap<CryptoHash, QuorumCert>,
}

pub(crate) struct StatePool {
    pool: RwLock<Pool>,
}

impl StatePool {
    pub(crate) fn new() -> StatePool {
        StatePool {
            pool: RwLock::new(Pool::default()),
        }
    }

    /// Insert `block`, and remember its `justify` as the QC of the block it certifies. Returns false if
    /// the block was already present.
    pub(crate) fn insert_block(&self, block: Block) -> bool {
        let mut pool = self.pool.write();
        if pool.blocks.contains_key(&block.hash) {
            return false;
        }
        pool.qcs
            .entry(block.justify.block_hash)
            .or_insert_with(|| block.justify.clone());
        pool.blocks.insert(block.hash, block);
        true
    }

    pub(crate) fn insert_qc(&self, qc: QuorumCert) {
        self.pool.write().qcs.entry(qc.block_hash).or_insert(qc);
    }

    pub(crate) fn block(&self, hash: &CryptoHash) -> Option<Block> {
        self.pool.read().blocks.get(hash).cloned()
    }

    pub(crate) fn contains_block(&self, hash: &CryptoHash) -> bool {
        self.pool.read().blocks.contains_key(hash)
    }

    /// The QC certifying the block identified by `hash`, if the pool has seen one.
    pub(crate) fn qc(&self, hash: &CryptoHash) -> Option<QuorumCert> {
        self.pool.read().qcs.get(hash).cloned()
    }

    /// Prune the pool after `committed` was committed.
    ///
    /// Only `committed` and its descendants are kept. Ancestors of `committed` are dropped silently,
    /// and every other dropped block lies on an abandoned fork and is returned, so that its transactions
    /// can be handed back to the mempool.
    pub(crate) fn prune_on_commit(&self, committed: &Block) -> Vec<Block> {
        let mut pool = self.pool.write();

        let mut ancestors = HashSet::new();
        let mut cursor = committed.parent_hash;
        while let Some(parent) = pool.blocks.get(&cursor) {
            ancestors.insert(parent.hash);
            cursor = parent.parent_hash;
        }

        let mut by_height: Vec<&Block> = pool.blocks.values().collect();
        by_height.sort_by_key(|block| block.height);

        let mut alive = HashSet::from([committed.hash]);
        for block in by_height {
            if block.height > committed.height && alive.contains(&block.parent_hash) {
                alive.insert(block.hash);
            }
        }

        let mut forks = Vec::new();
        let removed: Vec<CryptoHash> = pool
            .blocks
            .keys()
            .filter(|hash| !alive.contains(*hash))
            .copied()
            .collect();
        for hash in removed {
            if let Some(block) = pool.blocks.remove(&hash) {
                if !ancestors.contains(&hash) {
                    forks.push(block);
                }
            }
        }
        pool.qcs.retain(|hash, _| alive.contains(hash));

        forks
    }

    pub(crate) fn block_count(&self) -> usize {
        self.pool.read().blocks.len()
    }

    pub(crate) fn qc_count(&self) -> usize {
        self.pool.read().qcs.len()
    }
}

/// Looks blocks up in the pool first and in storage second, so that callers see committed and
/// uncommitted blocks alike.
#[derive(Clone)]
pub(crate) struct BlockStore {
    pool: Arc<StatePool>,
    storage: Arc<dyn Storage>,
}

impl BlockStore {
    pub(crate) fn new(pool: Arc<StatePool>, storage: Arc<dyn Storage>) -> BlockStore {
        BlockStore { pool, storage }
    }

    pub(crate) fn block(&self, hash: &CryptoHash) -> Option<Block> {
        self.pool.block(hash).or_else(|| self.storage.block(hash))
    }

    pub(crate) fn contains(&self, hash: &CryptoHash) -> bool {
        self.pool.contains_block(hash) || self.storage.block(hash).is_some()
    }

    pub(crate) fn pool(&self) -> &StatePool {
        &self.pool
    }

    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}
