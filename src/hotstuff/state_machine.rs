/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`HotStuff`] state machine.
//!
//! ## Chain state
//!
//! The state machine tracks five variables:
//! - `vote_height`: the height of the highest block this replica has voted for.
//! - `locked_block`: the block that a proposal must extend (or be justified above) to get our vote.
//! - `exec_block`: the highest committed block.
//! - `leaf_block`: the tip that the next proposal of this replica extends.
//! - `qc_high`: the highest QC known, together with the block it certifies.
//!
//! Each variable sits behind its own lock. No operation needs to update more than one of them
//! atomically, and all of them only grow in height, with one exception: `leaf_block`. It moves forward
//! to a freshly proposed block in [`on_propose`](HotStuff::on_propose), and to a higher block this
//! replica voted for in [`on_receive_proposal`](HotStuff::on_receive_proposal), if that block extends
//! the block of the highest QC. When a new highest QC certifies a block that the leaf does not extend,
//! the leaf falls back to that block. Blocks that only pass through [`update`](HotStuff::update) never
//! become the leaf.
//!
//! Following voted blocks keeps a new leader from proposing at a height that replicas have already
//! voted for, which would never gather a quorum.
//!
//! ## Safety rules
//!
//! A replica votes for `b` only if `b.height > vote_height` and either `b.justify` certifies a block
//! that extends `locked_block`, or it certifies a block higher than `locked_block`. Commits follow the
//! direct three-chain rule described in the [module docs](super).

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::data_types::{BlockHeight, CryptoHash};

use super::{
    protocol::{Driver, DriverError, ProtocolBlock, ProtocolQC, ProtocolVote},
    vote_collector::VoteCollector,
};

/// The highest QC known to a replica, together with the block it certifies.
#[derive(Clone, Debug)]
pub struct HighestQC<Q, B> {
    pub qc: Q,
    pub block: B,
}

pub struct HotStuff<D: Driver> {
    driver: D,
    vote_height: Mutex<Option<BlockHeight>>,
    locked_block: Mutex<Option<D::Block>>,
    exec_block: Mutex<Option<D::Block>>,
    leaf_block: Mutex<Option<D::Block>>,
    qc_high: Mutex<Option<HighestQC<D::QC, D::Block>>>,
    votes: Mutex<VoteCollector<D::Vote>>,
}

impl<D: Driver> HotStuff<D> {
    /// Create an uninitialized state machine. Every operation except [`init`](Self::init) fails with
    /// [`HotStuffError::NotInitialized`] until `init` is called.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            vote_height: Mutex::new(None),
            locked_block: Mutex::new(None),
            exec_block: Mutex::new(None),
            leaf_block: Mutex::new(None),
            qc_high: Mutex::new(None),
            votes: Mutex::new(VoteCollector::new()),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Start from the committed block `b0`, certified by `q0`. If `q0` certifies an ancestor of `b0`
    /// instead, the highest QC starts at that ancestor.
    pub fn init(&self, b0: D::Block, q0: D::QC) -> Result<(), HotStuffError> {
        let mut qc_high = self.qc_high.lock();
        if qc_high.is_some() {
            return Err(HotStuffError::AlreadyInitialized);
        }
        let qc_block = self
            .driver
            .block(&q0.block_hash())
            .unwrap_or_else(|| b0.clone());

        *self.vote_height.lock() = Some(b0.height());
        *self.locked_block.lock() = Some(b0.clone());
        *self.exec_block.lock() = Some(b0.clone());
        *self.leaf_block.lock() = Some(b0.clone());
        *qc_high = Some(HighestQC {
            qc: q0,
            block: qc_block,
        });
        Ok(())
    }

    /// Process a proposal that has already been validated and whose ancestors are known.
    ///
    /// Votes for `block` if the safety rules allow it, then runs [`update`](Self::update). A block
    /// that got our vote also becomes the leaf if it is higher and extends the block of the highest
    /// QC. Returns whether a vote was cast. Refusing to vote is not an error.
    pub fn on_receive_proposal(&self, block: &D::Block) -> Result<bool, HotStuffError> {
        let voted = {
            let mut vote_height = self.vote_height.lock();
            let current = vote_height.ok_or(HotStuffError::NotInitialized)?;
            if block.height() > current && self.respects_lock(block)? {
                *vote_height = Some(block.height());
                true
            } else {
                false
            }
        };

        if voted {
            if let Some(vote) = self.driver.vote_block(block) {
                self.on_receive_vote(vote)?;
            }
        }

        self.update(block)?;
        if voted {
            self.advance_leaf(block)?;
        }
        Ok(voted)
    }

    /// Count `vote`, and advance the highest QC once its block gathers a quorum.
    ///
    /// Duplicate votes from the same signer and votes for already-certified or already-committed
    /// blocks are dropped.
    pub fn on_receive_vote(&self, vote: D::Vote) -> Result<(), HotStuffError> {
        let block = self.lookup(&vote.block_hash())?;
        let exec = read(&self.exec_block)?;
        if block.height() <= exec.height() {
            return Ok(());
        }

        let quorum = self
            .votes
            .lock()
            .collect(vote, block.height(), self.driver.majority_count());

        if let Some(votes) = quorum {
            let qc = match self.driver.create_qc(block.hash(), &votes) {
                Ok(qc) => qc,
                Err(err) => {
                    self.votes.lock().uncertify(&block.hash());
                    return Err(HotStuffError::Driver(err));
                }
            };
            self.update_qc_high(qc)?;
        }

        Ok(())
    }

    /// Replace the highest QC with `qc` if `qc` certifies a strictly higher block. The leaf falls back
    /// to the newly certified block unless it already extends it. Returns whether the highest QC
    /// changed.
    pub fn update_qc_high(&self, qc: D::QC) -> Result<bool, HotStuffError> {
        let block = self.lookup(&qc.block_hash())?;
        {
            let mut qc_high = self.qc_high.lock();
            let current = qc_high.as_ref().ok_or(HotStuffError::NotInitialized)?;
            if block.height() <= current.block.height() {
                return Ok(false);
            }
            *qc_high = Some(HighestQC {
                qc: qc.clone(),
                block: block.clone(),
            });
        }

        {
            let mut leaf = self.leaf_block.lock();
            let keep = leaf
                .as_ref()
                .map_or(false, |leaf| self.extends(leaf, &block));
            if !keep {
                *leaf = Some(block.clone());
            }
        }
        self.driver.qc_high_updated(&qc, &block);
        Ok(true)
    }

    /// Apply the chain state changes implied by `b_new`: advance the highest QC, the lock, and commit
    /// if `b_new` completes a direct three-chain.
    pub fn update(&self, b_new: &D::Block) -> Result<(), HotStuffError> {
        let b1 = self.lookup(&b_new.justify().block_hash())?;
        self.update_qc_high(b_new.justify().clone())?;
        self.update_locked_block(&b1)?;

        if b1.height().int() == 0 {
            return Ok(());
        }
        let b0 = self.lookup(&b1.justify().block_hash())?;

        if b1.parent_hash() == b0.hash() && b_new.parent_hash() == b1.hash() {
            self.commit_chain(&b0)?;
        }
        Ok(())
    }

    /// Create a block extending the leaf, justified by the highest QC, and broadcast it.
    pub fn on_propose(&self) -> Result<D::Block, HotStuffError> {
        let leaf = read(&self.leaf_block)?;
        let qc_high = read(&self.qc_high)?;

        let height = leaf
            .height()
            .checked_next()
            .ok_or(HotStuffError::HeightOverflow(leaf.hash()))?;
        let block = self
            .driver
            .create_leaf(&leaf, qc_high.qc, height)
            .map_err(HotStuffError::Driver)?;
        *self.leaf_block.lock() = Some(block.clone());

        self.driver.broadcast_proposal(&block);
        Ok(block)
    }

    pub fn vote_height(&self) -> Result<BlockHeight, HotStuffError> {
        self.vote_height.lock().ok_or(HotStuffError::NotInitialized)
    }

    pub fn locked_block(&self) -> Result<D::Block, HotStuffError> {
        read(&self.locked_block)
    }

    pub fn exec_block(&self) -> Result<D::Block, HotStuffError> {
        read(&self.exec_block)
    }

    pub fn leaf_block(&self) -> Result<D::Block, HotStuffError> {
        read(&self.leaf_block)
    }

    pub fn qc_high(&self) -> Result<HighestQC<D::QC, D::Block>, HotStuffError> {
        read(&self.qc_high)
    }

    fn lookup(&self, hash: &CryptoHash) -> Result<D::Block, HotStuffError> {
        self.driver
            .block(hash)
            .ok_or(HotStuffError::MissingBlock(*hash))
    }

    /// Whether the block certified by `block.justify` extends the locked block, or is higher than it.
    fn respects_lock(&self, block: &D::Block) -> Result<bool, HotStuffError> {
        let locked = read(&self.locked_block)?;
        let Some(justified) = self.driver.block(&block.justify().block_hash()) else {
            return Ok(false);
        };
        Ok(justified.height() > locked.height() || self.extends(&justified, &locked))
    }

    /// Whether `ancestor` is `block` or one of its ancestors.
    fn extends(&self, block: &D::Block, ancestor: &D::Block) -> bool {
        let mut cursor = block.clone();
        loop {
            if cursor.hash() == ancestor.hash() {
                return true;
            }
            if cursor.height() <= ancestor.height() {
                return false;
            }
            match self.driver.block(&cursor.parent_hash()) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    /// Move the leaf to `block` if it is higher and extends the block of the highest QC.
    fn advance_leaf(&self, block: &D::Block) -> Result<(), HotStuffError> {
        let qc_high = read(&self.qc_high)?;
        let mut leaf = self.leaf_block.lock();
        let current = leaf.as_ref().ok_or(HotStuffError::NotInitialized)?;
        if block.height() > current.height() && self.extends(block, &qc_high.block) {
            *leaf = Some(block.clone());
        }
        Ok(())
    }

    fn update_locked_block(&self, b1: &D::Block) -> Result<(), HotStuffError> {
        {
            let mut locked = self.locked_block.lock();
            let current = locked.as_ref().ok_or(HotStuffError::NotInitialized)?;
            if b1.height() <= current.height() {
                return Ok(());
            }
            *locked = Some(b1.clone());
        }
        self.driver.locked_block_updated(b1);
        Ok(())
    }

    /// Commit `b0` and every uncommitted ancestor of it, lowest first.
    fn commit_chain(&self, b0: &D::Block) -> Result<(), HotStuffError> {
        let exec = read(&self.exec_block)?;
        if b0.height() <= exec.height() {
            if b0.height() == exec.height() && b0.hash() != exec.hash() {
                return Err(HotStuffError::SafetyViolation {
                    exec: exec.hash(),
                    block: b0.hash(),
                });
            }
            return Ok(());
        }

        let mut uncommitted = Vec::new();
        let mut cursor = b0.clone();
        while cursor.height() > exec.height() {
            let parent = self.driver.block(&cursor.parent_hash());
            uncommitted.push(cursor);
            cursor = parent.ok_or(HotStuffError::SafetyViolation {
                exec: exec.hash(),
                block: b0.hash(),
            })?;
        }
        if cursor.hash() != exec.hash() {
            return Err(HotStuffError::SafetyViolation {
                exec: exec.hash(),
                block: b0.hash(),
            });
        }

        for block in uncommitted.into_iter().rev() {
            self.driver.commit(&block).map_err(HotStuffError::Commit)?;
            *self.exec_block.lock() = Some(block);
        }
        self.votes.lock().prune(b0.height());
        Ok(())
    }
}

fn read<T: Clone>(cell: &Mutex<Option<T>>) -> Result<T, HotStuffError> {
    cell.lock().clone().ok_or(HotStuffError::NotInitialized)
}

#[derive(Debug, Error)]
pub enum HotStuffError {
    #[error("state machine has not been initialized")]
    NotInitialized,

    #[error("state machine has already been initialized")]
    AlreadyInitialized,

    #[error("block {0:?} is not known")]
    MissingBlock(CryptoHash),

    #[error("no height above block {0:?}")]
    HeightOverflow(CryptoHash),

    #[error("driver error: {0}")]
    Driver(#[source] DriverError),

    #[error("failed to commit block: {0}")]
    Commit(#[source] DriverError),

    #[error("block {block:?} does not extend the executed block {exec:?}")]
    SafetyViolation { exec: CryptoHash, block: CryptoHash },
}

impl HotStuffError {
    /// Whether the replica must stop after this error. Committed state may be inconsistent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HotStuffError::Commit(_) | HotStuffError::SafetyViolation { .. }
        )
    }
}
