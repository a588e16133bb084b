/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`ChainDriver`]: binds the generic [`HotStuff`](crate::hotstuff::state_machine::HotStuff) state
//! machine to concrete [`Block`]s, the [state pool](crate::state_pool), the pluggable collaborators,
//! the network, and the event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

use crate::config::DriverConfiguration;
use crate::event_bus::EventBus;
use crate::events::*;
use crate::hotstuff::protocol::{Driver, DriverError};
use crate::networking::{messages::Proposal, network::Network, sending::SenderHandle};
use crate::pluggables::{CommitData, Execution, Mempool};
use crate::state_pool::BlockStore;
use crate::types::{
    block::{Block, BlockContents},
    data_types::{BlockHeight, CryptoHash, Timestamp},
    quorum_cert::QuorumCert,
    vote::Vote,
};

/// How often [`vote_block`](ChainDriver::vote_block) checks whether the mempool has become non-empty.
const MEMPOOL_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct ChainDriver<N: Network> {
    config: DriverConfiguration,
    blocks: BlockStore,
    mempool: Arc<dyn Mempool>,
    execution: Arc<dyn Execution>,
    sender: SenderHandle<N>,
    event_bus: Arc<EventBus>,
    committed_tx_count: AtomicU64,
}

impl<N: Network> ChainDriver<N> {
    pub(crate) fn new(
        config: DriverConfiguration,
        blocks: BlockStore,
        mempool: Arc<dyn Mempool>,
        execution: Arc<dyn Execution>,
        network: N,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            blocks,
            mempool,
            execution,
            sender: SenderHandle::new(network),
            event_bus,
            committed_tx_count: AtomicU64::new(0),
        }
    }

    /// Add `block` to the state pool, publishing an event if it was not there yet.
    pub(crate) fn insert_block(&self, block: Block) {
        if self.blocks.pool().insert_block(block.clone()) {
            Event::InsertBlock(InsertBlockEvent {
                timestamp: SystemTime::now(),
                block,
            })
            .publish(&self.event_bus);
        }
    }

    pub(crate) fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub(crate) fn mempool(&self) -> &dyn Mempool {
        self.mempool.as_ref()
    }

    pub(crate) fn committed_tx_count(&self) -> u64 {
        self.committed_tx_count.load(Ordering::Relaxed)
    }
}

impl<N: Network> Driver for ChainDriver<N> {
    type Block = Block;
    type QC = QuorumCert;
    type Vote = Vote;

    fn majority_count(&self) -> usize {
        self.config.validator_set.majority_count()
    }

    fn block(&self, hash: &CryptoHash) -> Option<Block> {
        self.blocks.block(hash)
    }

    fn create_leaf(
        &self,
        parent: &Block,
        qc: QuorumCert,
        height: BlockHeight,
    ) -> Result<Block, DriverError> {
        let storage = self.blocks.storage();
        let transactions = self.mempool.pop_txs_from_queue(self.config.block_tx_limit);
        let block = Block::new(
            &self.config.keypair,
            BlockContents {
                height,
                parent_hash: parent.hash,
                justify: qc,
                exec_height: storage.block_height(),
                state_root: storage.state_root(),
                transactions,
                timestamp: Timestamp::now(),
            },
        );
        self.insert_block(block.clone());
        Ok(block)
    }

    fn create_qc(&self, block_hash: CryptoHash, votes: &[Vote]) -> Result<QuorumCert, DriverError> {
        if let Some(vote) = votes.iter().find(|vote| vote.block_hash != block_hash) {
            return Err(Box::new(ChainDriverError::MismatchedVote {
                expected: block_hash,
                got: vote.block_hash,
            }));
        }

        let qc = QuorumCert::new(
            block_hash,
            votes.iter().map(|vote| vote.signature.clone()).collect(),
        );
        Event::CollectQC(CollectQCEvent {
            timestamp: SystemTime::now(),
            quorum_certificate: qc.clone(),
        })
        .publish(&self.event_bus);
        Ok(qc)
    }

    fn broadcast_proposal(&self, block: &Block) {
        self.sender.broadcast(Proposal {
            block: block.clone(),
        });
        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            block: block.clone(),
        })
        .publish(&self.event_bus);
    }

    fn vote_block(&self, block: &Block) -> Option<Vote> {
        let vote = Vote::new(&self.config.keypair, block.hash);
        self.mempool.set_txs_pending(&block.transactions);
        Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            vote: vote.clone(),
        })
        .publish(&self.event_bus);

        if block.proposer == self.config.keypair.public_bytes() {
            return Some(vote);
        }

        let deadline = Instant::now() + self.config.tx_wait_time;
        while self.mempool.status().total == 0 && Instant::now() < deadline {
            thread::sleep(MEMPOOL_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }

        if !self.sender.send_to(&block.proposer, vote) {
            log::warn!("Could not send vote: proposer key of block at height {} is invalid", block.height);
        }
        None
    }

    /// Execute and persist `block`. The QC stored with it certifies it, unless the block was never
    /// certified and is committed only as an ancestor of a certified block. Then the QC it carries is
    /// stored instead.
    fn commit(&self, block: &Block) -> Result<(), DriverError> {
        let qc = self
            .blocks
            .pool()
            .qc(&block.hash)
            .unwrap_or_else(|| block.justify.clone());

        let (transactions, skipped) = self.mempool.txs_to_execute(&block.transactions);
        if !skipped.is_empty() {
            log::debug!(
                "Skipping {} unknown or already committed transactions in block at height {}",
                skipped.len(),
                block.height
            );
        }

        let (block_commit, tx_commits) = self
            .execution
            .execute(block, &transactions)
            .map_err(ChainDriverError::Execution)?;
        let tx_count = transactions.len();

        self.blocks
            .storage()
            .commit(CommitData {
                block: block.clone(),
                qc,
                transactions,
                block_commit,
                tx_commits,
            })
            .map_err(ChainDriverError::Storage)?;

        self.mempool.remove_txs(&block.transactions);
        for fork in self.blocks.pool().prune_on_commit(block) {
            self.mempool.put_txs_to_queue(&fork.transactions);
            Event::PruneBlock(PruneBlockEvent {
                timestamp: SystemTime::now(),
                block: fork.hash,
            })
            .publish(&self.event_bus);
        }

        self.committed_tx_count
            .fetch_add(tx_count as u64, Ordering::Relaxed);
        Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash,
            height: block.height,
            transactions: tx_count,
        })
        .publish(&self.event_bus);
        Ok(())
    }

    fn qc_high_updated(&self, qc: &QuorumCert, block: &Block) {
        self.blocks.pool().insert_qc(qc.clone());
        Event::UpdateHighestQC(UpdateHighestQCEvent {
            timestamp: SystemTime::now(),
            highest_qc: qc.clone(),
            block_height: block.height,
            proposer: block.proposer,
        })
        .publish(&self.event_bus);
    }

    fn locked_block_updated(&self, block: &Block) {
        Event::UpdateLockedBlock(UpdateLockedBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash,
            height: block.height,
        })
        .publish(&self.event_bus);
    }
}

#[derive(Debug, Error)]
pub enum ChainDriverError {
    #[error("vote for {got:?} cannot certify {expected:?}")]
    MismatchedVote { expected: CryptoHash, got: CryptoHash },

    #[error("execution failed: {0}")]
    Execution(#[source] crate::pluggables::PluggableError),

    #[error("storage commit failed: {0}")]
    Storage(#[source] crate::pluggables::PluggableError),
}
