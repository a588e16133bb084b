/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the collaborators that a replica drives but does not implement: the transaction pool,
//! persistent storage, and block execution.
//!
//! Implementations are shared between the replica's threads behind an [`Arc`](std::sync::Arc), so
//! every method takes `&self` and implementations synchronize internally.

use std::error::Error;

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::VerifyingKey;

use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash, Transaction, TxRef},
    quorum_cert::QuorumCert,
};

/// Error returned by a collaborator. Any such error on the commit path halts the replica.
pub type PluggableError = Box<dyn Error + Send + Sync + 'static>;

/// Counts of the transactions a [`Mempool`] holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MempoolStatus {
    pub total: usize,
    pub queue: usize,
    pub pending: usize,
}

/// Pool of transactions waiting to be included in a block.
///
/// A transaction is either *queued* (available to the next proposal) or *pending* (referenced by an
/// uncommitted block). Committed transactions are removed.
pub trait Mempool: Send + Sync {
    /// Take up to `max` queued transactions, marking them pending.
    fn pop_txs_from_queue(&self, max: usize) -> Vec<TxRef>;

    fn set_txs_pending(&self, txs: &[TxRef]);

    /// Return transactions from an abandoned fork to the queue.
    fn put_txs_to_queue(&self, txs: &[TxRef]);

    fn remove_txs(&self, txs: &[TxRef]);

    /// Fetch from `peer` the bodies of any of `txs` that this mempool does not have.
    fn sync_txs(&self, peer: &VerifyingKey, txs: &[TxRef]) -> Result<(), PluggableError>;

    /// Whether every transaction referenced by a proposal is known and acceptable.
    fn verify_proposal_txs(&self, txs: &[TxRef]) -> bool;

    /// Resolve `txs` into bodies for execution. The second element lists references that must be
    /// skipped, because they are unknown or were already committed.
    fn txs_to_execute(&self, txs: &[TxRef]) -> (Vec<Transaction>, Vec<TxRef>);

    fn status(&self) -> MempoolStatus;
}

/// Persistent record of committed blocks and of the state they produced.
pub trait Storage: Send + Sync {
    /// Hash of the genesis block this storage was initialized with, if any.
    fn genesis_hash(&self) -> Option<CryptoHash>;

    /// Persist the genesis block of a fresh chain. Afterwards [`block`](Self::block) must return it and
    /// [`genesis_hash`](Self::genesis_hash) must return its hash.
    fn init_genesis(&self, genesis: &Block) -> Result<(), PluggableError>;

    /// The highest committed block and the QC it was committed with (see [`CommitData::qc`]).
    fn last_committed(&self) -> Option<(Block, QuorumCert)>;

    /// Height of the highest committed block, or 0 if nothing has been committed.
    fn block_height(&self) -> BlockHeight;

    /// State root after executing the highest committed block.
    fn state_root(&self) -> CryptoHash;

    fn block(&self, hash: &CryptoHash) -> Option<Block>;

    /// Persist `data` atomically: either everything in it is applied, or nothing is.
    fn commit(&self, data: CommitData) -> Result<(), PluggableError>;
}

/// Executes the transactions of committed blocks.
pub trait Execution: Send + Sync {
    fn execute(
        &self,
        block: &Block,
        txs: &[Transaction],
    ) -> Result<(BlockCommit, Vec<TxCommit>), PluggableError>;
}

/// The outcome of executing a block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockCommit {
    pub state_root: CryptoHash,
    pub output: Vec<u8>,
}

/// The outcome of executing a single transaction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxCommit {
    pub tx: TxRef,
    pub success: bool,
    pub output: Vec<u8>,
}

/// Everything that [`Storage::commit`] persists for one block.
#[derive(Clone, Debug)]
pub struct CommitData {
    pub block: Block,
    /// The QC that certifies `block`. A block that was committed as the uncertified ancestor of a
    /// certified block has none, and carries its own `justify` here instead.
    pub qc: QuorumCert,
    pub transactions: Vec<Transaction>,
    pub block_commit: BlockCommit,
    pub tx_commits: Vec<TxCommit>,
}
