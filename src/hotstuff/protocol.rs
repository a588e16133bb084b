/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Capability traits that connect the generic [`HotStuff`](super::state_machine::HotStuff) state
//! machine to concrete block, QC, and vote types, and to the side effects of the protocol.

use std::error::Error;

use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash, VerifyingKeyBytes},
    quorum_cert::QuorumCert,
    vote::Vote,
};

/// Error type returned by [`Driver`] methods. Boxed so that drivers are free to surface errors from
/// whatever storage or execution layer they wrap.
pub type DriverError = Box<dyn Error + Send + Sync + 'static>;

/// A certificate that some block was voted for by a quorum.
pub trait ProtocolQC: Clone + Send + Sync {
    fn block_hash(&self) -> CryptoHash;
}

/// A block as seen by the state machine. Two blocks are the same block iff their hashes are equal.
pub trait ProtocolBlock: Clone + Send + Sync {
    type QC: ProtocolQC;

    fn hash(&self) -> CryptoHash;

    fn height(&self) -> BlockHeight;

    fn parent_hash(&self) -> CryptoHash;

    fn justify(&self) -> &Self::QC;
}

pub trait ProtocolVote: Clone + Send + Sync {
    fn block_hash(&self) -> CryptoHash;

    fn signer(&self) -> VerifyingKeyBytes;
}

/// Everything the state machine needs from its environment.
///
/// All methods take `&self`: drivers are shared between the threads that feed the state machine and
/// synchronize internally.
pub trait Driver: Send + Sync {
    type Block: ProtocolBlock<QC = Self::QC>;
    type QC: ProtocolQC;
    type Vote: ProtocolVote;

    /// The number of distinct votes that certify a block.
    fn majority_count(&self) -> usize;

    /// Look up a block by its hash, whether committed or not.
    fn block(&self, hash: &CryptoHash) -> Option<Self::Block>;

    /// Create, sign, and store a new block extending `parent` and justified by `qc`.
    fn create_leaf(
        &self,
        parent: &Self::Block,
        qc: Self::QC,
        height: BlockHeight,
    ) -> Result<Self::Block, DriverError>;

    /// Aggregate `votes` for `block_hash` into a certificate.
    fn create_qc(&self, block_hash: CryptoHash, votes: &[Self::Vote])
        -> Result<Self::QC, DriverError>;

    fn broadcast_proposal(&self, block: &Self::Block);

    /// Vote for `block` and deliver the vote to its proposer.
    ///
    /// Returns the vote if this replica is itself the proposer, so that the state machine can count
    /// it without a network round-trip.
    fn vote_block(&self, block: &Self::Block) -> Option<Self::Vote>;

    /// Apply `block` to the replicated state. A failure here is unrecoverable.
    fn commit(&self, block: &Self::Block) -> Result<(), DriverError>;

    /// Called after the highest QC advanced to `qc`, which certifies `block`.
    fn qc_high_updated(&self, _qc: &Self::QC, _block: &Self::Block) {}

    fn locked_block_updated(&self, _block: &Self::Block) {}
}

impl ProtocolQC for QuorumCert {
    fn block_hash(&self) -> CryptoHash {
        self.block_hash
    }
}

impl ProtocolBlock for Block {
    type QC = QuorumCert;

    fn hash(&self) -> CryptoHash {
        self.hash
    }

    fn height(&self) -> BlockHeight {
        self.height
    }

    fn parent_hash(&self) -> CryptoHash {
        self.parent_hash
    }

    fn justify(&self) -> &QuorumCert {
        &self.justify
    }
}

impl ProtocolVote for Vote {
    fn block_hash(&self) -> CryptoHash {
        self.block_hash
    }

    fn signer(&self) -> VerifyingKeyBytes {
        self.signature.signer
    }
}
