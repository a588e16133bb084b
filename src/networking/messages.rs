/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Every message variant that replicas exchange.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{block::Block, data_types::CryptoHash, quorum_cert::QuorumCert, vote::Vote};

/// All message variants used by a replica.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// See: [`Proposal`].
    Proposal(Proposal),

    /// A vote, sent only to the proposer of the block voted for.
    Vote(Vote),

    /// See: [`NewView`].
    NewView(NewView),

    /// See: [`BlockRequest`].
    BlockRequest(BlockRequest),

    /// See: [`BlockResponse`].
    BlockResponse(BlockResponse),
}

/// Broadcasted by the leader to propose a new block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub block: Block,
}

/// Sent to the next leader on a view change, so that it can propose on top of the highest QC known to
/// the sender.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub highest_qc: QuorumCert,
}

/// Ask a peer for the block with hash `hash`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockRequest {
    pub hash: CryptoHash,
}

/// Answer to a [`BlockRequest`]. `block` is None if the peer does not know the block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockResponse {
    pub hash: CryptoHash,
    pub block: Option<Block>,
}

impl From<Proposal> for Message {
    fn from(value: Proposal) -> Self {
        Message::Proposal(value)
    }
}

impl From<Vote> for Message {
    fn from(value: Vote) -> Self {
        Message::Vote(value)
    }
}

impl From<NewView> for Message {
    fn from(value: NewView) -> Self {
        Message::NewView(value)
    }
}

impl From<BlockRequest> for Message {
    fn from(value: BlockRequest) -> Self {
        Message::BlockRequest(value)
    }
}

impl From<BlockResponse> for Message {
    fn from(value: BlockResponse) -> Self {
        Message::BlockResponse(value)
    }
}
