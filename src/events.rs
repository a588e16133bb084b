/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by a replica, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published to
//! the [event bus](crate::event_bus), which delivers them to user-registered handlers, to the default
//! [loggers](crate::logging), and to internal subscribers such as the [pacemaker](crate::pacemaker).

use std::time::{Duration, SystemTime};

use ed25519_dalek::VerifyingKey;

use crate::event_bus::EventBus;
use crate::types::{
    block::Block,
    data_types::{BlockHeight, CryptoHash, VerifyingKeyBytes},
    quorum_cert::QuorumCert,
    vote::Vote,
};

#[derive(Clone, Debug)]
pub enum Event {
    // Events that change the chain state.
    InsertBlock(InsertBlockEvent),
    CommitBlock(CommitBlockEvent),
    PruneBlock(PruneBlockEvent),
    UpdateHighestQC(UpdateHighestQCEvent),
    UpdateLockedBlock(UpdateLockedBlockEvent),
    // Events that involve sending a message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    NewView(NewViewEvent),
    // Events that involve receiving a message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveNewView(ReceiveNewViewEvent),
    // Pacemaker events.
    CollectQC(CollectQCEvent),
    ViewChange(ViewChangeEvent),
    ApproveLeader(ApproveLeaderEvent),
    ViewTimeout(ViewTimeoutEvent),
    LeaderTimeout(LeaderTimeoutEvent),
    // Ancestor sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    // The replica stopped making progress after a fatal error.
    Halt(HaltEvent),
}

impl Event {
    pub(crate) fn publish(self, event_bus: &EventBus) {
        event_bus.publish(self)
    }
}

#[derive(Clone, Debug)]
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

#[derive(Clone, Debug)]
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub transactions: usize,
}

/// A block that was dropped from the state pool because it lies on an abandoned fork.
#[derive(Clone, Debug)]
pub struct PruneBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// Carries the full new highest QC, so a subscriber that misses intermediate updates still learns the
/// latest state from any later one.
#[derive(Clone, Debug)]
pub struct UpdateHighestQCEvent {
    pub timestamp: SystemTime,
    pub highest_qc: QuorumCert,
    pub block_height: BlockHeight,
    pub proposer: VerifyingKeyBytes,
}

#[derive(Clone, Debug)]
pub struct UpdateLockedBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

#[derive(Clone, Debug)]
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub block: Block,
}

#[derive(Clone, Debug)]
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

#[derive(Clone, Debug)]
pub struct NewViewEvent {
    pub timestamp: SystemTime,
    pub leader: VerifyingKey,
    pub highest_qc: QuorumCert,
}

#[derive(Clone, Debug)]
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub block: Block,
}

#[derive(Clone, Debug)]
pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: Vote,
}

#[derive(Clone, Debug)]
pub struct ReceiveNewViewEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub highest_qc: QuorumCert,
}

#[derive(Clone, Debug)]
pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCert,
}

/// The replica moved on to the next leader without waiting for the current one.
#[derive(Clone, Debug)]
pub struct ViewChangeEvent {
    pub timestamp: SystemTime,
    pub leader_index: usize,
    pub leader: VerifyingKey,
}

/// The replica accepted the proposer of a new highest QC as the current leader.
#[derive(Clone, Debug)]
pub struct ApproveLeaderEvent {
    pub timestamp: SystemTime,
    pub leader_index: usize,
    pub leader: VerifyingKey,
}

#[derive(Clone, Debug)]
pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub leader_index: usize,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct LeaderTimeoutEvent {
    pub timestamp: SystemTime,
    pub leader_index: usize,
    pub timeout_count: usize,
}

#[derive(Clone, Debug)]
pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub block: CryptoHash,
}

#[derive(Clone, Debug)]
pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub blocks_synced: u64,
}

#[derive(Clone, Debug)]
pub struct HaltEvent {
    pub timestamp: SystemTime,
    pub reason: String,
}
