/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [configuration](crate::config::Configuration::log_events).
//!
//! Logging goes through the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitBlock](crate::events::CommitBlockEvent) is printed:
//!
//! ```text
//! CommitBlock, 1701329264, fNGCJyk, 12, 3
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the hash of the committed
//!   block.
//! - The fourth value is the height of the committed block.
//! - The fifth value is the number of transactions that the block carried.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const PRUNE_BLOCK: &str = "PruneBlock";
pub const UPDATE_HIGHEST_QC: &str = "UpdateHighestQC";
pub const UPDATE_LOCKED_BLOCK: &str = "UpdateLockedBlock";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const NEW_VIEW: &str = "NewView";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_NEW_VIEW: &str = "ReceiveNewView";

pub const COLLECT_QC: &str = "CollectQC";
pub const VIEW_CHANGE: &str = "ViewChange";
pub const APPROVE_LEADER: &str = "ApproveLeader";
pub const VIEW_TIMEOUT: &str = "ViewTimeout";
pub const LEADER_TIMEOUT: &str = "LeaderTimeout";

pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const HALT: &str = "Halt";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |insert_block_event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(insert_block_event.timestamp),
                first_seven_base64_chars(&insert_block_event.block.hash.bytes()),
                insert_block_event.block.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                commit_block_event.transactions
            )
        };
        Box::new(logger)
    }
}

impl Logger for PruneBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |prune_block_event: &PruneBlockEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_BLOCK,
                secs_since_unix_epoch(prune_block_event.timestamp),
                first_seven_base64_chars(&prune_block_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateHighestQCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |update_highest_qc_event: &UpdateHighestQCEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_HIGHEST_QC,
                secs_since_unix_epoch(update_highest_qc_event.timestamp),
                first_seven_base64_chars(&update_highest_qc_event.highest_qc.block_hash.bytes()),
                update_highest_qc_event.block_height,
                first_seven_base64_chars(&update_highest_qc_event.proposer)
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateLockedBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |update_locked_block_event: &UpdateLockedBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_LOCKED_BLOCK,
                secs_since_unix_epoch(update_locked_block_event.timestamp),
                first_seven_base64_chars(&update_locked_block_event.block.bytes()),
                update_locked_block_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                first_seven_base64_chars(&propose_event.block.hash.bytes()),
                propose_event.block.height,
                propose_event.block.transactions.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                first_seven_base64_chars(&vote_event.vote.block_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |new_view_event: &NewViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                NEW_VIEW,
                secs_since_unix_epoch(new_view_event.timestamp),
                first_seven_base64_chars(&new_view_event.leader.to_bytes()),
                first_seven_base64_chars(&new_view_event.highest_qc.block_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_proposal_event.block.hash.bytes()),
                receive_proposal_event.block.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_vote_event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(receive_vote_event.timestamp),
                first_seven_base64_chars(&receive_vote_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_vote_event.vote.block_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveNewViewEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |receive_new_view_event: &ReceiveNewViewEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_NEW_VIEW,
                secs_since_unix_epoch(receive_new_view_event.timestamp),
                first_seven_base64_chars(&receive_new_view_event.origin.to_bytes()),
                first_seven_base64_chars(&receive_new_view_event.highest_qc.block_hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CollectQCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |collect_qc_event: &CollectQCEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COLLECT_QC,
                secs_since_unix_epoch(collect_qc_event.timestamp),
                first_seven_base64_chars(&collect_qc_event.quorum_certificate.block_hash.bytes()),
                collect_qc_event.quorum_certificate.signatures.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |view_change_event: &ViewChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                VIEW_CHANGE,
                secs_since_unix_epoch(view_change_event.timestamp),
                view_change_event.leader_index,
                first_seven_base64_chars(&view_change_event.leader.to_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApproveLeaderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |approve_leader_event: &ApproveLeaderEvent| {
            log::info!(
                "{}, {}, {}, {}",
                APPROVE_LEADER,
                secs_since_unix_epoch(approve_leader_event.timestamp),
                approve_leader_event.leader_index,
                first_seven_base64_chars(&approve_leader_event.leader.to_bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ViewTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |view_timeout_event: &ViewTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                VIEW_TIMEOUT,
                secs_since_unix_epoch(view_timeout_event.timestamp),
                view_timeout_event.leader_index,
                view_timeout_event.timeout
            )
        };
        Box::new(logger)
    }
}

impl Logger for LeaderTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |leader_timeout_event: &LeaderTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                LEADER_TIMEOUT,
                secs_since_unix_epoch(leader_timeout_event.timestamp),
                leader_timeout_event.leader_index,
                leader_timeout_event.timeout_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |start_sync_event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(start_sync_event.timestamp),
                first_seven_base64_chars(&start_sync_event.peer.to_bytes()),
                first_seven_base64_chars(&start_sync_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |end_sync_event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(end_sync_event.timestamp),
                first_seven_base64_chars(&end_sync_event.peer.to_bytes()),
                end_sync_event.blocks_synced
            )
        };
        Box::new(logger)
    }
}

impl Logger for HaltEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send + Sync> {
        let logger = |halt_event: &HaltEvent| {
            log::error!(
                "{}, {}, {}",
                HALT,
                secs_since_unix_epoch(halt_event.timestamp),
                halt_event.reason
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
