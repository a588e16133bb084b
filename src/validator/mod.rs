/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Intake of proposals, votes, and new-view messages.
//!
//! The validator runs one thread per kind of inbound message. Each thread checks a message on its
//! own (signatures, membership, certificate sizes), fetches whatever ancestors it refers to without
//! holding any lock, and only then takes the update-exclusion lock to hand the message to the
//! [`HotStuff`] state machine. The same lock is held by the
//! [pacemaker's](crate::pacemaker) beat loop, so every change to the chain state is serialized.
//!
//! ## Voting conditions
//!
//! A valid proposal is always applied with [`update`](HotStuff::update), but the replica only
//! considers voting for it (through [`on_receive_proposal`](HotStuff::on_receive_proposal)) if:
//! 1. Its proposer is the leader that the [rotator](crate::pacemaker::rotator) currently expects.
//! 2. Its `exec_height` and `state_root` match the local committed height and state root.
//! 3. The mempool accepts its transactions.
//!
//! Messages that fail validation are dropped and logged. Errors are never reported back to peers.

pub mod ancestor_sync;

use std::iter;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use thiserror::Error;

use crate::block_sync::client::BlockSyncClient;
use crate::config::ValidatorConfiguration;
use crate::driver::ChainDriver;
use crate::event_bus::EventBus;
use crate::events::*;
use crate::hotstuff::state_machine::{HotStuff, HotStuffError};
use crate::logging::first_seven_base64_chars;
use crate::networking::{
    messages::{NewView, Proposal},
    network::Network,
};
use crate::pacemaker::rotator::Rotator;
use crate::pluggables::PluggableError;
use crate::replica::{stop_requested, HaltSignal};
use crate::types::{
    block::{Block, BlockError},
    quorum_cert::QuorumCertError,
    vote::{Vote, VoteError},
};

use self::ancestor_sync::{AncestorSync, BlockFetcher, SyncError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct Validator<N: Network> {
    config: ValidatorConfiguration,
    hotstuff: Arc<HotStuff<ChainDriver<N>>>,
    rotator: Arc<Mutex<Rotator>>,
    update_lock: Arc<Mutex<()>>,
    sync_client: BlockSyncClient<N>,
    event_bus: Arc<EventBus>,
    halt: HaltSignal,
}

impl<N: Network> Validator<N> {
    pub(crate) fn new(
        config: ValidatorConfiguration,
        hotstuff: Arc<HotStuff<ChainDriver<N>>>,
        rotator: Arc<Mutex<Rotator>>,
        update_lock: Arc<Mutex<()>>,
        sync_client: BlockSyncClient<N>,
        event_bus: Arc<EventBus>,
        halt: HaltSignal,
    ) -> Self {
        Self {
            config,
            hotstuff,
            rotator,
            update_lock,
            sync_client,
            event_bus,
            halt,
        }
    }

    /// Spawn the proposal, vote, and new-view threads, in that order.
    pub(crate) fn start(
        self: Arc<Self>,
        proposals: Receiver<(VerifyingKey, Proposal)>,
        votes: Receiver<(VerifyingKey, Vote)>,
        new_views: Receiver<(VerifyingKey, NewView)>,
        shutdown_signals: [Receiver<()>; 3],
    ) -> [JoinHandle<()>; 3] {
        let [proposal_shutdown, vote_shutdown, new_view_shutdown] = shutdown_signals;
        [
            Arc::clone(&self).spawn_intake(proposals, proposal_shutdown, Self::on_receive_proposal),
            Arc::clone(&self).spawn_intake(votes, vote_shutdown, Self::on_receive_vote),
            self.spawn_intake(new_views, new_view_shutdown, Self::on_receive_new_view),
        ]
    }

    fn spawn_intake<T: Send + 'static>(
        self: Arc<Self>,
        messages: Receiver<(VerifyingKey, T)>,
        shutdown_signal: Receiver<()>,
        handle: fn(&Self, VerifyingKey, T) -> Result<(), ValidatorError>,
    ) -> JoinHandle<()> {
        thread::spawn(move || loop {
            if stop_requested(&shutdown_signal, &self.halt) {
                return;
            }

            match messages.recv_timeout(POLL_INTERVAL) {
                Ok((origin, msg)) => {
                    if let Err(err) = handle(&*self, origin, msg) {
                        self.report(&origin, err);
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn on_receive_proposal(
        &self,
        origin: VerifyingKey,
        proposal: Proposal,
    ) -> Result<(), ValidatorError> {
        let block = proposal.block;
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            block: block.clone(),
        })
        .publish(&self.event_bus);

        // A block fetched earlier as an ancestor is in the pool but may still deserve a vote.
        let driver = self.hotstuff.driver();
        if driver.blocks().pool().contains_block(&block.hash)
            && self.hotstuff.vote_height()? >= block.height
        {
            return Ok(());
        }
        block.validate(&self.config.validator_set, &self.config.genesis_hash)?;

        self.accept_block(&origin, &block)?;

        let _guard = self.update_lock.lock();
        if self.should_vote_for(&block) {
            self.hotstuff.on_receive_proposal(&block)?;
        } else {
            self.hotstuff.update(&block)?;
        }
        Ok(())
    }

    fn on_receive_vote(&self, origin: VerifyingKey, vote: Vote) -> Result<(), ValidatorError> {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin,
            vote: vote.clone(),
        })
        .publish(&self.event_bus);

        vote.validate(&self.config.validator_set)?;

        let _guard = self.update_lock.lock();
        self.hotstuff.on_receive_vote(vote)?;
        Ok(())
    }

    fn on_receive_new_view(
        &self,
        origin: VerifyingKey,
        new_view: NewView,
    ) -> Result<(), ValidatorError> {
        let qc = new_view.highest_qc;
        Event::ReceiveNewView(ReceiveNewViewEvent {
            timestamp: SystemTime::now(),
            origin,
            highest_qc: qc.clone(),
        })
        .publish(&self.event_bus);

        qc.validate_or_genesis(&self.config.validator_set, &self.config.genesis_hash)?;

        if !self.hotstuff.driver().blocks().contains(&qc.block_hash) {
            let block = self
                .sync_client
                .fetch(&origin, &qc.block_hash)?
                .ok_or(SyncError::NotFound { hash: qc.block_hash })?;
            if block.hash != qc.block_hash {
                return Err(SyncError::UnexpectedBlock {
                    requested: qc.block_hash,
                    got: block.hash,
                }
                .into());
            }
            block.validate(&self.config.validator_set, &self.config.genesis_hash)?;
            self.accept_block(&origin, &block)?;
        }

        let _guard = self.update_lock.lock();
        self.hotstuff.update_qc_high(qc)?;
        Ok(())
    }

    /// Sync the ancestors of `block` and the transactions of every block involved, then insert them all
    /// into the state pool, parents first.
    fn accept_block(&self, origin: &VerifyingKey, block: &Block) -> Result<(), ValidatorError> {
        let driver = self.hotstuff.driver();
        let blocks = driver.blocks();

        let parent_known = blocks.contains(&block.parent_hash);
        if !parent_known {
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                peer: *origin,
                block: block.hash,
            })
            .publish(&self.event_bus);
        }

        let sync = AncestorSync {
            validator_set: &self.config.validator_set,
            genesis_hash: self.config.genesis_hash,
            max_depth: self.config.max_sync_depth,
        };
        let ancestors =
            sync.sync_ancestors(block, origin, &self.sync_client, |hash| blocks.block(hash))?;

        if !parent_known {
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                peer: *origin,
                blocks_synced: ancestors.len() as u64,
            })
            .publish(&self.event_bus);
        }

        for b in ancestors.iter().chain(iter::once(block)) {
            driver
                .mempool()
                .sync_txs(origin, &b.transactions)
                .map_err(ValidatorError::TxSync)?;
        }

        for ancestor in ancestors {
            driver.insert_block(ancestor);
        }
        driver.insert_block(block.clone());
        Ok(())
    }

    fn should_vote_for(&self, block: &Block) -> bool {
        let leader_index = self.rotator.lock().leader_index();
        let expected_leader = self
            .config
            .validator_set
            .get(leader_index)
            .map(|leader| leader.to_bytes());
        if expected_leader != Some(block.proposer) {
            log::debug!(
                "Not voting for block at height {}: {} is not the current leader",
                block.height,
                first_seven_base64_chars(&block.proposer)
            );
            return false;
        }

        let driver = self.hotstuff.driver();
        let storage = driver.blocks().storage();
        if block.exec_height != storage.block_height() || block.state_root != storage.state_root() {
            log::debug!(
                "Not voting for block at height {}: executed state does not match (exec height {} vs {})",
                block.height,
                block.exec_height,
                storage.block_height()
            );
            return false;
        }

        if !driver.mempool().verify_proposal_txs(&block.transactions) {
            log::debug!(
                "Not voting for block at height {}: transactions rejected by the mempool",
                block.height
            );
            return false;
        }

        true
    }

    fn report(&self, origin: &VerifyingKey, err: ValidatorError) {
        if err.is_fatal() {
            self.halt.halt(&err.to_string());
        } else {
            log::debug!(
                "Dropped message from {}: {}",
                first_seven_base64_chars(&origin.to_bytes()),
                err
            );
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("invalid vote: {0}")]
    InvalidVote(#[from] VoteError),

    #[error("invalid quorum certificate: {0}")]
    InvalidQC(#[from] QuorumCertError),

    #[error("ancestor sync failed: {0}")]
    Sync(#[from] SyncError),

    #[error("transaction sync failed: {0}")]
    TxSync(#[source] PluggableError),

    #[error(transparent)]
    HotStuff(#[from] HotStuffError),
}

impl ValidatorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidatorError::HotStuff(err) if err.is_fatal())
    }
}
