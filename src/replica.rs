/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and stop a replica.
//!
//! A replica is one process taking part in consensus. It is identified by the
//! [Ed25519 public key](ed25519_dalek::VerifyingKey) in its [configuration](Configuration), and votes
//! if that key is in the validator set.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec).
//! - The function to [start](ReplicaSpec::start) a [`Replica`] given its specification.
//! - [The type](Replica) which keeps the replica's threads alive, and lets the caller inspect its
//!   [status](Replica::status).
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .mempool(mempool)
//!     .storage(storage)
//!     .execution(execution)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.network(...)`
//! - `.mempool(...)`
//! - `.storage(...)`
//! - `.execution(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters register user-defined handlers for events from [crate::events], for example
//! `.on_commit_block(...)`, `.on_view_change(...)`, or `.on_halt(...)`. Handlers run on a dedicated
//! event bus thread.
//!
//! ## Threads
//!
//! A running replica owns the following threads:
//! 1. The poller, which receives messages from the [`Network`] and sorts them by kind.
//! 2. The [block sync server](crate::block_sync::server), which answers block requests from peers.
//! 3. Three [validator](crate::validator) threads: one each for proposals, votes, and new-views.
//! 4. Two [pacemaker](crate::pacemaker) threads: the beat and the timer.
//! 5. The event bus thread, if any event handler is registered (or event logging is enabled).
//!
//! ## Halting
//!
//! A fatal error (a failed commit, or a safety violation) *halts* the replica: a
//! [`HaltEvent`] is published, and every thread stops. A halted replica does not restart. The halt
//! state can be read with [`Replica::status`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::block_sync::{client::BlockSyncClient, server::BlockSyncServer};
use crate::config::{
    BlockSyncConfiguration, Configuration, PacemakerConfiguration, ValidatorConfiguration,
};
use crate::driver::ChainDriver;
use crate::event_bus::*;
use crate::events::*;
use crate::hotstuff::state_machine::{HotStuff, HotStuffError};
use crate::networking::{network::Network, receiving::start_polling};
use crate::pacemaker::{rotator::Rotator, Pacemaker};
use crate::pluggables::{Execution, Mempool, PluggableError, Storage};
use crate::state_pool::{BlockStore, StatePool};
use crate::types::{
    block::Block,
    data_types::{BlockHeight, BufferSize, CryptoHash},
    quorum_cert::QuorumCert,
};
use crate::validator::Validator;

/// Stores all necessary parameters and trait implementations required to run the [`Replica`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.network(...)`
    - `.mempool(...)`
    - `.storage(...)`
    - `.execution(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_block(...)`
    - `.on_commit_block(...)`
    - `.on_prune_block(...)`
    - `.on_update_highest_qc(...)`
    - `.on_update_locked_block(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_new_view(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_receive_new_view(...)`
    - `.on_collect_qc(...)`
    - `.on_view_change(...)`
    - `.on_approve_leader(...)`
    - `.on_view_timeout(...)`
    - `.on_leader_timeout(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_halt(...)`
"))]
pub struct ReplicaSpec<N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(setter(transform = |mempool: impl Mempool + 'static| Arc::new(mempool) as Arc<dyn Mempool>,
    doc = "Set the transaction pool. Required."))]
    mempool: Arc<dyn Mempool>,
    #[builder(setter(transform = |storage: impl Storage + 'static| Arc::new(storage) as Arc<dyn Storage>,
    doc = "Set the committed block store. Required."))]
    storage: Arc<dyn Storage>,
    #[builder(setter(transform = |execution: impl Execution + 'static| Arc::new(execution) as Arc<dyn Execution>,
    doc = "Set the executor of committed blocks. Required."))]
    execution: Arc<dyn Execution>,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is inserted into the state pool. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<PruneBlockEvent>),
    doc = "Register a handler closure to be invoked after a conflicting block is pruned from the state pool. Optional."))]
    on_prune_block: Option<HandlerPtr<PruneBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHighestQCEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHighestQCEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its highest QC. Optional."))]
    on_update_highest_qc: Option<HandlerPtr<UpdateHighestQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateLockedBlockEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<UpdateLockedBlockEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its locked block. Optional."))]
    on_update_locked_block: Option<HandlerPtr<UpdateLockedBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica votes for a block. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewViewEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<NewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a new-view message to the next leader. Optional."))]
    on_new_view: Option<HandlerPtr<NewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveNewViewEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveNewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a new-view message. Optional."))]
    on_receive_new_view: Option<HandlerPtr<ReceiveNewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectQCEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<CollectQCEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a quorum certificate. Optional."))]
    on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewChangeEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ViewChangeEvent>),
    doc = "Register a handler closure to be invoked after the replica rotates to the next leader. Optional."))]
    on_view_change: Option<HandlerPtr<ViewChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApproveLeaderEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ApproveLeaderEvent>),
    doc = "Register a handler closure to be invoked after the replica approves a leader. Optional."))]
    on_approve_leader: Option<HandlerPtr<ApproveLeaderEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewTimeoutEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<ViewTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the view timer expires. Optional."))]
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LeaderTimeoutEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<LeaderTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the leader timer expires. Optional."))]
    on_leader_timeout: Option<HandlerPtr<LeaderTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica starts fetching the ancestors of a block. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica finishes fetching the ancestors of a block. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&HaltEvent) + Send + Sync + 'static| Some(Box::new(handler) as HandlerPtr<HaltEvent>),
    doc = "Register a handler closure to be invoked after the replica halts on a fatal error. Optional."))]
    on_halt: Option<HandlerPtr<HaltEvent>>,
}

impl<N: Network + 'static> ReplicaSpec<N> {
    /// Check the storage's genesis block against the configured chain, initialize the chain state from
    /// the last committed block, and start all threads.
    pub fn start(self) -> Result<Replica<N>, ReplicaError> {
        let configuration = self.configuration;
        if configuration.validator_set.is_empty() {
            return Err(ReplicaError::EmptyValidatorSet);
        }

        let genesis = configuration.genesis();
        match self.storage.genesis_hash() {
            Some(found) if found != genesis.hash => {
                return Err(ReplicaError::ChainIdMismatch {
                    expected: genesis.hash,
                    found,
                })
            }
            Some(_) => (),
            None => self
                .storage
                .init_genesis(&genesis)
                .map_err(ReplicaError::Storage)?,
        }

        let log_events = configuration.log_events;
        let msg_buffer_capacity = configuration.msg_buffer_capacity;
        let event_buffer_capacity = configuration.event_buffer_capacity;
        let configs = configuration.split();

        let event_bus = Arc::new(EventBus::new());
        let halt = HaltSignal::new(Arc::clone(&event_bus));

        let pool = Arc::new(StatePool::new());
        let blocks = BlockStore::new(Arc::clone(&pool), Arc::clone(&self.storage));
        let (b0, q0) = self
            .storage
            .last_committed()
            .unwrap_or_else(|| (genesis.clone(), QuorumCert::genesis(genesis.hash)));
        pool.insert_block(b0.clone());
        pool.insert_qc(q0.clone());

        let rotator = Rotator::for_validator_set(
            &configs.pacemaker.validator_set,
            configs.pacemaker.view_width,
            configs.pacemaker.leader_timeout,
            Instant::now(),
        );

        let driver = ChainDriver::new(
            configs.driver,
            blocks,
            self.mempool,
            self.execution,
            self.network.clone(),
            Arc::clone(&event_bus),
        );
        let hotstuff = Arc::new(HotStuff::new(driver));
        hotstuff.init(b0, q0)?;

        let mut event_handlers = EventHandlers::new(log_events);
        event_handlers.insert_block_handlers.extend(self.on_insert_block);
        event_handlers.commit_block_handlers.extend(self.on_commit_block);
        event_handlers.prune_block_handlers.extend(self.on_prune_block);
        event_handlers.update_highest_qc_handlers.extend(self.on_update_highest_qc);
        event_handlers.update_locked_block_handlers.extend(self.on_update_locked_block);
        event_handlers.propose_handlers.extend(self.on_propose);
        event_handlers.vote_handlers.extend(self.on_vote);
        event_handlers.new_view_handlers.extend(self.on_new_view);
        event_handlers.receive_proposal_handlers.extend(self.on_receive_proposal);
        event_handlers.receive_vote_handlers.extend(self.on_receive_vote);
        event_handlers.receive_new_view_handlers.extend(self.on_receive_new_view);
        event_handlers.collect_qc_handlers.extend(self.on_collect_qc);
        event_handlers.view_change_handlers.extend(self.on_view_change);
        event_handlers.approve_leader_handlers.extend(self.on_approve_leader);
        event_handlers.view_timeout_handlers.extend(self.on_view_timeout);
        event_handlers.leader_timeout_handlers.extend(self.on_leader_timeout);
        event_handlers.start_sync_handlers.extend(self.on_start_sync);
        event_handlers.end_sync_handlers.extend(self.on_end_sync);
        event_handlers.halt_handlers.extend(self.on_halt);

        let mut replica = Replica {
            network: self.network,
            validator_config: configs.validator,
            pacemaker_config: configs.pacemaker,
            block_sync_config: configs.block_sync,
            msg_buffer_capacity,
            event_buffer_capacity,
            hotstuff,
            rotator: Arc::new(Mutex::new(rotator)),
            update_lock: Arc::new(Mutex::new(())),
            event_bus,
            event_handlers: Arc::new(event_handlers),
            halt,
            threads: Vec::new(),
        };
        replica.start();
        Ok(replica)
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads
/// are gracefully shut down.
pub struct Replica<N: Network + 'static> {
    network: N,
    validator_config: ValidatorConfiguration,
    pacemaker_config: PacemakerConfiguration,
    block_sync_config: BlockSyncConfiguration,
    msg_buffer_capacity: BufferSize,
    event_buffer_capacity: BufferSize,

    hotstuff: Arc<HotStuff<ChainDriver<N>>>,
    rotator: Arc<Mutex<Rotator>>,
    update_lock: Arc<Mutex<()>>,
    event_bus: Arc<EventBus>,
    event_handlers: Arc<EventHandlers>,
    halt: HaltSignal,

    // In shutdown order: consumers before the poller that feeds them.
    threads: Vec<(Sender<()>, JoinHandle<()>)>,
}

impl<N: Network + 'static> Replica<N> {
    /// Start the replica's threads. Does nothing if they are already running, or if the replica has
    /// halted.
    pub fn start(&mut self) {
        if !self.threads.is_empty() || self.halt.is_halted() {
            return;
        }

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, inbound) = start_polling(
            self.network.clone(),
            self.msg_buffer_capacity,
            poller_shutdown_receiver,
            self.halt.clone(),
        );

        if !self.event_handlers.is_empty() {
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let events = self.event_bus.subscribe(|_| true, self.event_buffer_capacity);
            let handle =
                start_event_bus(Arc::clone(&self.event_handlers), events, shutdown_receiver);
            self.threads.push((shutdown, handle));
        }

        let pacemaker = Pacemaker::new(
            self.pacemaker_config.clone(),
            Arc::clone(&self.hotstuff),
            Arc::clone(&self.rotator),
            Arc::clone(&self.update_lock),
            self.network.clone(),
            Arc::clone(&self.event_bus),
            self.halt.clone(),
        );
        let (beat_shutdown, beat_shutdown_receiver) = mpsc::channel();
        let (timer_shutdown, timer_shutdown_receiver) = mpsc::channel();
        let [beat, timer] = pacemaker.start(beat_shutdown_receiver, timer_shutdown_receiver);
        self.threads.push((beat_shutdown, beat));
        self.threads.push((timer_shutdown, timer));

        let sync_client = BlockSyncClient::new(
            self.block_sync_config.clone(),
            self.network.clone(),
            inbound.block_responses,
        );
        let validator = Arc::new(Validator::new(
            self.validator_config.clone(),
            Arc::clone(&self.hotstuff),
            Arc::clone(&self.rotator),
            Arc::clone(&self.update_lock),
            sync_client,
            Arc::clone(&self.event_bus),
            self.halt.clone(),
        ));
        let (proposal_shutdown, proposal_shutdown_receiver) = mpsc::channel();
        let (vote_shutdown, vote_shutdown_receiver) = mpsc::channel();
        let (new_view_shutdown, new_view_shutdown_receiver) = mpsc::channel();
        let [proposals, votes, new_views] = validator.start(
            inbound.proposals,
            inbound.votes,
            inbound.new_views,
            [
                proposal_shutdown_receiver,
                vote_shutdown_receiver,
                new_view_shutdown_receiver,
            ],
        );
        self.threads.push((proposal_shutdown, proposals));
        self.threads.push((vote_shutdown, votes));
        self.threads.push((new_view_shutdown, new_views));

        let (server_shutdown, server_shutdown_receiver) = mpsc::channel();
        let server = BlockSyncServer::new(
            self.hotstuff.driver().blocks().clone(),
            inbound.block_requests,
            self.network.clone(),
            server_shutdown_receiver,
            self.halt.clone(),
        )
        .start();
        self.threads.push((server_shutdown, server));

        self.threads.push((poller_shutdown, poller));
    }

    /// Stop the replica's threads and wait for them to exit. Does nothing if they are not running.
    pub fn stop(&mut self) {
        for (shutdown, thread) in self.threads.drain(..) {
            // The thread may already have exited after a halt, dropping its receiver.
            let _ = shutdown.send(());
            if thread.join().is_err() {
                log::error!("A replica thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Subscribe to the events published by this replica that pass `filter`.
    pub fn subscribe(
        &self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
        capacity: BufferSize,
    ) -> Subscription {
        self.event_bus.subscribe(filter, capacity)
    }

    /// Get a block from the state pool, or from storage if it has been committed.
    pub fn get_block(&self, hash: &CryptoHash) -> Option<Block> {
        self.hotstuff.driver().blocks().block(hash)
    }

    /// A snapshot of the replica's consensus state.
    pub fn status(&self) -> Status {
        let (leader_index, view_start, pending_view_change) = {
            let rotator = self.rotator.lock();
            (
                rotator.leader_index(),
                rotator.view_start(),
                rotator.pending_view_change(),
            )
        };
        let driver = self.hotstuff.driver();
        let height = |block: Result<Block, HotStuffError>| {
            block.map(|block| block.height).unwrap_or_default()
        };

        Status {
            leader_index,
            view_start,
            pending_view_change,
            block_pool_size: driver.blocks().pool().block_count(),
            qc_pool_size: driver.blocks().pool().qc_count(),
            vote_height: self.hotstuff.vote_height().unwrap_or_default(),
            locked_height: height(self.hotstuff.locked_block()),
            exec_height: height(self.hotstuff.exec_block()),
            leaf_height: height(self.hotstuff.leaf_block()),
            qc_high_height: self
                .hotstuff
                .qc_high()
                .map(|qc_high| qc_high.block.height)
                .unwrap_or_default(),
            committed_tx_count: driver.committed_tx_count(),
            halted: self.halt.is_halted(),
        }
    }
}

impl<N: Network + 'static> Drop for Replica<N> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A snapshot of a replica's consensus state, returned by [`Replica::status`].
#[derive(Clone, Debug)]
pub struct Status {
    pub leader_index: usize,
    pub view_start: Instant,
    pub pending_view_change: bool,
    pub block_pool_size: usize,
    pub qc_pool_size: usize,
    pub vote_height: BlockHeight,
    pub locked_height: BlockHeight,
    pub exec_height: BlockHeight,
    pub leaf_height: BlockHeight,
    pub qc_high_height: BlockHeight,
    pub committed_tx_count: u64,
    pub halted: bool,
}

/// Shared flag that tells every thread of a replica to stop after a fatal error.
#[derive(Clone)]
pub(crate) struct HaltSignal {
    halted: Arc<AtomicBool>,
    event_bus: Arc<EventBus>,
}

impl HaltSignal {
    pub(crate) fn new(event_bus: Arc<EventBus>) -> HaltSignal {
        HaltSignal {
            halted: Arc::new(AtomicBool::new(false)),
            event_bus,
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Halt the replica. Only the first call publishes a [`HaltEvent`].
    pub(crate) fn halt(&self, reason: &str) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        log::error!("Replica halted: {}", reason);
        Event::Halt(HaltEvent {
            timestamp: SystemTime::now(),
            reason: reason.to_string(),
        })
        .publish(&self.event_bus);
    }
}

/// Whether a replica thread should exit: either its shutdown signal fired (or its sender is gone), or
/// the replica has halted.
pub(crate) fn stop_requested(shutdown_signal: &Receiver<()>, halt: &HaltSignal) -> bool {
    match shutdown_signal.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => halt.is_halted(),
    }
}

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("storage holds genesis block {found:?}, but the configured chain has genesis {expected:?}")]
    ChainIdMismatch {
        expected: CryptoHash,
        found: CryptoHash,
    },

    #[error("the validator set is empty")]
    EmptyValidatorSet,

    #[error("storage error: {0}")]
    Storage(#[source] PluggableError),

    #[error(transparent)]
    HotStuff(#[from] HotStuffError),
}
