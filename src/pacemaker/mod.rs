/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Liveness: deciding who proposes, and when.
//!
//! The pacemaker runs two threads, both fed by their own [subscriptions](crate::event_bus::Subscription)
//! to [`UpdateHighestQC`](crate::events::UpdateHighestQCEvent) events:
//! 1. The **beat** thread. When this replica is the leader the [rotator](rotator::Rotator) expects, it
//!    proposes a new block as soon as a new highest QC is learned, or after `beat_timeout` passes
//!    without one. A timeout-triggered beat is skipped while the leaf is this replica's own
//!    uncertified proposal, so that a leader waiting for votes does not stack up uncertified blocks.
//! 2. The [**timer**](timer) thread. It drives the rotator's view and leader timers, approves leaders
//!    that make progress, and sends a [`NewView`] carrying the highest QC to each newly expected leader.

pub mod rotator;
pub(crate) mod timer;

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::config::PacemakerConfiguration;
use crate::driver::ChainDriver;
use crate::event_bus::{EventBus, Subscription};
use crate::events::*;
use crate::hotstuff::state_machine::{HotStuff, HotStuffError};
use crate::networking::{messages::NewView, network::Network, sending::SenderHandle};
use crate::replica::{stop_requested, HaltSignal};

use self::rotator::Rotator;

pub(crate) struct Pacemaker<N: Network> {
    config: PacemakerConfiguration,
    hotstuff: Arc<HotStuff<ChainDriver<N>>>,
    rotator: Arc<Mutex<Rotator>>,
    update_lock: Arc<Mutex<()>>,
    sender: SenderHandle<N>,
    event_bus: Arc<EventBus>,
    halt: HaltSignal,
}

impl<N: Network> Pacemaker<N> {
    pub(crate) fn new(
        config: PacemakerConfiguration,
        hotstuff: Arc<HotStuff<ChainDriver<N>>>,
        rotator: Arc<Mutex<Rotator>>,
        update_lock: Arc<Mutex<()>>,
        network: N,
        event_bus: Arc<EventBus>,
        halt: HaltSignal,
    ) -> Self {
        Self {
            config,
            hotstuff,
            rotator,
            update_lock,
            sender: SenderHandle::new(network),
            event_bus,
            halt,
        }
    }

    /// Spawn the beat thread and the timer thread, in that order.
    pub(crate) fn start(
        self,
        beat_shutdown: Receiver<()>,
        timer_shutdown: Receiver<()>,
    ) -> [JoinHandle<()>; 2] {
        let beat_qcs = self.subscribe_qc_high();
        let timer_qcs = self.subscribe_qc_high();

        let pacemaker = Arc::new(self);
        let beat = {
            let pacemaker = Arc::clone(&pacemaker);
            thread::spawn(move || pacemaker.run_beat(beat_qcs, beat_shutdown))
        };
        let timer = thread::spawn(move || timer::run_timer(&pacemaker, timer_qcs, timer_shutdown));
        [beat, timer]
    }

    fn subscribe_qc_high(&self) -> Subscription {
        self.event_bus.subscribe(
            |event| matches!(event, Event::UpdateHighestQC(_)),
            self.config.event_buffer_capacity,
        )
    }

    fn run_beat(&self, qc_updates: Subscription, shutdown_signal: Receiver<()>) {
        loop {
            if stop_requested(&shutdown_signal, &self.halt) {
                return;
            }

            let new_qc_high = qc_updates.recv_timeout(self.config.beat_timeout).is_some();
            // Several highest QCs learned in a burst call for a single proposal.
            while qc_updates.try_recv().is_some() {}

            if !self.is_expected_leader() {
                continue;
            }

            let _guard = self.update_lock.lock();
            if !new_qc_high && self.awaiting_votes() {
                continue;
            }
            if let Err(err) = self.propose() {
                self.report(err);
            }
        }
    }

    fn propose(&self) -> Result<(), HotStuffError> {
        let block = self.hotstuff.on_propose()?;
        self.hotstuff.on_receive_proposal(&block)?;
        Ok(())
    }

    fn is_expected_leader(&self) -> bool {
        let leader_index = self.rotator.lock().leader_index();
        self.config.validator_set.get(leader_index) == Some(&self.config.me)
    }

    /// Whether the leaf is a block this replica proposed that has not been certified yet.
    fn awaiting_votes(&self) -> bool {
        match (self.hotstuff.leaf_block(), self.hotstuff.qc_high()) {
            (Ok(leaf), Ok(qc_high)) => {
                leaf.hash != qc_high.block.hash && leaf.proposer == self.config.me.to_bytes()
            }
            _ => true,
        }
    }

    /// Send the highest QC to the validator at `leader_index`, unless that is this replica.
    fn send_new_view(&self, leader_index: usize) {
        let Some(leader) = self.config.validator_set.get(leader_index).copied() else {
            return;
        };
        let highest_qc = match self.hotstuff.qc_high() {
            Ok(qc_high) => qc_high.qc,
            Err(err) => {
                log::warn!("Cannot send NewView: {}", err);
                return;
            }
        };

        Event::NewView(NewViewEvent {
            timestamp: SystemTime::now(),
            leader,
            highest_qc: highest_qc.clone(),
        })
        .publish(&self.event_bus);

        if leader != self.config.me {
            self.sender.send(leader, NewView { highest_qc });
        }
    }

    fn report(&self, err: HotStuffError) {
        if err.is_fatal() {
            self.halt.halt(&err.to_string());
        } else {
            log::warn!("Failed to propose: {}", err);
        }
    }
}
