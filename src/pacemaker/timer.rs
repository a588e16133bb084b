/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that drives the [`Rotator`](super::rotator::Rotator)'s timers.

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant, SystemTime};

use crate::event_bus::Subscription;
use crate::events::*;
use crate::networking::network::Network;
use crate::replica::stop_requested;

use super::rotator::{RotationCause, ViewChange};
use super::Pacemaker;

/// Upper bound on how long the timer thread sleeps, so that it notices shutdown promptly.
const MAX_SLEEP: Duration = Duration::from_millis(50);

pub(crate) fn run_timer<N: Network>(
    pacemaker: &Pacemaker<N>,
    qc_updates: Subscription,
    shutdown_signal: Receiver<()>,
) {
    loop {
        if stop_requested(&shutdown_signal, &pacemaker.halt) {
            return;
        }

        let next_deadline = pacemaker.rotator.lock().next_deadline();
        let wait = next_deadline
            .saturating_duration_since(Instant::now())
            .min(MAX_SLEEP);
        if let Some(Event::UpdateHighestQC(event)) = qc_updates.recv_timeout(wait) {
            on_new_qc_high(pacemaker, &event);
        }

        let view_change = pacemaker.rotator.lock().on_tick(Instant::now());
        if let Some(view_change) = view_change {
            on_view_change(pacemaker, view_change);
        }
    }
}

fn on_new_qc_high<N: Network>(pacemaker: &Pacemaker<N>, event: &UpdateHighestQCEvent) {
    let validator_set = &pacemaker.config.validator_set;
    // The genesis block has no proposer in the validator set.
    let Some(proposer_index) = validator_set.position(&event.proposer) else {
        return;
    };

    let approved = pacemaker
        .rotator
        .lock()
        .on_new_qc_high(proposer_index, Instant::now());
    if let Some(leader_index) = approved {
        if let Some(leader) = validator_set.get(leader_index) {
            Event::ApproveLeader(ApproveLeaderEvent {
                timestamp: SystemTime::now(),
                leader_index,
                leader: *leader,
            })
            .publish(&pacemaker.event_bus);
        }
    }
}

fn on_view_change<N: Network>(pacemaker: &Pacemaker<N>, view_change: ViewChange) {
    match view_change.cause {
        RotationCause::ViewTimeout => Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            leader_index: view_change.previous_leader_index,
            timeout: pacemaker.config.view_width,
        }),
        RotationCause::LeaderTimeout => Event::LeaderTimeout(LeaderTimeoutEvent {
            timestamp: SystemTime::now(),
            leader_index: view_change.previous_leader_index,
            timeout_count: view_change.leader_timeout_count,
        }),
    }
    .publish(&pacemaker.event_bus);

    if let Some(leader) = pacemaker
        .config
        .validator_set
        .get(view_change.leader_index)
    {
        Event::ViewChange(ViewChangeEvent {
            timestamp: SystemTime::now(),
            leader_index: view_change.leader_index,
            leader: *leader,
        })
        .publish(&pacemaker.event_bus);
    }

    pacemaker.send_new_view(view_change.leader_index);
}
