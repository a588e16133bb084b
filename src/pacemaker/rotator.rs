/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round-robin leader rotation with two timers.
//!
//! The [`Rotator`] decides which validator the replica currently expects to propose. It holds no
//! threads and reads no clock: every method takes the current [`Instant`] as an argument, so the
//! [timer thread](super::timer) drives it in production and tests drive it with synthetic instants.
//!
//! ## Timers
//!
//! - The **view timer** expires `view_width` after the start of the current view. Expiry always
//!   rotates to the next leader, which bounds how long any single validator leads.
//! - The **leader timer** expires `leader_timeout` after the current leader last produced a highest
//!   QC. Expiry also rotates, and increments a counter of consecutive leader timeouts. Once more than
//!   `max_faulty` leaders in a row have timed out, the leader timer is suspended until a leader is
//!   approved again, so that a network partition does not make replicas spin through the validator
//!   set.
//!
//! ## Approval
//!
//! After a timeout, the replica has a pending view change: it expects the next leader in the ring but
//! has not seen it make progress yet. A new highest QC whose block was proposed by validator `p`:
//! - Resets the leader timer if `p` is the current leader.
//! - *Approves* `p` as leader if a view change is pending and `p` is the expected leader, or if no view
//!   change is pending and `p` is *not* the expected leader. The second case lets a replica whose
//!   timers drifted from the rest of the network catch up with the leader that the network actually
//!   follows.
//!
//! Approving a leader starts a new view: the view and leader timers restart, the pending flag is
//! cleared, and the leader timeout counter is reset.

use std::time::{Duration, Instant};

use crate::types::validator_set::ValidatorSet;

/// Which timer caused a view change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationCause {
    ViewTimeout,
    LeaderTimeout,
}

/// The outcome of a timer expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewChange {
    pub cause: RotationCause,
    /// The leader whose view ended.
    pub previous_leader_index: usize,
    /// The leader expected next.
    pub leader_index: usize,
    /// Consecutive leader timeouts, including this one if it was a leader timeout.
    pub leader_timeout_count: usize,
}

#[derive(Clone, Debug)]
pub struct Rotator {
    validator_count: usize,
    max_faulty: usize,
    view_width: Duration,
    leader_timeout: Duration,

    leader_index: usize,
    pending_view_change: bool,
    view_start: Instant,
    leader_deadline: Option<Instant>,
    leader_timeout_count: usize,
}

impl Rotator {
    /// Create a rotator that starts a view led by validator 0 at `now`.
    pub fn new(
        validator_count: usize,
        view_width: Duration,
        leader_timeout: Duration,
        now: Instant,
    ) -> Rotator {
        Rotator {
            validator_count,
            max_faulty: validator_count.saturating_sub(1) / 3,
            view_width,
            leader_timeout,
            leader_index: 0,
            pending_view_change: false,
            view_start: now,
            leader_deadline: Some(now + leader_timeout),
            leader_timeout_count: 0,
        }
    }

    pub fn for_validator_set(
        validator_set: &ValidatorSet,
        view_width: Duration,
        leader_timeout: Duration,
        now: Instant,
    ) -> Rotator {
        Rotator::new(validator_set.len(), view_width, leader_timeout, now)
    }

    pub fn leader_index(&self) -> usize {
        self.leader_index
    }

    pub fn pending_view_change(&self) -> bool {
        self.pending_view_change
    }

    pub fn view_start(&self) -> Instant {
        self.view_start
    }

    pub fn leader_timeout_count(&self) -> usize {
        self.leader_timeout_count
    }

    pub fn leader_timer_suspended(&self) -> bool {
        self.leader_deadline.is_none()
    }

    pub fn view_deadline(&self) -> Instant {
        self.view_start + self.view_width
    }

    /// The earliest instant at which [`on_tick`](Self::on_tick) may cause a view change.
    pub fn next_deadline(&self) -> Instant {
        match self.leader_deadline {
            Some(leader_deadline) => leader_deadline.min(self.view_deadline()),
            None => self.view_deadline(),
        }
    }

    /// Check both timers at `now`. At most one view change happens per call. The leader timer is
    /// checked first.
    pub fn on_tick(&mut self, now: Instant) -> Option<ViewChange> {
        if self.validator_count == 0 {
            return None;
        }
        let previous_leader_index = self.leader_index;

        if let Some(deadline) = self.leader_deadline {
            if now >= deadline {
                self.leader_timeout_count += 1;
                self.change_view(now);
                self.leader_deadline = if self.leader_timeout_count > self.max_faulty {
                    None
                } else {
                    Some(now + self.leader_timeout)
                };
                return Some(ViewChange {
                    cause: RotationCause::LeaderTimeout,
                    previous_leader_index,
                    leader_index: self.leader_index,
                    leader_timeout_count: self.leader_timeout_count,
                });
            }
        }

        if now >= self.view_deadline() {
            self.change_view(now);
            if self.leader_deadline.is_some() {
                self.leader_deadline = Some(now + self.leader_timeout);
            }
            return Some(ViewChange {
                cause: RotationCause::ViewTimeout,
                previous_leader_index,
                leader_index: self.leader_index,
                leader_timeout_count: self.leader_timeout_count,
            });
        }

        None
    }

    /// Rotate to the next leader in the ring and mark the view change as pending. Returns the new
    /// leader index.
    pub fn change_view(&mut self, now: Instant) -> usize {
        if self.validator_count > 0 {
            self.leader_index = (self.leader_index + 1) % self.validator_count;
        }
        self.pending_view_change = true;
        self.view_start = now;
        self.leader_index
    }

    /// React to a new highest QC whose block was proposed by the validator at `proposer_index`.
    /// Returns the index of the approved leader, if the QC caused an approval.
    pub fn on_new_qc_high(&mut self, proposer_index: usize, now: Instant) -> Option<usize> {
        if proposer_index >= self.validator_count {
            return None;
        }

        let from_leader = proposer_index == self.leader_index;
        if from_leader && self.leader_deadline.is_some() {
            self.leader_deadline = Some(now + self.leader_timeout);
        }

        if from_leader == self.pending_view_change {
            self.leader_index = proposer_index;
            self.pending_view_change = false;
            self.view_start = now;
            self.leader_deadline = Some(now + self.leader_timeout);
            self.leader_timeout_count = 0;
            return Some(proposer_index);
        }

        None
    }
}
