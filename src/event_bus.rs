/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Publish-subscribe delivery of [events](crate::events).
//!
//! Every component of a replica holds a handle to the same [`EventBus`]. Publishing never blocks:
//! each subscriber owns a bounded queue, and when a queue is full its oldest event is dropped to make
//! space for the new one. A slow subscriber may therefore miss intermediate events, but always
//! receives the most recent ones. Events such as [`UpdateHighestQC`](crate::events::UpdateHighestQCEvent)
//! carry the full new state rather than a delta, so missing an intermediate one is harmless.
//!
//! User-registered handlers and the default [loggers](crate::logging) run on a dedicated event bus
//! thread, fed by its own subscription, so that slow handlers never delay the protocol threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::events::*;
use crate::logging::Logger;
use crate::types::data_types::BufferSize;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Decides which events a [`Subscription`] receives.
pub type EventFilter = Box<dyn Fn(&Event) -> bool + Send + Sync>;

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

struct Subscriber {
    filter: EventFilter,
    queue: Arc<EventQueue>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to every published event that passes `filter`, buffering at most `capacity` of them.
    pub fn subscribe(
        &self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
        capacity: BufferSize,
    ) -> Subscription {
        let queue = Arc::new(EventQueue {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.int().max(1),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
        });
        self.subscribers.write().push(Subscriber {
            filter: Box::new(filter),
            queue: Arc::clone(&queue),
        });
        Subscription { queue }
    }

    /// Deliver `event` to every interested subscriber without blocking. Subscribers whose
    /// [`Subscription`] has been dropped are forgotten.
    pub fn publish(&self, event: Event) {
        let mut has_closed = false;
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                if Arc::strong_count(&subscriber.queue) == 1 {
                    has_closed = true;
                    continue;
                }
                if (subscriber.filter)(&event) {
                    subscriber.queue.push(event.clone());
                }
            }
        }

        if has_closed {
            self.subscribers
                .write()
                .retain(|subscriber| Arc::strong_count(&subscriber.queue) > 1);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
    ready: Condvar,
    dropped: AtomicU64,
}

impl EventQueue {
    fn push(&self, event: Event) {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        events.push_back(event);
        self.ready.notify_one();
    }
}

/// The receiving end of an [`EventBus`] subscription.
pub struct Subscription {
    queue: Arc<EventQueue>,
}

impl Subscription {
    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut events = self.queue.events.lock();
        loop {
            if let Some(event) = events.pop_front() {
                return Some(event);
            }
            if self.queue.ready.wait_until(&mut events, deadline).timed_out() {
                return events.pop_front();
            }
        }
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.queue.events.lock().pop_front()
    }

    /// How many events were discarded because this subscription's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) struct EventHandlers {
    pub(crate) insert_block_handlers: Vec<HandlerPtr<InsertBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) prune_block_handlers: Vec<HandlerPtr<PruneBlockEvent>>,
    pub(crate) update_highest_qc_handlers: Vec<HandlerPtr<UpdateHighestQCEvent>>,
    pub(crate) update_locked_block_handlers: Vec<HandlerPtr<UpdateLockedBlockEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) new_view_handlers: Vec<HandlerPtr<NewViewEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) receive_new_view_handlers: Vec<HandlerPtr<ReceiveNewViewEvent>>,
    pub(crate) collect_qc_handlers: Vec<HandlerPtr<CollectQCEvent>>,
    pub(crate) view_change_handlers: Vec<HandlerPtr<ViewChangeEvent>>,
    pub(crate) approve_leader_handlers: Vec<HandlerPtr<ApproveLeaderEvent>>,
    pub(crate) view_timeout_handlers: Vec<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) leader_timeout_handlers: Vec<HandlerPtr<LeaderTimeoutEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) halt_handlers: Vec<HandlerPtr<HaltEvent>>,
}

impl EventHandlers {
    /// Create a set of handlers that holds the default loggers if `log_events` is set, and nothing
    /// otherwise. User handlers are appended by the caller.
    pub(crate) fn new(log_events: bool) -> EventHandlers {
        let mut handlers = EventHandlers {
            insert_block_handlers: Vec::new(),
            commit_block_handlers: Vec::new(),
            prune_block_handlers: Vec::new(),
            update_highest_qc_handlers: Vec::new(),
            update_locked_block_handlers: Vec::new(),
            propose_handlers: Vec::new(),
            vote_handlers: Vec::new(),
            new_view_handlers: Vec::new(),
            receive_proposal_handlers: Vec::new(),
            receive_vote_handlers: Vec::new(),
            receive_new_view_handlers: Vec::new(),
            collect_qc_handlers: Vec::new(),
            view_change_handlers: Vec::new(),
            approve_leader_handlers: Vec::new(),
            view_timeout_handlers: Vec::new(),
            leader_timeout_handlers: Vec::new(),
            start_sync_handlers: Vec::new(),
            end_sync_handlers: Vec::new(),
            halt_handlers: Vec::new(),
        };

        if log_events {
            handlers.insert_block_handlers.push(InsertBlockEvent::get_logger());
            handlers.commit_block_handlers.push(CommitBlockEvent::get_logger());
            handlers.prune_block_handlers.push(PruneBlockEvent::get_logger());
            handlers.update_highest_qc_handlers.push(UpdateHighestQCEvent::get_logger());
            handlers.update_locked_block_handlers.push(UpdateLockedBlockEvent::get_logger());
            handlers.propose_handlers.push(ProposeEvent::get_logger());
            handlers.vote_handlers.push(VoteEvent::get_logger());
            handlers.new_view_handlers.push(NewViewEvent::get_logger());
            handlers.receive_proposal_handlers.push(ReceiveProposalEvent::get_logger());
            handlers.receive_vote_handlers.push(ReceiveVoteEvent::get_logger());
            handlers.receive_new_view_handlers.push(ReceiveNewViewEvent::get_logger());
            handlers.collect_qc_handlers.push(CollectQCEvent::get_logger());
            handlers.view_change_handlers.push(ViewChangeEvent::get_logger());
            handlers.approve_leader_handlers.push(ApproveLeaderEvent::get_logger());
            handlers.view_timeout_handlers.push(ViewTimeoutEvent::get_logger());
            handlers.leader_timeout_handlers.push(LeaderTimeoutEvent::get_logger());
            handlers.start_sync_handlers.push(StartSyncEvent::get_logger());
            handlers.end_sync_handlers.push(EndSyncEvent::get_logger());
            handlers.halt_handlers.push(HaltEvent::get_logger());
        }

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.prune_block_handlers.is_empty()
            && self.update_highest_qc_handlers.is_empty()
            && self.update_locked_block_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.new_view_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_new_view_handlers.is_empty()
            && self.collect_qc_handlers.is_empty()
            && self.view_change_handlers.is_empty()
            && self.approve_leader_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.leader_timeout_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.halt_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: &Event) {
        match event {
            Event::InsertBlock(e) => self.insert_block_handlers.iter().for_each(|h| h(e)),
            Event::CommitBlock(e) => self.commit_block_handlers.iter().for_each(|h| h(e)),
            Event::PruneBlock(e) => self.prune_block_handlers.iter().for_each(|h| h(e)),
            Event::UpdateHighestQC(e) => self.update_highest_qc_handlers.iter().for_each(|h| h(e)),
            Event::UpdateLockedBlock(e) => {
                self.update_locked_block_handlers.iter().for_each(|h| h(e))
            }
            Event::Propose(e) => self.propose_handlers.iter().for_each(|h| h(e)),
            Event::Vote(e) => self.vote_handlers.iter().for_each(|h| h(e)),
            Event::NewView(e) => self.new_view_handlers.iter().for_each(|h| h(e)),
            Event::ReceiveProposal(e) => self.receive_proposal_handlers.iter().for_each(|h| h(e)),
            Event::ReceiveVote(e) => self.receive_vote_handlers.iter().for_each(|h| h(e)),
            Event::ReceiveNewView(e) => self.receive_new_view_handlers.iter().for_each(|h| h(e)),
            Event::CollectQC(e) => self.collect_qc_handlers.iter().for_each(|h| h(e)),
            Event::ViewChange(e) => self.view_change_handlers.iter().for_each(|h| h(e)),
            Event::ApproveLeader(e) => self.approve_leader_handlers.iter().for_each(|h| h(e)),
            Event::ViewTimeout(e) => self.view_timeout_handlers.iter().for_each(|h| h(e)),
            Event::LeaderTimeout(e) => self.leader_timeout_handlers.iter().for_each(|h| h(e)),
            Event::StartSync(e) => self.start_sync_handlers.iter().for_each(|h| h(e)),
            Event::EndSync(e) => self.end_sync_handlers.iter().for_each(|h| h(e)),
            Event::Halt(e) => self.halt_handlers.iter().for_each(|h| h(e)),
        }
    }
}

/// Spawn the event bus thread, which runs `event_handlers` on every event received on `events` until
/// `shutdown_signal` fires.
pub(crate) fn start_event_bus(
    event_handlers: Arc<EventHandlers>,
    events: Subscription,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some(event) = events.recv_timeout(Duration::from_millis(50)) {
            event_handlers.fire_handlers(&event)
        }
    })
}
