/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, SyncSender, TrySendError},
    thread::{self, JoinHandle},
};

use ed25519_dalek::VerifyingKey;

use crate::{
    logging::first_seven_base64_chars,
    replica::{stop_requested, HaltSignal},
    types::{data_types::BufferSize, vote::Vote},
};

use super::{
    messages::{BlockRequest, BlockResponse, Message, NewView, Proposal},
    network::Network,
};

/// Receiving ends of the channels that the poller thread fills, one per message kind.
pub(crate) struct Inbound {
    pub(crate) proposals: Receiver<(VerifyingKey, Proposal)>,
    pub(crate) votes: Receiver<(VerifyingKey, Vote)>,
    pub(crate) new_views: Receiver<(VerifyingKey, NewView)>,
    pub(crate) block_requests: Receiver<(VerifyingKey, BlockRequest)>,
    pub(crate) block_responses: Receiver<(VerifyingKey, BlockResponse)>,
}

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into
/// [`Inbound`] channels.
///
/// Every channel holds at most `capacity` messages. When the consumer of a channel falls behind,
/// further messages of that kind are dropped instead of blocking the poller, so a slow consumer never
/// delays the delivery of other kinds of messages.
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    capacity: BufferSize,
    shutdown_signal: Receiver<()>,
    halt: HaltSignal,
) -> (JoinHandle<()>, Inbound) {
    let (to_proposals, proposals) = mpsc::sync_channel(capacity.int());
    let (to_votes, votes) = mpsc::sync_channel(capacity.int());
    let (to_new_views, new_views) = mpsc::sync_channel(capacity.int());
    let (to_block_requests, block_requests) = mpsc::sync_channel(capacity.int());
    let (to_block_responses, block_responses) = mpsc::sync_channel(capacity.int());

    let poller_thread = thread::spawn(move || loop {
        if stop_requested(&shutdown_signal, &halt) {
            return;
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::Proposal(proposal) => forward(&to_proposals, origin, proposal, "proposal"),
                Message::Vote(vote) => forward(&to_votes, origin, vote, "vote"),
                Message::NewView(new_view) => {
                    forward(&to_new_views, origin, new_view, "new view")
                }
                Message::BlockRequest(request) => {
                    forward(&to_block_requests, origin, request, "block request")
                }
                Message::BlockResponse(response) => {
                    forward(&to_block_responses, origin, response, "block response")
                }
            }
        } else {
            thread::yield_now()
        }
    });

    (
        poller_thread,
        Inbound {
            proposals,
            votes,
            new_views,
            block_requests,
            block_responses,
        },
    )
}

fn forward<T>(channel: &SyncSender<(VerifyingKey, T)>, origin: VerifyingKey, msg: T, kind: &str) {
    match channel.try_send((origin, msg)) {
        Ok(()) => (),
        Err(TrySendError::Full(_)) => log::debug!(
            "Dropping {} from {}: inbound buffer is full",
            kind,
            first_seven_base64_chars(&origin.to_bytes())
        ),
        // The consumer has shut down; the poller is about to be told to stop as well.
        Err(TrySendError::Disconnected(_)) => (),
    }
}
