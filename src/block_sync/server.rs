/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`BlockSyncServer`], which answers [`BlockRequest`]s from peers that are
//! synchronizing the ancestors of a proposal.
//!
//! The server answers from the state pool first and from storage second, so both uncommitted and
//! committed blocks can be served. Unknown blocks are answered with an empty response, which lets
//! the requester fail fast instead of waiting for its timeout.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ed25519_dalek::VerifyingKey;

use crate::networking::{
    messages::{BlockRequest, BlockResponse},
    network::Network,
    sending::SenderHandle,
};
use crate::replica::{stop_requested, HaltSignal};
use crate::state_pool::BlockStore;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct BlockSyncServer<N: Network> {
    blocks: BlockStore,
    requests: Receiver<(VerifyingKey, BlockRequest)>,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    halt: HaltSignal,
}

impl<N: Network> BlockSyncServer<N> {
    pub(crate) fn new(
        blocks: BlockStore,
        requests: Receiver<(VerifyingKey, BlockRequest)>,
        network: N,
        shutdown_signal: Receiver<()>,
        halt: HaltSignal,
    ) -> Self {
        Self {
            blocks,
            requests,
            sender: SenderHandle::new(network),
            shutdown_signal,
            halt,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            if stop_requested(&self.shutdown_signal, &self.halt) {
                return;
            }

            match self.requests.recv_timeout(POLL_INTERVAL) {
                Ok((origin, BlockRequest { hash })) => {
                    let block = self.blocks.block(&hash);
                    self.sender.send(origin, BlockResponse { hash, block });
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }
}
