/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Requests single blocks from peers and waits for the answer.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;

use crate::config::BlockSyncConfiguration;
use crate::networking::{
    messages::{BlockRequest, BlockResponse},
    network::Network,
    sending::SenderHandle,
};
use crate::types::{block::Block, data_types::CryptoHash};
use crate::validator::ancestor_sync::{BlockFetcher, SyncError};

pub(crate) struct BlockSyncClient<N: Network> {
    config: BlockSyncConfiguration,
    sender: SenderHandle<N>,
    responses: Mutex<Receiver<(VerifyingKey, BlockResponse)>>,
}

impl<N: Network> BlockSyncClient<N> {
    pub(crate) fn new(
        config: BlockSyncConfiguration,
        network: N,
        responses: Receiver<(VerifyingKey, BlockResponse)>,
    ) -> Self {
        Self {
            config,
            sender: SenderHandle::new(network),
            responses: Mutex::new(responses),
        }
    }
}

impl<N: Network> BlockFetcher for BlockSyncClient<N> {
    /// Ask `peer` for the block with `hash`.
    ///
    /// Only one request is in flight at a time: the response channel stays locked until the matching
    /// response arrives or the request times out. Responses from other peers, or for other hashes, are
    /// stale answers to earlier requests and are discarded.
    fn fetch(&self, peer: &VerifyingKey, hash: &CryptoHash) -> Result<Option<Block>, SyncError> {
        let responses = self.responses.lock();
        while responses.try_recv().is_ok() {}

        self.sender.send(*peer, BlockRequest { hash: *hash });

        let deadline = Instant::now() + self.config.request_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match responses.recv_timeout(remaining) {
                Ok((origin, response)) => {
                    if origin == *peer && response.hash == *hash {
                        return Ok(response.block);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(SyncError::Timeout { hash: *hash }),
                Err(RecvTimeoutError::Disconnected) => return Err(SyncError::Disconnected),
            }
        }
    }
}
