/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;

use crate::types::data_types::VerifyingKeyBytes;

use super::{messages::Message, network::Network};

/// Handle for sending and broadcasting messages to the [`Network`] from `&self` methods.
///
/// It can be used to send or broadcast instances of any type that implement the [`Into<Message>`]
/// trait. The wrapped network is locked only for the duration of a single `send` or `broadcast`.
pub(crate) struct SenderHandle<N: Network> {
    network: Mutex<N>,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self {
            network: Mutex::new(network),
        }
    }

    pub(crate) fn send<S: Into<Message>>(&self, peer: VerifyingKey, msg: S) {
        self.network.lock().send(peer, msg.into())
    }

    /// Send to the peer whose serialized key is `peer`. Returns false if `peer` is not a valid key.
    pub(crate) fn send_to<S: Into<Message>>(&self, peer: &VerifyingKeyBytes, msg: S) -> bool {
        match VerifyingKey::from_bytes(peer) {
            Ok(peer) => {
                self.send(peer, msg);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn broadcast<S: Into<Message>>(&self, msg: S) {
        self.network.lock().broadcast(msg.into())
    }
}
