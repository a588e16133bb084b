/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait.

use ed25519_dalek::VerifyingKey;

use super::messages::Message;

/// Peer-to-peer transport between the validators.
///
/// Each component of a replica that sends messages holds its own clone of the network, so cloning must
/// be cheap and clones must share the same underlying connections. None of the methods may block for
/// long: outbound queuing per peer is the implementation's responsibility.
pub trait Network: Clone + Send + 'static {
    /// Send a message to all peers without blocking. Whether the sender receives its own broadcast is
    /// up to the implementation; the replica handles both.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}
