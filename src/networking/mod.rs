/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! The replica does not open sockets itself. Library users provide a [`Network`](network::Network)
//! implementation, and the replica:
//! 1. Polls it on a dedicated thread, routing each inbound message into a bounded per-kind channel
//!    ([`receiving`]). A full channel drops the message rather than stalling the poller.
//! 2. Sends through per-component [`SenderHandle`](sending::SenderHandle)s.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
