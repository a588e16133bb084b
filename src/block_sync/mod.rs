/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching individual blocks from peers.
//!
//! A replica that receives a proposal (or a new view) referring to blocks it has never seen asks the
//! sender for them, one block per round trip:
//! - The [client](client) sends a [`BlockRequest`](crate::networking::messages::BlockRequest) and
//!   waits for the matching [`BlockResponse`](crate::networking::messages::BlockResponse), up to a
//!   configurable timeout.
//! - The [server](server) runs on its own thread and answers requests from the state pool and
//!   storage.
//!
//! Which blocks to request, and how they are checked, is decided by
//! [ancestor sync](crate::validator::ancestor_sync).

pub(crate) mod client;

pub(crate) mod server;
