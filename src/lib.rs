/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of chained HotStuff, a pipelined Byzantine fault tolerant consensus protocol.
//!
//! A set of `n` validators, at most `f = (n - 1) / 3` of them Byzantine, agrees on a single chain of
//! blocks. Every block carries a quorum certificate (QC) for an earlier block, so that the votes for
//! one block also advance the certification of its ancestors. A block is committed once it heads a
//! *direct three-chain*: three blocks, each the parent of the next, where each of the upper two
//! carries a QC for the one below it.
//!
//! ## Crate layout
//!
//! - [`hotstuff`]: the generic [state machine](hotstuff::state_machine::HotStuff), written against the
//!   [`Driver`](hotstuff::protocol::Driver) capability trait.
//! - [`types`]: blocks, votes, QCs, the validator set, and cryptographic primitives.
//! - [`validator`]: the threads that check incoming messages and feed them to the state machine.
//! - [`pacemaker`]: round-robin leader rotation and the leader's proposal beat.
//! - [`pluggables`]: the traits that the library user implements: [`Mempool`](pluggables::Mempool),
//!   [`Storage`](pluggables::Storage), and [`Execution`](pluggables::Execution).
//! - [`networking`]: the [`Network`](networking::network::Network) trait and the messages sent over it.
//! - [`events`], [`event_bus`], and [`logging`]: observing what a replica does.
//! - [`replica`]: building, starting, and stopping a replica.
//!
//! ## Getting started
//!
//! Implement the pluggable traits and [`Network`](networking::network::Network), build a
//! [`Configuration`](config::Configuration), then start a replica through
//! [`ReplicaSpec`](replica::ReplicaSpec).

pub mod config;

pub mod events;

pub mod event_bus;

pub mod logging;

pub mod hotstuff;

pub mod pacemaker;

pub mod validator;

pub(crate) mod block_sync;

pub(crate) mod driver;

pub(crate) mod state_pool;

pub mod networking;

pub mod pluggables;

pub mod replica;

pub mod types;
