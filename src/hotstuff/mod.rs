/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chained HotStuff state machine.
//!
//! ## Pipelining
//!
//! Chained HotStuff pipelines the three voting phases of basic HotStuff: a vote for a block is also a
//! "pre-commit" vote for its parent and a "commit" vote for its grandparent. Concretely, when a replica
//! processes a block `b_new`, it looks at the chain `b_new → b1 → b0` formed by following `justify`
//! links:
//! 1. `b_new.justify` (a QC for `b1`) may become the replica's highest QC.
//! 2. `b1` becomes the replica's locked block if it is higher than the current one.
//! 3. If `b_new`, `b1`, and `b0` form a *direct* chain (each is the parent of the next), `b0` and all of
//!    its uncommitted ancestors are committed.
//!
//! ## Genericity
//!
//! [`HotStuff`](state_machine::HotStuff) does not know about concrete blocks, QCs, votes, mempools, or
//! networks. It talks to the rest of the replica through a [`Driver`](protocol::Driver), whose
//! associated types expose only what the state machine needs through the capability traits in
//! [`protocol`]. The concrete binding lives in [`crate::driver`].

pub mod protocol;

pub mod state_machine;

pub(crate) mod vote_collector;
