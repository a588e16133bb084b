/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are carried by the protocol: blocks, votes, quorum certificates, and the byte-level
//! newtypes they are built from.

pub mod block;

pub mod crypto_primitives;

pub mod data_types;

pub mod quorum_cert;

pub mod signature;

pub mod validator_set;

pub mod vote;
