/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Replica configuration.
//!
//! [`Configuration`] holds every user-defined parameter of a replica. When the replica starts, it is
//! split into smaller, component-specific configuration structs before being passed to components.
//!
//! ## Timing parameters
//!
//! - `beat_timeout`: how long the leader's beat loop waits for a new highest QC before proposing anyway.
//! - `view_width`: the maximum time a leader stays in charge before replicas rotate to the next one.
//! - `leader_timeout`: how long replicas wait for a QC proposed by the current leader before rotating.
//!   Should be smaller than `view_width`.
//! - `tx_wait_time`: how long a replica waits for the mempool to become non-empty before voting for a
//!   block proposed by someone else. Keeps an idle network from spinning on empty blocks.
//! - `sync_request_timeout`: how long to wait for a single block during ancestor sync.
//!
//! Durations must be "well below" [`u64::MAX`] seconds, since they are added to [`Instant`]s.
//!
//! [`Instant`]: std::time::Instant

use std::time::Duration;

use ed25519_dalek::{SigningKey, VerifyingKey};
use typed_builder::TypedBuilder;

use crate::types::{
    block::Block,
    crypto_primitives::Keypair,
    data_types::{BufferSize, ChainID, CryptoHash},
    validator_set::ValidatorSet,
};

/// Stores the user-defined parameters required to start a replica.
///
/// ## Chain ID
///
/// The chain ID is folded into the hash of the [genesis block](Block::genesis). Replicas with
/// different chain IDs therefore never accept each other's blocks, votes, or QCs.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.chain_id(...)`
    - `.validator_set(...)`
    - `.block_tx_limit(...)`
    - `.tx_wait_time(...)`
    - `.beat_timeout(...)`
    - `.view_width(...)`
    - `.leader_timeout(...)`
    - `.sync_request_timeout(...)`
    - `.log_events(...)`

    Optional:
    - `.max_sync_depth(...)`
    - `.msg_buffer_capacity(...)`
    - `.event_buffer_capacity(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign blocks and votes. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the chain ID of the blockchain. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the fixed, ordered set of validators. Required."))]
    pub validator_set: ValidatorSet,
    #[builder(setter(doc = "Set the maximum number of transactions in a proposed block. Required."))]
    pub block_tx_limit: usize,
    #[builder(setter(doc = "Set how long to wait for transactions before voting. Required."))]
    pub tx_wait_time: Duration,
    #[builder(setter(doc = "Set how long the leader waits for a new QC before proposing. Required."))]
    pub beat_timeout: Duration,
    #[builder(setter(doc = "Set the maximum duration of a leader's view. Required."))]
    pub view_width: Duration,
    #[builder(setter(doc = "Set how long to wait for progress from the current leader. Required."))]
    pub leader_timeout: Duration,
    #[builder(setter(doc = "Set the timeout for a single block request during ancestor sync. Required."))]
    pub sync_request_timeout: Duration,
    #[builder(default = 256, setter(doc = "Set the maximum number of ancestors fetched to accept one proposal. Optional."))]
    pub max_sync_depth: usize,
    #[builder(default = BufferSize::new(1024), setter(doc = "Set the capacity of each inbound message channel. Optional."))]
    pub msg_buffer_capacity: BufferSize,
    #[builder(default = BufferSize::new(1024), setter(doc = "Set the capacity of each event subscription. Optional."))]
    pub event_buffer_capacity: BufferSize,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

/// Parameters of the [driver](crate::driver).
#[derive(Clone)]
pub(crate) struct DriverConfiguration {
    pub(crate) keypair: Keypair,
    pub(crate) validator_set: ValidatorSet,
    pub(crate) block_tx_limit: usize,
    pub(crate) tx_wait_time: Duration,
}

/// Parameters of the [validator](crate::validator) threads.
#[derive(Clone)]
pub(crate) struct ValidatorConfiguration {
    pub(crate) me: VerifyingKey,
    pub(crate) validator_set: ValidatorSet,
    pub(crate) genesis_hash: CryptoHash,
    pub(crate) max_sync_depth: usize,
}

/// Parameters of the [pacemaker](crate::pacemaker).
#[derive(Clone)]
pub(crate) struct PacemakerConfiguration {
    pub(crate) me: VerifyingKey,
    pub(crate) validator_set: ValidatorSet,
    pub(crate) beat_timeout: Duration,
    pub(crate) view_width: Duration,
    pub(crate) leader_timeout: Duration,
    pub(crate) event_buffer_capacity: BufferSize,
}

/// Parameters of the [block sync client](crate::block_sync::client).
#[derive(Clone)]
pub(crate) struct BlockSyncConfiguration {
    pub(crate) request_timeout: Duration,
}

pub(crate) struct ComponentConfigurations {
    pub(crate) driver: DriverConfiguration,
    pub(crate) validator: ValidatorConfiguration,
    pub(crate) pacemaker: PacemakerConfiguration,
    pub(crate) block_sync: BlockSyncConfiguration,
}

impl Configuration {
    pub fn genesis(&self) -> Block {
        Block::genesis(self.chain_id)
    }

    pub(crate) fn split(self) -> ComponentConfigurations {
        let keypair = Keypair::new(self.me);
        let me = keypair.public();
        let genesis_hash = Block::genesis(self.chain_id).hash;

        ComponentConfigurations {
            driver: DriverConfiguration {
                keypair,
                validator_set: self.validator_set.clone(),
                block_tx_limit: self.block_tx_limit,
                tx_wait_time: self.tx_wait_time,
            },
            validator: ValidatorConfiguration {
                me,
                validator_set: self.validator_set.clone(),
                genesis_hash,
                max_sync_depth: self.max_sync_depth,
            },
            pacemaker: PacemakerConfiguration {
                me,
                validator_set: self.validator_set,
                beat_timeout: self.beat_timeout,
                view_width: self.view_width,
                leader_timeout: self.leader_timeout,
                event_buffer_capacity: self.event_buffer_capacity,
            },
            block_sync: BlockSyncConfiguration {
                request_timeout: self.sync_request_timeout,
            },
        }
    }
}
