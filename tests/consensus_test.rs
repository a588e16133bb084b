//! End-to-end tests that run several replicas over the mock network in [`common::network`].
//!
//! Every test starts one [`Node`] per honest validator. Nodes share a [`TxRegistry`] standing in for
//! transaction gossip, but otherwise only communicate through the network stubs.

mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use chained_hotstuff::{
    networking::{
        messages::{Message, Proposal},
        network::Network,
    },
    types::{
        block::{Block, BlockContents},
        crypto_primitives::Keypair,
        data_types::{BlockHeight, CryptoHash, Timestamp},
        quorum_cert::QuorumCert,
        validator_set::ValidatorSet,
    },
};
use ed25519_dalek::SigningKey;
use log::LevelFilter;
use rand_core::OsRng;

use crate::common::{
    logging::setup_logger,
    mem_pool::{new_tx_registry, transaction, TxRegistry},
    network::{mock_network, NetworkStub},
    node::{Node, CHAIN_ID},
};

fn signing_keys(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprg)).collect()
}

fn validator_set_of(keys: &[SigningKey]) -> ValidatorSet {
    ValidatorSet::new(keys.iter().map(|key| key.verifying_key()))
}

fn start_nodes(
    keys: &[SigningKey],
    networks: Vec<NetworkStub>,
    validator_set: &ValidatorSet,
    registry: &TxRegistry,
) -> Vec<Node> {
    keys.iter()
        .cloned()
        .zip(networks)
        .map(|(key, network)| {
            Node::new(key, network, validator_set.clone(), registry.clone())
        })
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes. Returns whether it held.
fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}

/// Assert that no two committed chains disagree at any height they both reached.
fn assert_prefix_consistent(nodes: &[Node]) {
    let chains: Vec<Vec<CryptoHash>> = nodes.iter().map(|node| node.committed_chain()).collect();
    for a in &chains {
        for b in &chains {
            let common = a.len().min(b.len());
            assert_eq!(a[..common], b[..common]);
        }
    }
}

fn assert_none_halted(nodes: &[Node]) {
    for node in nodes {
        assert_eq!(node.halt_reason(), None);
        assert!(!node.status().halted);
    }
}

#[test]
fn four_validators_commit_transactions_test() {
    setup_logger(LevelFilter::Info);

    let keys = signing_keys(4);
    let validator_set = validator_set_of(&keys);
    let registry = new_tx_registry();
    let (networks, _control) = mock_network(keys.iter().map(|key| key.verifying_key()));
    let nodes = start_nodes(&keys, networks, &validator_set, &registry);

    const TX_COUNT: usize = 20;
    for i in 0..TX_COUNT {
        let tx = transaction(format!("tx-{}-{}", i, rand::random::<u64>()).as_bytes());
        for node in &nodes {
            node.submit_transaction(tx.clone());
        }
    }

    let executed_everywhere = wait_until(Duration::from_secs(60), || {
        nodes.iter().all(|node| node.executed_txs() == TX_COUNT)
    });
    assert!(executed_everywhere, "not every node executed every transaction");

    assert_prefix_consistent(&nodes);
    assert_none_halted(&nodes);

    for node in &nodes {
        // Commit events are delivered in height order, one per committed block.
        let commits = node.commit_events();
        let heights: Vec<u64> = commits.iter().map(|(height, _)| height.int()).collect();
        let expected: Vec<u64> = (1..=heights.len() as u64).collect();
        assert_eq!(heights, expected);

        let status = node.status();
        assert_eq!(status.committed_tx_count, TX_COUNT as u64);
        assert!(status.exec_height.int() >= heights.len() as u64);

        let last = node.committed_chain().last().copied();
        if let Some(hash) = last {
            assert!(node.get_block(&hash).is_some());
        }
    }
}

#[test]
fn silent_first_leader_is_rotated_out_test() {
    setup_logger(LevelFilter::Info);

    let keys = signing_keys(4);
    let validator_set = validator_set_of(&keys);
    let registry = new_tx_registry();
    let (networks, control) = mock_network(keys.iter().map(|key| key.verifying_key()));

    // Validator 0 leads the first view, but nothing it sends or receives gets through.
    let silent = keys[0].verifying_key();
    control.mute(silent);
    let nodes = start_nodes(&keys, networks, &validator_set, &registry);
    let (silent_node, live_nodes) = nodes.split_at(1);

    let progressed = wait_until(Duration::from_secs(60), || {
        live_nodes
            .iter()
            .all(|node| node.committed_chain().len() >= 3)
    });
    assert!(progressed, "the live validators did not commit past the silent leader");

    assert!(silent_node[0].committed_chain().is_empty());
    assert_prefix_consistent(live_nodes);
    assert_none_halted(&nodes);

    // No block on the committed chain can come from the silent validator.
    for hash in live_nodes[0].committed_chain() {
        let block = live_nodes[0].get_block(&hash).unwrap();
        assert_ne!(block.proposer, silent.to_bytes());
    }
}

#[test]
fn conflicting_proposals_do_not_fork_the_chain_test() {
    setup_logger(LevelFilter::Info);

    let keys = signing_keys(4);
    let validator_set = validator_set_of(&keys);
    let registry = new_tx_registry();
    let (mut networks, _control) = mock_network(keys.iter().map(|key| key.verifying_key()));

    // Validator 0 is Byzantine. It leads the first view, and speaks through its raw network stub.
    let mut byzantine_network = networks.remove(0);
    let byzantine = Keypair::new(keys[0].clone());
    let honest_keys = &keys[1..];
    let nodes = start_nodes(honest_keys, networks, &validator_set, &registry);

    let genesis = Block::genesis(CHAIN_ID);
    let equivocation = |timestamp: i64| {
        Block::new(
            &byzantine,
            BlockContents {
                height: BlockHeight::new(1),
                parent_hash: genesis.hash,
                justify: QuorumCert::genesis(genesis.hash),
                exec_height: BlockHeight::new(0),
                state_root: CryptoHash::zero(),
                transactions: Vec::new(),
                timestamp: Timestamp::new(timestamp),
            },
        )
    };
    let first = equivocation(1);
    let second = equivocation(2);
    assert_ne!(first.hash, second.hash);

    byzantine_network.send(
        honest_keys[0].verifying_key(),
        Message::Proposal(Proposal { block: first }),
    );
    for key in &honest_keys[1..] {
        byzantine_network.send(
            key.verifying_key(),
            Message::Proposal(Proposal {
                block: second.clone(),
            }),
        );
    }

    let progressed = wait_until(Duration::from_secs(60), || {
        nodes.iter().all(|node| node.committed_chain().len() >= 3)
    });
    assert!(progressed, "the honest validators stopped making progress");

    assert_prefix_consistent(&nodes);
    assert_none_halted(&nodes);
}
