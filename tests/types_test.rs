//! Validation of the wire types: quorum certificates, votes, and blocks.

use chained_hotstuff::types::{
    block::{Block, BlockContents, BlockError},
    crypto_primitives::Keypair,
    data_types::{BlockHeight, ChainID, CryptoHash, Timestamp},
    quorum_cert::{QuorumCert, QuorumCertError},
    validator_set::{majority_count, ValidatorSet},
    vote::{Vote, VoteError},
};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

fn keypairs(n: usize) -> Vec<Keypair> {
    let mut csprg = OsRng {};
    (0..n)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect()
}

fn validator_set(keypairs: &[Keypair]) -> ValidatorSet {
    ValidatorSet::new(keypairs.iter().map(|kp| kp.public()))
}

fn qc_from(keypairs: &[Keypair], block_hash: CryptoHash) -> QuorumCert {
    QuorumCert::new(
        block_hash,
        keypairs
            .iter()
            .map(|kp| Vote::new(kp, block_hash).signature)
            .collect(),
    )
}

#[test]
fn majority_count_test() {
    let expected = [(1, 1), (2, 2), (3, 3), (4, 3), (5, 4), (6, 5), (7, 5), (10, 7), (100, 67)];
    for (n, majority) in expected {
        assert_eq!(majority_count(n), majority, "n = {}", n);
    }

    let keypairs = keypairs(4);
    let vs = validator_set(&keypairs);
    assert_eq!(vs.majority_count(), 3);
    assert_eq!(vs.max_faulty(), 1);
}

#[test]
fn validator_set_keeps_order_and_ignores_repeats() {
    let keypairs = keypairs(3);
    let vs = ValidatorSet::new(
        [0, 1, 0, 2]
            .into_iter()
            .map(|i| keypairs[i].public()),
    );

    assert_eq!(vs.len(), 3);
    for (i, kp) in keypairs.iter().enumerate() {
        assert_eq!(vs.position(&kp.public_bytes()), Some(i));
        assert_eq!(vs.get(i), Some(&kp.public()));
    }
}

#[test]
fn quorum_cert_validation_test() {
    let keypairs = keypairs(5);
    let vs = validator_set(&keypairs[..4]);
    let block_hash = CryptoHash::new([7u8; 32]);

    // A majority of distinct validators.
    assert_eq!(qc_from(&keypairs[..3], block_hash).validate(&vs), Ok(()));

    // Too few signatures.
    assert_eq!(
        qc_from(&keypairs[..2], block_hash).validate(&vs),
        Err(QuorumCertError::NotEnoughSignatures {
            required: 3,
            got: 2
        })
    );

    // The same validator counted twice.
    let mut duplicated = qc_from(&keypairs[..2], block_hash);
    duplicated.signatures.push(duplicated.signatures[0].clone());
    assert_eq!(
        duplicated.validate(&vs),
        Err(QuorumCertError::DuplicateSigner {
            signer: keypairs[0].public_bytes()
        })
    );

    // A signer outside the validator set.
    let outsider = qc_from(&[&keypairs[..2], &keypairs[4..]].concat(), block_hash);
    assert_eq!(
        outsider.validate(&vs),
        Err(QuorumCertError::InvalidValidator {
            signer: keypairs[4].public_bytes()
        })
    );

    // Signatures over a different block.
    let mut forged = qc_from(&keypairs[..3], block_hash);
    forged.signatures[1] = Vote::new(&keypairs[1], CryptoHash::new([8u8; 32])).signature;
    assert_eq!(
        forged.validate(&vs),
        Err(QuorumCertError::InvalidSignature {
            signer: keypairs[1].public_bytes()
        })
    );
}

#[test]
fn genesis_quorum_cert_test() {
    let keypairs = keypairs(4);
    let vs = validator_set(&keypairs);
    let genesis = Block::genesis(ChainID::new(3));
    let genesis_qc = QuorumCert::genesis(genesis.hash);

    assert!(genesis_qc.is_genesis(&genesis.hash));
    assert!(genesis_qc.validate(&vs).is_err());
    assert_eq!(genesis_qc.validate_or_genesis(&vs, &genesis.hash), Ok(()));

    // An empty QC for any other block is not a genesis QC.
    let other_chain = Block::genesis(ChainID::new(4));
    assert_ne!(genesis.hash, other_chain.hash);
    assert!(QuorumCert::genesis(other_chain.hash)
        .validate_or_genesis(&vs, &genesis.hash)
        .is_err());
}

#[test]
fn vote_validation_test() {
    let keypairs = keypairs(5);
    let vs = validator_set(&keypairs[..4]);
    let block_hash = CryptoHash::new([1u8; 32]);

    let vote = Vote::new(&keypairs[2], block_hash);
    assert_eq!(vote.validate(&vs), Ok(()));
    assert_eq!(vote.voter(), keypairs[2].public_bytes());

    let outsider = Vote::new(&keypairs[4], block_hash);
    assert_eq!(
        outsider.validate(&vs),
        Err(VoteError::InvalidValidator {
            signer: keypairs[4].public_bytes()
        })
    );

    let mut tampered = Vote::new(&keypairs[2], block_hash);
    tampered.block_hash = CryptoHash::new([2u8; 32]);
    assert_eq!(
        tampered.validate(&vs),
        Err(VoteError::InvalidSignature {
            signer: keypairs[2].public_bytes()
        })
    );
}

#[test]
fn block_validation_test() {
    let keypairs = keypairs(5);
    let vs = validator_set(&keypairs[..4]);
    let genesis = Block::genesis(ChainID::new(0));

    let contents = BlockContents {
        height: BlockHeight::new(1),
        parent_hash: genesis.hash,
        justify: QuorumCert::genesis(genesis.hash),
        exec_height: BlockHeight::new(0),
        state_root: CryptoHash::zero(),
        transactions: vec![CryptoHash::new([9u8; 32])],
        timestamp: Timestamp::new(42),
    };
    let block = Block::new(&keypairs[0], contents.clone());
    assert_eq!(block.validate(&vs, &genesis.hash), Ok(()));
    assert_eq!(block.proposer, keypairs[0].public_bytes());

    let mut tampered = block.clone();
    tampered.transactions.clear();
    assert_eq!(tampered.validate(&vs, &genesis.hash), Err(BlockError::InvalidHash));

    let outsider = Block::new(&keypairs[4], contents.clone());
    assert_eq!(
        outsider.validate(&vs, &genesis.hash),
        Err(BlockError::InvalidProposer {
            proposer: keypairs[4].public_bytes()
        })
    );

    let mut resigned = block.clone();
    resigned.signature = Block::new(&keypairs[1], contents.clone()).signature;
    assert_eq!(
        resigned.validate(&vs, &genesis.hash),
        Err(BlockError::InvalidSignature)
    );

    let weak_justify = Block::new(
        &keypairs[0],
        BlockContents {
            justify: qc_from(&keypairs[..2], genesis.hash),
            ..contents
        },
    );
    assert!(matches!(
        weak_justify.validate(&vs, &genesis.hash),
        Err(BlockError::InvalidJustify(
            QuorumCertError::NotEnoughSignatures { .. }
        ))
    ));
}

#[test]
fn genesis_block_is_deterministic_per_chain() {
    let a = Block::genesis(ChainID::new(1));
    let b = Block::genesis(ChainID::new(1));
    let c = Block::genesis(ChainID::new(2));

    assert_eq!(a, b);
    assert_ne!(a.hash, c.hash);
    assert!(a.is_genesis());
    assert_eq!(a.height, BlockHeight::new(0));
}
