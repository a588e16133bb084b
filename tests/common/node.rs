use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chained_hotstuff::{
    config::Configuration,
    events::{CommitBlockEvent, HaltEvent, ViewChangeEvent},
    replica::{Replica, ReplicaSpec, Status},
    types::{
        block::Block,
        data_types::{BlockHeight, ChainID, CryptoHash, Transaction, VerifyingKeyBytes},
        validator_set::ValidatorSet,
    },
};
use ed25519_dalek::SigningKey;

use crate::common::{
    counter_app::CounterApp,
    logging::{first_seven_base64_chars, log_with_context},
    mem_pool::{MemPool, TxRegistry},
    mem_storage::MemStorage,
    network::NetworkStub,
};

pub(crate) const CHAIN_ID: ChainID = ChainID::new(0);

/// Timing used by every node in the integration tests.
pub(crate) fn test_configuration(keypair: SigningKey, validator_set: ValidatorSet) -> Configuration {
    Configuration::builder()
        .me(keypair)
        .chain_id(CHAIN_ID)
        .validator_set(validator_set)
        .block_tx_limit(10)
        .tx_wait_time(Duration::from_millis(20))
        .beat_timeout(Duration::from_millis(100))
        .view_width(Duration::from_secs(3))
        .leader_timeout(Duration::from_millis(800))
        .sync_request_timeout(Duration::from_millis(500))
        .log_events(false)
        .build()
}

/// Things the Nodes will have in common:
/// - Validator Set.
/// - Configuration, apart from the keypair.
/// - The transaction registry.
///
/// Things that they will differ in:
/// - Mempool.
/// - Storage.
/// - Network instance.
/// - Keypair.
pub(crate) struct Node {
    verifying_key: VerifyingKeyBytes,
    mempool: MemPool,
    storage: MemStorage,
    commits: Arc<Mutex<Vec<(BlockHeight, CryptoHash)>>>,
    halted: Arc<Mutex<Option<String>>>,
    replica: Replica<NetworkStub>,
}

impl Node {
    pub(crate) fn new(
        keypair: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        registry: TxRegistry,
    ) -> Node {
        Node::with_storage(keypair, network, validator_set, registry, MemStorage::new())
    }

    /// Start a node on top of `storage`, which may hold the chain of an earlier node.
    pub(crate) fn with_storage(
        keypair: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        registry: TxRegistry,
        storage: MemStorage,
    ) -> Node {
        let verifying_key = keypair.verifying_key().to_bytes();
        let mempool = MemPool::new(registry);
        let commits = Arc::new(Mutex::new(Vec::new()));
        let halted = Arc::new(Mutex::new(None));

        let replica = ReplicaSpec::builder()
            .network(network)
            .mempool(mempool.clone())
            .storage(storage.clone())
            .execution(CounterApp::new(storage.clone()))
            .configuration(test_configuration(keypair, validator_set))
            .on_commit_block(commit_block_handler(verifying_key, Arc::clone(&commits)))
            .on_view_change(view_change_handler(verifying_key))
            .on_halt(halt_handler(Arc::clone(&halted)))
            .build()
            .start()
            .expect("replica should start");

        Node {
            verifying_key,
            mempool,
            storage,
            commits,
            halted,
            replica,
        }
    }

    pub(crate) fn submit_transaction(&self, tx: Transaction) {
        self.mempool.submit(tx);
    }

    pub(crate) fn status(&self) -> Status {
        self.replica.status()
    }

    pub(crate) fn committed_chain(&self) -> Vec<CryptoHash> {
        self.storage.committed_chain()
    }

    pub(crate) fn executed_txs(&self) -> usize {
        self.storage.executed_txs()
    }

    /// `(height, hash)` of every CommitBlock event observed, in order.
    pub(crate) fn commit_events(&self) -> Vec<(BlockHeight, CryptoHash)> {
        self.commits.lock().unwrap().clone()
    }

    pub(crate) fn halt_reason(&self) -> Option<String> {
        self.halted.lock().unwrap().clone()
    }

    pub(crate) fn get_block(&self, hash: &CryptoHash) -> Option<Block> {
        self.replica.get_block(hash)
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKeyBytes {
        self.verifying_key
    }

    pub(crate) fn storage(&self) -> MemStorage {
        self.storage.clone()
    }

    pub(crate) fn stop(&mut self) {
        self.replica.stop();
    }

    pub(crate) fn restart(&mut self) {
        self.replica.start();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.replica.is_running()
    }
}

fn commit_block_handler(
    verifying_key: VerifyingKeyBytes,
    commits: Arc<Mutex<Vec<(BlockHeight, CryptoHash)>>>,
) -> impl Fn(&CommitBlockEvent) + Send + Sync + 'static {
    move |commit_block_event: &CommitBlockEvent| {
        commits
            .lock()
            .unwrap()
            .push((commit_block_event.height, commit_block_event.block));
        log_with_context(
            &verifying_key,
            &format!(
                "Committed Block, block hash: {}, height: {}, transactions: {}",
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                commit_block_event.transactions
            ),
        );
    }
}

fn view_change_handler(
    verifying_key: VerifyingKeyBytes,
) -> impl Fn(&ViewChangeEvent) + Send + Sync + 'static {
    move |view_change_event: &ViewChangeEvent| {
        log_with_context(
            &verifying_key,
            &format!(
                "View Change, next leader: {} ({})",
                view_change_event.leader_index,
                first_seven_base64_chars(&view_change_event.leader.to_bytes())
            ),
        );
    }
}

fn halt_handler(halted: Arc<Mutex<Option<String>>>) -> impl Fn(&HaltEvent) + Send + Sync + 'static {
    move |halt_event: &HaltEvent| {
        *halted.lock().unwrap() = Some(halt_event.reason.clone());
    }
}
