//! A volatile, in-memory implementation of [`Storage`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chained_hotstuff::{
    pluggables::{CommitData, PluggableError, Storage},
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash},
        quorum_cert::QuorumCert,
    },
};

#[derive(Clone)]
pub(crate) struct MemStorage(Arc<Mutex<MemStorageInner>>);

struct MemStorageInner {
    genesis: Option<Block>,
    blocks: HashMap<CryptoHash, Block>,
    chain: Vec<CryptoHash>,
    last_committed: Option<(Block, QuorumCert)>,
    state_root: CryptoHash,
    executed_txs: usize,
}

impl MemStorage {
    pub(crate) fn new() -> MemStorage {
        MemStorage(Arc::new(Mutex::new(MemStorageInner {
            genesis: None,
            blocks: HashMap::new(),
            chain: Vec::new(),
            last_committed: None,
            state_root: CryptoHash::zero(),
            executed_txs: 0,
        })))
    }

    /// Hashes of the committed blocks, lowest first. Does not include genesis.
    pub(crate) fn committed_chain(&self) -> Vec<CryptoHash> {
        self.0.lock().unwrap().chain.clone()
    }

    pub(crate) fn executed_txs(&self) -> usize {
        self.0.lock().unwrap().executed_txs
    }
}

impl Storage for MemStorage {
    fn genesis_hash(&self) -> Option<CryptoHash> {
        self.0.lock().unwrap().genesis.as_ref().map(|genesis| genesis.hash)
    }

    fn init_genesis(&self, genesis: &Block) -> Result<(), PluggableError> {
        let mut inner = self.0.lock().unwrap();
        if inner.genesis.is_some() {
            return Err("genesis already initialized".into());
        }
        inner.genesis = Some(genesis.clone());
        inner.blocks.insert(genesis.hash, genesis.clone());
        Ok(())
    }

    fn last_committed(&self) -> Option<(Block, QuorumCert)> {
        self.0.lock().unwrap().last_committed.clone()
    }

    fn block_height(&self) -> BlockHeight {
        self.0
            .lock()
            .unwrap()
            .last_committed
            .as_ref()
            .map(|(block, _)| block.height)
            .unwrap_or_default()
    }

    fn state_root(&self) -> CryptoHash {
        self.0.lock().unwrap().state_root
    }

    fn block(&self, hash: &CryptoHash) -> Option<Block> {
        self.0.lock().unwrap().blocks.get(hash).cloned()
    }

    fn commit(&self, data: CommitData) -> Result<(), PluggableError> {
        let mut inner = self.0.lock().unwrap();
        let expected = inner
            .last_committed
            .as_ref()
            .map(|(block, _)| block.height)
            .unwrap_or_default()
            + 1;
        if data.block.height != expected {
            return Err(format!(
                "committed height {} out of order, expected {}",
                data.block.height, expected
            )
            .into());
        }

        inner.blocks.insert(data.block.hash, data.block.clone());
        inner.chain.push(data.block.hash);
        inner.state_root = data.block_commit.state_root;
        inner.executed_txs += data.transactions.len();
        inner.last_committed = Some((data.block, data.qc));
        Ok(())
    }
}
