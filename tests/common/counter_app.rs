//! [`CounterApp`], a simple implementation of [`Execution`] used in the integration tests.
//!
//! The counter app's state is a hash chain: executing a block folds the hash of every executed
//! transaction into the previous state root. Two replicas therefore only agree on the state root if
//! they executed the same transactions in the same order.

use chained_hotstuff::{
    pluggables::{BlockCommit, Execution, PluggableError, Storage, TxCommit},
    types::{
        block::Block,
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, Transaction},
    },
};

use crate::common::mem_storage::MemStorage;

pub(crate) struct CounterApp {
    storage: MemStorage,
}

impl CounterApp {
    pub(crate) fn new(storage: MemStorage) -> CounterApp {
        CounterApp { storage }
    }
}

impl Execution for CounterApp {
    fn execute(
        &self,
        _block: &Block,
        transactions: &[Transaction],
    ) -> Result<(BlockCommit, Vec<TxCommit>), PluggableError> {
        let mut hasher = CryptoHasher::new();
        hasher.update(self.storage.state_root().bytes());
        for tx in transactions {
            hasher.update(tx.hash.bytes());
        }
        let state_root = CryptoHash::new(hasher.finalize().into());

        let tx_commits = transactions
            .iter()
            .map(|tx| TxCommit {
                tx: tx.hash,
                success: true,
                output: Vec::new(),
            })
            .collect();

        Ok((
            BlockCommit {
                state_root,
                output: (transactions.len() as u64).to_le_bytes().to_vec(),
            },
            tx_commits,
        ))
    }
}
