//! A volatile, in-memory implementation of [`Mempool`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use chained_hotstuff::{
    pluggables::{Mempool, MempoolStatus, PluggableError},
    types::{
        crypto_primitives::{CryptoHasher, Digest},
        data_types::{CryptoHash, Transaction, TxRef},
    },
};
use ed25519_dalek::VerifyingKey;

/// Transaction bodies known to every replica in a test. Stands in for transaction gossip.
pub(crate) type TxRegistry = Arc<Mutex<HashMap<TxRef, Transaction>>>;

pub(crate) fn new_tx_registry() -> TxRegistry {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Create a transaction whose hash is the SHA256 of `payload`.
pub(crate) fn transaction(payload: &[u8]) -> Transaction {
    let mut hasher = CryptoHasher::new();
    hasher.update(payload);
    Transaction {
        hash: CryptoHash::new(hasher.finalize().into()),
        payload: payload.to_vec(),
    }
}

#[derive(Clone)]
pub(crate) struct MemPool {
    registry: TxRegistry,
    inner: Arc<Mutex<MemPoolInner>>,
}

#[derive(Default)]
struct MemPoolInner {
    queue: VecDeque<TxRef>,
    pending: HashSet<TxRef>,
    committed: HashSet<TxRef>,
}

impl MemPool {
    pub(crate) fn new(registry: TxRegistry) -> MemPool {
        MemPool {
            registry,
            inner: Arc::new(Mutex::new(MemPoolInner::default())),
        }
    }

    /// Make `tx` known to every replica, and queue it in this one.
    pub(crate) fn submit(&self, tx: Transaction) {
        let hash = tx.hash;
        self.registry.lock().unwrap().insert(hash, tx);

        let mut inner = self.inner.lock().unwrap();
        if !inner.committed.contains(&hash) && !inner.queue.contains(&hash) {
            inner.queue.push_back(hash);
        }
    }
}

impl Mempool for MemPool {
    fn pop_txs_from_queue(&self, max: usize) -> Vec<TxRef> {
        let mut inner = self.inner.lock().unwrap();
        let count = max.min(inner.queue.len());
        let txs: Vec<TxRef> = inner.queue.drain(..count).collect();
        inner.pending.extend(txs.iter().copied());
        txs
    }

    fn set_txs_pending(&self, txs: &[TxRef]) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.retain(|tx| !txs.contains(tx));
        for tx in txs {
            if !inner.committed.contains(tx) {
                inner.pending.insert(*tx);
            }
        }
    }

    fn put_txs_to_queue(&self, txs: &[TxRef]) {
        let mut inner = self.inner.lock().unwrap();
        for tx in txs {
            inner.pending.remove(tx);
            if !inner.committed.contains(tx) && !inner.queue.contains(tx) {
                inner.queue.push_back(*tx);
            }
        }
    }

    fn remove_txs(&self, txs: &[TxRef]) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.retain(|tx| !txs.contains(tx));
        for tx in txs {
            inner.pending.remove(tx);
            inner.committed.insert(*tx);
        }
    }

    fn sync_txs(&self, _peer: &VerifyingKey, txs: &[TxRef]) -> Result<(), PluggableError> {
        let registry = self.registry.lock().unwrap();
        match txs.iter().find(|tx| !registry.contains_key(tx)) {
            Some(_) => Err("peer does not know the transaction".into()),
            None => Ok(()),
        }
    }

    fn verify_proposal_txs(&self, txs: &[TxRef]) -> bool {
        let registry = self.registry.lock().unwrap();
        let inner = self.inner.lock().unwrap();
        txs.iter()
            .all(|tx| registry.contains_key(tx) && !inner.committed.contains(tx))
    }

    fn txs_to_execute(&self, txs: &[TxRef]) -> (Vec<Transaction>, Vec<TxRef>) {
        let registry = self.registry.lock().unwrap();
        let inner = self.inner.lock().unwrap();
        let mut executable = Vec::new();
        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        for tx in txs {
            match registry.get(tx) {
                Some(body) if !inner.committed.contains(tx) && seen.insert(*tx) => {
                    executable.push(body.clone())
                }
                _ => skipped.push(*tx),
            }
        }
        (executable, skipped)
    }

    fn status(&self) -> MempoolStatus {
        let inner = self.inner.lock().unwrap();
        MempoolStatus {
            total: inner.queue.len() + inner.pending.len(),
            queue: inner.queue.len(),
            pending: inner.pending.len(),
        }
    }
}
