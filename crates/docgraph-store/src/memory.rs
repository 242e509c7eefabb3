use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use docgraph_types::{Document, DocumentKey, WriteOp};
use tracing::{debug, warn};

use crate::config::MemoryStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::query::Filter;
use crate::traits::{DocumentStore, StoreTransaction};

struct Entry {
    version: u64,
    document: Document,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentKey, Entry>,
    clock: u64,
}

impl State {
    fn version_of(&self, key: &DocumentKey) -> Option<u64> {
        self.documents.get(key).map(|e| e.version)
    }

    /// Check a batch against the current contents without changing anything.
    /// Ops are checked in order, so a create after a delete of the same key
    /// in one batch is allowed.
    fn validate(&self, ops: &[WriteOp]) -> StoreResult<()> {
        let mut overlay: HashMap<&DocumentKey, bool> = HashMap::new();
        for op in ops {
            let key = op.key();
            if key.is_incomplete() {
                return Err(StoreError::IncompleteKey(key.clone()));
            }
            let exists = overlay
                .get(key)
                .copied()
                .unwrap_or_else(|| self.documents.contains_key(key));
            if matches!(op, WriteOp::Create { .. }) && exists {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            overlay.insert(key, !matches!(op, WriteOp::Delete { .. }));
        }
        Ok(())
    }

    fn commit(&mut self, ops: &[WriteOp]) {
        for op in ops {
            self.clock += 1;
            match op {
                WriteOp::Create { key, document } | WriteOp::Update { key, document } => {
                    self.documents.insert(
                        key.clone(),
                        Entry {
                            version: self.clock,
                            document: document.clone(),
                        },
                    );
                }
                WriteOp::Delete { key } => {
                    self.documents.remove(key);
                }
            }
        }
    }
}

/// In-memory, `BTreeMap`-based document store.
///
/// Intended for tests and embedding. Documents are held behind a `RwLock` and
/// cloned on read and write. Every write stamps the document with a fresh
/// version; transactions remember the version of each document they read and
/// refuse to commit if any of them moved, then rerun the body up to
/// [`MemoryStoreConfig::max_transaction_attempts`] times.
pub struct InMemoryDocumentStore {
    state: RwLock<State>,
    config: MemoryStoreConfig,
}

impl InMemoryDocumentStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            config,
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").documents.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").documents.is_empty()
    }

    /// Remove all documents from the store.
    pub fn clear(&self) {
        self.state.write().expect("lock poisoned").documents.clear();
    }

    /// Sorted list of every key in the store.
    pub fn all_keys(&self) -> Vec<DocumentKey> {
        let state = self.state.read().expect("lock poisoned");
        state.documents.keys().cloned().collect()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    type Query = Filter;

    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.documents.get(key).map(|e| e.document.clone()))
    }

    fn get_all(&self, keys: &[DocumentKey]) -> StoreResult<Vec<Option<Document>>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .map(|key| state.documents.get(key).map(|e| e.document.clone()))
            .collect())
    }

    fn apply(&self, ops: &[WriteOp]) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.validate(ops)?;
        state.commit(ops);
        debug!(ops = ops.len(), "applied write batch");
        Ok(())
    }

    fn query(&self, query: &Filter) -> StoreResult<Vec<(DocumentKey, Document)>> {
        let state = self.state.read().expect("lock poisoned");
        let matches = state
            .documents
            .iter()
            .filter(|(key, entry)| query.matches(key, &entry.document))
            .map(|(key, entry)| (key.clone(), entry.document.clone()));
        Ok(match query.max_results() {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn StoreTransaction) -> StoreResult<()>,
    ) -> StoreResult<()> {
        let attempts = self.config.max_transaction_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut txn = MemoryTransaction {
                state: &self.state,
                reads: HashMap::new(),
                writes: Vec::new(),
            };
            if let Err(e) = body(&mut txn) {
                debug!(attempt, error = %e, "transaction body failed, rolled back");
                return Err(e);
            }
            match txn.commit() {
                Ok(writes) => {
                    debug!(attempt, writes, "transaction committed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(attempt, error = %e, "transaction conflict, retrying");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "transaction failed to commit");
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.len();
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &count)
            .field("config", &self.config)
            .finish()
    }
}

struct MemoryTransaction<'s> {
    state: &'s RwLock<State>,
    /// Version observed on first read of each key; `None` means absent.
    reads: HashMap<DocumentKey, Option<u64>>,
    writes: Vec<WriteOp>,
}

impl MemoryTransaction<'_> {
    fn commit(self) -> StoreResult<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        for (key, seen) in &self.reads {
            if state.version_of(key) != *seen {
                return Err(StoreError::Conflict(key.clone()));
            }
        }
        state.validate(&self.writes)?;
        state.commit(&self.writes);
        Ok(self.writes.len())
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn get_all(&mut self, keys: &[DocumentKey]) -> StoreResult<Vec<Option<Document>>> {
        let lock = self.state;
        let state = lock.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .map(|key| {
                let entry = state.documents.get(key);
                self.reads
                    .entry(key.clone())
                    .or_insert_with(|| entry.map(|e| e.version));
                entry.map(|e| e.document.clone())
            })
            .collect())
    }

    fn write(&mut self, op: WriteOp) -> StoreResult<()> {
        if op.key().is_incomplete() {
            return Err(StoreError::IncompleteKey(op.key().clone()));
        }
        self.writes.push(op);
        Ok(())
    }
}
