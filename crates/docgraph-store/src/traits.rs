use docgraph_types::{Document, DocumentKey, WriteOp};

use crate::error::StoreResult;

/// A schemaless document store.
///
/// All implementations must satisfy these invariants:
/// - `apply` is atomic: every op in the batch lands or none does.
/// - A `Create` against an existing key fails the whole batch with
///   `AlreadyExists`; `Update` upserts; deleting an absent key is a no-op.
/// - `run_transaction` either commits every write the body issued or none,
///   and retries internally on contention.
/// - Errors are propagated, never silently ignored.
pub trait DocumentStore: Send + Sync + 'static {
    /// The store's native query. The mapper passes it through untouched.
    type Query: Send + Sync + 'static;

    /// Read one document. Returns `Ok(None)` if it does not exist.
    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>>;

    /// Read many documents in one round trip, in the order of `keys`.
    ///
    /// Default implementation calls `get()` for each key. Backends should
    /// override it so a batch costs a single call to the server.
    fn get_all(&self, keys: &[DocumentKey]) -> StoreResult<Vec<Option<Document>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Apply a batch of writes atomically.
    fn apply(&self, ops: &[WriteOp]) -> StoreResult<()>;

    /// Create or replace one document.
    fn set(&self, key: &DocumentKey, document: Document) -> StoreResult<()> {
        self.apply(&[WriteOp::Update {
            key: key.clone(),
            document,
        }])
    }

    /// Delete one document. Deleting an absent document succeeds.
    fn delete(&self, key: &DocumentKey) -> StoreResult<()> {
        self.apply(&[WriteOp::Delete { key: key.clone() }])
    }

    /// Run a native query and return the matching documents with their keys.
    fn query(&self, query: &Self::Query) -> StoreResult<Vec<(DocumentKey, Document)>>;

    /// Run `body` inside a transaction.
    ///
    /// Writes issued through the transaction handle commit atomically when
    /// `body` returns `Ok`. If `body` fails nothing is written and its error
    /// is returned. The body may run more than once if the backend retries
    /// after a conflict, so it must not have side effects outside the handle
    /// that cannot be repeated.
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn StoreTransaction) -> StoreResult<()>,
    ) -> StoreResult<()>;
}

/// The handle a transaction body uses to talk to the store.
///
/// Reads see committed state only, never the transaction's own buffered
/// writes; writes are buffered until commit.
pub trait StoreTransaction {
    /// Read many documents, in the order of `keys`.
    fn get_all(&mut self, keys: &[DocumentKey]) -> StoreResult<Vec<Option<Document>>>;

    /// Read one document.
    fn get(&mut self, key: &DocumentKey) -> StoreResult<Option<Document>> {
        Ok(self.get_all(std::slice::from_ref(key))?.pop().flatten())
    }

    /// Buffer one write for commit.
    fn write(&mut self, op: WriteOp) -> StoreResult<()>;
}
