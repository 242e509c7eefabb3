//! Transaction sessions.
//!
//! A session lives for one run of a transaction body. Writes issued through
//! it are flattened immediately but only staged: they go into a write-ahead
//! buffer that reads through the same session consult before the store, and
//! reach the native transaction only once the body has returned `Ok`. Reads
//! through any other request never see the buffer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docgraph_store::{DocumentStore, StoreError, StoreTransaction};
use docgraph_types::{Document, DocumentKey, WriteOp};
use tracing::debug;

use crate::deferred::{channel, Completer, Deferred};
use crate::error::{MapperError, MapperResult};
use crate::mapper::Mapper;
use crate::request::Request;
use crate::resolve::DocumentSource;

/// What a session-bound request needs from its session.
pub(crate) trait Staging {
    /// Read documents, staged contents first.
    fn fetch_staged(&self, keys: &[DocumentKey]) -> MapperResult<Vec<Option<Document>>>;

    /// What the session last staged for `key`: `Some(None)` for a delete,
    /// `None` when it has not written the key.
    fn staged(&self, key: &DocumentKey) -> Option<Option<Document>>;

    /// Buffer a write batch. The result settles when the transaction ends.
    fn stage(&self, ops: Vec<WriteOp>) -> Deferred<()>;
}

/// Reads through a session.
pub(crate) struct StagedSource<'a>(pub(crate) &'a (dyn Staging + 'a));

impl DocumentSource for StagedSource<'_> {
    fn fetch(&self, keys: &[DocumentKey]) -> MapperResult<Vec<Option<Document>>> {
        self.0.fetch_staged(keys)
    }
}

struct Session<'a> {
    native: RefCell<&'a mut dyn StoreTransaction>,
    /// Latest staged contents per key; `None` for a staged delete.
    latest: RefCell<HashMap<DocumentKey, Option<Document>>>,
    log: RefCell<Vec<WriteOp>>,
    completers: RefCell<Vec<Completer<()>>>,
    open: Arc<AtomicBool>,
}

impl<'a> Session<'a> {
    fn new(native: &'a mut dyn StoreTransaction) -> Self {
        Self {
            native: RefCell::new(native),
            latest: RefCell::new(HashMap::new()),
            log: RefCell::new(Vec::new()),
            completers: RefCell::new(Vec::new()),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Close the session and hand back the native transaction, the staged
    /// writes and the results waiting on them.
    fn finish(self) -> (&'a mut dyn StoreTransaction, Vec<WriteOp>, Vec<Completer<()>>) {
        self.open.store(false, Ordering::Release);
        (
            self.native.into_inner(),
            self.log.into_inner(),
            self.completers.into_inner(),
        )
    }
}

impl Staging for Session<'_> {
    fn fetch_staged(&self, keys: &[DocumentKey]) -> MapperResult<Vec<Option<Document>>> {
        let latest = self.latest.borrow();
        let unstaged: Vec<DocumentKey> = keys
            .iter()
            .filter(|key| !latest.contains_key(key))
            .cloned()
            .collect();
        let fetched = if unstaged.is_empty() {
            Vec::new()
        } else {
            self.native.borrow_mut().get_all(&unstaged)?
        };
        let mut fetched = fetched.into_iter();

        Ok(keys
            .iter()
            .map(|key| match latest.get(key) {
                Some(staged) => staged.clone(),
                None => fetched.next().flatten(),
            })
            .collect())
    }

    fn staged(&self, key: &DocumentKey) -> Option<Option<Document>> {
        self.latest.borrow().get(key).cloned()
    }

    fn stage(&self, ops: Vec<WriteOp>) -> Deferred<()> {
        {
            let mut latest = self.latest.borrow_mut();
            for op in &ops {
                latest.insert(op.key().clone(), op.document().cloned());
            }
        }
        self.log.borrow_mut().extend(ops);
        let (completer, deferred) = channel(Some(Arc::clone(&self.open)));
        self.completers.borrow_mut().push(completer);
        deferred
    }
}

/// The handle a transaction body receives.
pub struct Transaction<'t, S: DocumentStore> {
    mapper: &'t Mapper<S>,
    staging: &'t (dyn Staging + 't),
}

impl<'t, S: DocumentStore> Transaction<'t, S> {
    /// A request bound to this transaction.
    ///
    /// Its writes settle only when the transaction ends: calling
    /// [`Deferred::wait`] on one inside the body returns
    /// [`MapperError::PendingCommit`], and propagating that with `?` aborts
    /// the transaction. Keep the `Deferred` and wait after
    /// [`Mapper::run_in_transaction`] returns.
    pub fn request(&self) -> Request<'_, S> {
        Request::new(self.mapper, Some(self.staging))
    }
}

impl<S: DocumentStore> std::fmt::Debug for Transaction<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

fn settle_all(completers: Vec<Completer<()>>, result: &MapperResult<()>) {
    for completer in completers {
        completer.complete(result.clone());
    }
}

/// Run `body` in a store transaction. See [`Mapper::run_in_transaction`].
pub(crate) fn run<S, R, F>(mapper: &Mapper<S>, mut body: F) -> MapperResult<R>
where
    S: DocumentStore,
    F: FnMut(&Transaction<'_, S>) -> MapperResult<R>,
{
    let mut attempts = 0usize;
    let mut outcome: Option<MapperResult<R>> = None;
    let mut waiting: Vec<Completer<()>> = Vec::new();

    let committed = mapper.store().run_transaction(&mut |native: &mut dyn StoreTransaction| {
        attempts += 1;
        outcome = None;
        // Results staged by an attempt the store is retrying will never land.
        settle_all(
            std::mem::take(&mut waiting),
            &Err(MapperError::TransactionAborted(Box::new(
                StoreError::Aborted("superseded by a retry".into()).into(),
            ))),
        );

        let session = Session::new(native);
        let result = body(&Transaction {
            mapper,
            staging: &session,
        });
        let (native, log, completers) = session.finish();
        waiting = completers;

        match result {
            Ok(value) => {
                let writes = log.len();
                for op in log {
                    native.write(op)?;
                }
                debug!(attempt = attempts, writes, "transaction body finished");
                outcome = Some(Ok(value));
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                outcome = Some(Err(e));
                Err(StoreError::Aborted(reason))
            }
        }
    });

    let result = match (committed, outcome) {
        (Ok(()), Some(Ok(value))) => Ok(value),
        (Err(_), Some(Err(body_error))) => Err(body_error),
        (Err(store_error), _) => Err(store_error.into()),
        (Ok(()), _) => Err(StoreError::Aborted("transaction body did not run".into()).into()),
    }
    .map_err(|e| MapperError::TransactionAborted(Box::new(e)));

    match &result {
        Ok(_) => {
            debug!(attempts, "transaction committed");
            settle_all(waiting, &Ok(()));
        }
        Err(e) => {
            debug!(attempts, error = %e, "transaction aborted");
            settle_all(waiting, &Err(e.clone()));
        }
    }
    result
}
