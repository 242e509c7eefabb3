//! The caller-facing operations.
//!
//! A [`Request`] carries the load paths for its reads and, when it comes from
//! [`Transaction::request`](crate::Transaction::request), the session its
//! reads and writes go through. Every operation validates and flattens its
//! input before returning, so classification and identifier errors surface
//! immediately; the store work itself is returned as a [`Deferred`].

use std::sync::Arc;

use docgraph_store::DocumentStore;
use docgraph_types::{Document, DocumentKey, WriteOp};
use tracing::debug;

use crate::deferred::Deferred;
use crate::dispatch::dispatch;
use crate::entity::{AnyEntity, EntityRef, Roots};
use crate::error::{MapperError, MapperResult};
use crate::flatten::flatten;
use crate::mapper::Mapper;
use crate::path::LoadPaths;
use crate::registry::schema_of;
use crate::resolve::{load, DocumentSource, StoreSource};
use crate::schema::Record;
use crate::session::{StagedSource, Staging};

pub struct Request<'a, S: DocumentStore> {
    mapper: &'a Mapper<S>,
    staging: Option<&'a (dyn Staging + 'a)>,
    paths: Vec<String>,
}

impl<'a, S: DocumentStore> Request<'a, S> {
    pub(crate) fn new(mapper: &'a Mapper<S>, staging: Option<&'a (dyn Staging + 'a)>) -> Self {
        Self {
            mapper,
            staging,
            paths: Vec::new(),
        }
    }

    /// References to follow when reading, as dotted field names or
    /// [`ALL_ENTITIES`](crate::ALL_ENTITIES). Adds to any paths already set.
    pub fn load_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Whether this request reads and writes through a transaction.
    pub fn in_transaction(&self) -> bool {
        self.staging.is_some()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write the graphs reachable from `roots`. Entities without an
    /// identifier get one before this returns.
    ///
    /// On a transaction's request the result settles only when the
    /// transaction ends; waiting on it inside the body fails with
    /// [`MapperError::PendingCommit`].
    pub fn create<R: Roots + ?Sized>(&self, roots: &R) -> MapperResult<Deferred> {
        let ops = flatten(&roots.roots(), self.mapper.allocator())?;
        Ok(self.submit(ops))
    }

    /// Like [`create`](Self::create), but every root must already have an
    /// identifier.
    pub fn update<R: Roots + ?Sized>(&self, roots: &R) -> MapperResult<Deferred> {
        let roots = roots.roots();
        for root in &roots {
            root.key()?;
        }
        let ops = flatten(&roots, self.mapper.allocator())?;
        Ok(self.submit(ops))
    }

    /// Delete the documents of `roots`. Referenced entities are left alone.
    pub fn delete<R: Roots + ?Sized>(&self, roots: &R) -> MapperResult<Deferred> {
        let ops = roots
            .roots()
            .iter()
            .map(|root| root.key().map(|key| WriteOp::Delete { key }))
            .collect::<MapperResult<Vec<_>>>()?;
        Ok(self.submit(ops))
    }

    fn submit(&self, ops: Vec<WriteOp>) -> Deferred {
        if let Some(staging) = self.staging {
            return staging.stage(ops);
        }
        if ops.is_empty() {
            return Deferred::ready(Ok(()));
        }
        let store = Arc::clone(self.mapper.store());
        dispatch(self.mapper.config().dispatch, move || {
            debug!(ops = ops.len(), "applying write batch");
            Ok(store.apply(&ops)?)
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fill `roots` in place from their stored documents, following this
    /// request's load paths.
    pub fn get<R: Roots + ?Sized>(&self, roots: &R) -> MapperResult<Deferred> {
        let roots: Vec<Box<dyn AnyEntity>> = roots.roots().iter().map(|r| r.boxed()).collect();
        for root in &roots {
            root.key()?;
        }
        self.load_with(roots, || ())
    }

    /// Load entities of type `T` by identifier.
    pub fn fetch<T, I, P>(&self, ids: I) -> MapperResult<Deferred<Vec<EntityRef<T>>>>
    where
        T: Record,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let handles = ids
            .into_iter()
            .map(|id| EntityRef::<T>::stub(id))
            .collect::<MapperResult<Vec<_>>>()?;
        let roots = handles.iter().map(|h| h.boxed()).collect();
        self.load_with(roots, move || handles)
    }

    /// Run a native query and load every matching document as a `T`,
    /// following this request's load paths from each.
    ///
    /// The query itself matches committed state, also inside a transaction.
    /// Within one, matches the session has rewritten are loaded from their
    /// staged contents, matches it deleted are dropped, and load paths are
    /// followed through the session.
    pub fn query<T: Record>(&self, query: S::Query) -> MapperResult<Deferred<Vec<EntityRef<T>>>> {
        schema_of::<T>()?;
        let paths = LoadPaths::parse(&self.paths)?;
        let max_waves = self.mapper.config().max_waves;

        if let Some(staging) = self.staging {
            let loaded = self
                .mapper
                .store()
                .query(&query)
                .map_err(MapperError::from)
                .and_then(|found| {
                    let found = found.into_iter().filter_map(|(key, document)| {
                        match staging.staged(&key) {
                            Some(staged) => staged.map(|document| (key, document)),
                            None => Some((key, document)),
                        }
                    });
                    hydrate(&StagedSource(staging), &paths, max_waves, found)
                });
            return Ok(Deferred::ready(loaded));
        }

        let store = Arc::clone(self.mapper.store());
        Ok(dispatch(self.mapper.config().dispatch, move || {
            let found = store.query(&query)?;
            hydrate(&StoreSource(&*store), &paths, max_waves, found)
        }))
    }

    /// Resolve `roots`; `finish` builds the result once they are loaded.
    fn load_with<T, F>(
        &self,
        roots: Vec<Box<dyn AnyEntity>>,
        finish: F,
    ) -> MapperResult<Deferred<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let paths = LoadPaths::parse(&self.paths)?;
        let max_waves = self.mapper.config().max_waves;

        if let Some(staging) = self.staging {
            let loaded = load(&StagedSource(staging), &paths, max_waves, roots, Vec::new());
            return Ok(Deferred::ready(loaded.map(|()| finish())));
        }
        let store = Arc::clone(self.mapper.store());
        Ok(dispatch(self.mapper.config().dispatch, move || {
            load(&StoreSource(&*store), &paths, max_waves, roots, Vec::new()).map(|()| finish())
        }))
    }
}

/// Turn query matches into `T` handles and follow `paths` from them.
fn hydrate<T: Record>(
    source: &dyn DocumentSource,
    paths: &LoadPaths,
    max_waves: usize,
    found: impl IntoIterator<Item = (DocumentKey, Document)>,
) -> MapperResult<Vec<EntityRef<T>>> {
    let mut handles = Vec::new();
    let mut seeds = Vec::new();
    for (key, document) in found {
        let handle = EntityRef::<T>::stub_for(&key)?;
        seeds.push((handle.boxed(), document));
        handles.push(handle);
    }
    debug!(matches = handles.len(), "query returned");
    load(source, paths, max_waves, Vec::new(), seeds)?;
    Ok(handles)
}

impl<S: DocumentStore> std::fmt::Debug for Request<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("paths", &self.paths)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
