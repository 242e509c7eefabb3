use std::fmt;
use std::sync::Arc;

use docgraph_store::DocumentStore;

use crate::config::MapperConfig;
use crate::error::MapperResult;
use crate::identity::{IdAllocator, UuidAllocator};
use crate::request::Request;
use crate::session::{self, Transaction};

/// Maps entity graphs onto a document store.
///
/// Cloning is cheap; clones share the store and the allocator.
pub struct Mapper<S> {
    store: Arc<S>,
    config: MapperConfig,
    allocator: Arc<dyn IdAllocator>,
}

impl<S: DocumentStore> Mapper<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, MapperConfig::default())
    }

    pub fn with_config(store: S, config: MapperConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            allocator: Arc::new(UuidAllocator),
        }
    }

    /// Use `allocator` for identifiers of new entities.
    pub fn with_allocator(mut self, allocator: impl IdAllocator + 'static) -> Self {
        self.allocator = Arc::new(allocator);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub(crate) fn allocator(&self) -> &dyn IdAllocator {
        self.allocator.as_ref()
    }

    /// A request outside any transaction.
    pub fn request(&self) -> Request<'_, S> {
        Request::new(self, None)
    }

    /// Run `body` in a store transaction.
    ///
    /// Reads through `txn.request()` see the writes the body staged before
    /// them; nothing the body writes is visible elsewhere until it returns
    /// `Ok` and the store commits. Any failure, from the body or the commit,
    /// rolls everything back and comes back as
    /// [`MapperError::TransactionAborted`](crate::MapperError::TransactionAborted).
    ///
    /// The store may run `body` again after a conflict.
    pub fn run_in_transaction<R, F>(&self, body: F) -> MapperResult<R>
    where
        F: FnMut(&Transaction<'_, S>) -> MapperResult<R>,
    {
        session::run(self, body)
    }
}

impl<S> Clone for Mapper<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            allocator: Arc::clone(&self.allocator),
        }
    }
}

impl<S> fmt::Debug for Mapper<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("store", &std::any::type_name::<S>())
            .field("config", &self.config)
            .finish()
    }
}
