//! Document store boundary for docgraph.
//!
//! The mapper never talks to a concrete database. It talks to the
//! [`DocumentStore`] trait defined here: single and batched reads, atomic
//! write batches, an opaque native query, and a transaction primitive whose
//! callback receives a [`StoreTransaction`].
//!
//! # Backends
//!
//! - [`InMemoryDocumentStore`]: `BTreeMap`-based store for tests and
//!   embedding, with optimistic transactions and [`Filter`] queries
//!
//! # Rules every backend follows
//!
//! 1. A batch passed to [`DocumentStore::apply`] lands completely or not at all.
//! 2. Reference values are stored as [`Value::Reference`](docgraph_types::Value),
//!    never flattened into strings.
//! 3. Reads inside a transaction never observe writes of other in-flight
//!    transactions.
//! 4. Retrying on contention is the backend's job; callers see either a commit
//!    or an error.

pub mod config;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use config::MemoryStoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDocumentStore;
pub use query::{Comparison, Filter, Predicate};
pub use traits::{DocumentStore, StoreTransaction};
