//! Object/document mapper for cyclic entity graphs.
//!
//! `docgraph` writes graphs of Rust records into a schemaless
//! [`DocumentStore`] and reads them back, following only the references the
//! caller asks for.
//!
//! - **Classification** ([`Record`], [`FieldValue`]): each field is a scalar,
//!   an embedded record, or a reference to an entity stored in its own
//!   document, decided once per type from the field's Rust type.
//! - **Writes** ([`Request::create`], [`Request::update`]): the graph is
//!   flattened breadth-first into one document per entity, with identifiers
//!   allocated and written back into the caller's values on the way.
//! - **Reads** ([`Request::get`], [`Request::fetch`], [`Request::query`]):
//!   load paths select which references to follow; each depth costs one
//!   batched store read, and an identity map keeps one handle per document so
//!   cycles close on themselves.
//! - **Transactions** ([`Mapper::run_in_transaction`]): writes are staged in a
//!   session, visible to that session's reads and to nobody else until commit.
//!
//! Store work is returned as a [`Deferred`] result the caller can block on or
//! `.await`.
//!
//! ```ignore
//! let mapper = Mapper::new(InMemoryDocumentStore::new());
//! let car = EntityRef::new(Car { make: "Toyota".into(), ..Default::default() });
//! mapper.request().create(&car)?.wait()?;
//!
//! let loaded = EntityRef::<Car>::stub(car.id())?;
//! mapper.request().load_paths(["owner"]).get(&loaded)?.wait()?;
//! ```

pub mod config;
pub mod deferred;
pub mod entity;
pub mod error;
pub mod field;
pub mod identity;
pub mod mapper;
pub mod path;
pub mod request;
pub mod schema;
pub mod session;

mod dispatch;
mod flatten;
mod registry;
mod resolve;

#[cfg(test)]
pub(crate) mod fixtures;

pub use config::{DispatchMode, MapperConfig};
pub use deferred::{wait_all, Deferred};
pub use entity::{AnyEntity, EntityRef, HandleState, Roots};
pub use error::{DanglingReference, MapperError, MapperResult};
pub use field::{FieldKind, FieldType, FieldValue};
pub use flatten::Encoder;
pub use identity::{IdAllocator, UuidAllocator};
pub use mapper::Mapper;
pub use path::{LoadPaths, ALL_ENTITIES};
pub use registry::schema_of;
pub use request::Request;
pub use resolve::Decoder;
pub use schema::{FieldSpec, Record, Schema, SchemaBuilder};
pub use session::Transaction;

// Re-export the data model and the store boundary
pub use docgraph_store::{
    Comparison, DocumentStore, Filter, InMemoryDocumentStore, MemoryStoreConfig, StoreError,
    StoreTransaction,
};
pub use docgraph_types::{Document, DocumentKey, OpKind, Value, WriteOp};
