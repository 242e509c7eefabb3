//! Document model for docgraph.
//!
//! This crate provides the store-facing data types shared by the store
//! boundary (`docgraph-store`) and the object mapper (`docgraph`). Nothing in
//! here knows about Rust entity types; it is the shape documents take once
//! they leave the mapper.
//!
//! # Key Types
//!
//! - [`Value`]: Dynamically-typed field value, including the native
//!   cross-document [`Value::Reference`]
//! - [`Document`]: Ordered map of field names to values
//! - [`DocumentKey`]: `(collection, id)` pair, the target of every reference
//! - [`WriteOp`]: A single create/update/delete against one key

pub mod document;
pub mod error;
pub mod key;
pub mod op;
pub mod value;

pub use document::Document;
pub use error::TypeError;
pub use key::DocumentKey;
pub use op::{OpKind, WriteOp};
pub use value::Value;
