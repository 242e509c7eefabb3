use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Address of one document: the collection it lives in plus its identifier.
///
/// A `DocumentKey` stored inside another document (as
/// [`Value::Reference`](crate::Value::Reference)) is a reference pointer,
/// the store's native cross-document link. It has no lifecycle of its own;
/// it only exists as a view over an entity's identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    collection: String,
    id: String,
}

impl DocumentKey {
    /// Create a key from a collection name and identifier.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// The collection the document lives in.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The document identifier within its collection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` if either half of the key is empty.
    pub fn is_incomplete(&self) -> bool {
        self.collection.is_empty() || self.id.is_empty()
    }

    /// Parse a `collection/id` path.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        let (collection, id) = path
            .split_once('/')
            .ok_or_else(|| TypeError::InvalidKey(format!("missing '/' in {path:?}")))?;
        if collection.is_empty() || id.is_empty() || id.contains('/') {
            return Err(TypeError::InvalidKey(path.to_string()));
        }
        Ok(Self::new(collection, id))
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentKey({}/{})", self.collection, self.id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}
