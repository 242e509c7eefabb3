use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::key::DocumentKey;

/// The kind of a document write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// The document must not exist yet (its identifier was just allocated).
    Create,
    /// Replace the document, creating it if absent.
    Update,
    /// Remove the document; removing an absent document is not an error.
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One document write, as produced by the flattener and applied by a store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Create { key: DocumentKey, document: Document },
    Update { key: DocumentKey, document: Document },
    Delete { key: DocumentKey },
}

impl WriteOp {
    /// Build a create or update op depending on `kind`. `Delete` drops the
    /// document.
    pub fn new(kind: OpKind, key: DocumentKey, document: Document) -> Self {
        match kind {
            OpKind::Create => Self::Create { key, document },
            OpKind::Update => Self::Update { key, document },
            OpKind::Delete => Self::Delete { key },
        }
    }

    pub fn key(&self) -> &DocumentKey {
        match self {
            Self::Create { key, .. } | Self::Update { key, .. } | Self::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Self::Create { .. } => OpKind::Create,
            Self::Update { .. } => OpKind::Update,
            Self::Delete { .. } => OpKind::Delete,
        }
    }

    /// The document written by this op, `None` for deletes.
    pub fn document(&self) -> Option<&Document> {
        match self {
            Self::Create { document, .. } | Self::Update { document, .. } => Some(document),
            Self::Delete { .. } => None,
        }
    }
}
