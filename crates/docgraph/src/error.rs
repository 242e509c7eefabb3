use std::fmt;

use docgraph_store::StoreError;
use docgraph_types::DocumentKey;
use thiserror::Error;

/// A reference whose target document does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DanglingReference {
    /// The missing document.
    pub key: DocumentKey,
    /// The document holding the pointer.
    pub referenced_by: DocumentKey,
    /// Store name of the field the pointer was found in.
    pub field: String,
}

impl fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.referenced_by, self.field, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapperError {
    #[error("cannot map type {type_name}: {reason}")]
    Classification {
        type_name: &'static str,
        reason: String,
    },

    #[error("document not found: {0}")]
    NotFound(DocumentKey),

    #[error("{} dangling reference(s), first {}", .0.len(), first_dangling(.0))]
    PartialResolution(Vec<DanglingReference>),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transaction aborted: {0}")]
    TransactionAborted(Box<MapperError>),

    #[error("load did not settle within {0} waves")]
    WaveLimit(usize),

    #[error("cannot decode {key} field {field:?}: {reason}")]
    Decode {
        key: DocumentKey,
        field: String,
        reason: String,
    },

    #[error("entity in collection {collection} has no identifier")]
    MissingIdentifier { collection: String },

    #[error("{0}")]
    Callback(String),

    #[error("result is bound to a transaction that has not committed yet")]
    PendingCommit,

    #[error("invalid load path: {0:?}")]
    InvalidLoadPath(String),
}

fn first_dangling(refs: &[DanglingReference]) -> String {
    refs.first().map(ToString::to_string).unwrap_or_default()
}

impl MapperError {
    /// A failure reported by a transaction body.
    pub fn callback(reason: impl Into<String>) -> Self {
        Self::Callback(reason.into())
    }

    /// The error behind any number of `TransactionAborted` wrappers.
    pub fn root_cause(&self) -> &MapperError {
        match self {
            Self::TransactionAborted(inner) => inner.root_cause(),
            other => other,
        }
    }
}

pub type MapperResult<T> = Result<T, MapperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_resolution_names_first_reference() {
        let err = MapperError::PartialResolution(vec![DanglingReference {
            key: DocumentKey::new("Person", "gone"),
            referenced_by: DocumentKey::new("Car", "c1"),
            field: "owner".into(),
        }]);
        assert_eq!(
            err.to_string(),
            "1 dangling reference(s), first Car/c1.owner -> Person/gone"
        );
    }

    #[test]
    fn root_cause_unwraps_aborts() {
        let err = MapperError::TransactionAborted(Box::new(MapperError::TransactionAborted(
            Box::new(MapperError::callback("nope")),
        )));
        assert_eq!(err.root_cause(), &MapperError::Callback("nope".into()));
        assert_eq!(err.to_string(), "transaction aborted: transaction aborted: nope");
    }

    #[test]
    fn store_errors_convert() {
        let err: MapperError = StoreError::Cancelled.into();
        assert_eq!(err, MapperError::Store(StoreError::Cancelled));
    }
}
