use std::cmp::Ordering;

use docgraph_types::{Document, DocumentKey, Value};
use serde::{Deserialize, Serialize};

/// Comparison operator of a [`Predicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// The field is an array holding a value equal to the operand.
    ArrayContains,
}

/// One `field <op> value` condition. Dotted field paths reach into embedded
/// maps (`"address.city"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

impl Predicate {
    /// Evaluate the predicate against one document. A missing field never
    /// matches, including for `Ne`.
    pub fn matches(&self, document: &Document) -> bool {
        let Some(actual) = lookup(document, &self.field) else {
            return false;
        };
        match self.op {
            Comparison::Eq => actual == &self.value,
            Comparison::Ne => actual != &self.value,
            Comparison::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            Comparison::Le => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Comparison::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            Comparison::Ge => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Comparison::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
        }
    }
}

fn lookup<'d>(document: &'d Document, path: &str) -> Option<&'d Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

/// The native query of the in-memory backend: one collection, a conjunction
/// of predicates and an optional result limit. Results come back ordered by
/// document key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    collection: String,
    predicates: Vec<Predicate>,
    limit: Option<usize>,
}

impl Filter {
    /// Match every document of `collection`.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicates: Vec::new(),
            limit: None,
        }
    }

    /// Add a condition. All conditions must hold.
    pub fn where_field(mut self, field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Return at most `limit` documents.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, key: &DocumentKey, document: &Document) -> bool {
        key.collection() == self.collection && self.predicates.iter().all(|p| p.matches(document))
    }
}
