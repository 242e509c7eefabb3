use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::key::DocumentKey;
use crate::value::Value;

/// Contents of one stored document: field name to value.
///
/// Field order is deterministic (`BTreeMap`) so documents compare and print
/// stably. The document's own identifier is not a field; it lives in the
/// [`DocumentKey`] the document is stored under.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Every reference pointer in the document, including those nested in
    /// arrays and embedded maps.
    pub fn references(&self) -> Vec<&DocumentKey> {
        fn walk<'a>(value: &'a Value, out: &mut Vec<&'a DocumentKey>) {
            match value {
                Value::Reference(key) => out.push(key),
                Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
                Value::Map(map) => map.values().for_each(|v| walk(v, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        for value in self.fields.values() {
            walk(value, &mut out);
        }
        out
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Render the document as JSON, mostly for diagnostics and fixtures.
    pub fn to_json(&self) -> Result<String, TypeError> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, TypeError> {
        serde_json::from_str(json).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

impl From<BTreeMap<String, Value>> for Document {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut doc = Document::new();
        assert!(doc.is_empty());
        doc.insert("make", Value::from("Toyota"));
        assert_eq!(doc.get("make"), Some(&Value::from("Toyota")));
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.remove("make"), Some(Value::from("Toyota")));
        assert!(doc.get("make").is_none());
    }

    #[test]
    fn references_walks_nested_values() {
        let john = DocumentKey::new("Person", "john");
        let mary = DocumentKey::new("Person", "mary");
        let mut relation = BTreeMap::new();
        relation.insert(
            "friends".to_string(),
            Value::Array(vec![Value::from(mary.clone())]),
        );

        let mut doc = Document::new();
        doc.insert("spouse", Value::from(john.clone()));
        doc.insert("relations", Value::Array(vec![Value::Map(relation)]));
        doc.insert("name", Value::from("x"));

        let refs = doc.references();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&&john));
        assert!(refs.contains(&&mary));
    }

    #[test]
    fn serializes_as_plain_map() {
        let doc: Document = [("n".to_string(), Value::Integer(1))].into_iter().collect();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.is_object());
        assert!(json.get("n").is_some());
    }

    #[test]
    fn json_roundtrip_keeps_references() {
        let mut doc = Document::new();
        doc.insert("owner", Value::from(DocumentKey::new("Person", "p1")));
        let back = Document::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(back, doc);
        assert!(Document::from_json("[1, 2]").is_err());
    }
}
