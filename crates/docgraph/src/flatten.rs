//! Graph flattening: entity graph in, one write op per distinct entity out.
//!
//! Traversal is breadth-first from the roots. Each handle is visited once,
//! recognised first by slot address and then by document key, so cycles and
//! shared children cost one document each. Referenced entities that were
//! never loaded (stubs) are written as pointers only.

use std::collections::{HashMap, HashSet, VecDeque};

use docgraph_types::{DocumentKey, OpKind, Value, WriteOp};
use tracing::debug;

use crate::entity::{AnyEntity, EntityRef, HandleState};
use crate::error::MapperResult;
use crate::identity::IdAllocator;
use crate::registry::schema_of;
use crate::schema::Record;

struct Pending {
    handle: Box<dyn AnyEntity>,
    key: DocumentKey,
    kind: OpKind,
}

/// Encoding state shared by every field codec during one flatten call.
pub struct Encoder<'a> {
    allocator: &'a dyn IdAllocator,
    by_address: HashMap<usize, DocumentKey>,
    scheduled: HashSet<DocumentKey>,
    queue: VecDeque<Pending>,
}

impl<'a> Encoder<'a> {
    fn new(allocator: &'a dyn IdAllocator) -> Self {
        Self {
            allocator,
            by_address: HashMap::new(),
            scheduled: HashSet::new(),
            queue: VecDeque::new(),
        }
    }

    /// Make sure `handle` will be written and return its key.
    fn schedule(&mut self, handle: &dyn AnyEntity, is_root: bool) -> MapperResult<DocumentKey> {
        let address = handle.address();
        if let Some(key) = self.by_address.get(&address) {
            return Ok(key.clone());
        }
        let (key, allocated) = handle.assign_identity(self.allocator)?;
        self.by_address.insert(address, key.clone());
        if !self.scheduled.insert(key.clone()) {
            return Ok(key);
        }
        if handle.state() == HandleState::Stub && !is_root {
            return Ok(key);
        }
        let kind = if allocated {
            OpKind::Create
        } else {
            OpKind::Update
        };
        self.queue.push_back(Pending {
            handle: handle.boxed(),
            key: key.clone(),
            kind,
        });
        Ok(key)
    }

    /// Encode a reference field: schedule the target and return a pointer.
    pub fn reference<T: Record>(&mut self, target: &EntityRef<T>) -> MapperResult<Value> {
        self.schedule(target, false).map(Value::Reference)
    }

    /// Encode an embedded record as a map. An identifier, if the record type
    /// has one, is kept under `"id"`.
    pub fn record<U: Record>(&mut self, record: &U) -> MapperResult<Value> {
        let schema = schema_of::<U>()?;
        let mut map = schema.encode_fields(record, self)?;
        if let Some(id) = schema.id_of(record) {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        Ok(Value::Map(map))
    }
}

/// Flatten the graphs reachable from `roots` into write ops.
///
/// Entities without an identifier get one from `allocator` (written back into
/// the caller's value) and a `Create`; the rest get an `Update`.
pub(crate) fn flatten(
    roots: &[&dyn AnyEntity],
    allocator: &dyn IdAllocator,
) -> MapperResult<Vec<WriteOp>> {
    let mut encoder = Encoder::new(allocator);
    for root in roots {
        encoder.schedule(*root, true)?;
    }

    let mut ops = Vec::new();
    while let Some(pending) = encoder.queue.pop_front() {
        let document = pending.handle.encode_document(&mut encoder)?;
        ops.push(WriteOp::new(pending.kind, pending.key, document));
    }

    let creates = ops.iter().filter(|op| op.kind() == OpKind::Create).count();
    debug!(
        roots = roots.len(),
        documents = ops.len(),
        creates,
        updates = ops.len() - creates,
        "flattened entity graph"
    );
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Roots;
    use crate::error::MapperError;
    use crate::fixtures::{person, Car, Moao, Person, Relation, SequenceAllocator, SubMoao};
    use crate::identity::UuidAllocator;

    fn op_for<'o>(ops: &'o [WriteOp], key: &DocumentKey) -> &'o WriteOp {
        ops.iter().find(|op| op.key() == key).expect("op for key")
    }

    // -----------------------------------------------------------------------
    // Documents and pointers
    // -----------------------------------------------------------------------

    #[test]
    fn single_entity_gets_identifier_and_create() {
        let car = EntityRef::new(Car {
            make: "Toyota".into(),
            ..Default::default()
        });
        let ops = flatten(&car.roots(), &SequenceAllocator::new("c")).unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OpKind::Create);
        assert_eq!(car.id(), "c1");
        assert_eq!(ops[0].key(), &DocumentKey::new("Car", "c1"));
        let doc = ops[0].document().unwrap();
        assert_eq!(doc.get("make"), Some(&Value::from("Toyota")));
        assert!(doc.get("id").is_none());
    }

    #[test]
    fn references_become_pointers_and_documents() {
        let john = person("JohnsID", "John");
        let car = EntityRef::new(Car {
            make: "Toyota".into(),
            owner: Some(john.clone()),
            passengers: vec![john.clone()],
            ..Default::default()
        });
        let ops = flatten(&car.roots(), &SequenceAllocator::new("c")).unwrap();

        assert_eq!(ops.len(), 2);
        let car_doc = op_for(&ops, &car.key().unwrap()).document().unwrap();
        let john_key = DocumentKey::new("Person", "JohnsID");
        assert_eq!(car_doc.get("owner"), Some(&Value::Reference(john_key.clone())));
        assert_eq!(
            car_doc.get("passengers"),
            Some(&Value::Array(vec![Value::Reference(john_key.clone())]))
        );
        assert_eq!(op_for(&ops, &john_key).kind(), OpKind::Update);
    }

    #[test]
    fn repeated_slice_entry_is_written_once() {
        let john = person("j", "John");
        let car = EntityRef::new(Car {
            passengers: vec![john.clone(), john.clone()],
            ..Default::default()
        });
        let ops = flatten(&car.roots(), &SequenceAllocator::new("c")).unwrap();

        assert_eq!(ops.len(), 2);
        let john_key = DocumentKey::new("Person", "j");
        let car_doc = op_for(&ops, &car.key().unwrap()).document().unwrap();
        assert_eq!(
            car_doc.get("passengers"),
            Some(&Value::Array(vec![
                Value::Reference(john_key.clone()),
                Value::Reference(john_key.clone()),
            ]))
        );
        assert_eq!(op_for(&ops, &john_key).kind(), OpKind::Update);
    }

    #[test]
    fn by_value_entity_is_embedded() {
        let car = EntityRef::new(Car {
            driver: Person {
                name: "Mark".into(),
                ..Default::default()
            },
            ..Default::default()
        });
        let ops = flatten(&car.roots(), &UuidAllocator).unwrap();

        assert_eq!(ops.len(), 1);
        let doc = ops[0].document().unwrap();
        let driver = doc.get("drive").and_then(Value::as_map).unwrap();
        assert_eq!(driver.get("name"), Some(&Value::from("Mark")));
        assert!(driver.get("id").is_none());
    }

    #[test]
    fn references_inside_embedded_values() {
        let friend1 = person("f1", "Friend1");
        let friend2 = person("f2", "Friend2");
        let john = person("j", "John");
        john.write().relations = vec![Relation {
            name: "school".into(),
            friends: vec![friend1.clone(), friend2.clone()],
        }];
        let ops = flatten(&john.roots(), &UuidAllocator).unwrap();

        assert_eq!(ops.len(), 3);
        let doc = op_for(&ops, &john.key().unwrap()).document().unwrap();
        let relations = doc.get("relations").and_then(Value::as_array).unwrap();
        let friends = relations[0]
            .as_map()
            .and_then(|m| m.get("friends"))
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(
            friends[0],
            Value::Reference(DocumentKey::new("Person", "f1"))
        );
    }

    #[test]
    fn composed_identifier_is_document_key() {
        let sub = EntityRef::new(SubMoao {
            moao: Moao {
                id: String::new(),
                name: "moao".into(),
            },
            local_name: "sub".into(),
        });
        let ops = flatten(&sub.roots(), &SequenceAllocator::new("s")).unwrap();
        assert_eq!(sub.read().moao.id, "s1");
        let doc = ops[0].document().unwrap();
        assert_eq!(doc.get("name"), Some(&Value::from("moao")));
        assert_eq!(doc.get("local_name"), Some(&Value::from("sub")));
        assert_eq!(doc.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Cycles and sharing
    // -----------------------------------------------------------------------

    #[test]
    fn mutual_references_terminate() {
        let john = person("JohnsID", "John");
        let mary = person("MarysID", "Mary");
        john.write().spouse = Some(mary.clone());
        mary.write().spouse = Some(john.clone());

        let ops = flatten(&john.roots(), &UuidAllocator).unwrap();
        assert_eq!(ops.len(), 2);
        let mary_doc = op_for(&ops, &mary.key().unwrap()).document().unwrap();
        assert_eq!(
            mary_doc.get("spouse"),
            Some(&Value::Reference(john.key().unwrap()))
        );
    }

    #[test]
    fn self_reference_without_identifier() {
        let narcissus = EntityRef::new(Person {
            name: "N".into(),
            ..Default::default()
        });
        narcissus.write().spouse = Some(narcissus.clone());

        let ops = flatten(&narcissus.roots(), &SequenceAllocator::new("p")).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind(), OpKind::Create);
        assert_eq!(
            ops[0].document().unwrap().get("spouse"),
            Some(&Value::Reference(DocumentKey::new("Person", "p1")))
        );
    }

    #[test]
    fn shared_child_written_once() {
        let john = person("j", "John");
        let car1 = EntityRef::new(Car {
            owner: Some(john.clone()),
            ..Default::default()
        });
        let car2 = EntityRef::new(Car {
            owner: Some(john.clone()),
            ..Default::default()
        });
        let ops = flatten(&[car1, car2].roots(), &UuidAllocator).unwrap();
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn distinct_handles_with_same_key_write_once() {
        let a = person("same", "First");
        let b = person("same", "Second");
        let ops = flatten(&[a, b].roots(), &UuidAllocator).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].document().unwrap().get("name"),
            Some(&Value::from("First"))
        );
    }

    #[test]
    fn stubs_are_pointers_only() {
        let owner = EntityRef::<Person>::stub("p9").unwrap();
        let car = EntityRef::new(Car {
            owner: Some(owner),
            ..Default::default()
        });
        let ops = flatten(&car.roots(), &UuidAllocator).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops[0].document().unwrap().get("owner"),
            Some(&Value::Reference(DocumentKey::new("Person", "p9")))
        );
    }

    #[test]
    fn unidentified_root_is_a_classification_error() {
        let rel = EntityRef::new(Relation::default());
        let err = flatten(&rel.roots(), &UuidAllocator).unwrap_err();
        assert!(matches!(err, MapperError::Classification { .. }));
    }
}
