//! Record types and helpers shared by the unit tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use docgraph_store::{DocumentStore, InMemoryDocumentStore, StoreResult, StoreTransaction};
use docgraph_types::{Document, DocumentKey, WriteOp};

use crate::entity::EntityRef;
use crate::identity::IdAllocator;
use crate::schema::{Record, SchemaBuilder};
use crate::{embedded_record, Filter};

#[derive(Default, Debug, Clone)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub age: i64,
    pub spouse: Option<EntityRef<Person>>,
    pub relations: Vec<Relation>,
}

impl Record for Person {
    fn describe(s: &mut SchemaBuilder<Self>) {
        s.id(|p| &p.id, |p| &mut p.id);
        s.field("name", |p| &p.name, |p| &mut p.name);
        s.field("age", |p| &p.age, |p| &mut p.age);
        s.field("spouse", |p| &p.spouse, |p| &mut p.spouse);
        s.field("relations", |p| &p.relations, |p| &mut p.relations);
    }
}

#[derive(Default, Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub friends: Vec<EntityRef<Person>>,
}

impl Record for Relation {
    fn describe(s: &mut SchemaBuilder<Self>) {
        s.field("name", |r| &r.name, |r| &mut r.name);
        s.field("friends", |r| &r.friends, |r| &mut r.friends);
    }
}

embedded_record!(Relation, Person);

#[derive(Default, Debug)]
pub struct Car {
    pub id: String,
    pub make: String,
    pub owner: Option<EntityRef<Person>>,
    pub driver: Person,
    pub passengers: Vec<EntityRef<Person>>,
    pub tags: Vec<String>,
    pub numbers: Vec<i64>,
    pub year: DateTime<Utc>,
}

impl Record for Car {
    fn describe(s: &mut SchemaBuilder<Self>) {
        s.id(|c| &c.id, |c| &mut c.id);
        s.field("make", |c| &c.make, |c| &mut c.make);
        s.field("owner", |c| &c.owner, |c| &mut c.owner);
        s.field("driver", |c| &c.driver, |c| &mut c.driver)
            .rename("drive");
        s.field("passengers", |c| &c.passengers, |c| &mut c.passengers);
        s.field("tags", |c| &c.tags, |c| &mut c.tags);
        s.field("numbers", |c| &c.numbers, |c| &mut c.numbers);
        s.field("year", |c| &c.year, |c| &mut c.year);
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Moao {
    pub id: String,
    pub name: String,
}

impl Record for Moao {
    fn describe(s: &mut SchemaBuilder<Self>) {
        s.id(|m| &m.id, |m| &mut m.id);
        s.field("name", |m| &m.name, |m| &mut m.name);
    }
}

/// Composes `Moao`: its identifier and fields are promoted.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct SubMoao {
    pub moao: Moao,
    pub local_name: String,
}

impl Record for SubMoao {
    fn describe(s: &mut SchemaBuilder<Self>) {
        s.embed(|m| &m.moao, |m| &mut m.moao);
        s.field("local_name", |m| &m.local_name, |m| &mut m.local_name);
    }
}

/// Route `debug!` and `warn!` output to the test harness. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn person(id: &str, name: &str) -> EntityRef<Person> {
    EntityRef::new(Person {
        id: id.into(),
        name: name.into(),
        ..Default::default()
    })
}

/// Deterministic identifiers: `prefix1`, `prefix2`, ...
pub struct SequenceAllocator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceAllocator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdAllocator for SequenceAllocator {
    fn allocate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{n}", self.prefix)
    }
}

/// An in-memory store that counts round trips.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryDocumentStore,
    pub reads: AtomicUsize,
    pub batches: Mutex<Vec<Vec<DocumentKey>>>,
}

impl CountingStore {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.batches.lock().unwrap().clear();
    }
}

impl DocumentStore for CountingStore {
    type Query = Filter;

    fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
        Ok(self.get_all(std::slice::from_ref(key))?.pop().flatten())
    }

    fn get_all(&self, keys: &[DocumentKey]) -> StoreResult<Vec<Option<Document>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().unwrap().push(keys.to_vec());
        self.inner.get_all(keys)
    }

    fn apply(&self, ops: &[WriteOp]) -> StoreResult<()> {
        self.inner.apply(ops)
    }

    fn query(&self, query: &Filter) -> StoreResult<Vec<(DocumentKey, Document)>> {
        self.inner.query(query)
    }

    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn StoreTransaction) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.inner.run_transaction(body)
    }
}
