//! Shared entity handles.
//!
//! An [`EntityRef`] is the in-memory identity of one stored document. Clones
//! share the same slot, so a graph can point back at itself, the flattener
//! can back-fill generated identifiers into the caller's value, and the
//! resolver can fill the caller's value in place.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use docgraph_types::{Document, DocumentKey};

use crate::error::{MapperError, MapperResult};
use crate::flatten::Encoder;
use crate::identity::IdAllocator;
use crate::registry::schema_of;
use crate::resolve::Decoder;
use crate::schema::{short_type_name, Record};

/// Where the contents of a handle came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    /// Built by the caller; not read from the store.
    Local = 0,
    /// Identifier only. The reference was not on a requested load path, or
    /// its document was missing.
    Stub = 1,
    /// Filled from a stored document.
    Loaded = 2,
}

impl HandleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Stub,
            2 => Self::Loaded,
            _ => Self::Local,
        }
    }
}

struct Slot<T> {
    value: RwLock<T>,
    state: AtomicU8,
}

/// A shared, lockable handle to one entity.
pub struct EntityRef<T> {
    inner: Arc<Slot<T>>,
}

impl<T> EntityRef<T> {
    fn with_state(value: T, state: HandleState) -> Self {
        Self {
            inner: Arc::new(Slot {
                value: RwLock::new(value),
                state: AtomicU8::new(state as u8),
            }),
        }
    }

    /// Wrap a locally built value.
    pub fn new(value: T) -> Self {
        Self::with_state(value, HandleState::Local)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read().expect("lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.value.write().expect("lock poisoned")
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// `false` only for stubs.
    pub fn is_resolved(&self) -> bool {
        self.state() != HandleState::Stub
    }

    /// Whether both handles share one slot.
    pub fn same_entity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_state(&self, state: HandleState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T: Record> EntityRef<T> {
    /// A handle carrying only an identifier, to point at a stored document
    /// without loading it.
    pub fn stub(id: impl Into<String>) -> MapperResult<Self> {
        let schema = schema_of::<T>()?;
        let mut value = T::default();
        if !schema.set_id(&mut value, id.into()) {
            return Err(no_identifier::<T>());
        }
        Ok(Self::with_state(value, HandleState::Stub))
    }

    /// A stub for `key`, refusing keys of another collection.
    pub(crate) fn stub_for(key: &DocumentKey) -> MapperResult<Self> {
        let schema = schema_of::<T>()?;
        if key.collection() != schema.collection() {
            return Err(MapperError::Decode {
                key: key.clone(),
                field: String::new(),
                reason: format!(
                    "{} documents live in collection {}",
                    schema.type_name(),
                    schema.collection()
                ),
            });
        }
        Self::stub(key.id())
    }

    /// The identifier, empty if none has been assigned.
    pub fn id(&self) -> String {
        match schema_of::<T>() {
            Ok(schema) => schema.id_of(&self.read()).unwrap_or_default().to_string(),
            Err(_) => String::new(),
        }
    }

    /// The document key, failing if no identifier has been assigned.
    pub fn key(&self) -> MapperResult<DocumentKey> {
        let schema = schema_of::<T>()?;
        let value = self.read();
        match schema.id_of(&value) {
            Some(id) => Ok(DocumentKey::new(schema.collection(), id)),
            None => Err(MapperError::MissingIdentifier {
                collection: schema.collection().to_string(),
            }),
        }
    }
}

fn no_identifier<T>() -> MapperError {
    MapperError::Classification {
        type_name: short_type_name::<T>(),
        reason: "no identifier field; it cannot be stored as its own document".into(),
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for EntityRef<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Record> From<T> for EntityRef<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// Handles are equal when they name the same document, or share a slot if
/// either has no identifier yet.
impl<T: Record> PartialEq for EntityRef<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_entity(other) {
            return true;
        }
        match (self.key(), other.key()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

// Contents are not printed: graphs may be cyclic.
impl<T: Record> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self.inner.value.try_read() {
            Ok(value) => schema_of::<T>()
                .ok()
                .and_then(|s| s.id_of(&value).map(str::to_string))
                .unwrap_or_default(),
            Err(_) => "<locked>".to_string(),
        };
        f.debug_struct("EntityRef")
            .field("type", &short_type_name::<T>())
            .field("id", &id)
            .field("state", &self.state())
            .finish()
    }
}

mod sealed {
    pub trait Sealed {}
    impl<T: crate::Record> Sealed for super::EntityRef<T> {}
}

/// Type-erased view of an [`EntityRef`], for heterogeneous batches and the
/// mapper's identity map.
pub trait AnyEntity: sealed::Sealed + Send + Sync {
    fn type_name(&self) -> &'static str;

    fn key(&self) -> MapperResult<DocumentKey>;

    fn state(&self) -> HandleState;

    fn as_any(&self) -> &dyn Any;

    /// Identity of the shared slot.
    fn address(&self) -> usize;

    /// Another handle to the same slot.
    fn boxed(&self) -> Box<dyn AnyEntity>;

    /// The key of the entity, allocating and back-filling an identifier if it
    /// has none. The flag is `true` when one was allocated.
    #[doc(hidden)]
    fn assign_identity(&self, allocator: &dyn IdAllocator) -> MapperResult<(DocumentKey, bool)>;

    #[doc(hidden)]
    fn encode_document(&self, encoder: &mut Encoder<'_>) -> MapperResult<Document>;

    /// Replace the contents with a decoded copy of `document`.
    #[doc(hidden)]
    fn decode_document(
        &self,
        key: &DocumentKey,
        document: &Document,
        decoder: &mut Decoder<'_>,
    ) -> MapperResult<()>;
}

impl<T: Record> AnyEntity for EntityRef<T> {
    fn type_name(&self) -> &'static str {
        short_type_name::<T>()
    }

    fn key(&self) -> MapperResult<DocumentKey> {
        EntityRef::key(self)
    }

    fn state(&self) -> HandleState {
        EntityRef::state(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn address(&self) -> usize {
        EntityRef::address(self)
    }

    fn boxed(&self) -> Box<dyn AnyEntity> {
        Box::new(self.clone())
    }

    fn assign_identity(&self, allocator: &dyn IdAllocator) -> MapperResult<(DocumentKey, bool)> {
        let schema = schema_of::<T>()?;
        if !schema.has_identifier() {
            return Err(no_identifier::<T>());
        }
        if let Some(id) = schema.id_of(&self.read()) {
            return Ok((DocumentKey::new(schema.collection(), id), false));
        }
        let fresh = allocator.allocate();
        let mut value = self.write();
        // Another thread may have written the same handle in between.
        if let Some(id) = schema.id_of(&value) {
            return Ok((DocumentKey::new(schema.collection(), id), false));
        }
        schema.set_id(&mut value, fresh.clone());
        Ok((DocumentKey::new(schema.collection(), fresh), true))
    }

    fn encode_document(&self, encoder: &mut Encoder<'_>) -> MapperResult<Document> {
        let schema = schema_of::<T>()?;
        let value = self.read();
        schema.encode_fields(&value, encoder).map(Document::from)
    }

    fn decode_document(
        &self,
        key: &DocumentKey,
        document: &Document,
        decoder: &mut Decoder<'_>,
    ) -> MapperResult<()> {
        let schema = schema_of::<T>()?;
        let mut fresh = T::default();
        schema.set_id(&mut fresh, key.id().to_string());
        schema.decode_fields(&mut fresh, document.fields(), decoder)?;
        *self.write() = fresh;
        self.set_state(HandleState::Loaded);
        Ok(())
    }
}

/// One or more root entities of a request.
pub trait Roots {
    fn roots(&self) -> Vec<&dyn AnyEntity>;
}

impl<T: Record> Roots for EntityRef<T> {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        vec![self as &dyn AnyEntity]
    }
}

impl<T: Record> Roots for [EntityRef<T>] {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.iter().map(|e| e as &dyn AnyEntity).collect()
    }
}

impl<T: Record, const N: usize> Roots for [EntityRef<T>; N] {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.as_slice().roots()
    }
}

impl<T: Record> Roots for Vec<EntityRef<T>> {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.as_slice().roots()
    }
}

impl<'a> Roots for [&'a dyn AnyEntity] {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.to_vec()
    }
}

impl<'a, const N: usize> Roots for [&'a dyn AnyEntity; N] {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.to_vec()
    }
}

impl<'a> Roots for Vec<&'a dyn AnyEntity> {
    fn roots(&self) -> Vec<&dyn AnyEntity> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{person, Car, Relation};
    use crate::identity::UuidAllocator;

    // -----------------------------------------------------------------------
    // Handle basics
    // -----------------------------------------------------------------------

    #[test]
    fn clones_share_the_slot() {
        let john = person("JohnsID", "John");
        let alias = john.clone();
        alias.write().name = "Johnny".into();
        assert_eq!(john.read().name, "Johnny");
        assert!(john.same_entity(&alias));
        assert_eq!(john.state(), HandleState::Local);
    }

    #[test]
    fn stub_has_only_an_identifier() {
        let stub = EntityRef::<Car>::stub("c1").unwrap();
        assert_eq!(stub.id(), "c1");
        assert_eq!(stub.state(), HandleState::Stub);
        assert!(!stub.is_resolved());
        assert_eq!(stub.read().make, "");
    }

    #[test]
    fn stub_for_checks_collection() {
        assert!(EntityRef::<Car>::stub_for(&DocumentKey::new("Car", "1")).is_ok());
        let err = EntityRef::<Car>::stub_for(&DocumentKey::new("Person", "1")).unwrap_err();
        assert!(matches!(err, MapperError::Decode { .. }));
    }

    #[test]
    fn stub_of_unidentified_type_fails() {
        let err = EntityRef::<Relation>::stub("r1").unwrap_err();
        assert!(matches!(err, MapperError::Classification { .. }));
    }

    #[test]
    fn key_requires_identifier() {
        let car = EntityRef::new(Car::default());
        assert_eq!(
            car.key().unwrap_err(),
            MapperError::MissingIdentifier {
                collection: "Car".into()
            }
        );
        assert_eq!(car.id(), "");
    }

    #[test]
    fn equality_by_key_or_slot() {
        let a = person("p1", "A");
        let b = person("p1", "B");
        let c = person("p2", "A");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let anon1 = EntityRef::new(Car::default());
        let anon2 = EntityRef::new(Car::default());
        assert_ne!(anon1, anon2);
        assert_eq!(anon1, anon1.clone());
    }

    #[test]
    fn debug_does_not_recurse() {
        let john = person("JohnsID", "John");
        john.write().spouse = Some(john.clone());
        let debug = format!("{john:?}");
        assert!(debug.contains("JohnsID"));
        assert!(debug.contains("Person"));

        let _guard = john.write();
        assert!(format!("{john:?}").contains("<locked>"));
    }

    // -----------------------------------------------------------------------
    // Identity assignment
    // -----------------------------------------------------------------------

    #[test]
    fn identity_is_allocated_once() {
        let car = EntityRef::new(Car::default());
        let (first, allocated) = car.assign_identity(&UuidAllocator).unwrap();
        assert!(allocated);
        assert_eq!(car.id(), first.id());

        let (second, allocated) = car.assign_identity(&UuidAllocator).unwrap();
        assert!(!allocated);
        assert_eq!(first, second);
    }

    #[test]
    fn existing_identity_is_kept() {
        let john = person("JohnsID", "John");
        let (key, allocated) = john.assign_identity(&UuidAllocator).unwrap();
        assert!(!allocated);
        assert_eq!(key, DocumentKey::new("Person", "JohnsID"));
    }

    // -----------------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------------

    #[test]
    fn roots_from_every_shape() {
        let john = person("j", "John");
        let mary = person("m", "Mary");
        let car = EntityRef::new(Car::default());

        assert_eq!(john.roots().len(), 1);
        assert_eq!([john.clone(), mary.clone()].roots().len(), 2);
        assert_eq!(vec![john.clone()].roots().len(), 1);

        let mixed: [&dyn AnyEntity; 2] = [&john, &car];
        let roots = mixed.roots();
        assert_eq!(roots[0].type_name(), "Person");
        assert_eq!(roots[1].type_name(), "Car");
        assert_eq!(roots[0].address(), john.boxed().address());
    }
}
