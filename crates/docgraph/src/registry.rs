use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use tracing::debug;

use crate::error::MapperResult;
use crate::schema::{build_schema, Record, Schema};

type Cached = Arc<dyn Any + Send + Sync>;

/// Process-wide schema cache, keyed by record type. Entries hold the build
/// result, so a type that fails classification fails the same way every time.
static SCHEMAS: LazyLock<RwLock<HashMap<TypeId, Cached>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// The validated schema of `T`, built on first use and cached forever.
///
/// Schemas are built outside the cache lock (building one may need the
/// schemas of composed types); if two threads race, the first insert wins.
pub fn schema_of<T: Record>() -> MapperResult<Arc<Schema<T>>> {
    let type_id = TypeId::of::<T>();
    if let Some(cached) = lookup::<T>(&SCHEMAS.read().expect("lock poisoned"), type_id) {
        return cached;
    }

    let built = build_schema::<T>().map(Arc::new);
    match &built {
        Ok(schema) => debug!(
            type_name = schema.type_name(),
            collection = schema.collection(),
            fields = schema.fields().count(),
            "classified record type"
        ),
        Err(e) => debug!(error = %e, "record type failed classification"),
    }

    let mut map = SCHEMAS.write().expect("lock poisoned");
    let entry = map
        .entry(type_id)
        .or_insert_with(|| Arc::new(built.clone()) as Cached);
    entry
        .downcast_ref::<MapperResult<Arc<Schema<T>>>>()
        .cloned()
        .unwrap_or(built)
}

fn lookup<T: Record>(
    map: &HashMap<TypeId, Cached>,
    type_id: TypeId,
) -> Option<MapperResult<Arc<Schema<T>>>> {
    map.get(&type_id)?
        .downcast_ref::<MapperResult<Arc<Schema<T>>>>()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapperError;
    use crate::fixtures::{Car, Person};
    use crate::schema::SchemaBuilder;

    #[test]
    fn schema_is_built_once() {
        let a = schema_of::<Car>().unwrap();
        let b = schema_of::<Car>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_types_get_distinct_schemas() {
        let car = schema_of::<Car>().unwrap();
        let person = schema_of::<Person>().unwrap();
        assert_eq!(car.collection(), "Car");
        assert_eq!(person.collection(), "Person");
    }

    #[derive(Default)]
    struct Broken {
        a: String,
        b: String,
    }

    impl Record for Broken {
        fn describe(s: &mut SchemaBuilder<Self>) {
            s.id(|r| &r.a, |r| &mut r.a);
            s.id(|r| &r.b, |r| &mut r.b);
        }
    }

    #[test]
    fn failures_are_cached_too() {
        let first = schema_of::<Broken>().unwrap_err();
        let second = schema_of::<Broken>().unwrap_err();
        assert_eq!(first, second);
        assert!(matches!(first, MapperError::Classification { .. }));
    }

    #[test]
    fn concurrent_first_use_agrees() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| schema_of::<Person>().unwrap()))
            .collect();
        let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &schemas[1..] {
            assert!(Arc::ptr_eq(&schemas[0], s));
        }
    }
}
