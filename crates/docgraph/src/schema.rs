//! Type classification: how a Rust record maps onto a document.
//!
//! A type opts in by implementing [`Record`]. Its `describe` function lists
//! the identifier and the stored fields through a [`SchemaBuilder`]; the
//! classification of every field follows from its Rust type (see
//! [`FieldValue`]). The resulting [`Schema`] is validated once and cached for
//! the life of the process by [`schema_of`](crate::schema_of).
//!
//! Fields not listed in `describe` are never stored.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use docgraph_types::Value;

use crate::error::{MapperError, MapperResult};
use crate::field::{FieldKind, FieldType, FieldValue};
use crate::flatten::Encoder;
use crate::registry::schema_of;
use crate::resolve::Decoder;

/// A Rust type the mapper can store.
///
/// Records with an identifier can live in their own documents (through
/// [`EntityRef`](crate::EntityRef)); records without one can only be embedded
/// in a parent.
pub trait Record: Default + Send + Sync + 'static {
    fn describe(schema: &mut SchemaBuilder<Self>);
}

type EncodeFn<T> = Arc<dyn Fn(&T, &mut Encoder<'_>) -> MapperResult<Value> + Send + Sync>;
type DecodeFn<T> = Arc<dyn Fn(&mut T, &Value, &mut Decoder<'_>) -> MapperResult<()> + Send + Sync>;
type IdGetFn<T> = Arc<dyn Fn(&T) -> &String + Send + Sync>;
type IdSetFn<T> = Arc<dyn Fn(&mut T) -> &mut String + Send + Sync>;

// Closure signature anchors: passing a closure through these makes its
// argument and return lifetimes higher-ranked.
fn encode_fn<T, F>(f: F) -> F
where
    F: Fn(&T, &mut Encoder<'_>) -> MapperResult<Value>,
{
    f
}

fn decode_fn<T, F>(f: F) -> F
where
    F: Fn(&mut T, &Value, &mut Decoder<'_>) -> MapperResult<()>,
{
    f
}

fn id_get_fn<T, F>(f: F) -> F
where
    F: Fn(&T) -> &String,
{
    f
}

fn id_set_fn<T, F>(f: F) -> F
where
    F: Fn(&mut T) -> &mut String,
{
    f
}

/// One stored field of a record.
pub struct FieldSpec<T> {
    name: &'static str,
    store_name: String,
    field_type: FieldType,
    encode: EncodeFn<T>,
    decode: DecodeFn<T>,
}

impl<T: 'static> FieldSpec<T> {
    /// Override the name the field is stored under.
    pub fn rename(&mut self, store_name: impl Into<String>) -> &mut Self {
        self.store_name = store_name.into();
        self
    }

    /// Name declared in `describe`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Name of the field in the stored document.
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    pub fn kind(&self) -> FieldKind {
        self.field_type.kind
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// The same field seen through an accessor of a composing record.
    fn lift<P: 'static>(&self, get: fn(&P) -> &T, get_mut: fn(&mut P) -> &mut T) -> FieldSpec<P> {
        let encode = Arc::clone(&self.encode);
        let decode = Arc::clone(&self.decode);
        FieldSpec {
            name: self.name,
            store_name: self.store_name.clone(),
            field_type: self.field_type,
            encode: Arc::new(encode_fn::<P, _>(move |record: &P, enc: &mut Encoder<'_>| {
                encode(get(record), enc)
            })),
            decode: Arc::new(decode_fn::<P, _>(
                move |record: &mut P, value: &Value, dec: &mut Decoder<'_>| {
                    decode(get_mut(record), value, dec)
                },
            )),
        }
    }
}

struct IdField<T> {
    get: IdGetFn<T>,
    get_mut: IdSetFn<T>,
}

impl<T: 'static> IdField<T> {
    fn lift<P: 'static>(&self, get: fn(&P) -> &T, get_mut: fn(&mut P) -> &mut T) -> IdField<P> {
        let inner_get = Arc::clone(&self.get);
        let inner_set = Arc::clone(&self.get_mut);
        IdField {
            get: Arc::new(id_get_fn::<P, _>(move |record: &P| inner_get(get(record)))),
            get_mut: Arc::new(id_set_fn::<P, _>(move |record: &mut P| {
                inner_set(get_mut(record))
            })),
        }
    }
}

/// Collects the declaration made by [`Record::describe`].
pub struct SchemaBuilder<T> {
    type_name: &'static str,
    collection: Option<String>,
    id: Option<IdField<T>>,
    id_count: usize,
    fields: Vec<FieldSpec<T>>,
    errors: Vec<String>,
    /// Only count identifiers; skip nested schema builds and validation.
    probe: bool,
}

impl<T: Record> SchemaBuilder<T> {
    fn run(probe: bool) -> Self {
        let mut builder = Self {
            type_name: short_type_name::<T>(),
            collection: None,
            id: None,
            id_count: 0,
            fields: Vec::new(),
            errors: Vec::new(),
            probe,
        };
        T::describe(&mut builder);
        builder
    }

    /// Store documents of this type in `name` instead of the type's name.
    pub fn collection(&mut self, name: impl Into<String>) -> &mut Self {
        self.collection = Some(name.into());
        self
    }

    /// Declare the identifier field. It becomes the document id and is not
    /// stored as a field of the document itself.
    pub fn id(&mut self, get: fn(&T) -> &String, get_mut: fn(&mut T) -> &mut String) -> &mut Self {
        self.id_count += 1;
        if self.id.is_none() {
            self.id = Some(IdField {
                get: Arc::new(get),
                get_mut: Arc::new(get_mut),
            });
        }
        self
    }

    /// Declare a stored field. Its classification follows from `F`.
    pub fn field<F: FieldValue>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut FieldSpec<T> {
        let field_type = F::field_type();
        if !self.probe {
            self.check_field(name, &field_type);
        }
        self.fields.push(FieldSpec {
            name,
            store_name: name.to_string(),
            field_type,
            encode: Arc::new(encode_fn::<T, _>(move |record: &T, enc: &mut Encoder<'_>| {
                get(record).encode(enc)
            })),
            decode: Arc::new(decode_fn::<T, _>(
                move |record: &mut T, value: &Value, dec: &mut Decoder<'_>| {
                    *get_mut(record) = F::decode(value, dec)?;
                    Ok(())
                },
            )),
        });
        let last = self.fields.len() - 1;
        &mut self.fields[last]
    }

    /// Promote every field (and the identifier, if any) of a composed record
    /// into this one, as if they were declared here.
    pub fn embed<U: Record>(&mut self, get: fn(&T) -> &U, get_mut: fn(&mut T) -> &mut U) -> &mut Self {
        if self.probe {
            if declares_identifier::<U>() {
                self.id_count += 1;
            }
            return self;
        }
        match schema_of::<U>() {
            Ok(inner) => {
                if let Some(id) = &inner.id {
                    self.id_count += 1;
                    if self.id.is_none() {
                        self.id = Some(id.lift(get, get_mut));
                    }
                }
                for field in &inner.fields {
                    self.fields.push(field.lift(get, get_mut));
                }
            }
            Err(e) => self
                .errors
                .push(format!("composed type {}: {e}", short_type_name::<U>())),
        }
        self
    }

    fn check_field(&mut self, name: &str, field_type: &FieldType) {
        if field_type.depth > 1 {
            self.errors
                .push(format!("field {name}: nested sequences are not supported"));
        }
        if let Some(identified) = field_type.target_identified {
            if !identified() {
                self.errors.push(format!(
                    "field {name}: reference target {} has no identifier field",
                    field_type.element
                ));
            }
        }
    }

    fn finish(mut self) -> MapperResult<Schema<T>> {
        if self.id_count > 1 {
            self.errors
                .push(format!("{} identifier fields declared", self.id_count));
        }
        let mut seen: HashMap<String, &'static str> = HashMap::new();
        for field in &self.fields {
            if field.store_name.is_empty() {
                self.errors
                    .push(format!("field {}: empty store name", field.name));
                continue;
            }
            if let Some(other) = seen.insert(field.store_name.to_lowercase(), field.name) {
                self.errors.push(format!(
                    "fields {other} and {} share store name {:?}",
                    field.name, field.store_name
                ));
            }
        }
        if !self.errors.is_empty() {
            return Err(MapperError::Classification {
                type_name: self.type_name,
                reason: self.errors.join("; "),
            });
        }
        Ok(Schema {
            type_name: self.type_name,
            collection: self
                .collection
                .unwrap_or_else(|| self.type_name.to_string()),
            id: self.id,
            fields: self.fields,
        })
    }
}

/// Build and validate the schema of `T`, bypassing the cache.
pub(crate) fn build_schema<T: Record>() -> MapperResult<Schema<T>> {
    SchemaBuilder::<T>::run(false).finish()
}

/// Whether `T` declares an identifier, directly or through composition.
///
/// Runs `describe` without building nested schemas, so it is safe to call
/// for types that reference themselves.
pub(crate) fn declares_identifier<T: Record>() -> bool {
    SchemaBuilder::<T>::run(true).id_count > 0
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The validated mapping of one record type.
pub struct Schema<T> {
    type_name: &'static str,
    collection: String,
    id: Option<IdField<T>>,
    fields: Vec<FieldSpec<T>>,
}

impl<T: Record> Schema<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn has_identifier(&self) -> bool {
        self.id.is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec<T>> {
        self.fields.iter()
    }

    /// Look a field up by its declared name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec<T>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The record's identifier, `None` when the type has none or it is empty.
    pub fn id_of<'r>(&self, record: &'r T) -> Option<&'r str> {
        let id = self.id.as_ref()?;
        let value = (id.get)(record);
        (!value.is_empty()).then_some(value.as_str())
    }

    /// Write the identifier back into the record. Returns `false` when the
    /// type has no identifier field.
    pub(crate) fn set_id(&self, record: &mut T, value: String) -> bool {
        match &self.id {
            Some(id) => {
                *(id.get_mut)(record) = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn encode_fields(
        &self,
        record: &T,
        encoder: &mut Encoder<'_>,
    ) -> MapperResult<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for field in &self.fields {
            let value = (field.encode)(record, encoder)?;
            out.insert(field.store_name.clone(), value);
        }
        Ok(out)
    }

    /// Fill `record` from stored fields. Fields absent from the document keep
    /// their current value; unknown stored fields are ignored.
    pub(crate) fn decode_fields(
        &self,
        record: &mut T,
        stored: &BTreeMap<String, Value>,
        decoder: &mut Decoder<'_>,
    ) -> MapperResult<()> {
        for field in &self.fields {
            let Some(value) = stored.get(&field.store_name) else {
                continue;
            };
            let outer = decoder.enter_field(field.name, &field.store_name);
            let result = (field.decode)(record, value, decoder);
            decoder.leave_field(outer);
            result?;
        }
        Ok(())
    }
}

impl<T> std::fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<(&str, FieldKind)> = self
            .fields
            .iter()
            .map(|field| (field.store_name.as_str(), field.field_type.kind))
            .collect();
        f.debug_struct("Schema")
            .field("type_name", &self.type_name)
            .field("collection", &self.collection)
            .field("has_identifier", &self.id.is_some())
            .field("fields", &fields)
            .finish()
    }
}
