//! Field classification and the scalar/embedded/reference codecs.

use chrono::{DateTime, Utc};
use docgraph_types::Value;

use crate::entity::EntityRef;
use crate::error::MapperResult;
use crate::flatten::Encoder;
use crate::resolve::Decoder;
use crate::schema::{declares_identifier, short_type_name, Record};

/// How a field is represented in its parent document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Stored verbatim (primitives, timestamps, arrays of those).
    Scalar,
    /// A record without its own document, stored inline as a map.
    Embedded,
    /// A sequence of embedded records, stored as an array of maps.
    EmbeddedSlice,
    /// An entity stored in its own document; the parent holds a pointer.
    Reference,
    /// A sequence of entities; the parent holds an array of pointers.
    ReferenceSlice,
}

impl FieldKind {
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Reference | Self::ReferenceSlice)
    }
}

/// Static description of a field's Rust type.
#[derive(Clone, Copy, Debug)]
pub struct FieldType {
    pub kind: FieldKind,
    /// Short name of the innermost element type.
    pub element: &'static str,
    /// Number of sequence layers around the element.
    pub depth: usize,
    /// For references, reports whether the target type declares an identifier.
    pub target_identified: Option<fn() -> bool>,
}

impl FieldType {
    pub fn scalar<T: ?Sized>() -> Self {
        Self {
            kind: FieldKind::Scalar,
            element: short_type_name::<T>(),
            depth: 0,
            target_identified: None,
        }
    }

    pub fn embedded<T: Record>() -> Self {
        Self {
            kind: FieldKind::Embedded,
            element: short_type_name::<T>(),
            depth: 0,
            target_identified: None,
        }
    }

    pub fn reference<T: Record>() -> Self {
        Self {
            kind: FieldKind::Reference,
            element: short_type_name::<T>(),
            depth: 0,
            target_identified: Some(declares_identifier::<T>),
        }
    }

    /// The type of a sequence of this type.
    pub fn sequence(self) -> Self {
        let kind = match self.kind {
            FieldKind::Embedded => FieldKind::EmbeddedSlice,
            FieldKind::Reference => FieldKind::ReferenceSlice,
            other => other,
        };
        Self {
            kind,
            depth: self.depth + 1,
            ..self
        }
    }
}

/// A Rust type that can sit in a record field.
///
/// Implemented here for the common scalars, `Option`, `Vec` and
/// [`EntityRef`]. Record types stored inline get an implementation from
/// [`embedded_record!`](crate::embedded_record).
pub trait FieldValue: Send + Sync + Sized + 'static {
    fn field_type() -> FieldType;

    fn encode(&self, encoder: &mut Encoder<'_>) -> MapperResult<Value>;

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self>;
}

impl FieldValue for String {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(Value::String(self.clone()))
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(decoder.mismatch("string", other)),
        }
    }
}

impl FieldValue for bool {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(Value::Bool(*self))
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(decoder.mismatch("bool", other)),
        }
    }
}

macro_rules! integer_field {
    ($($ty:ty),+) => {$(
        impl FieldValue for $ty {
            fn field_type() -> FieldType {
                FieldType::scalar::<Self>()
            }

            fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
                Ok(Value::Integer(i64::from(*self)))
            }

            fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
                match value {
                    Value::Integer(n) => <$ty>::try_from(*n).map_err(|_| {
                        decoder.invalid(format!("{n} is out of range for {}", stringify!($ty)))
                    }),
                    other => Err(decoder.mismatch("integer", other)),
                }
            }
        }
    )+};
}

integer_field!(i64, i32, i16, u32, u16);

impl FieldValue for f64 {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(Value::Float(*self))
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Float(x) => Ok(*x),
            Value::Integer(n) => Ok(*n as f64),
            other => Err(decoder.mismatch("float", other)),
        }
    }
}

impl FieldValue for f32 {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(Value::Float(f64::from(*self)))
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        f64::decode(value, decoder).map(|x| x as f32)
    }
}

impl FieldValue for DateTime<Utc> {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(Value::Timestamp(*self))
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            other => Err(decoder.mismatch("timestamp", other)),
        }
    }
}

/// Raw values pass through untouched.
impl FieldValue for Value {
    fn field_type() -> FieldType {
        FieldType::scalar::<Self>()
    }

    fn encode(&self, _: &mut Encoder<'_>) -> MapperResult<Value> {
        Ok(self.clone())
    }

    fn decode(value: &Value, _: &mut Decoder<'_>) -> MapperResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> MapperResult<Value> {
        match self {
            Some(inner) => inner.encode(encoder),
            None => Ok(Value::Null),
        }
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::decode(other, decoder).map(Some),
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn field_type() -> FieldType {
        T::field_type().sequence()
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> MapperResult<Value> {
        self.iter()
            .map(|item| item.encode(encoder))
            .collect::<MapperResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Array(items) => items.iter().map(|item| T::decode(item, decoder)).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(decoder.mismatch("array", other)),
        }
    }
}

impl<T: Record> FieldValue for EntityRef<T> {
    fn field_type() -> FieldType {
        FieldType::reference::<T>()
    }

    fn encode(&self, encoder: &mut Encoder<'_>) -> MapperResult<Value> {
        encoder.reference(self)
    }

    fn decode(value: &Value, decoder: &mut Decoder<'_>) -> MapperResult<Self> {
        match value {
            Value::Reference(key) => decoder.link::<T>(key),
            other => Err(decoder.mismatch("reference", other)),
        }
    }
}

/// Store one or more [`Record`] types inline in their parent document.
///
/// ```ignore
/// #[derive(Default)]
/// struct Relation { name: String, friends: Vec<EntityRef<Person>> }
///
/// impl Record for Relation { /* ... */ }
/// embedded_record!(Relation);
/// ```
#[macro_export]
macro_rules! embedded_record {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::FieldValue for $ty {
            fn field_type() -> $crate::FieldType {
                $crate::FieldType::embedded::<$ty>()
            }

            fn encode(
                &self,
                encoder: &mut $crate::Encoder<'_>,
            ) -> $crate::MapperResult<$crate::Value> {
                encoder.record(self)
            }

            fn decode(
                value: &$crate::Value,
                decoder: &mut $crate::Decoder<'_>,
            ) -> $crate::MapperResult<Self> {
                decoder.record(value)
            }
        }
    )+};
}
