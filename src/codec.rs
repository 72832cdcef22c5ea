//! Compiled codecs.
//!
//! A codec is built once per (root, conversion context) into a tree of
//! shared closures, then run any number of times. Building goes through
//! the same visitor engine as schema generation, after the reference
//! pre-pass has rejected unbroken cycles and naming conflicts.
mod de;
mod ser;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::conversion::{Conversions, Direction};
use crate::data::{Data, wire_kind};
use crate::error::Result;
use crate::ir::TypeDescriptor;
use crate::refs::RefExtractor;
use crate::registry::{CacheKey, Registry};
use crate::validation::ValidationError;
use crate::visitor::{Walk, visit};

pub(crate) type DecodeFn = Arc<dyn Fn(&Value) -> Result<Data, ValidationError> + Send + Sync>;
pub(crate) type EncodeFn = Arc<dyn Fn(&Data) -> Result<Value, ValidationError> + Send + Sync>;

/// Owns the memo cells of a compiled codec. Late-bound nodes only hold
/// weak handles to their cell, so dropping the codec frees the whole tree.
type Retained = Arc<dyn Any + Send + Sync>;

/// Wire value → typed value.
#[derive(Clone)]
pub struct Deserializer {
    root: String,
    decode: DecodeFn,
    _cells: Retained,
}

impl Deserializer {
    pub fn decode(&self, value: &Value) -> Result<Data, ValidationError> {
        (self.decode)(value)
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

impl fmt::Debug for Deserializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deserializer({})", self.root)
    }
}

/// Typed value → wire value.
#[derive(Clone)]
pub struct Serializer {
    root: String,
    encode: EncodeFn,
    _cells: Retained,
}

impl Serializer {
    pub fn encode(&self, value: &Data) -> Result<Value, ValidationError> {
        (self.encode)(value)
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Serializer({})", self.root)
    }
}

impl Registry {
    pub fn deserializer(&self, ty: &TypeDescriptor, context: &Conversions) -> Result<Deserializer> {
        let direction = Direction::Deserialization;
        self.cache().deserializers.get_or_try_insert(CacheKey::new(ty, context, direction), || {
            tracing::debug!(root = %ty, "compiling deserializer");
            RefExtractor::extract(self, std::slice::from_ref(ty), direction, context)?;
            let mut builder = de::DecoderBuilder::new(self.settings());
            let node = visit(&mut builder, &mut Walk::new(self, direction, context.clone()), ty)?;
            Ok(Deserializer { root: ty.to_string(), decode: node.full, _cells: builder.into_cells() })
        })
    }

    pub fn serializer(&self, ty: &TypeDescriptor, context: &Conversions) -> Result<Serializer> {
        let direction = Direction::Serialization;
        self.cache().serializers.get_or_try_insert(CacheKey::new(ty, context, direction), || {
            tracing::debug!(root = %ty, "compiling serializer");
            RefExtractor::extract(self, std::slice::from_ref(ty), direction, context)?;
            let mut builder = ser::EncoderBuilder::default();
            let node = visit(&mut builder, &mut Walk::new(self, direction, context.clone()), ty)?;
            Ok(Serializer { root: ty.to_string(), encode: node.full, _cells: builder.into_cells() })
        })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SHARED PIECES
// ————————————————————————————————————————————————————————————————————————————

/// Compiled nodes of named and aliased types, keyed by (type, context).
///
/// A node reached again while it is still being built is bound late,
/// through a weak handle on its cell, which is how recursive types compile.
pub(crate) struct Memo<N> {
    cells: HashMap<(String, String), Arc<OnceCell<N>>>,
    pending: Vec<Option<Arc<OnceCell<N>>>>,
}

impl<N> Default for Memo<N> {
    fn default() -> Self {
        Self { cells: HashMap::new(), pending: Vec::new() }
    }
}

impl<N: Clone> Memo<N> {
    pub fn enter(
        &mut self,
        walk: &Walk<'_>,
        ty: &TypeDescriptor,
        late: impl FnOnce(Weak<OnceCell<N>>) -> N,
    ) -> Result<Option<N>> {
        let memoized = matches!(ty, TypeDescriptor::Alias(_)) || walk.reference_of(ty)?.is_some();
        if !memoized {
            self.pending.push(None);
            return Ok(None);
        }
        let key = (ty.fingerprint(), walk.context.fingerprint());
        if let Some(cell) = self.cells.get(&key) {
            return Ok(Some(match cell.get() {
                Some(node) => node.clone(),
                None => late(Arc::downgrade(cell)),
            }));
        }
        let cell = Arc::new(OnceCell::new());
        self.cells.insert(key, cell.clone());
        self.pending.push(Some(cell));
        Ok(None)
    }

    pub fn leave(&mut self, node: N) -> N {
        if let Some(Some(cell)) = self.pending.pop() {
            let _ = cell.set(node.clone());
        }
        node
    }
}

impl<N: Send + Sync + 'static> Memo<N> {
    /// Strong handles on every cell, to be kept alive by the finished codec.
    pub fn into_cells(self) -> Retained {
        Arc::new(self.cells.into_values().collect::<Vec<_>>())
    }
}

pub(crate) fn mismatch(expected: &str, found: &Value) -> ValidationError {
    ValidationError::message(format!("expected {expected}, found {}", wire_kind(found)))
}

/// JSON equality where numbers compare by value, so `1` matches `1.0`.
pub(crate) fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64(), x.as_u64(), y.as_u64()) {
            (Some(x), Some(y), _, _) => x == y,
            (_, _, Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

pub(crate) fn not_one_of(values: &[Value]) -> ValidationError {
    let listed = values.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
    ValidationError::message(format!("not one of [{listed}]"))
}

pub(crate) fn unbuilt() -> ValidationError {
    ValidationError::message("recursive codec used before it was built")
}
