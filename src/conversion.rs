//! Bidirectional conversions between shapes.
//!
//! A conversion redirects traversal of `source` to `target`. For
//! deserialization the wire value is decoded as `target` and the transform
//! produces the `source` value; for serialization the transform maps a
//! `source` value into a `target` value which is then encoded.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::error::{ConfigError, Error, Result};
use crate::ir::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// from-wire
    Deserialization,
    /// to-wire
    Serialization,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Deserialization => f.write_str("deserialization"),
            Direction::Serialization => f.write_str("serialization"),
        }
    }
}

pub type Transform = Arc<dyn Fn(Data) -> Result<Data, String> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone)]
pub struct Conversion {
    /// Identity of this conversion, shared by its clones only. Names are
    /// for diagnostics and need not be unique.
    id: u64,
    pub name: String,
    pub source: TypeDescriptor,
    pub target: TypeDescriptor,
    pub direction: Direction,
    transform: Transform,
    /// Context that replaces the active one while traversing `target`.
    pub sub_conversions: Option<Conversions>,
}

impl Conversion {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        source: TypeDescriptor,
        target: TypeDescriptor,
        transform: impl Fn(Data) -> Result<Data, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            source,
            target,
            direction,
            transform: Arc::new(transform),
            sub_conversions: None,
        }
    }

    pub fn deserialization(
        name: impl Into<String>,
        source: TypeDescriptor,
        target: TypeDescriptor,
        transform: impl Fn(Data) -> Result<Data, String> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, Direction::Deserialization, source, target, transform)
    }

    pub fn serialization(
        name: impl Into<String>,
        source: TypeDescriptor,
        target: TypeDescriptor,
        transform: impl Fn(Data) -> Result<Data, String> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, Direction::Serialization, source, target, transform)
    }

    /// A different sub context makes a different conversion.
    pub fn with_sub_conversions(mut self, sub: Conversions) -> Self {
        self.id = next_id();
        self.sub_conversions = Some(sub);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn apply(&self, value: Data) -> Result<Data, String> {
        (self.transform)(value)
    }

    pub(crate) fn transform(&self) -> Transform {
        self.transform.clone()
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("source", &self.source.to_string())
            .field("target", &self.target.to_string())
            .finish()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CONTEXT
// ————————————————————————————————————————————————————————————————————————————

/// A set of conversions keyed by `(source identity, direction)`.
///
/// Used both as the registry's global table and as a per-call override
/// context. At most one conversion per key; a second one is rejected.
#[derive(Clone, Default)]
pub struct Conversions {
    entries: IndexMap<(String, Direction), Arc<Conversion>>,
}

impl Conversions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conversion: Conversion) -> Result<()> {
        if conversion.source == conversion.target {
            return Err(Error::invalid(format!(
                "conversion '{}' maps {} onto itself",
                conversion.name, conversion.source
            )));
        }
        let key = (conversion.source.fingerprint(), conversion.direction);
        if let Some(existing) = self.entries.get(&key) {
            return Err(ConfigError::AmbiguousConversion {
                ty: conversion.source.to_string(),
                direction: conversion.direction,
                existing: existing.name.clone(),
            }
            .into());
        }
        self.entries.insert(key, Arc::new(conversion));
        Ok(())
    }

    /// Builder form of [`Conversions::insert`].
    pub fn with(mut self, conversion: Conversion) -> Result<Self> {
        self.insert(conversion)?;
        Ok(self)
    }

    pub fn get(&self, ty: &TypeDescriptor, direction: Direction) -> Option<&Arc<Conversion>> {
        if self.entries.is_empty() {
            return None;
        }
        self.entries.get(&(ty.fingerprint(), direction))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stable identity of the context, for cache keys.
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        for ((_, direction), c) in &self.entries {
            out.push_str(&c.name);
            out.push('#');
            out.push_str(&c.id.to_string());
            out.push('@');
            out.push_str(&direction.to_string());
            out.push(';');
        }
        out
    }
}

impl fmt::Debug for Conversions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.values()).finish()
    }
}
