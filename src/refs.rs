//! Reference extraction: the pre-pass that decides which types are
//! emitted once, centrally, and pointed to everywhere else.
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::conversion::{Conversions, Direction};
use crate::data::Data;
use crate::error::{ConfigError, Error, Result};
use crate::ir::{EnumType, ObjectType, PrimitiveKind, TypeDescriptor};
use crate::registry::Registry;
use crate::visitor::{Visitor, Walk, visit};

/// When a named (but not explicitly tagged) type becomes a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefPolicy {
    /// Only when it is reached more than once.
    Repeated,
    /// As soon as it is reached.
    Always,
}

impl FromStr for RefPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "repeated" => Ok(RefPolicy::Repeated),
            "always" => Ok(RefPolicy::Always),
            other => Err(format!("unknown ref policy '{other}' (expected repeated or always)")),
        }
    }
}

impl fmt::Display for RefPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefPolicy::Repeated => f.write_str("repeated"),
            RefPolicy::Always => f.write_str("always"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefEntry {
    /// Fingerprint of the owning type.
    owner: String,
    display: String,
    pub count: usize,
    /// Named by a `Tag::Ref` rather than by an alias definition.
    pub explicit: bool,
}

/// Reference name → owning type and usage count. One per generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefTable {
    entries: IndexMap<String, RefEntry>,
}

impl RefTable {
    /// Count one more use of `name` by `ty`. Returns whether the name was
    /// already registered, in which case the caller must not redescend.
    pub fn increment(&mut self, name: &str, ty: &TypeDescriptor, explicit: bool) -> Result<bool> {
        let owner = ty.fingerprint();
        match self.entries.get_mut(name) {
            Some(entry) if entry.owner != owner => Err(ConfigError::ConflictingRef {
                name: name.to_string(),
                first: entry.display.clone(),
                second: ty.to_string(),
            }
            .into()),
            Some(entry) => {
                entry.count += 1;
                Ok(true)
            }
            None => {
                self.entries.insert(
                    name.to_string(),
                    RefEntry { owner, display: ty.to_string(), count: 1, explicit },
                );
                Ok(false)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&RefEntry> {
        self.entries.get(name)
    }

    pub fn count(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |e| e.count)
    }

    pub fn is_referenced(&self, name: &str, policy: RefPolicy) -> bool {
        self.entries.get(name).is_some_and(|e| {
            e.explicit
                || match policy {
                    RefPolicy::Repeated => e.count > 1,
                    RefPolicy::Always => e.count > 0,
                }
        })
    }

    /// Names that must be emitted centrally, in discovery order.
    pub fn referenced(&self, policy: RefPolicy) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str).filter(move |name| self.is_referenced(name, policy))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// EXTRACTOR
// ————————————————————————————————————————————————————————————————————————————

/// Walks the whole graph once, counting every named type it reaches.
#[derive(Default)]
pub struct RefExtractor {
    pub table: RefTable,
    /// Transparent aliases on the current path since the last named type.
    transparent: Vec<String>,
    /// Outer `transparent` stacks, one per named type being descended.
    scopes: Vec<Vec<String>>,
}

impl RefExtractor {
    pub fn extract(
        registry: &Registry,
        roots: &[TypeDescriptor],
        direction: Direction,
        context: &Conversions,
    ) -> Result<RefTable> {
        let mut extractor = RefExtractor::default();
        for root in roots {
            let mut walk = Walk::new(registry, direction, context.clone());
            visit(&mut extractor, &mut walk, root)?;
        }
        tracing::debug!(refs = extractor.table.len(), %direction, "extracted references");
        Ok(extractor.table)
    }
}

impl Visitor for RefExtractor {
    type Output = ();
    const NAME: &'static str = "reference extractor";

    fn enter(&mut self, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<Option<()>> {
        if let Some(name) = walk.reference_of(ty)? {
            let explicit = matches!(ty, TypeDescriptor::Annotated { .. });
            if self.table.increment(&name, ty, explicit)? {
                return Ok(Some(()));
            }
            // a named type breaks any cycle through the aliases above it
            self.scopes.push(std::mem::take(&mut self.transparent));
        } else if let TypeDescriptor::Alias(name) = ty {
            if self.transparent.contains(name) {
                return Err(Error::Recursive { name: name.clone() });
            }
            self.transparent.push(name.clone());
        }
        Ok(None)
    }

    fn leave(&mut self, walk: &mut Walk<'_>, ty: &TypeDescriptor, out: ()) -> Result<()> {
        if walk.reference_of(ty)?.is_some() {
            if let Some(outer) = self.scopes.pop() {
                self.transparent = outer;
            }
        } else if matches!(ty, TypeDescriptor::Alias(_)) {
            self.transparent.pop();
        }
        Ok(out)
    }

    fn primitive(&mut self, _: &mut Walk<'_>, _: PrimitiveKind) -> Result<()> {
        Ok(())
    }

    fn collection(&mut self, walk: &mut Walk<'_>, element: &TypeDescriptor) -> Result<()> {
        visit(self, walk, element)
    }

    fn mapping(&mut self, walk: &mut Walk<'_>, key: &TypeDescriptor, value: &TypeDescriptor) -> Result<()> {
        visit(self, walk, key)?;
        visit(self, walk, value)
    }

    fn tuple(&mut self, walk: &mut Walk<'_>, elements: &[TypeDescriptor]) -> Result<()> {
        elements.iter().try_for_each(|e| visit(self, walk, e))
    }

    fn object(&mut self, walk: &mut Walk<'_>, object: &ObjectType) -> Result<()> {
        object.fields.iter().try_for_each(|f| visit(self, walk, &f.ty))
    }

    fn union_result(&mut self, _: &mut Walk<'_>, _: Vec<()>) -> Result<()> {
        Ok(())
    }

    fn literal(&mut self, _: &mut Walk<'_>, _: &[Data]) -> Result<()> {
        Ok(())
    }

    fn enumeration(&mut self, _: &mut Walk<'_>, _: &EnumType) -> Result<()> {
        Ok(())
    }
}
