//! The single explicit home of setup-time state.
//!
//! A `Registry` is built once (aliases defined, conversions registered),
//! then shared by reference for every generation and decode call. Setup
//! methods take `&mut self`; generation takes `&self`, so nothing can
//! mutate the tables while generation runs. The only interior mutability
//! is the generation cache.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::codec::{Deserializer, Serializer};
use crate::conversion::{Conversion, Conversions, Direction};
use crate::dialect::Dialect;
use crate::error::{ConfigError, Result};
use crate::ir::TypeDescriptor;
use crate::refs::RefPolicy;

/// Target of an `Alias` node.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDef {
    pub target: TypeDescriptor,
    /// Reference name the alias is emitted under; `None` for anonymous aliases.
    pub reference: Option<String>,
    /// Sub-primitive relation: conversions of `target` apply to the alias too.
    pub widening: bool,
}

/// Generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dialect: Dialect,
    /// Accept (and describe) wire keys that no field claims.
    pub additional_properties: bool,
    /// `None` defers to the dialect's default policy.
    pub ref_policy: Option<RefPolicy>,
    /// Decode scalars from their string form (and strings from scalars).
    pub coercion: bool,
    /// Fields with a default fall back to it when their value is invalid.
    pub default_fallback: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialect: Dialect::Draft2019_09,
            additional_properties: false,
            ref_policy: None,
            coercion: false,
            default_fallback: false,
        }
    }
}

#[derive(Default)]
pub struct Registry {
    aliases: IndexMap<String, AliasDef>,
    conversions: Conversions,
    settings: Settings,
    cache: Caches,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
        self.cache.clear();
    }

    // ------------------------------- Setup -------------------------------- //

    /// Define a named alias. Its reference name is the alias name.
    pub fn define(&mut self, name: impl Into<String>, target: TypeDescriptor) -> Result<TypeDescriptor> {
        let name = name.into();
        self.insert_alias(name.clone(), AliasDef { target, reference: Some(name), widening: false })
    }

    /// Define an alias that never becomes a reference (a transparent newtype).
    pub fn define_anonymous(&mut self, name: impl Into<String>, target: TypeDescriptor) -> Result<TypeDescriptor> {
        self.insert_alias(name.into(), AliasDef { target, reference: None, widening: false })
    }

    /// Define an anonymous alias that also inherits its target's conversions.
    pub fn define_widening(&mut self, name: impl Into<String>, target: TypeDescriptor) -> Result<TypeDescriptor> {
        self.insert_alias(name.into(), AliasDef { target, reference: None, widening: true })
    }

    fn insert_alias(&mut self, name: String, def: AliasDef) -> Result<TypeDescriptor> {
        if name.is_empty() {
            return Err(ConfigError::InvalidRef { name, reason: "empty alias name".into() }.into());
        }
        if self.aliases.contains_key(&name) {
            return Err(ConfigError::DuplicateAlias(name).into());
        }
        tracing::debug!(alias = %name, target = %def.target, "defined alias");
        self.aliases.insert(name.clone(), def);
        self.cache.clear();
        Ok(TypeDescriptor::Alias(name))
    }

    pub fn register(&mut self, conversion: Conversion) -> Result<()> {
        tracing::debug!(conversion = %conversion.name, direction = %conversion.direction, "registered conversion");
        self.conversions.insert(conversion)?;
        self.cache.clear();
        Ok(())
    }

    /// Forget every alias, conversion and cached artifact.
    pub fn reset(&mut self) {
        self.aliases.clear();
        self.conversions.clear();
        self.cache.clear();
    }

    pub fn reset_cache(&self) {
        self.cache.clear();
    }

    // ------------------------------- Lookup ------------------------------- //

    pub fn alias(&self, name: &str) -> Result<&AliasDef> {
        self.aliases.get(name).ok_or_else(|| ConfigError::UnknownAlias(name.to_string()).into())
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &AliasDef)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Which conversion applies to `ty` in `direction`: the call context
    /// first, then the registry table, then (for widening aliases) the
    /// conversion of the alias target.
    pub fn resolve<'a>(
        &'a self,
        ty: &TypeDescriptor,
        direction: Direction,
        context: &'a Conversions,
    ) -> Option<&'a Arc<Conversion>> {
        if let Some(c) = context.get(ty, direction) {
            return Some(c);
        }
        if let Some(c) = self.conversions.get(ty, direction) {
            return Some(c);
        }
        if let TypeDescriptor::Alias(name) = ty {
            if let Some(def) = self.aliases.get(name).filter(|d| d.widening) {
                return self.resolve(&def.target, direction, context);
            }
        }
        None
    }

    pub(crate) fn cache(&self) -> &Caches {
        &self.cache
    }

    /// Number of cached schemas and codecs.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// GENERATION CACHE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub root: String,
    pub conversions: String,
    pub direction: Direction,
    /// Schema-only parameters; `None` for codecs.
    pub schema: Option<(Dialect, RefPolicy, bool)>,
}

impl CacheKey {
    pub fn new(root: &TypeDescriptor, context: &Conversions, direction: Direction) -> Self {
        Self { root: root.fingerprint(), conversions: context.fingerprint(), direction, schema: None }
    }
}

/// Regenerating a key twice yields an equal artifact, so writers compute
/// outside the lock and publish only if nobody beat them to it.
pub(crate) struct GenerationCache<V> {
    entries: RwLock<HashMap<CacheKey, V>>,
}

impl<V> Default for GenerationCache<V> {
    fn default() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<V: Clone> GenerationCache<V> {
    pub fn get_or_try_insert(&self, key: CacheKey, compute: impl FnOnce() -> Result<V>) -> Result<V> {
        if let Some(hit) = self.entries.read().get(&key) {
            tracing::debug!(root = %key.root, direction = %key.direction, "generation cache hit");
            return Ok(hit.clone());
        }
        let fresh = compute()?;
        let mut entries = self.entries.write();
        Ok(entries.entry(key).or_insert(fresh).clone())
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Default)]
pub(crate) struct Caches {
    pub schemas: GenerationCache<serde_json::Value>,
    pub deserializers: GenerationCache<Deserializer>,
    pub serializers: GenerationCache<Serializer>,
}

impl Caches {
    pub fn clear(&self) {
        self.schemas.clear();
        self.deserializers.clear();
        self.serializers.clear();
    }

    pub fn len(&self) -> usize {
        self.schemas.len() + self.deserializers.len() + self.serializers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn duplicate_alias_is_rejected() {
        let mut reg = Registry::new();
        reg.define("Point", TypeDescriptor::string()).unwrap();
        let err = reg.define("Point", TypeDescriptor::integer()).unwrap_err();
        assert_eq!(err, Error::Config(ConfigError::DuplicateAlias("Point".into())));
        assert!(matches!(reg.alias("Nope"), Err(Error::Config(ConfigError::UnknownAlias(_)))));
    }

    #[test]
    fn call_context_overrides_registry_conversion() {
        let ts = TypeDescriptor::alias("Timestamp");
        let mut reg = Registry::new();
        reg.define_anonymous("Timestamp", TypeDescriptor::integer()).unwrap();
        reg.register(Conversion::deserialization("global", ts.clone(), TypeDescriptor::string(), Ok)).unwrap();
        let ctx = Conversions::new()
            .with(Conversion::deserialization("local", ts.clone(), TypeDescriptor::float(), Ok))
            .unwrap();
        let empty = Conversions::new();
        assert_eq!(reg.resolve(&ts, Direction::Deserialization, &empty).unwrap().name, "global");
        assert_eq!(reg.resolve(&ts, Direction::Deserialization, &ctx).unwrap().name, "local");
        assert!(reg.resolve(&ts, Direction::Serialization, &ctx).is_none());
    }

    #[test]
    fn widening_alias_inherits_target_conversion() {
        let mut reg = Registry::new();
        let money = reg.define_anonymous("Money", TypeDescriptor::float()).unwrap();
        let price = reg.define_widening("Price", money.clone()).unwrap();
        let plain = reg.define_anonymous("Plain", money.clone()).unwrap();
        reg.register(Conversion::serialization("money_to_str", money, TypeDescriptor::string(), Ok)).unwrap();
        let empty = Conversions::new();
        assert_eq!(reg.resolve(&price, Direction::Serialization, &empty).unwrap().name, "money_to_str");
        assert!(reg.resolve(&plain, Direction::Serialization, &empty).is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut reg = Registry::new();
        reg.define("A", TypeDescriptor::string()).unwrap();
        reg.reset();
        assert!(reg.alias("A").is_err());
        assert_eq!(reg.aliases().count(), 0);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: Settings = serde_json::from_value(serde_json::json!({"additional_properties": true})).unwrap();
        assert!(s.additional_properties);
        assert_eq!(s.dialect, Dialect::Draft2019_09);
        assert_eq!(s.ref_policy, None);
    }
}
