//! Type files: a registry's settings and named types as one JSON document.
//!
//! ```json
//! {
//!   "settings": {"dialect": "draft-07"},
//!   "types": {
//!     "Node": {"type": {"object": {"name": "Node", "fields": [...]}}},
//!     "Id": {"type": {"primitive": "integer"}, "kind": "anonymous"}
//!   }
//! }
//! ```
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::ir::TypeDescriptor;
use crate::registry::{Registry, Settings};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("at JSON path {path} → {message}")]
    Parse { path: String, message: String },
    #[error(transparent)]
    Registry(#[from] Error),
}

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, LoadError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| LoadError::Parse {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

pub fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LoadError> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| LoadError::Parse {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    /// Emitted under its own name.
    #[default]
    Named,
    /// Transparent newtype.
    Anonymous,
    /// Inherits the conversions of its target.
    Widening,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeEntry {
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default)]
    pub kind: AliasKind,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub types: IndexMap<String, TypeEntry>,
}

impl TypeFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|source| LoadError::Io { path: path.display().to_string(), source })?;
        from_slice_with_path(&bytes)
    }

    /// Define every type, in file order, on a fresh registry.
    pub fn into_registry(self) -> Result<Registry, LoadError> {
        let mut registry = Registry::with_settings(self.settings);
        for (name, entry) in self.types {
            match entry.kind {
                AliasKind::Named => registry.define(name, entry.ty)?,
                AliasKind::Anonymous => registry.define_anonymous(name, entry.ty)?,
                AliasKind::Widening => registry.define_widening(name, entry.ty)?,
            };
        }
        tracing::debug!(types = registry.aliases().count(), "loaded type file");
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    #[test]
    fn parse_errors_name_the_path() {
        let src = r#"{"types": {"Bad": {"type": {"primitive": "strin"}}}}"#;
        let err = from_str_with_path::<TypeFile>(src).unwrap_err();
        let LoadError::Parse { path, .. } = err else { panic!("expected a parse error") };
        assert!(path.starts_with("types.Bad.type"), "{path}");
    }

    #[test]
    fn builds_a_registry() {
        let src = r#"{
            "settings": {"dialect": "draft-07", "additional_properties": true},
            "types": {
                "Id": {"type": {"primitive": "integer"}, "kind": "anonymous"},
                "Tag": {"type": {"primitive": "string"}}
            }
        }"#;
        let registry = from_str_with_path::<TypeFile>(src).unwrap().into_registry().unwrap();
        assert_eq!(registry.settings().dialect, Dialect::Draft07);
        assert!(registry.settings().additional_properties);
        assert_eq!(registry.alias("Id").unwrap().reference, None);
        assert_eq!(registry.alias("Tag").unwrap().reference.as_deref(), Some("Tag"));
    }
}
