//! Generation-time failures.
//!
//! Decode failures are *not* here: they are ordinary results, see
//! [`crate::validation::ValidationError`].
use thiserror::Error;

use crate::conversion::Direction;

/// Fatal failure of a schema or codec build. No partial output is ever
/// produced alongside one of these.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A visitor reached a descriptor kind it has no behavior for.
    #[error("{visitor} does not support {kind} types")]
    Unsupported {
        visitor: &'static str,
        kind: &'static str,
    },

    /// A cycle in the type graph that no named reference breaks.
    #[error("recursive type {name} is not broken by any named reference")]
    Recursive { name: String },
}

/// Setup mistakes: the declarations themselves are inconsistent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("types {first} and {second} share the same reference '{name}'")]
    ConflictingRef {
        name: String,
        first: String,
        second: String,
    },

    #[error("invalid reference '{name}': {reason}")]
    InvalidRef { name: String, reason: String },

    #[error("ambiguous {direction} conversion for {ty}: '{existing}' is already registered")]
    AmbiguousConversion {
        ty: String,
        direction: Direction,
        existing: String,
    },

    #[error("merged field {owner}.{field} must have an object type")]
    MergedNotObject { owner: String, field: String },

    #[error("aggregate field {owner}.{field} must have a mapping type")]
    AggregateNotMapping { owner: String, field: String },

    #[error("wire alias '{alias}' is declared twice in {owner}")]
    DuplicateField { owner: String, alias: String },

    #[error("alias '{0}' is already defined")]
    DuplicateAlias(String),

    #[error("unknown alias '{0}'")]
    UnknownAlias(String),

    #[error("{0}")]
    Invalid(String),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::Config(ConfigError::Invalid(msg.into()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
