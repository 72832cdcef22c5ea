//! Type-driven schema and codec generation.
//!
//! Shapes are described with [`TypeDescriptor`]s, named and converted
//! through a [`Registry`], and turned into JSON schema documents (three
//! dialects), decoders and encoders. Decoding reports every violation it
//! finds as a [`ValidationError`] tree.
pub mod codec;
pub mod constraints;
pub mod conversion;
pub mod data;
pub mod dialect;
pub mod error;
pub mod ir;
pub mod merged;
pub mod path_de;
pub mod refs;
pub mod registry;
pub mod schema;
pub mod validation;
pub mod visitor;

pub use codec::{Deserializer, Serializer};
pub use constraints::Constraint;
pub use conversion::{Conversion, Conversions, Direction};
pub use data::{Data, Record};
pub use dialect::Dialect;
pub use error::{ConfigError, Error};
pub use ir::{DefaultFactory, EnumMember, EnumType, FieldDefault, ObjectField, ObjectType, PrimitiveKind, Tag, TypeDescriptor};
pub use refs::RefPolicy;
pub use registry::{Registry, Settings};
pub use schema::SchemaOptions;
pub use validation::{ErrorKey, LocalizedError, ValidationError};
