// Strongly-typed shape model. Closed set of variants; no behavior beyond
// construction helpers and identity.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::constraints::Constraint;
use crate::data::Data;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
    Null,
}

impl PrimitiveKind {
    /// JSON schema `type` keyword.
    pub fn json_type(self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Float => "number",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Collection(Box<TypeDescriptor>),
    Mapping {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    Tuple(Vec<TypeDescriptor>),
    Object(ObjectType),
    Union(Vec<TypeDescriptor>),
    /// Constant scalars.
    Literal(Vec<Data>),
    Enum(EnumType),
    /// Named indirection; the target lives in the [`crate::registry::Registry`].
    Alias(String),
    Annotated {
        base: Box<TypeDescriptor>,
        tags: Vec<Tag>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    pub name: String,
    pub fields: Vec<ObjectField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<EnumMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: Data,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectField {
    /// wire alias
    pub name: String,
    pub logical_name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, serde_json::Value>,
    /// splice the nested object's fields into the parent
    #[serde(default)]
    pub merged: bool,
    /// absorb wire keys no other field claims
    #[serde(default)]
    pub aggregate: bool,
    /// restrict an aggregate to the leftover keys matching this regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// an invalid value decodes to the default instead of failing
    #[serde(default)]
    pub default_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldDefault>,
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldDefault {
    Value(Data),
    #[serde(skip_deserializing)]
    Factory(DefaultFactory),
}

impl FieldDefault {
    pub fn produce(&self) -> Data {
        match self {
            FieldDefault::Value(d) => d.clone(),
            FieldDefault::Factory(f) => (f.make)(),
        }
    }
}

/// A deferred default. Compared and serialized by name only.
#[derive(Clone)]
pub struct DefaultFactory {
    pub name: String,
    make: Arc<dyn Fn() -> Data + Send + Sync>,
}

impl DefaultFactory {
    pub fn new(name: impl Into<String>, make: impl Fn() -> Data + Send + Sync + 'static) -> Self {
        Self { name: name.into(), make: Arc::new(make) }
    }
}

impl fmt::Debug for DefaultFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefaultFactory({})", self.name)
    }
}

impl PartialEq for DefaultFactory {
    fn eq(&self, other: &Self) -> bool { self.name == other.name }
}

impl Serialize for DefaultFactory {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.name)
    }
}

/// Out-of-band metadata carried by `Annotated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    /// explicit reference name
    Ref(String),
    Title(String),
    Description(String),
    Examples(Vec<serde_json::Value>),
    Deprecated,
    Constraint(Constraint),
    Extra { key: String, value: serde_json::Value },
}

// ————————————————————————————————————————————————————————————————————————————
// CONSTRUCTORS
// ————————————————————————————————————————————————————————————————————————————

impl TypeDescriptor {
    pub fn string() -> Self { Self::Primitive(PrimitiveKind::String) }
    pub fn integer() -> Self { Self::Primitive(PrimitiveKind::Integer) }
    pub fn float() -> Self { Self::Primitive(PrimitiveKind::Float) }
    pub fn boolean() -> Self { Self::Primitive(PrimitiveKind::Boolean) }
    pub fn null() -> Self { Self::Primitive(PrimitiveKind::Null) }

    pub fn list(element: TypeDescriptor) -> Self { Self::Collection(Box::new(element)) }

    pub fn mapping(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Mapping { key: Box::new(key), value: Box::new(value) }
    }

    pub fn object(name: impl Into<String>, fields: Vec<ObjectField>) -> Self {
        Self::Object(ObjectType { name: name.into(), fields })
    }

    pub fn alias(name: impl Into<String>) -> Self { Self::Alias(name.into()) }

    /// `T | null`
    pub fn optional(inner: TypeDescriptor) -> Self { Self::Union(vec![inner, Self::null()]) }

    /// Literal values are deduplicated, first occurrence wins.
    pub fn literal(values: impl IntoIterator<Item = Data>) -> Self {
        let mut out: Vec<Data> = Vec::new();
        for v in values {
            if !out.contains(&v) {
                out.push(v);
            }
        }
        Self::Literal(out)
    }

    pub fn enumeration<N: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = (N, Data)>) -> Self {
        Self::Enum(EnumType {
            name: name.into(),
            members: members.into_iter().map(|(n, value)| EnumMember { name: n.into(), value }).collect(),
        })
    }

    pub fn annotated(self, tags: Vec<Tag>) -> Self {
        Self::Annotated { base: Box::new(self), tags }
    }

    pub fn with_ref(self, name: impl Into<String>) -> Self {
        self.annotated(vec![Tag::Ref(name.into())])
    }

    /// Descriptor-kind label, used by `Unsupported` diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Primitive(_) => "primitive",
            Self::Collection(_) => "collection",
            Self::Mapping { .. } => "mapping",
            Self::Tuple(_) => "tuple",
            Self::Object(_) => "object",
            Self::Union(_) => "union",
            Self::Literal(_) => "literal",
            Self::Enum(_) => "enum",
            Self::Alias(_) => "alias",
            Self::Annotated { .. } => "annotated",
        }
    }

    /// Canonical identity string. Structurally equal descriptors share it.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(k) => f.write_str(k.json_type()),
            Self::Collection(e) => write!(f, "list[{e}]"),
            Self::Mapping { key, value } => write!(f, "mapping[{key}, {value}]"),
            Self::Tuple(xs) => {
                f.write_str("tuple[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 { f.write_str(", ")?; }
                    write!(f, "{x}")?;
                }
                f.write_str("]")
            }
            Self::Object(o) => f.write_str(&o.name),
            Self::Union(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 { f.write_str(" | ")?; }
                    write!(f, "{x}")?;
                }
                Ok(())
            }
            Self::Literal(vs) => write!(f, "literal{vs:?}"),
            Self::Enum(e) => f.write_str(&e.name),
            Self::Alias(name) => f.write_str(name),
            Self::Annotated { base, .. } => write!(f, "{base}"),
        }
    }
}

impl ObjectField {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        let name = name.into();
        Self {
            logical_name: name.clone(),
            name,
            ty,
            required: true,
            metadata: IndexMap::new(),
            merged: false,
            aggregate: false,
            pattern: None,
            default_fallback: false,
            default: None,
        }
    }

    /// Set the wire alias, keeping the logical name.
    pub fn alias(mut self, wire: impl Into<String>) -> Self {
        self.name = wire.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Data>) -> Self {
        self.required = false;
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    pub fn with_default_factory(mut self, factory: DefaultFactory) -> Self {
        self.required = false;
        self.default = Some(FieldDefault::Factory(factory));
        self
    }

    pub fn merged(mut self) -> Self {
        self.merged = true;
        self
    }

    /// Aggregate fields are never required: absent leftovers mean empty.
    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self.required = false;
        self
    }

    /// Aggregate of the leftover keys matching `pattern` (`patternProperties`).
    /// Pattern aggregates take their keys in declaration order, before any
    /// plain aggregate.
    pub fn pattern_aggregate(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self.aggregate()
    }

    /// Only meaningful with a default.
    pub fn default_fallback(mut self) -> Self {
        self.default_fallback = true;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Aliases this field makes required when present (`dependent_required` metadata).
    pub fn dependent_required(&self) -> Vec<String> {
        self.metadata
            .get("dependent_required")
            .and_then(|v| v.as_array())
            .map(|xs| xs.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}
