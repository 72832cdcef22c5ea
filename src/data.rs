//! Typed in-memory values: what a decode produces and an encode consumes.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Data {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Collections and tuples.
    List(Vec<Data>),
    /// Mappings keep their typed keys (not just strings).
    Map(Vec<(Data, Data)>),
    Record(Record),
    /// Enum member, by member name.
    Enum(String),
}

/// An object value. Fields are keyed by logical name, not wire alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub fields: IndexMap<String, Data>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: IndexMap::new() }
    }
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Data>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
    pub fn get(&self, field: &str) -> Option<&Data> {
        self.fields.get(field)
    }
}

impl Data {
    /// Short kind label used in mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Bool(_) => "boolean",
            Data::Int(_) => "integer",
            Data::Float(_) => "float",
            Data::Str(_) => "string",
            Data::List(_) => "list",
            Data::Map(_) => "map",
            Data::Record(_) => "record",
            Data::Enum(_) => "enum member",
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Data::Null | Data::Bool(_) | Data::Int(_) | Data::Float(_) | Data::Str(_))
    }

    /// Wire rendering of a scalar (literal values, schema defaults).
    /// Lists of scalars are rendered too; anything else has no
    /// structure-independent wire form.
    pub fn to_plain_json(&self) -> Option<Value> {
        match self {
            Data::Null => Some(Value::Null),
            Data::Bool(b) => Some(Value::Bool(*b)),
            Data::Int(i) => Some(Value::from(*i)),
            Data::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            Data::Str(s) => Some(Value::String(s.clone())),
            Data::List(xs) => xs.iter().map(Data::to_plain_json).collect::<Option<Vec<_>>>().map(Value::Array),
            _ => None,
        }
    }

    /// Inverse of [`Data::to_plain_json`] for scalars.
    pub fn from_plain_json(value: &Value) -> Option<Data> {
        match value {
            Value::Null => Some(Data::Null),
            Value::Bool(b) => Some(Data::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Data::Int).or_else(|| n.as_f64().map(Data::Float)),
            Value::String(s) => Some(Data::Str(s.clone())),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Data::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// Kind label of a wire value, matching [`Data::kind`] wording where it can.
pub fn wire_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self { Data::Str(s.to_string()) }
}
impl From<String> for Data {
    fn from(s: String) -> Self { Data::Str(s) }
}
impl From<i64> for Data {
    fn from(i: i64) -> Self { Data::Int(i) }
}
impl From<f64> for Data {
    fn from(f: f64) -> Self { Data::Float(f) }
}
impl From<bool> for Data {
    fn from(b: bool) -> Self { Data::Bool(b) }
}
impl From<Record> for Data {
    fn from(r: Record) -> Self { Data::Record(r) }
}
impl From<Vec<Data>> for Data {
    fn from(xs: Vec<Data>) -> Self { Data::List(xs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_render_plain_json() {
        assert_eq!(Data::Int(3).to_plain_json(), Some(json!(3)));
        assert_eq!(Data::from("x").to_plain_json(), Some(json!("x")));
        assert_eq!(Data::List(vec![Data::Null, Data::Bool(true)]).to_plain_json(), Some(json!([null, true])));
        assert_eq!(Data::Record(Record::new("R")).to_plain_json(), None);
        assert_eq!(Data::Float(f64::NAN).to_plain_json(), None);
    }

    #[test]
    fn plain_json_numbers_prefer_integers() {
        assert_eq!(Data::from_plain_json(&json!(2)), Some(Data::Int(2)));
        assert_eq!(Data::from_plain_json(&json!(2.5)), Some(Data::Float(2.5)));
        assert_eq!(Data::from_plain_json(&json!([1])), None);
    }
}
