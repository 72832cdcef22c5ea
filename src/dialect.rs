//! Schema dialects and the post-processing that rewrites a finished
//! 2019-09 document into each of them.
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::refs::RefPolicy;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[default]
    #[serde(rename = "2019-09")]
    Draft2019_09,
    #[serde(rename = "draft-07")]
    Draft07,
    #[serde(rename = "openapi-3.0")]
    OpenApi30,
}

impl Dialect {
    pub fn schema_uri(self) -> Option<&'static str> {
        match self {
            Dialect::Draft2019_09 => Some("http://json-schema.org/draft/2019-09/schema#"),
            Dialect::Draft07 => Some("http://json-schema.org/draft-07/schema#"),
            Dialect::OpenApi30 => None,
        }
    }

    pub fn ref_prefix(self) -> &'static str {
        match self {
            Dialect::Draft2019_09 => "#/$defs/",
            Dialect::Draft07 => "#/definitions/",
            Dialect::OpenApi30 => "#/components/schema/",
        }
    }

    pub fn default_ref_policy(self) -> RefPolicy {
        match self {
            Dialect::OpenApi30 => RefPolicy::Always,
            _ => RefPolicy::Repeated,
        }
    }

    /// Rewrite a 2019-09 document for this dialect. Applying it to its own
    /// output changes nothing.
    pub fn rewrite(self, document: Value) -> Value {
        match self {
            Dialect::Draft2019_09 => document,
            Dialect::Draft07 => walk_schemas(document, &draft_07),
            Dialect::OpenApi30 => walk_schemas(document, &openapi_3_0),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Draft2019_09 => f.write_str("2019-09"),
            Dialect::Draft07 => f.write_str("draft-07"),
            Dialect::OpenApi30 => f.write_str("openapi-3.0"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2019-09" | "draft-2019-09" => Ok(Dialect::Draft2019_09),
            "draft-07" | "draft-7" => Ok(Dialect::Draft07),
            "openapi-3.0" | "openapi" => Ok(Dialect::OpenApi30),
            other => Err(format!("unknown dialect '{other}' (expected 2019-09, draft-07 or openapi-3.0)")),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TRAVERSAL
// ————————————————————————————————————————————————————————————————————————————

/// Keys holding a single sub-schema.
const SCHEMA_KEYS: &[&str] = &["additionalProperties", "items", "not"];
/// Keys holding a list of sub-schemas.
const SCHEMA_LIST_KEYS: &[&str] = &["allOf", "anyOf", "oneOf", "items"];
/// Keys holding a name → sub-schema map.
const SCHEMA_MAP_KEYS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];

/// Apply `rule` to every schema node, parents first (so a child hoisted by
/// the rule is itself rewritten).
fn walk_schemas(value: Value, rule: &dyn Fn(&mut Map<String, Value>)) -> Value {
    let Value::Object(mut node) = value else { return value };
    rule(&mut node);
    for (key, child) in node.iter_mut() {
        let key = key.as_str();
        let taken = std::mem::take(child);
        *child = match taken {
            Value::Object(_) if SCHEMA_KEYS.contains(&key) => walk_schemas(taken, rule),
            Value::Array(items) if SCHEMA_LIST_KEYS.contains(&key) => {
                Value::Array(items.into_iter().map(|s| walk_schemas(s, rule)).collect())
            }
            Value::Object(map) if SCHEMA_MAP_KEYS.contains(&key) => {
                Value::Object(map.into_iter().map(|(k, s)| (k, walk_schemas(s, rule))).collect())
            }
            other => other,
        };
    }
    Value::Object(node)
}

/// `{"$ref", ...siblings}` → `{...siblings, "allOf": [{"$ref"}]}`.
fn isolate_ref(node: &mut Map<String, Value>) {
    if node.len() > 1 {
        if let Some(pointer) = node.remove("$ref") {
            let mut wrapped = Map::new();
            wrapped.insert("$ref".into(), pointer);
            match node.get_mut("allOf") {
                Some(Value::Array(all)) => all.push(Value::Object(wrapped)),
                _ => {
                    node.insert("allOf".into(), Value::Array(vec![Value::Object(wrapped)]));
                }
            }
        }
    }
}

/// Move `from` under `to`, entries already under `to` winning.
fn rename_merging(node: &mut Map<String, Value>, from: &str, to: &str) {
    let Some(Value::Object(moved)) = node.remove(from) else { return };
    let mut merged = moved;
    if let Some(Value::Object(existing)) = node.remove(to) {
        merged.extend(existing);
    }
    node.insert(to.into(), Value::Object(merged));
}

fn draft_07(node: &mut Map<String, Value>) {
    isolate_ref(node);
    rename_merging(node, "$defs", "definitions");
    rename_merging(node, "dependentRequired", "dependencies");
}

// ————————————————————————————————————————————————————————————————————————————
// OPENAPI 3.0
// ————————————————————————————————————————————————————————————————————————————

static OPENAPI_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "$ref", "title", "description", "type", "format", "default", "nullable", "enum",
        "multipleOf", "maximum", "exclusiveMaximum", "minimum", "exclusiveMinimum",
        "maxLength", "minLength", "pattern", "maxItems", "minItems", "uniqueItems",
        "maxProperties", "minProperties", "required", "properties", "additionalProperties",
        "items", "allOf", "oneOf", "anyOf", "not", "discriminator", "readOnly", "writeOnly",
        "xml", "externalDocs", "example", "deprecated",
    ]
    .into_iter()
    .collect()
});

fn openapi_3_0(node: &mut Map<String, Value>) {
    // hoisting can surface another nullable composite
    while nullable_alternatives(node, "anyOf") | nullable_alternatives(node, "oneOf") {}
    for key in ["dependentRequired", "unevaluatedProperties", "$defs"] {
        node.remove(key);
    }
    nullable_type(node);
    if let Some(Value::Array(mut examples)) = node.remove("examples") {
        if !examples.is_empty() && !node.contains_key("example") {
            node.insert("example".into(), examples.swap_remove(0));
        }
    }
    if let Some(value) = node.remove("const") {
        node.entry("enum").or_insert_with(|| Value::Array(vec![value]));
    }
    // 3.0 exclusive bounds are flags on minimum/maximum
    for (exclusive, bound) in [("exclusiveMinimum", "minimum"), ("exclusiveMaximum", "maximum")] {
        if node.get(exclusive).is_some_and(Value::is_number) {
            if let Some(limit) = node.remove(exclusive) {
                node.insert(bound.into(), limit);
                node.insert(exclusive.into(), Value::Bool(true));
            }
        }
    }
    node.retain(|key, _| OPENAPI_KEYWORDS.contains(key.as_str()) || key.starts_with("x-"));
    isolate_ref(node);
}

/// `"type": [T, "null"]` → `"type": T, "nullable": true`.
fn nullable_type(node: &mut Map<String, Value>) {
    let types: Vec<Value> = match node.get("type") {
        Some(Value::String(t)) if t == "null" => Vec::new(),
        Some(Value::Array(ts)) if ts.iter().any(|t| t == "null") => {
            ts.iter().filter(|t| *t != "null").cloned().collect()
        }
        _ => return,
    };
    node.entry("nullable").or_insert(Value::Bool(true));
    match types.len() {
        0 => {
            node.remove("type");
        }
        1 => {
            node.insert("type".into(), types.into_iter().next().unwrap_or_default());
        }
        _ => {
            node.insert("type".into(), Value::Array(types));
        }
    }
}

/// Drop `{"type": "null"}` alternatives, flagging the node nullable; a
/// lone remaining alternative is hoisted into the node. Returns whether
/// anything changed.
fn nullable_alternatives(node: &mut Map<String, Value>, key: &str) -> bool {
    let Some(Value::Array(alternatives)) = node.get(key) else { return false };
    let is_null = |alt: &Value| alt.as_object().is_some_and(|o| o.len() == 1 && o.get("type") == Some(&Value::from("null")));
    if !alternatives.iter().any(is_null) {
        return false;
    }
    let mut rest: Vec<Value> = alternatives.iter().filter(|a| !is_null(a)).cloned().collect();
    node.entry("nullable").or_insert(Value::Bool(true));
    match rest.len() {
        0 => {
            node.remove(key);
        }
        1 => {
            node.remove(key);
            if let Some(Value::Object(single)) = rest.pop() {
                for (k, v) in single {
                    node.entry(k).or_insert(v);
                }
            }
        }
        _ => {
            node.insert(key.into(), Value::Array(rest));
        }
    }
    true
}
