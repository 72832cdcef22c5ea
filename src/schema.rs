//! JSON schema emission.
//!
//! Generation is two passes over the graph: [`RefExtractor`] counts named
//! types, then [`SchemaBuilder`] emits fragments, turning every referenced
//! name into a pointer and its definition into one central fragment. The
//! finished 2019-09 document is rewritten once for the requested dialect.
use serde_json::{Map, Value, json};

use crate::constraints::{Checks, Constraint, compile_pattern};
use crate::conversion::{Conversions, Direction};
use crate::data::Data;
use crate::dialect::Dialect;
use crate::error::{ConfigError, Error, Result};
use crate::ir::{EnumType, FieldDefault, ObjectField, ObjectType, PrimitiveKind, Tag, TypeDescriptor};
use crate::merged::{check_aliases, visit_merged};
use crate::refs::{RefExtractor, RefPolicy, RefTable};
use crate::registry::{CacheKey, Registry};
use crate::visitor::{Visitor, Walk, is_string_like, shape_of, unsupported, visit};

/// Per-call generation options. Unset fields fall back to the registry settings.
#[derive(Debug, Clone)]
pub struct SchemaOptions {
    pub dialect: Option<Dialect>,
    pub ref_policy: Option<RefPolicy>,
    /// Emit the dialect's `$schema` URI at the document root.
    pub with_schema: bool,
    /// Conversions that override the registered ones for this call.
    pub conversions: Conversions,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self { dialect: None, ref_policy: None, with_schema: true, conversions: Conversions::new() }
    }
}

impl SchemaOptions {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn ref_policy(mut self, policy: RefPolicy) -> Self {
        self.ref_policy = Some(policy);
        self
    }

    pub fn without_schema(mut self) -> Self {
        self.with_schema = false;
        self
    }

    pub fn conversions(mut self, conversions: Conversions) -> Self {
        self.conversions = conversions;
        self
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ENTRY POINTS
// ————————————————————————————————————————————————————————————————————————————

impl Registry {
    pub fn deserialization_schema(&self, ty: &TypeDescriptor, options: &SchemaOptions) -> Result<Value> {
        self.schema(ty, Direction::Deserialization, options)
    }

    pub fn serialization_schema(&self, ty: &TypeDescriptor, options: &SchemaOptions) -> Result<Value> {
        self.schema(ty, Direction::Serialization, options)
    }

    pub fn schema(&self, ty: &TypeDescriptor, direction: Direction, options: &SchemaOptions) -> Result<Value> {
        let (dialect, policy) = self.resolve_options(options);
        let mut key = CacheKey::new(ty, &options.conversions, direction);
        key.schema = Some((dialect, policy, options.with_schema));
        self.cache().schemas.get_or_try_insert(key, || {
            tracing::debug!(root = %ty, %direction, %dialect, %policy, "generating schema");
            let refs = RefExtractor::extract(self, std::slice::from_ref(ty), direction, &options.conversions)?;
            let mut builder = SchemaBuilder::new(&refs, policy, dialect, self.settings().additional_properties);
            let mut walk = Walk::new(self, direction, options.conversions.clone());
            let root = visit(&mut builder, &mut walk, ty)?;
            Ok(builder.finish(root, dialect, options.with_schema))
        })
    }

    /// Central fragments of every reference reached from the given roots,
    /// e.g. for an OpenAPI `components` section.
    pub fn definitions_schema(
        &self,
        deserialization: &[TypeDescriptor],
        serialization: &[TypeDescriptor],
        options: &SchemaOptions,
    ) -> Result<Map<String, Value>> {
        let (dialect, policy) = self.resolve_options(options);
        let mut out = Map::new();
        for (direction, roots) in [(Direction::Deserialization, deserialization), (Direction::Serialization, serialization)] {
            if roots.is_empty() {
                continue;
            }
            let refs = RefExtractor::extract(self, roots, direction, &options.conversions)?;
            let mut builder = SchemaBuilder::new(&refs, policy, dialect, self.settings().additional_properties);
            for root in roots {
                let mut walk = Walk::new(self, direction, options.conversions.clone());
                visit(&mut builder, &mut walk, root)?;
            }
            for (name, fragment) in builder.definitions {
                let fragment = dialect.rewrite(fragment);
                match out.get(&name) {
                    Some(existing) if *existing != fragment => {
                        return Err(ConfigError::Invalid(format!(
                            "reference '{name}' has different deserialization and serialization schemas"
                        ))
                        .into());
                    }
                    _ => {
                        out.insert(name, fragment);
                    }
                }
            }
        }
        Ok(out)
    }

    fn resolve_options(&self, options: &SchemaOptions) -> (Dialect, RefPolicy) {
        let dialect = options.dialect.unwrap_or(self.settings().dialect);
        let policy = options.ref_policy.or(self.settings().ref_policy).unwrap_or(dialect.default_ref_policy());
        (dialect, policy)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDER
// ————————————————————————————————————————————————————————————————————————————

pub(crate) struct SchemaBuilder<'t> {
    refs: &'t RefTable,
    policy: RefPolicy,
    prefix: &'static str,
    additional_properties: bool,
    /// Central fragments; a `Null` slot marks one under construction.
    definitions: Map<String, Value>,
    /// Emit the next node inline although it is referenced (its definition).
    bypass: bool,
    /// Resolving a merged field: inline everything down to the object.
    merging: bool,
}

impl<'t> SchemaBuilder<'t> {
    pub fn new(refs: &'t RefTable, policy: RefPolicy, dialect: Dialect, additional_properties: bool) -> Self {
        Self {
            refs,
            policy,
            prefix: dialect.ref_prefix(),
            additional_properties,
            definitions: Map::new(),
            bypass: false,
            merging: false,
        }
    }

    fn finish(self, root: Value, dialect: Dialect, with_schema: bool) -> Value {
        let mut document = match root {
            Value::Object(map) => map,
            other => return other,
        };
        if !self.definitions.is_empty() {
            document.insert("$defs".into(), Value::Object(self.definitions));
        }
        let document = dialect.rewrite(Value::Object(document));
        match (dialect.schema_uri(), document) {
            (Some(uri), Value::Object(body)) if with_schema => {
                let mut out = Map::new();
                out.insert("$schema".into(), Value::from(uri));
                out.extend(body);
                Value::Object(out)
            }
            (_, document) => document,
        }
    }

    fn not_merging(&self, kind: &'static str) -> Result<()> {
        if self.merging { Err(unsupported::<Self>(kind)) } else { Ok(()) }
    }
}

impl Visitor for SchemaBuilder<'_> {
    type Output = Value;
    const NAME: &'static str = "schema builder";

    fn enter(&mut self, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<Option<Value>> {
        if std::mem::take(&mut self.bypass) || self.merging {
            return Ok(None);
        }
        let Some(name) = walk.reference_of(ty)? else { return Ok(None) };
        if !self.refs.is_referenced(&name, self.policy) {
            return Ok(None);
        }
        if !self.definitions.contains_key(&name) {
            self.definitions.insert(name.clone(), Value::Null);
            self.bypass = true;
            let fragment = visit(self, walk, ty)?;
            self.definitions.insert(name.clone(), fragment);
        }
        Ok(Some(json!({ "$ref": format!("{}{}", self.prefix, name) })))
    }

    fn primitive(&mut self, _: &mut Walk<'_>, kind: PrimitiveKind) -> Result<Value> {
        self.not_merging("primitive")?;
        Ok(json!({ "type": kind.json_type() }))
    }

    fn collection(&mut self, walk: &mut Walk<'_>, element: &TypeDescriptor) -> Result<Value> {
        self.not_merging("collection")?;
        Ok(json!({ "type": "array", "items": visit(self, walk, element)? }))
    }

    fn mapping(&mut self, walk: &mut Walk<'_>, key: &TypeDescriptor, value: &TypeDescriptor) -> Result<Value> {
        self.not_merging("mapping")?;
        if !is_string_like(walk, key)? {
            return Err(Error::invalid(format!("mapping key {key} is not a string type")));
        }
        let key_schema = visit(self, walk, key)?;
        let value_schema = visit(self, walk, value)?;
        let mut schema = Map::new();
        schema.insert("type".into(), Value::from("object"));
        match key_schema.get("pattern").and_then(Value::as_str) {
            Some(pattern) => {
                let mut by_pattern = Map::new();
                by_pattern.insert(pattern.to_string(), value_schema);
                schema.insert("patternProperties".into(), Value::Object(by_pattern));
            }
            None => {
                schema.insert("additionalProperties".into(), value_schema);
            }
        }
        Ok(Value::Object(schema))
    }

    fn tuple(&mut self, walk: &mut Walk<'_>, elements: &[TypeDescriptor]) -> Result<Value> {
        self.not_merging("tuple")?;
        let items = elements.iter().map(|e| visit(self, walk, e)).collect::<Result<Vec<_>>>()?;
        let n = items.len();
        Ok(json!({ "type": "array", "items": items, "minItems": n, "maxItems": n }))
    }

    fn object(&mut self, walk: &mut Walk<'_>, object: &ObjectType) -> Result<Value> {
        self.merging = false;
        check_aliases(walk, object)?;
        let mut properties = Map::new();
        let mut required = Vec::new();
        let mut dependent = Map::new();
        let mut by_pattern = Map::new();
        let mut additional = Value::Bool(self.additional_properties);
        for field in &object.fields {
            if field.merged {
                self.merging = true;
                let merged = visit_merged(self, walk, object, field);
                self.merging = false;
                splice(merged?, &mut properties, &mut required, &mut dependent);
            } else if field.aggregate {
                if shape_of(walk, &field.ty)? != "mapping" {
                    return Err(aggregate_not_mapping(object, field));
                }
                let mut schema = visit(self, walk, &field.ty)?;
                let values = schema.as_object_mut().and_then(|m| m.remove("additionalProperties"));
                match &field.pattern {
                    Some(pattern) => {
                        compile_pattern(pattern)?;
                        let values = values.or_else(|| single_pattern_value(&mut schema));
                        by_pattern.insert(pattern.clone(), values.unwrap_or(Value::Bool(true)));
                    }
                    None => additional = values.unwrap_or(Value::Bool(true)),
                }
            } else {
                let mut schema = visit(self, walk, &field.ty)?;
                if let Value::Object(map) = &mut schema {
                    field_keywords(map, field);
                }
                properties.insert(field.name.clone(), schema);
                if field.required {
                    required.push(Value::from(field.name.clone()));
                }
                let deps = field.dependent_required();
                if !deps.is_empty() {
                    dependent.insert(field.name.clone(), json!(deps));
                }
            }
        }
        let mut schema = Map::new();
        schema.insert("type".into(), Value::from("object"));
        schema.insert("properties".into(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".into(), Value::Array(required));
        }
        if !by_pattern.is_empty() {
            schema.insert("patternProperties".into(), Value::Object(by_pattern));
        }
        schema.insert("additionalProperties".into(), additional);
        if !dependent.is_empty() {
            schema.insert("dependentRequired".into(), Value::Object(dependent));
        }
        Ok(Value::Object(schema))
    }

    fn union(&mut self, walk: &mut Walk<'_>, variants: &[TypeDescriptor]) -> Result<Value> {
        if !self.merging {
            let results = variants.iter().map(|v| visit(self, walk, v)).collect::<Result<Vec<_>>>()?;
            return self.union_result(walk, results);
        }
        let mut survivors = Vec::new();
        for variant in variants {
            self.merging = true;
            match visit(self, walk, variant) {
                Ok(schema) => survivors.push(schema),
                Err(Error::Unsupported { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.merging = false;
        match <[_; 1]>::try_from(survivors) {
            Ok([schema]) => Ok(schema),
            Err(_) => Err(unsupported::<Self>("union")),
        }
    }

    fn union_result(&mut self, _: &mut Walk<'_>, results: Vec<Value>) -> Result<Value> {
        Ok(union_schema(results))
    }

    fn literal(&mut self, _: &mut Walk<'_>, values: &[Data]) -> Result<Value> {
        self.not_merging("literal")?;
        let values = values
            .iter()
            .map(|d| d.to_plain_json().ok_or_else(|| Error::invalid(format!("literal {d:?} is not a scalar"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(value_set(values))
    }

    fn enumeration(&mut self, _: &mut Walk<'_>, ty: &EnumType) -> Result<Value> {
        self.not_merging("enum")?;
        let values = ty
            .members
            .iter()
            .map(|m| {
                m.value.to_plain_json().ok_or_else(|| Error::invalid(format!("enum member {}.{} is not a scalar", ty.name, m.name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(value_set(values))
    }

    fn annotated(&mut self, walk: &mut Walk<'_>, base: &TypeDescriptor, tags: &[Tag]) -> Result<Value> {
        let mut schema = visit(self, walk, base)?;
        let Value::Object(map) = &mut schema else { return Ok(schema) };
        for tag in tags {
            match tag {
                Tag::Ref(_) => {}
                Tag::Title(title) => {
                    map.insert("title".into(), Value::from(title.clone()));
                }
                Tag::Description(text) => {
                    map.insert("description".into(), Value::from(text.clone()));
                }
                Tag::Examples(examples) => {
                    map.insert("examples".into(), Value::Array(examples.clone()));
                }
                Tag::Deprecated => {
                    map.insert("deprecated".into(), Value::Bool(true));
                }
                Tag::Constraint(c) => {
                    c.check_schema_type(map.get("type"))?;
                    if let Constraint::Pattern(_) = c {
                        Checks::compile([c])?;
                    }
                    map.insert(c.keyword().into(), c.keyword_value());
                }
                Tag::Extra { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(schema)
    }
}

/// Value schema of a mapping whose keys carry exactly one pattern.
fn single_pattern_value(mapping: &mut Value) -> Option<Value> {
    let Value::Object(by_pattern) = mapping.as_object_mut()?.remove("patternProperties")? else { return None };
    if by_pattern.len() != 1 {
        return None;
    }
    by_pattern.into_iter().next().map(|(_, v)| v)
}

fn aggregate_not_mapping(owner: &ObjectType, field: &ObjectField) -> Error {
    ConfigError::AggregateNotMapping { owner: owner.name.clone(), field: field.logical_name.clone() }.into()
}

/// Move a merged object's properties, requirements and dependencies into the parent.
fn splice(merged: Value, properties: &mut Map<String, Value>, required: &mut Vec<Value>, dependent: &mut Map<String, Value>) {
    let Value::Object(mut merged) = merged else { return };
    if let Some(Value::Object(props)) = merged.remove("properties") {
        properties.extend(props);
    }
    if let Some(Value::Array(req)) = merged.remove("required") {
        required.extend(req);
    }
    if let Some(Value::Object(deps)) = merged.remove("dependentRequired") {
        dependent.extend(deps);
    }
}

const FIELD_KEYWORDS: &[&str] = &["title", "description", "examples", "deprecated", "readOnly", "writeOnly"];

fn field_keywords(schema: &mut Map<String, Value>, field: &ObjectField) {
    for (key, value) in &field.metadata {
        if FIELD_KEYWORDS.contains(&key.as_str()) || key.starts_with("x-") {
            schema.insert(key.clone(), value.clone());
        }
    }
    if let Some(FieldDefault::Value(default)) = &field.default {
        if let Some(value) = default.to_plain_json() {
            schema.insert("default".into(), value);
        }
    }
}

fn json_type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `const` for one value, `enum` otherwise, plus the value type(s).
fn value_set(values: Vec<Value>) -> Value {
    let mut types: Vec<&str> = Vec::new();
    for v in &values {
        let t = json_type_of(v);
        if !types.contains(&t) {
            types.push(t);
        }
    }
    let mut schema = Map::new();
    match <[_; 1]>::try_from(values) {
        Ok([single]) => schema.insert("const".into(), single),
        Err(values) => schema.insert("enum".into(), Value::Array(values)),
    };
    match types.as_slice() {
        [] => {}
        [single] => {
            schema.insert("type".into(), Value::from(*single));
        }
        many => {
            schema.insert("type".into(), json!(many));
        }
    }
    Value::Object(schema)
}

fn type_only(schema: &Value) -> bool {
    schema.as_object().is_some_and(|m| m.len() == 1 && m.contains_key("type"))
}

fn types_of(schema: &Value) -> Vec<Value> {
    match schema.get("type") {
        Some(Value::Array(ts)) => ts.clone(),
        Some(t) => vec![t.clone()],
        None => Vec::new(),
    }
}

fn push_types(into: &mut Vec<Value>, types: Vec<Value>) {
    for t in types {
        if !into.contains(&t) {
            into.push(t);
        }
    }
}

fn type_value(mut types: Vec<Value>) -> Value {
    if types.len() == 1 { types.swap_remove(0) } else { Value::Array(types) }
}

/// One fragment for alternatives: a merged `type` list when they are all
/// bare types, `anyOf` otherwise. A null alternative folds into a lone
/// typed alternative or trails the `anyOf`.
fn union_schema(results: Vec<Value>) -> Value {
    let mut results = results;
    if results.len() == 1 {
        return results.swap_remove(0);
    }
    if results.iter().any(|r| r.as_object().is_some_and(Map::is_empty)) {
        return json!({});
    }
    if results.iter().all(type_only) {
        let mut types = Vec::new();
        for r in &results {
            push_types(&mut types, types_of(r));
        }
        return json!({ "type": type_value(types) });
    }
    let null = json!({ "type": "null" });
    let nullable = results.contains(&null);
    let mut rest: Vec<Value> = Vec::new();
    for r in results {
        if r != null && !rest.contains(&r) {
            rest.push(r);
        }
    }
    if nullable {
        if let [Value::Object(single)] = rest.as_mut_slice() {
            if single.contains_key("type") {
                let mut types = types_of(&Value::Object(single.clone()));
                push_types(&mut types, vec![Value::from("null")]);
                single.insert("type".into(), type_value(types));
                return rest.swap_remove(0);
            }
        }
        rest.push(null);
    }
    json!({ "anyOf": rest })
}
