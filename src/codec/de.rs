use std::collections::HashSet;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Map, Value};

use super::{DecodeFn, Memo, Retained, mismatch, not_one_of, same_value, unbuilt};
use crate::constraints::{Checks, compile_pattern};
use crate::conversion::{Conversion, Transform};
use crate::data::{Data, Record};
use crate::error::{ConfigError, Error, Result};
use crate::ir::{EnumType, FieldDefault, ObjectType, PrimitiveKind, Tag, TypeDescriptor};
use crate::merged::{check_aliases, visit_merged};
use crate::registry::Settings;
use crate::validation::{ErrorKey, ValidationError};
use crate::visitor::{Visitor, Walk, is_string_like, shape_of, visit};

/// Decode from the wire object of an enclosing record, reading only the
/// aliases this node claims.
pub(crate) type PartialDecodeFn = Arc<dyn Fn(&Map<String, Value>) -> Result<Data, ValidationError> + Send + Sync>;

fn decoder(f: impl Fn(&Value) -> Result<Data, ValidationError> + Send + Sync + 'static) -> DecodeFn {
    Arc::new(f)
}

fn partial_decoder(
    f: impl Fn(&Map<String, Value>) -> Result<Data, ValidationError> + Send + Sync + 'static,
) -> PartialDecodeFn {
    Arc::new(f)
}

#[derive(Clone)]
pub(crate) struct DeNode {
    pub full: DecodeFn,
    /// Present for objects (and what resolves to one), used by merged fields.
    pub partial: Option<PartialDecodeFn>,
}

impl DeNode {
    fn value(f: impl Fn(&Value) -> Result<Data, ValidationError> + Send + Sync + 'static) -> Self {
        Self { full: decoder(f), partial: None }
    }

    /// Forward to a node that is still being built.
    fn late(cell: Weak<OnceCell<DeNode>>) -> Self {
        let full_cell = cell.clone();
        DeNode {
            full: decoder(move |v: &Value| match full_cell.upgrade().as_deref().and_then(|c| c.get()) {
                Some(node) => (node.full)(v),
                None => Err(unbuilt()),
            }),
            partial: Some(partial_decoder(move |m: &Map<String, Value>| {
                let cell = cell.upgrade();
                match cell.as_deref().and_then(|c| c.get()).and_then(|node| node.partial.as_ref()) {
                    Some(partial) => partial(m),
                    None => Err(unbuilt()),
                }
            })),
        }
    }

    /// Run `transform` over whatever this node decodes.
    fn then(self, transform: Transform) -> Self {
        let full = self.full;
        let t = transform.clone();
        DeNode {
            full: decoder(move |v: &Value| full(v).and_then(|d| t(d).map_err(ValidationError::message))),
            partial: self.partial.map(|partial| {
                partial_decoder(move |m: &Map<String, Value>| {
                    partial(m).and_then(|d| transform(d).map_err(ValidationError::message))
                })
            }),
        }
    }

    /// Additionally check `checks` on the wire value, coerced to `coerce`
    /// first when given.
    fn checked(self, checks: Checks, coerce: Option<PrimitiveKind>) -> Self {
        let checks = Arc::new(checks);
        let full = self.full;
        let partial_checks = checks.clone();
        DeNode {
            full: decoder(move |v: &Value| {
                let coerced = coerce.and_then(|kind| coerce_wire(kind, v));
                let violations = checks.violations(coerced.as_ref().unwrap_or(v));
                match full(v) {
                    Ok(d) if violations.is_empty() => Ok(d),
                    Ok(_) => Err(ValidationError::leaf(violations)),
                    Err(e) => Err(ValidationError::leaf(violations).merge(e)),
                }
            }),
            // merged: the constraints see the enclosing object
            partial: self.partial.map(|partial| {
                partial_decoder(move |m: &Map<String, Value>| {
                    let violations = partial_checks.violations(&Value::Object(m.clone()));
                    match partial(m) {
                        Ok(d) if violations.is_empty() => Ok(d),
                        Ok(_) => Err(ValidationError::leaf(violations)),
                        Err(e) => Err(ValidationError::leaf(violations).merge(e)),
                    }
                })
            }),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// OBJECTS
// ————————————————————————————————————————————————————————————————————————————

enum FieldPlan {
    Direct {
        alias: String,
        logical: String,
        decode: DecodeFn,
        required: bool,
        default: Option<FieldDefault>,
        /// Invalid values decode to `default`.
        fallback: bool,
    },
    Merged {
        logical: String,
        decode: PartialDecodeFn,
    },
    Aggregate {
        logical: String,
        decode: DecodeFn,
        /// `None` takes every leftover key.
        pattern: Option<Regex>,
    },
}

struct ObjectPlan {
    name: String,
    fields: Vec<FieldPlan>,
    /// Every alias the object reads, merged fields included.
    claimed: HashSet<String>,
    /// Dependent alias → aliases that require it, for own fields only.
    dependencies: Vec<(String, Vec<String>)>,
    required: HashSet<String>,
    /// A plain (pattern-less) aggregate takes whatever is left.
    absorbs_rest: bool,
    additional_properties: bool,
}

impl ObjectPlan {
    /// Share out the keys no field claims: pattern aggregates first, in
    /// declaration order, then the plain aggregate. Returns one bucket per
    /// field and the keys nobody took.
    fn leftovers<'m>(
        &self,
        map: &'m Map<String, Value>,
        partial: bool,
    ) -> (Vec<Map<String, Value>>, Vec<&'m String>) {
        let mut buckets = vec![Map::new(); self.fields.len()];
        if partial {
            return (buckets, Vec::new());
        }
        let mut rest: Vec<(&String, &Value)> = map.iter().filter(|(k, _)| !self.claimed.contains(k.as_str())).collect();
        for (i, field) in self.fields.iter().enumerate() {
            if let FieldPlan::Aggregate { pattern: Some(rx), .. } = field {
                rest.retain(|(k, v)| {
                    if rx.is_match(k) {
                        buckets[i].insert((*k).clone(), (*v).clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }
        let plain = self.fields.iter().position(|f| matches!(f, FieldPlan::Aggregate { pattern: None, .. }));
        if let Some(i) = plain {
            buckets[i].extend(rest.drain(..).map(|(k, v)| (k.clone(), v.clone())));
        }
        (buckets, rest.into_iter().map(|(k, _)| k).collect())
    }

    fn decode(&self, map: &Map<String, Value>, partial: bool) -> Result<Data, ValidationError> {
        let mut record = Record::new(&self.name);
        let mut errors = ValidationError::default();
        let (mut buckets, unexpected) = self.leftovers(map, partial);
        for (i, field) in self.fields.iter().enumerate() {
            match field {
                FieldPlan::Direct { alias, logical, decode, required, default, fallback } => match map.get(alias) {
                    Some(v) => match (decode(v), default) {
                        (Ok(d), _) => {
                            record.fields.insert(logical.clone(), d);
                        }
                        (Err(_), Some(default)) if *fallback => {
                            record.fields.insert(logical.clone(), default.produce());
                        }
                        (Err(e), _) => errors.insert_child(ErrorKey::from(alias.as_str()), e),
                    },
                    None if *required => {
                        errors.insert_child(ErrorKey::from(alias.as_str()), ValidationError::message("missing field"))
                    }
                    None => {
                        if let Some(default) = default {
                            record.fields.insert(logical.clone(), default.produce());
                        }
                    }
                },
                FieldPlan::Merged { logical, decode } => match decode(map) {
                    Ok(d) => {
                        record.fields.insert(logical.clone(), d);
                    }
                    Err(e) => errors = errors.merge(e),
                },
                FieldPlan::Aggregate { logical, decode, .. } => {
                    match decode(&Value::Object(std::mem::take(&mut buckets[i]))) {
                        Ok(d) => {
                            record.fields.insert(logical.clone(), d);
                        }
                        Err(e) => errors = errors.merge(e),
                    }
                }
            }
        }
        for (dependent, by) in &self.dependencies {
            if map.contains_key(dependent) || self.required.contains(dependent) {
                continue;
            }
            let present: Vec<&str> = by.iter().filter(|a| map.contains_key(*a)).map(String::as_str).collect();
            if !present.is_empty() {
                let msg = format!("missing field (required by [{}])", present.join(", "));
                errors.insert_child(ErrorKey::from(dependent.as_str()), ValidationError::message(msg));
            }
        }
        if !self.absorbs_rest && !self.additional_properties {
            for key in unexpected {
                errors.insert_child(ErrorKey::from(key.as_str()), ValidationError::message("unexpected property"));
            }
        }
        if errors.is_empty() { Ok(Data::Record(record)) } else { Err(errors) }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDER
// ————————————————————————————————————————————————————————————————————————————

pub(crate) struct DecoderBuilder {
    memo: Memo<DeNode>,
    additional_properties: bool,
    coercion: bool,
    default_fallback: bool,
}

impl DecoderBuilder {
    pub fn new(settings: &Settings) -> Self {
        Self {
            memo: Memo::default(),
            additional_properties: settings.additional_properties,
            coercion: settings.coercion,
            default_fallback: settings.default_fallback,
        }
    }

    pub fn into_cells(self) -> Retained {
        self.memo.into_cells()
    }
}

impl Visitor for DecoderBuilder {
    type Output = DeNode;
    const NAME: &'static str = "deserializer builder";

    fn enter(&mut self, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<Option<DeNode>> {
        self.memo.enter(walk, ty, DeNode::late)
    }

    fn leave(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor, out: DeNode) -> Result<DeNode> {
        Ok(self.memo.leave(out))
    }

    fn primitive(&mut self, _: &mut Walk<'_>, kind: PrimitiveKind) -> Result<DeNode> {
        if !self.coercion {
            return Ok(DeNode::value(move |v: &Value| decode_primitive(kind, v)));
        }
        Ok(DeNode::value(move |v: &Value| match coerce_wire(kind, v) {
            Some(coerced) => decode_primitive(kind, &coerced),
            None => decode_primitive(kind, v),
        }))
    }

    fn collection(&mut self, walk: &mut Walk<'_>, element: &TypeDescriptor) -> Result<DeNode> {
        let item = visit(self, walk, element)?.full;
        Ok(DeNode::value(move |v: &Value| {
            let Value::Array(xs) = v else { return Err(mismatch("array", v)) };
            let mut out = Vec::with_capacity(xs.len());
            let mut errors = ValidationError::default();
            for (i, x) in xs.iter().enumerate() {
                match item(x) {
                    Ok(d) => out.push(d),
                    Err(e) => errors.insert_child(ErrorKey::Index(i), e),
                }
            }
            if errors.is_empty() { Ok(Data::List(out)) } else { Err(errors) }
        }))
    }

    fn mapping(&mut self, walk: &mut Walk<'_>, key: &TypeDescriptor, value: &TypeDescriptor) -> Result<DeNode> {
        if !is_string_like(walk, key)? {
            return Err(Error::invalid(format!("mapping key {key} is not a string type")));
        }
        let key_de = visit(self, walk, key)?.full;
        let value_de = visit(self, walk, value)?.full;
        Ok(DeNode::value(move |v: &Value| {
            let Value::Object(map) = v else { return Err(mismatch("object", v)) };
            let mut out = Vec::with_capacity(map.len());
            let mut errors = ValidationError::default();
            for (k, x) in map {
                let here = ErrorKey::from(k.as_str());
                match (key_de(&Value::String(k.clone())), value_de(x)) {
                    (Ok(key), Ok(value)) => out.push((key, value)),
                    (key, value) => {
                        errors.insert_child(here.clone(), key.err().unwrap_or_default());
                        errors.insert_child(here, value.err().unwrap_or_default());
                    }
                }
            }
            if errors.is_empty() { Ok(Data::Map(out)) } else { Err(errors) }
        }))
    }

    fn tuple(&mut self, walk: &mut Walk<'_>, elements: &[TypeDescriptor]) -> Result<DeNode> {
        let mut items: Vec<DecodeFn> = Vec::with_capacity(elements.len());
        for element in elements {
            items.push(visit(self, walk, element)?.full);
        }
        Ok(DeNode::value(move |v: &Value| {
            let Value::Array(xs) = v else { return Err(mismatch("array", v)) };
            if xs.len() != items.len() {
                return Err(ValidationError::message(format!("expected {} items, found {}", items.len(), xs.len())));
            }
            let mut out = Vec::with_capacity(xs.len());
            let mut errors = ValidationError::default();
            for (i, (item, x)) in items.iter().zip(xs).enumerate() {
                match item(x) {
                    Ok(d) => out.push(d),
                    Err(e) => errors.insert_child(ErrorKey::Index(i), e),
                }
            }
            if errors.is_empty() { Ok(Data::List(out)) } else { Err(errors) }
        }))
    }

    fn object(&mut self, walk: &mut Walk<'_>, object: &ObjectType) -> Result<DeNode> {
        let claimed = check_aliases(walk, object)?.into_iter().collect();
        let mut fields = Vec::with_capacity(object.fields.len());
        let mut dependencies: Vec<(String, Vec<String>)> = Vec::new();
        let mut required = HashSet::new();
        for field in &object.fields {
            let logical = field.logical_name.clone();
            if field.merged {
                let node = visit_merged(self, walk, object, field)?;
                let decode = node.partial.ok_or_else(|| ConfigError::MergedNotObject {
                    owner: object.name.clone(),
                    field: logical.clone(),
                })?;
                fields.push(FieldPlan::Merged { logical, decode });
            } else if field.aggregate {
                if shape_of(walk, &field.ty)? != "mapping" {
                    return Err(ConfigError::AggregateNotMapping { owner: object.name.clone(), field: logical }.into());
                }
                let pattern = field.pattern.as_deref().map(compile_pattern).transpose()?;
                let decode = visit(self, walk, &field.ty)?.full;
                fields.push(FieldPlan::Aggregate { logical, decode, pattern });
            } else {
                for dependent in field.dependent_required() {
                    match dependencies.iter_mut().find(|(d, _)| *d == dependent) {
                        Some((_, by)) => by.push(field.name.clone()),
                        None => dependencies.push((dependent, vec![field.name.clone()])),
                    }
                }
                if field.required {
                    required.insert(field.name.clone());
                }
                let decode = visit(self, walk, &field.ty)?.full;
                fields.push(FieldPlan::Direct {
                    alias: field.name.clone(),
                    logical,
                    decode,
                    required: field.required,
                    default: field.default.clone(),
                    fallback: field.default_fallback || self.default_fallback,
                });
            }
        }
        let plan = Arc::new(ObjectPlan {
            name: object.name.clone(),
            absorbs_rest: object.fields.iter().any(|f| f.aggregate && f.pattern.is_none()),
            additional_properties: self.additional_properties,
            fields,
            claimed,
            dependencies,
            required,
        });
        let partial = plan.clone();
        Ok(DeNode {
            full: decoder(move |v: &Value| match v {
                Value::Object(map) => plan.decode(map, false),
                other => Err(mismatch("object", other)),
            }),
            partial: Some(partial_decoder(move |m: &Map<String, Value>| partial.decode(m, true))),
        })
    }

    fn union_result(&mut self, _: &mut Walk<'_>, results: Vec<DeNode>) -> Result<DeNode> {
        let mut partials: Vec<PartialDecodeFn> = results.iter().filter_map(|n| n.partial.clone()).collect();
        let variants: Vec<DecodeFn> = results.into_iter().map(|n| n.full).collect();
        Ok(DeNode {
            full: decoder(move |v: &Value| {
                let mut errors = ValidationError::default();
                for variant in &variants {
                    match variant(v) {
                        Ok(d) => return Ok(d),
                        Err(e) => errors = errors.merge(e),
                    }
                }
                Err(errors)
            }),
            partial: if partials.len() == 1 { partials.pop() } else { None },
        })
    }

    fn literal(&mut self, _: &mut Walk<'_>, values: &[Data]) -> Result<DeNode> {
        let wire: Vec<Value> = values
            .iter()
            .map(|d| d.to_plain_json().ok_or_else(|| Error::invalid(format!("literal {d:?} has no JSON form"))))
            .collect::<Result<_>>()?;
        let values = values.to_vec();
        Ok(DeNode::value(move |v: &Value| match wire.iter().position(|w| same_value(w, v)) {
            Some(i) => Ok(values[i].clone()),
            None => Err(not_one_of(&wire)),
        }))
    }

    fn enumeration(&mut self, _: &mut Walk<'_>, ty: &EnumType) -> Result<DeNode> {
        let members: Vec<(String, Value)> = ty
            .members
            .iter()
            .map(|m| {
                let wire = m.value.to_plain_json().ok_or_else(|| {
                    Error::invalid(format!("enum member {}.{} has no JSON form", ty.name, m.name))
                })?;
                Ok((m.name.clone(), wire))
            })
            .collect::<Result<_>>()?;
        let wire: Vec<Value> = members.iter().map(|(_, w)| w.clone()).collect();
        Ok(DeNode::value(move |v: &Value| match members.iter().find(|(_, w)| same_value(w, v)) {
            Some((name, _)) => Ok(Data::Enum(name.clone())),
            None => Err(not_one_of(&wire)),
        }))
    }

    fn annotated(&mut self, walk: &mut Walk<'_>, base: &TypeDescriptor, tags: &[Tag]) -> Result<DeNode> {
        let node = visit(self, walk, base)?;
        let checks = Checks::compile(tags.iter().filter_map(|t| match t {
            Tag::Constraint(c) => Some(c),
            _ => None,
        }))?;
        if checks.is_empty() {
            return Ok(node);
        }
        let coerce = if self.coercion { primitive_kind(walk, base) } else { None };
        Ok(node.checked(checks, coerce))
    }

    fn conversion(&mut self, walk: &mut Walk<'_>, _: &TypeDescriptor, conv: &Arc<Conversion>) -> Result<DeNode> {
        let node = walk.redirect(conv, |walk| visit(self, walk, &conv.target))?;
        Ok(node.then(conv.transform()))
    }
}

/// Primitive kind `ty` decodes as, through aliases and annotations but
/// not through conversions.
fn primitive_kind(walk: &Walk<'_>, ty: &TypeDescriptor) -> Option<PrimitiveKind> {
    let mut seen: Vec<&str> = Vec::new();
    let mut ty = ty;
    loop {
        if walk.resolve(ty).is_some() {
            return None;
        }
        match ty {
            TypeDescriptor::Primitive(kind) => return Some(*kind),
            TypeDescriptor::Annotated { base, .. } => ty = &**base,
            TypeDescriptor::Alias(name) if !seen.contains(&name.as_str()) => {
                seen.push(name);
                ty = &walk.registry.alias(name).ok()?.target;
            }
            _ => return None,
        }
    }
}

/// The wire value `v` rewritten as `kind`, when it is one of the string or
/// scalar forms coercion accepts. `None` leaves `v` as it is.
fn coerce_wire(kind: PrimitiveKind, v: &Value) -> Option<Value> {
    match (kind, v) {
        (PrimitiveKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (PrimitiveKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (PrimitiveKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (PrimitiveKind::Integer, Value::Number(n)) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT_INT)
            .map(|f| Value::from(f as i64)),
        (PrimitiveKind::Float, Value::String(s)) => {
            s.trim().parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
        }
        (PrimitiveKind::Boolean, Value::String(s)) => str_to_bool(s).map(Value::Bool),
        (PrimitiveKind::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        (PrimitiveKind::Null, Value::String(s)) if s.is_empty() => Some(Value::Null),
        _ => None,
    }
}

// 2^53
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn str_to_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "0" | "f" | "n" | "no" | "false" | "off" | "ko" => Some(false),
        "1" | "t" | "y" | "yes" | "true" | "on" | "ok" => Some(true),
        _ => None,
    }
}

fn decode_primitive(kind: PrimitiveKind, v: &Value) -> Result<Data, ValidationError> {
    match (kind, v) {
        (PrimitiveKind::String, Value::String(s)) => Ok(Data::Str(s.clone())),
        (PrimitiveKind::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Data::Int(i)),
            None if n.is_u64() => Err(ValidationError::message(format!("integer {n} out of range"))),
            None => Err(mismatch("integer", v)),
        },
        (PrimitiveKind::Float, Value::Number(n)) => match n.as_f64() {
            Some(f) => Ok(Data::Float(f)),
            None => Err(mismatch("number", v)),
        },
        (PrimitiveKind::Boolean, Value::Bool(b)) => Ok(Data::Bool(*b)),
        (PrimitiveKind::Null, Value::Null) => Ok(Data::Null),
        _ => Err(mismatch(kind.json_type(), v)),
    }
}
