use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use serde_json::{Map, Number, Value};

use super::{EncodeFn, Memo, Retained, not_one_of, same_value, unbuilt};
use crate::conversion::{Conversion, Transform};
use crate::constraints::compile_pattern;
use crate::data::{Data, Record, wire_kind};
use crate::error::{ConfigError, Error, Result};
use crate::ir::{EnumType, ObjectType, PrimitiveKind, Tag, TypeDescriptor};
use crate::merged::{check_aliases, visit_merged};
use crate::validation::{ErrorKey, ValidationError};
use crate::visitor::{Visitor, Walk, is_string_like, shape_of, visit};

/// Write the fields of a record into the wire object of an enclosing one.
pub(crate) type PartialEncodeFn =
    Arc<dyn Fn(&Data, &mut Map<String, Value>) -> Result<(), ValidationError> + Send + Sync>;

fn encoder(f: impl Fn(&Data) -> Result<Value, ValidationError> + Send + Sync + 'static) -> EncodeFn {
    Arc::new(f)
}

fn partial_encoder(
    f: impl Fn(&Data, &mut Map<String, Value>) -> Result<(), ValidationError> + Send + Sync + 'static,
) -> PartialEncodeFn {
    Arc::new(f)
}

fn expected(what: &str, found: &Data) -> ValidationError {
    ValidationError::message(format!("expected {what}, found {}", found.kind()))
}

#[derive(Clone)]
pub(crate) struct EnNode {
    pub full: EncodeFn,
    pub partial: Option<PartialEncodeFn>,
}

impl EnNode {
    fn value(f: impl Fn(&Data) -> Result<Value, ValidationError> + Send + Sync + 'static) -> Self {
        Self { full: encoder(f), partial: None }
    }

    fn late(cell: Weak<OnceCell<EnNode>>) -> Self {
        let full_cell = cell.clone();
        EnNode {
            full: encoder(move |d: &Data| match full_cell.upgrade().as_deref().and_then(|c| c.get()) {
                Some(node) => (node.full)(d),
                None => Err(unbuilt()),
            }),
            partial: Some(partial_encoder(move |d: &Data, out: &mut Map<String, Value>| {
                let cell = cell.upgrade();
                match cell.as_deref().and_then(|c| c.get()).and_then(|node| node.partial.as_ref()) {
                    Some(partial) => partial(d, out),
                    None => Err(unbuilt()),
                }
            })),
        }
    }

    /// Run `transform` before this node encodes.
    fn after(self, transform: Transform) -> Self {
        let full = self.full;
        let t = transform.clone();
        EnNode {
            full: encoder(move |d: &Data| {
                let converted = t(d.clone()).map_err(ValidationError::message)?;
                full(&converted)
            }),
            partial: self.partial.map(|partial| {
                partial_encoder(move |d: &Data, out: &mut Map<String, Value>| {
                    let converted = transform(d.clone()).map_err(ValidationError::message)?;
                    partial(&converted, out)
                })
            }),
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// OBJECTS
// ————————————————————————————————————————————————————————————————————————————

enum FieldPlan {
    Direct { alias: String, logical: String, encode: EncodeFn, required: bool },
    Merged { logical: String, encode: PartialEncodeFn, required: bool },
    Aggregate { logical: String, encode: EncodeFn },
}

struct ObjectPlan {
    name: String,
    fields: Vec<FieldPlan>,
}

impl ObjectPlan {
    fn record<'d>(&self, data: &'d Data) -> Result<&'d Record, ValidationError> {
        match data {
            Data::Record(r) if r.name == self.name => Ok(r),
            Data::Record(r) => Err(ValidationError::message(format!(
                "expected record {}, found record {}",
                self.name, r.name
            ))),
            other => Err(expected(&format!("record {}", self.name), other)),
        }
    }

    fn encode_into(&self, data: &Data, out: &mut Map<String, Value>) -> Result<(), ValidationError> {
        let record = self.record(data)?;
        let mut errors = ValidationError::default();
        for field in &self.fields {
            match field {
                FieldPlan::Direct { alias, logical, encode, required } => match record.get(logical) {
                    Some(d) => match encode(d) {
                        Ok(v) => {
                            out.insert(alias.clone(), v);
                        }
                        Err(e) => errors.insert_child(ErrorKey::from(alias.as_str()), e),
                    },
                    None if *required => {
                        errors.insert_child(ErrorKey::from(alias.as_str()), ValidationError::message("missing field"))
                    }
                    None => {}
                },
                FieldPlan::Merged { logical, encode, required } => match record.get(logical) {
                    Some(d) => {
                        if let Err(e) = encode(d, out) {
                            errors = errors.merge(e);
                        }
                    }
                    None if *required => errors
                        .insert_child(ErrorKey::from(logical.as_str()), ValidationError::message("missing field")),
                    None => {}
                },
                FieldPlan::Aggregate { logical, encode } => match record.get(logical).map(|d| encode(d)) {
                    Some(Ok(Value::Object(extra))) => {
                        for (k, v) in extra {
                            out.entry(k).or_insert(v);
                        }
                    }
                    Some(Ok(other)) => errors.insert_child(
                        ErrorKey::from(logical.as_str()),
                        ValidationError::message(format!("expected object, found {}", wire_kind(&other))),
                    ),
                    Some(Err(e)) => errors = errors.merge(e),
                    None => {}
                },
            }
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILDER
// ————————————————————————————————————————————————————————————————————————————

#[derive(Default)]
pub(crate) struct EncoderBuilder {
    memo: Memo<EnNode>,
}

impl EncoderBuilder {
    pub fn into_cells(self) -> Retained {
        self.memo.into_cells()
    }
}

impl Visitor for EncoderBuilder {
    type Output = EnNode;
    const NAME: &'static str = "serializer builder";

    fn enter(&mut self, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<Option<EnNode>> {
        self.memo.enter(walk, ty, EnNode::late)
    }

    fn leave(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor, out: EnNode) -> Result<EnNode> {
        Ok(self.memo.leave(out))
    }

    fn primitive(&mut self, _: &mut Walk<'_>, kind: PrimitiveKind) -> Result<EnNode> {
        Ok(EnNode::value(move |d: &Data| encode_primitive(kind, d)))
    }

    fn collection(&mut self, walk: &mut Walk<'_>, element: &TypeDescriptor) -> Result<EnNode> {
        let item = visit(self, walk, element)?.full;
        Ok(EnNode::value(move |d: &Data| {
            let Data::List(xs) = d else { return Err(expected("list", d)) };
            encode_items(std::iter::repeat(&item).zip(xs))
        }))
    }

    fn mapping(&mut self, walk: &mut Walk<'_>, key: &TypeDescriptor, value: &TypeDescriptor) -> Result<EnNode> {
        if !is_string_like(walk, key)? {
            return Err(Error::invalid(format!("mapping key {key} is not a string type")));
        }
        let key_en = visit(self, walk, key)?.full;
        let value_en = visit(self, walk, value)?.full;
        Ok(EnNode::value(move |d: &Data| {
            let Data::Map(pairs) = d else { return Err(expected("map", d)) };
            let mut out = Map::new();
            let mut errors = ValidationError::default();
            for (i, (k, v)) in pairs.iter().enumerate() {
                match (key_en(k), value_en(v)) {
                    (Ok(Value::String(key)), Ok(value)) => {
                        out.insert(key, value);
                    }
                    (Ok(Value::String(key)), Err(e)) => errors.insert_child(ErrorKey::Field(key), e),
                    (Ok(other), _) => errors.insert_child(
                        ErrorKey::Index(i),
                        ValidationError::message(format!("key encoded as {}", wire_kind(&other))),
                    ),
                    (Err(e), _) => errors.insert_child(ErrorKey::Index(i), e),
                }
            }
            if errors.is_empty() { Ok(Value::Object(out)) } else { Err(errors) }
        }))
    }

    fn tuple(&mut self, walk: &mut Walk<'_>, elements: &[TypeDescriptor]) -> Result<EnNode> {
        let mut items: Vec<EncodeFn> = Vec::with_capacity(elements.len());
        for element in elements {
            items.push(visit(self, walk, element)?.full);
        }
        Ok(EnNode::value(move |d: &Data| {
            let Data::List(xs) = d else { return Err(expected("list", d)) };
            if xs.len() != items.len() {
                return Err(ValidationError::message(format!("expected {} items, found {}", items.len(), xs.len())));
            }
            encode_items(items.iter().zip(xs))
        }))
    }

    fn object(&mut self, walk: &mut Walk<'_>, object: &ObjectType) -> Result<EnNode> {
        check_aliases(walk, object)?;
        let mut fields = Vec::with_capacity(object.fields.len());
        for field in &object.fields {
            let logical = field.logical_name.clone();
            if field.merged {
                let node = visit_merged(self, walk, object, field)?;
                let encode = node.partial.ok_or_else(|| ConfigError::MergedNotObject {
                    owner: object.name.clone(),
                    field: logical.clone(),
                })?;
                fields.push(FieldPlan::Merged { logical, encode, required: field.required });
            } else if field.aggregate {
                if shape_of(walk, &field.ty)? != "mapping" {
                    return Err(ConfigError::AggregateNotMapping { owner: object.name.clone(), field: logical }.into());
                }
                if let Some(pattern) = &field.pattern {
                    compile_pattern(pattern)?;
                }
                // keys are merged into the object whether or not a pattern claims them
                let encode = visit(self, walk, &field.ty)?.full;
                fields.push(FieldPlan::Aggregate { logical, encode });
            } else {
                let encode = visit(self, walk, &field.ty)?.full;
                fields.push(FieldPlan::Direct { alias: field.name.clone(), logical, encode, required: field.required });
            }
        }
        let plan = Arc::new(ObjectPlan { name: object.name.clone(), fields });
        let partial = plan.clone();
        Ok(EnNode {
            full: encoder(move |d: &Data| {
                let mut out = Map::new();
                plan.encode_into(d, &mut out)?;
                Ok(Value::Object(out))
            }),
            partial: Some(partial_encoder(move |d: &Data, out: &mut Map<String, Value>| partial.encode_into(d, out))),
        })
    }

    fn union_result(&mut self, _: &mut Walk<'_>, results: Vec<EnNode>) -> Result<EnNode> {
        let mut partials: Vec<PartialEncodeFn> = results.iter().filter_map(|n| n.partial.clone()).collect();
        let variants: Vec<EncodeFn> = results.into_iter().map(|n| n.full).collect();
        Ok(EnNode {
            full: encoder(move |d: &Data| {
                let mut errors = ValidationError::default();
                for variant in &variants {
                    match variant(d) {
                        Ok(v) => return Ok(v),
                        Err(e) => errors = errors.merge(e),
                    }
                }
                Err(errors)
            }),
            partial: if partials.len() == 1 { partials.pop() } else { None },
        })
    }

    fn literal(&mut self, _: &mut Walk<'_>, values: &[Data]) -> Result<EnNode> {
        let mut wire = Vec::with_capacity(values.len());
        for d in values {
            wire.push(d.to_plain_json().ok_or_else(|| Error::invalid(format!("literal {d:?} has no JSON form")))?);
        }
        let values = values.to_vec();
        Ok(EnNode::value(move |d: &Data| {
            let found = values.iter().position(|v| v == d).or_else(|| {
                let w = d.to_plain_json()?;
                wire.iter().position(|x| same_value(x, &w))
            });
            match found {
                Some(i) => Ok(wire[i].clone()),
                None => Err(not_one_of(&wire)),
            }
        }))
    }

    /// Members encode from their name; the raw member value is accepted too.
    fn enumeration(&mut self, _: &mut Walk<'_>, ty: &EnumType) -> Result<EnNode> {
        let mut members = Vec::with_capacity(ty.members.len());
        for m in &ty.members {
            let wire = m.value.to_plain_json().ok_or_else(|| {
                Error::invalid(format!("enum member {}.{} has no JSON form", ty.name, m.name))
            })?;
            members.push((m.name.clone(), m.value.clone(), wire));
        }
        let names: Vec<Value> = members.iter().map(|(n, _, _)| Value::String(n.clone())).collect();
        Ok(EnNode::value(move |d: &Data| {
            let found = members.iter().find(|(name, value, _)| match d {
                Data::Enum(n) => n == name,
                other => other == value,
            });
            match found {
                Some((_, _, wire)) => Ok(wire.clone()),
                None => Err(not_one_of(&names)),
            }
        }))
    }

    /// Constraints are checked on decode only.
    fn annotated(&mut self, walk: &mut Walk<'_>, base: &TypeDescriptor, _: &[Tag]) -> Result<EnNode> {
        visit(self, walk, base)
    }

    fn conversion(&mut self, walk: &mut Walk<'_>, _: &TypeDescriptor, conv: &Arc<Conversion>) -> Result<EnNode> {
        let node = walk.redirect(conv, |walk| visit(self, walk, &conv.target))?;
        Ok(node.after(conv.transform()))
    }
}

fn encode_items<'a>(items: impl Iterator<Item = (&'a EncodeFn, &'a Data)>) -> Result<Value, ValidationError> {
    let mut out = Vec::new();
    let mut errors = ValidationError::default();
    for (i, (item, x)) in items.enumerate() {
        match item(x) {
            Ok(v) => out.push(v),
            Err(e) => errors.insert_child(ErrorKey::Index(i), e),
        }
    }
    if errors.is_empty() { Ok(Value::Array(out)) } else { Err(errors) }
}

fn encode_primitive(kind: PrimitiveKind, d: &Data) -> Result<Value, ValidationError> {
    match (kind, d) {
        (PrimitiveKind::String, Data::Str(s)) => Ok(Value::String(s.clone())),
        (PrimitiveKind::Integer, Data::Int(i)) => Ok(Value::from(*i)),
        (PrimitiveKind::Float, Data::Float(f)) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| ValidationError::message(format!("non-finite float {f}"))),
        (PrimitiveKind::Float, Data::Int(i)) => Ok(Value::from(*i)),
        (PrimitiveKind::Boolean, Data::Bool(b)) => Ok(Value::Bool(*b)),
        (PrimitiveKind::Null, Data::Null) => Ok(Value::Null),
        _ => Err(expected(kind.json_type(), d)),
    }
}
