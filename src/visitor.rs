//! Conversion-aware traversal of a type graph.
//!
//! Every generator in the crate (reference extraction, schema emission,
//! merged-field flattening, codec compilation) is a [`Visitor`]: a table
//! of per-kind methods over the closed [`TypeDescriptor`] variants. The
//! [`visit`] driver owns the parts they all share: the enter/leave hooks,
//! conversion redirection and kind dispatch.
use std::sync::Arc;

use crate::conversion::{Conversion, Conversions, Direction};
use crate::data::Data;
use crate::error::{ConfigError, Error, Result};
use crate::ir::{EnumType, ObjectType, PrimitiveKind, Tag, TypeDescriptor};
use crate::registry::{AliasDef, Registry};

/// Traversal state shared by all visitors.
#[derive(Clone)]
pub struct Walk<'r> {
    pub registry: &'r Registry,
    pub direction: Direction,
    /// Active conversion context; replaced by `sub_conversions` under a conversion.
    pub context: Conversions,
    /// Conversions being traversed since the last named reference.
    active: Vec<u64>,
}

impl<'r> Walk<'r> {
    pub fn new(registry: &'r Registry, direction: Direction, context: Conversions) -> Self {
        Self { registry, direction, context, active: Vec::new() }
    }

    /// Traverse `conv.target` under the conversion's own context.
    pub fn redirect<T>(&mut self, conv: &Conversion, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.active.contains(&conv.id()) {
            return Err(Error::Recursive { name: conv.source.to_string() });
        }
        tracing::trace!(conversion = %conv.name, source = %conv.source, target = %conv.target, "redirect");
        let sub = conv.sub_conversions.clone().unwrap_or_default();
        let saved = std::mem::replace(&mut self.context, sub);
        self.active.push(conv.id());
        let out = f(self);
        self.active.pop();
        self.context = saved;
        out
    }

    /// Reference name carried by `ty` itself, validated.
    pub fn reference_of(&self, ty: &TypeDescriptor) -> Result<Option<String>> {
        match ty {
            TypeDescriptor::Alias(name) => Ok(self.registry.alias(name)?.reference.clone()),
            TypeDescriptor::Annotated { base, tags } => {
                let mut found: Option<&String> = None;
                for tag in tags {
                    let Tag::Ref(name) = tag else { continue };
                    if name.is_empty() {
                        return Err(invalid_ref(name, "empty reference name"));
                    }
                    if let Some(prev) = found.filter(|prev| *prev != name) {
                        return Err(invalid_ref(name, &format!("{base} is already named '{prev}'")));
                    }
                    if let TypeDescriptor::Alias(alias) = base.as_ref() {
                        let def = self.registry.alias(alias)?;
                        if let Some(own) = &def.reference {
                            return Err(invalid_ref(name, &format!("alias {alias} already has reference '{own}'")));
                        }
                        if !matches!(def.target, TypeDescriptor::Primitive(_)) {
                            return Err(invalid_ref(name, &format!("transparent alias {alias} of a non-primitive type")));
                        }
                    }
                    found = Some(name);
                }
                Ok(found.cloned())
            }
            _ => Ok(None),
        }
    }

    pub fn resolve(&self, ty: &TypeDescriptor) -> Option<Arc<Conversion>> {
        self.registry.resolve(ty, self.direction, &self.context).cloned()
    }
}

fn invalid_ref(name: &str, reason: &str) -> Error {
    ConfigError::InvalidRef { name: name.to_string(), reason: reason.to_string() }.into()
}

pub(crate) fn unsupported<V: Visitor + ?Sized>(kind: &'static str) -> Error {
    Error::Unsupported { visitor: V::NAME, kind }
}

pub trait Visitor {
    type Output;
    const NAME: &'static str;

    /// Runs before conversion lookup. `Some` short-circuits the node.
    fn enter(&mut self, _walk: &mut Walk<'_>, _ty: &TypeDescriptor) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    /// Runs after the node produced `out`, whenever `enter` ran and returned `None`.
    fn leave(&mut self, _walk: &mut Walk<'_>, _ty: &TypeDescriptor, out: Self::Output) -> Result<Self::Output> {
        Ok(out)
    }

    fn primitive(&mut self, _walk: &mut Walk<'_>, _kind: PrimitiveKind) -> Result<Self::Output> {
        Err(unsupported::<Self>("primitive"))
    }

    fn collection(&mut self, _walk: &mut Walk<'_>, _element: &TypeDescriptor) -> Result<Self::Output> {
        Err(unsupported::<Self>("collection"))
    }

    fn mapping(&mut self, _walk: &mut Walk<'_>, _key: &TypeDescriptor, _value: &TypeDescriptor) -> Result<Self::Output> {
        Err(unsupported::<Self>("mapping"))
    }

    fn tuple(&mut self, _walk: &mut Walk<'_>, _elements: &[TypeDescriptor]) -> Result<Self::Output> {
        Err(unsupported::<Self>("tuple"))
    }

    fn object(&mut self, _walk: &mut Walk<'_>, _object: &ObjectType) -> Result<Self::Output> {
        Err(unsupported::<Self>("object"))
    }

    fn union(&mut self, walk: &mut Walk<'_>, variants: &[TypeDescriptor]) -> Result<Self::Output> {
        let mut results = Vec::with_capacity(variants.len());
        for variant in variants {
            results.push(visit(self, walk, variant)?);
        }
        self.union_result(walk, results)
    }

    fn union_result(&mut self, _walk: &mut Walk<'_>, _results: Vec<Self::Output>) -> Result<Self::Output> {
        Err(unsupported::<Self>("union"))
    }

    fn literal(&mut self, _walk: &mut Walk<'_>, _values: &[Data]) -> Result<Self::Output> {
        Err(unsupported::<Self>("literal"))
    }

    fn enumeration(&mut self, _walk: &mut Walk<'_>, _ty: &EnumType) -> Result<Self::Output> {
        Err(unsupported::<Self>("enum"))
    }

    fn alias(&mut self, walk: &mut Walk<'_>, _name: &str, def: &AliasDef) -> Result<Self::Output> {
        visit(self, walk, &def.target)
    }

    fn annotated(&mut self, walk: &mut Walk<'_>, base: &TypeDescriptor, _tags: &[Tag]) -> Result<Self::Output> {
        visit(self, walk, base)
    }

    /// `ty` is redirected by `conv`; the default result is the target's.
    fn conversion(&mut self, walk: &mut Walk<'_>, _ty: &TypeDescriptor, conv: &Arc<Conversion>) -> Result<Self::Output> {
        walk.redirect(conv, |walk| visit(self, walk, &conv.target))
    }
}

/// Visit one node: enter hook, conversion or kind dispatch, leave hook.
///
/// A type overridden by the call context skips both hooks: its output
/// differs from the registered one, so it must not be memoized or named.
/// Crossing a named reference starts a fresh conversion-cycle scope, the
/// reference itself being what breaks the cycle.
pub fn visit<V: Visitor + ?Sized>(v: &mut V, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<V::Output> {
    let overridden = walk.context.get(ty, walk.direction).is_some();
    let mut scope = None;
    if !overridden {
        if let Some(out) = v.enter(walk, ty)? {
            return Ok(out);
        }
        if walk.reference_of(ty)?.is_some() {
            scope = Some(std::mem::take(&mut walk.active));
        }
    }
    let out = match walk.resolve(ty) {
        Some(conv) => v.conversion(walk, ty, &conv),
        None => dispatch(v, walk, ty),
    };
    if let Some(active) = scope {
        walk.active = active;
    }
    let out = out?;
    if overridden { Ok(out) } else { v.leave(walk, ty, out) }
}

fn dispatch<V: Visitor + ?Sized>(v: &mut V, walk: &mut Walk<'_>, ty: &TypeDescriptor) -> Result<V::Output> {
    match ty {
        TypeDescriptor::Primitive(kind) => v.primitive(walk, *kind),
        TypeDescriptor::Collection(element) => v.collection(walk, element),
        TypeDescriptor::Mapping { key, value } => v.mapping(walk, key, value),
        TypeDescriptor::Tuple(elements) => v.tuple(walk, elements),
        TypeDescriptor::Object(object) => v.object(walk, object),
        TypeDescriptor::Union(variants) => v.union(walk, variants),
        TypeDescriptor::Literal(values) => v.literal(walk, values),
        TypeDescriptor::Enum(e) => v.enumeration(walk, e),
        TypeDescriptor::Alias(name) => {
            let registry = walk.registry;
            let def = registry.alias(name)?;
            v.alias(walk, name, def)
        }
        TypeDescriptor::Annotated { base, tags } => v.annotated(walk, base, tags),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SHAPE QUERIES
// ————————————————————————————————————————————————————————————————————————————

/// Whether values of `ty` are strings on the wire (mapping keys must be).
pub fn is_string_like(walk: &Walk<'_>, ty: &TypeDescriptor) -> Result<bool> {
    visit(&mut StringLike::default(), &mut walk.clone(), ty)
}

#[derive(Default)]
struct StringLike {
    aliases: Vec<String>,
}

impl Visitor for StringLike {
    type Output = bool;
    const NAME: &'static str = "string-like check";

    fn primitive(&mut self, _: &mut Walk<'_>, kind: PrimitiveKind) -> Result<bool> {
        Ok(kind == PrimitiveKind::String)
    }
    fn collection(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor) -> Result<bool> {
        Ok(false)
    }
    fn mapping(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor, _: &TypeDescriptor) -> Result<bool> {
        Ok(false)
    }
    fn tuple(&mut self, _: &mut Walk<'_>, _: &[TypeDescriptor]) -> Result<bool> {
        Ok(false)
    }
    fn object(&mut self, _: &mut Walk<'_>, _: &ObjectType) -> Result<bool> {
        Ok(false)
    }
    fn union_result(&mut self, _: &mut Walk<'_>, results: Vec<bool>) -> Result<bool> {
        Ok(results.into_iter().all(|b| b))
    }
    fn literal(&mut self, _: &mut Walk<'_>, values: &[Data]) -> Result<bool> {
        Ok(values.iter().all(|v| matches!(v, Data::Str(_))))
    }
    fn enumeration(&mut self, _: &mut Walk<'_>, ty: &EnumType) -> Result<bool> {
        Ok(ty.members.iter().all(|m| matches!(m.value, Data::Str(_))))
    }
    fn alias(&mut self, walk: &mut Walk<'_>, name: &str, def: &AliasDef) -> Result<bool> {
        if self.aliases.iter().any(|a| a == name) {
            return Ok(false);
        }
        self.aliases.push(name.to_string());
        let out = visit(self, walk, &def.target);
        self.aliases.pop();
        out
    }
}

/// Descriptor kind reached after following aliases, annotations and conversions.
pub fn shape_of(walk: &Walk<'_>, ty: &TypeDescriptor) -> Result<&'static str> {
    visit(&mut ShapeOf::default(), &mut walk.clone(), ty)
}

#[derive(Default)]
struct ShapeOf {
    aliases: Vec<String>,
}

impl Visitor for ShapeOf {
    type Output = &'static str;
    const NAME: &'static str = "shape check";

    fn primitive(&mut self, _: &mut Walk<'_>, _: PrimitiveKind) -> Result<&'static str> {
        Ok("primitive")
    }
    fn collection(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor) -> Result<&'static str> {
        Ok("collection")
    }
    fn mapping(&mut self, _: &mut Walk<'_>, _: &TypeDescriptor, _: &TypeDescriptor) -> Result<&'static str> {
        Ok("mapping")
    }
    fn tuple(&mut self, _: &mut Walk<'_>, _: &[TypeDescriptor]) -> Result<&'static str> {
        Ok("tuple")
    }
    fn object(&mut self, _: &mut Walk<'_>, _: &ObjectType) -> Result<&'static str> {
        Ok("object")
    }
    fn union(&mut self, _: &mut Walk<'_>, _: &[TypeDescriptor]) -> Result<&'static str> {
        Ok("union")
    }
    fn literal(&mut self, _: &mut Walk<'_>, _: &[Data]) -> Result<&'static str> {
        Ok("literal")
    }
    fn enumeration(&mut self, _: &mut Walk<'_>, _: &EnumType) -> Result<&'static str> {
        Ok("enum")
    }
    fn alias(&mut self, walk: &mut Walk<'_>, name: &str, def: &AliasDef) -> Result<&'static str> {
        if self.aliases.iter().any(|a| a == name) {
            return Err(Error::Recursive { name: name.to_string() });
        }
        self.aliases.push(name.to_string());
        let out = visit(self, walk, &def.target);
        self.aliases.pop();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ObjectField;

    /// Counts primitive leaves; leaves everything else at the defaults.
    #[derive(Default)]
    struct Leaves(usize);

    impl Visitor for Leaves {
        type Output = ();
        const NAME: &'static str = "leaves";

        fn primitive(&mut self, _: &mut Walk<'_>, _: PrimitiveKind) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
        fn union_result(&mut self, _: &mut Walk<'_>, _: Vec<()>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_kind_is_unsupported_not_config() {
        let reg = Registry::new();
        let mut walk = Walk::new(&reg, Direction::Deserialization, Conversions::new());
        let err = visit(&mut Leaves::default(), &mut walk, &TypeDescriptor::list(TypeDescriptor::string())).unwrap_err();
        assert_eq!(err, Error::Unsupported { visitor: "leaves", kind: "collection" });
        assert!(err.is_unsupported() && !err.is_configuration());
    }

    #[test]
    fn conversion_redirects_before_dispatch() {
        let mut reg = Registry::new();
        let pair = reg.define_anonymous("Pair", TypeDescriptor::list(TypeDescriptor::integer())).unwrap();
        reg.register(Conversion::deserialization(
            "pair_from_union",
            pair.clone(),
            TypeDescriptor::Union(vec![TypeDescriptor::string(), TypeDescriptor::integer()]),
            Ok,
        ))
        .unwrap();
        let mut walk = Walk::new(&reg, Direction::Deserialization, Conversions::new());
        let mut leaves = Leaves::default();
        // the collection target is never seen, only the conversion target
        visit(&mut leaves, &mut walk, &pair).unwrap();
        assert_eq!(leaves.0, 2);
    }

    #[test]
    fn conversion_cycle_without_reference_is_recursive() {
        let mut reg = Registry::new();
        let wrapped = reg.define_anonymous("Wrapped", TypeDescriptor::string()).unwrap();
        reg.register(Conversion::serialization(
            "wrap",
            wrapped.clone(),
            TypeDescriptor::Union(vec![wrapped.clone(), TypeDescriptor::null()]),
            Ok,
        ))
        .unwrap();
        let mut walk = Walk::new(&reg, Direction::Serialization, Conversions::new());
        let err = visit(&mut Leaves::default(), &mut walk, &wrapped).unwrap_err();
        assert!(matches!(err, Error::Recursive { .. }));
    }

    #[test]
    fn reference_validation() {
        let mut reg = Registry::new();
        let named = reg.define("Named", TypeDescriptor::string()).unwrap();
        let newtype = reg.define_anonymous("Id", TypeDescriptor::integer()).unwrap();
        let walk = Walk::new(&reg, Direction::Deserialization, Conversions::new());
        assert_eq!(walk.reference_of(&named).unwrap().as_deref(), Some("Named"));
        assert_eq!(walk.reference_of(&newtype).unwrap(), None);
        assert_eq!(walk.reference_of(&newtype.clone().with_ref("ItemId")).unwrap().as_deref(), Some("ItemId"));
        for bad in [named.with_ref("Other"), TypeDescriptor::string().with_ref("")] {
            let err = walk.reference_of(&bad).unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::InvalidRef { .. })), "{err}");
        }
    }

    #[test]
    fn shape_queries_see_through_aliases_and_conversions() {
        let mut reg = Registry::new();
        let key = reg.define_anonymous("Key", TypeDescriptor::integer()).unwrap();
        reg.register(Conversion::deserialization("key_from_str", key.clone(), TypeDescriptor::string(), Ok)).unwrap();
        let obj = reg
            .define("Obj", TypeDescriptor::object("Obj", vec![ObjectField::new("a", TypeDescriptor::string())]))
            .unwrap();
        let de = Walk::new(&reg, Direction::Deserialization, Conversions::new());
        let ser = Walk::new(&reg, Direction::Serialization, Conversions::new());
        assert!(is_string_like(&de, &key).unwrap());
        assert!(!is_string_like(&ser, &key).unwrap());
        let colors = TypeDescriptor::literal([Data::from("red"), Data::from("blue")]);
        assert!(is_string_like(&de, &colors).unwrap());
        assert_eq!(shape_of(&de, &obj.annotated(vec![Tag::Deprecated])).unwrap(), "object");
    }
}
