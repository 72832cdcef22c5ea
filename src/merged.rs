//! Merged-field flattening.
//!
//! A merged field splices the fields of its (conversion-resolved) object
//! type into the parent. Flattening yields the wire aliases an object
//! claims once every merged field is expanded; it is also where a merge
//! onto something that is not an object gets rejected.
use crate::error::{ConfigError, Error, Result};
use crate::ir::{ObjectField, ObjectType, TypeDescriptor};
use crate::registry::AliasDef;
use crate::visitor::{Visitor, Walk, visit};

/// Wire aliases claimed by `object`, merged fields expanded.
/// Aggregate fields claim nothing.
pub fn flatten(walk: &Walk<'_>, object: &ObjectType) -> Result<Vec<String>> {
    Flattener::default().object(&mut walk.clone(), object)
}

/// [`flatten`], then reject aliases claimed twice.
pub fn check_aliases(walk: &Walk<'_>, object: &ObjectType) -> Result<Vec<String>> {
    let aliases = flatten(walk, object)?;
    for (i, alias) in aliases.iter().enumerate() {
        if aliases[..i].contains(alias) {
            return Err(ConfigError::DuplicateField { owner: object.name.clone(), alias: alias.clone() }.into());
        }
    }
    Ok(aliases)
}

/// Visit the type of a merged field and map a non-object outcome onto the
/// configuration error naming the field.
pub(crate) fn visit_merged<V: Visitor + ?Sized>(
    v: &mut V,
    walk: &mut Walk<'_>,
    owner: &ObjectType,
    field: &ObjectField,
) -> Result<V::Output> {
    visit(v, walk, &field.ty).map_err(|e| match e {
        Error::Unsupported { .. } => {
            ConfigError::MergedNotObject { owner: owner.name.clone(), field: field.logical_name.clone() }.into()
        }
        other => other,
    })
}

#[derive(Default)]
struct Flattener {
    aliases: Vec<String>,
}

impl Visitor for Flattener {
    type Output = Vec<String>;
    const NAME: &'static str = "merged field flattener";

    /// Own aliases first, then each merged field's, in declaration order.
    fn object(&mut self, walk: &mut Walk<'_>, object: &ObjectType) -> Result<Vec<String>> {
        let mut out: Vec<String> =
            object.fields.iter().filter(|f| !f.merged && !f.aggregate).map(|f| f.name.clone()).collect();
        for field in object.fields.iter().filter(|f| f.merged) {
            out.extend(visit_merged(self, walk, object, field)?);
        }
        Ok(out)
    }

    /// Exactly one variant may be an object (`Inner | null` is fine).
    fn union(&mut self, walk: &mut Walk<'_>, variants: &[TypeDescriptor]) -> Result<Vec<String>> {
        let mut survivors = Vec::new();
        for variant in variants {
            match visit(self, walk, variant) {
                Ok(aliases) => survivors.push(aliases),
                Err(Error::Unsupported { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        match <[_; 1]>::try_from(survivors) {
            Ok([aliases]) => Ok(aliases),
            Err(_) => Err(crate::visitor::unsupported::<Self>("union")),
        }
    }

    fn alias(&mut self, walk: &mut Walk<'_>, name: &str, def: &AliasDef) -> Result<Vec<String>> {
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
    use crate::conversion::{Conversion, Conversions, Direction};
    use crate::registry::Registry;

    fn walk(reg: &Registry) -> Walk<'_> {
        Walk::new(reg, Direction::Deserialization, Conversions::new())
    }

    fn inner() -> TypeDescriptor {
        TypeDescriptor::object(
            "B",
            vec![ObjectField::new("b1", TypeDescriptor::integer()), ObjectField::new("b2", TypeDescriptor::string())],
        )
    }

    #[test]
    fn own_aliases_then_merged_ones_in_declaration_order() {
        let mut reg = Registry::new();
        let b = reg.define("B", inner()).unwrap();
        let a = ObjectType {
            name: "A".into(),
            fields: vec![
                ObjectField::new("a1", TypeDescriptor::integer()),
                ObjectField::new("a2", TypeDescriptor::integer()),
                ObjectField::new("rest", b).merged(),
            ],
        };
        assert_eq!(flatten(&walk(&reg), &a).unwrap(), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn aggregate_claims_nothing_and_optional_merge_is_accepted() {
        let a = ObjectType {
            name: "A".into(),
            fields: vec![
                ObjectField::new("opt", TypeDescriptor::optional(inner())).merged(),
                ObjectField::new(
                    "extra",
                    TypeDescriptor::mapping(TypeDescriptor::string(), TypeDescriptor::string()),
                )
                .aggregate(),
            ],
        };
        let reg = Registry::new();
        assert_eq!(flatten(&walk(&reg), &a).unwrap(), vec!["b1", "b2"]);
    }

    #[test]
    fn merging_a_string_names_the_field() {
        let a = ObjectType {
            name: "A".into(),
            fields: vec![ObjectField::new("label", TypeDescriptor::string()).merged()],
        };
        let reg = Registry::new();
        let err = flatten(&walk(&reg), &a).unwrap_err();
        assert_eq!(
            err,
            Error::Config(ConfigError::MergedNotObject { owner: "A".into(), field: "label".into() })
        );
    }

    #[test]
    fn merge_follows_conversions() {
        let mut reg = Registry::new();
        let raw = reg.define_anonymous("Raw", TypeDescriptor::string()).unwrap();
        reg.register(Conversion::deserialization("raw_from_b", raw.clone(), inner(), Ok)).unwrap();
        let a = ObjectType { name: "A".into(), fields: vec![ObjectField::new("raw", raw).merged()] };
        assert_eq!(flatten(&walk(&reg), &a).unwrap(), vec!["b1", "b2"]);
        let ser = Walk::new(&reg, Direction::Serialization, Conversions::new());
        assert!(flatten(&ser, &a).unwrap_err().is_configuration());
    }

    #[test]
    fn duplicate_aliases_across_merge() {
        let a = ObjectType {
            name: "A".into(),
            fields: vec![ObjectField::new("b1", TypeDescriptor::string()), ObjectField::new("inner", inner()).merged()],
        };
        let reg = Registry::new();
        let err = check_aliases(&walk(&reg), &a).unwrap_err();
        assert_eq!(err, Error::Config(ConfigError::DuplicateField { owner: "A".into(), alias: "b1".into() }));
    }
}
