//! Value constraints attached through `Tag::Constraint`.
//!
//! Each constraint is both a schema keyword and a decode-time check on
//! the wire value. A check only fires when the wire value has the kind
//! the constraint is about; kind mismatches are reported by the decoder.
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    MinLength(usize),
    MaxLength(usize),
    Pattern(String),
    Minimum(f64),
    Maximum(f64),
    ExclusiveMinimum(f64),
    ExclusiveMaximum(f64),
    MultipleOf(f64),
    MinItems(usize),
    MaxItems(usize),
    UniqueItems,
    MinProperties(usize),
    MaxProperties(usize),
}

/// The JSON kind a constraint talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintTarget {
    String,
    Number,
    Array,
    Object,
}

impl ConstraintTarget {
    /// Whether a schema `type` value is compatible with this target.
    pub fn accepts_schema_type(self, ty: &str) -> bool {
        match self {
            ConstraintTarget::String => ty == "string",
            ConstraintTarget::Number => ty == "integer" || ty == "number",
            ConstraintTarget::Array => ty == "array",
            ConstraintTarget::Object => ty == "object",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ConstraintTarget::String => "string",
            ConstraintTarget::Number => "number",
            ConstraintTarget::Array => "array",
            ConstraintTarget::Object => "object",
        }
    }
}

impl Constraint {
    pub fn target(&self) -> ConstraintTarget {
        use Constraint::*;
        match self {
            MinLength(_) | MaxLength(_) | Pattern(_) => ConstraintTarget::String,
            Minimum(_) | Maximum(_) | ExclusiveMinimum(_) | ExclusiveMaximum(_) | MultipleOf(_) => {
                ConstraintTarget::Number
            }
            MinItems(_) | MaxItems(_) | UniqueItems => ConstraintTarget::Array,
            MinProperties(_) | MaxProperties(_) => ConstraintTarget::Object,
        }
    }

    pub fn keyword(&self) -> &'static str {
        use Constraint::*;
        match self {
            MinLength(_) => "minLength",
            MaxLength(_) => "maxLength",
            Pattern(_) => "pattern",
            Minimum(_) => "minimum",
            Maximum(_) => "maximum",
            ExclusiveMinimum(_) => "exclusiveMinimum",
            ExclusiveMaximum(_) => "exclusiveMaximum",
            MultipleOf(_) => "multipleOf",
            MinItems(_) => "minItems",
            MaxItems(_) => "maxItems",
            UniqueItems => "uniqueItems",
            MinProperties(_) => "minProperties",
            MaxProperties(_) => "maxProperties",
        }
    }

    pub fn keyword_value(&self) -> Value {
        use Constraint::*;
        match self {
            MinLength(n) | MaxLength(n) | MinItems(n) | MaxItems(n) | MinProperties(n) | MaxProperties(n) => {
                Value::from(*n)
            }
            Pattern(p) => Value::from(p.clone()),
            Minimum(x) | Maximum(x) | ExclusiveMinimum(x) | ExclusiveMaximum(x) | MultipleOf(x) => number(*x),
            UniqueItems => Value::Bool(true),
        }
    }

    /// Reject arguments no value could be checked against.
    pub fn validate(&self) -> Result<()> {
        use Constraint::*;
        match self {
            MultipleOf(m) if !(m.is_finite() && *m > 0.0) => {
                Err(Error::invalid(format!("bad constraint multipleOf: {m} is not a positive number")))
            }
            Minimum(x) | Maximum(x) | ExclusiveMinimum(x) | ExclusiveMaximum(x) if x.is_nan() => {
                Err(Error::invalid(format!("bad constraint {}: NaN bound", self.keyword())))
            }
            _ => Ok(()),
        }
    }

    /// Reject a constraint placed on a schema whose `type` can't carry it.
    pub fn check_schema_type(&self, schema_type: Option<&Value>) -> Result<()> {
        self.validate()?;
        let target = self.target();
        let compatible = match schema_type {
            // refs and unions carry no type: nothing to check against
            None => true,
            Some(Value::String(t)) => target.accepts_schema_type(t),
            Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(|t| target.accepts_schema_type(t)),
            Some(_) => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "bad constraint {}: expected a {} type, found {}",
                self.keyword(),
                target.label(),
                schema_type.map(|t| t.to_string()).unwrap_or_default(),
            )))
        }
    }
}

// Helper: emit integers when exact
fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DECODE-TIME CHECKS
// ————————————————————————————————————————————————————————————————————————————

/// Constraints ready to run against wire values (patterns compiled once).
#[derive(Debug, Clone, Default)]
pub struct Checks {
    items: Vec<(Constraint, Option<Regex>)>,
}

impl Checks {
    pub fn compile<'a>(constraints: impl IntoIterator<Item = &'a Constraint>) -> Result<Self> {
        let mut items = Vec::new();
        for c in constraints {
            c.validate()?;
            let rx = match c {
                Constraint::Pattern(p) => Some(compile_pattern(p)?),
                _ => None,
            };
            items.push((c.clone(), rx));
        }
        Ok(Self { items })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages for every violated constraint (empty when all hold).
    pub fn violations(&self, value: &Value) -> Vec<String> {
        self.items.iter().filter_map(|(c, rx)| violation(c, rx.as_ref(), value)).collect()
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid(format!("invalid pattern '{pattern}': {e}")))
}

fn violation(c: &Constraint, rx: Option<&Regex>, value: &Value) -> Option<String> {
    use Constraint::*;
    match (c, value) {
        (MinLength(n), Value::String(s)) if s.chars().count() < *n => {
            Some(format!("length less than {n} (minLength)"))
        }
        (MaxLength(n), Value::String(s)) if s.chars().count() > *n => {
            Some(format!("length greater than {n} (maxLength)"))
        }
        (Pattern(p), Value::String(s)) => match rx {
            Some(rx) if !rx.is_match(s) => Some(format!("unmatched pattern '{p}'")),
            _ => None,
        },
        (Minimum(m), Value::Number(x)) if x.as_f64().is_some_and(|x| x < *m) => {
            Some(format!("less than {m} (minimum)"))
        }
        (Maximum(m), Value::Number(x)) if x.as_f64().is_some_and(|x| x > *m) => {
            Some(format!("greater than {m} (maximum)"))
        }
        (ExclusiveMinimum(m), Value::Number(x)) if x.as_f64().is_some_and(|x| x <= *m) => {
            Some(format!("less than or equal to {m} (exclusiveMinimum)"))
        }
        (ExclusiveMaximum(m), Value::Number(x)) if x.as_f64().is_some_and(|x| x >= *m) => {
            Some(format!("greater than or equal to {m} (exclusiveMaximum)"))
        }
        (MultipleOf(m), Value::Number(x)) => {
            let q = x.as_f64()? / m;
            if (q - q.round()).abs() > 1e-9 {
                Some(format!("not a multiple of {m} (multipleOf)"))
            } else {
                None
            }
        }
        (MinItems(n), Value::Array(xs)) if xs.len() < *n => Some(format!("size less than {n} (minItems)")),
        (MaxItems(n), Value::Array(xs)) if xs.len() > *n => Some(format!("size greater than {n} (maxItems)")),
        (UniqueItems, Value::Array(xs)) => {
            let dup = xs.iter().enumerate().any(|(i, x)| xs[..i].contains(x));
            if dup { Some("duplicate items (uniqueItems)".to_string()) } else { None }
        }
        (MinProperties(n), Value::Object(m)) if m.len() < *n => {
            Some(format!("size less than {n} (minProperties)"))
        }
        (MaxProperties(n), Value::Object(m)) if m.len() > *n => {
            Some(format!("size greater than {n} (maxProperties)"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_checks_report_readable_messages() {
        let cs = [Constraint::MinLength(3), Constraint::Pattern("^[a-z]+$".into())];
        let checks = Checks::compile(&cs).unwrap();
        assert_eq!(
            checks.violations(&json!("A")),
            vec!["length less than 3 (minLength)".to_string(), "unmatched pattern '^[a-z]+$'".to_string()]
        );
        assert!(checks.violations(&json!("abc")).is_empty());
        // not a string: left to the decoder
        assert!(checks.violations(&json!(1)).is_empty());
    }

    #[test]
    fn number_checks() {
        let cs = [Constraint::Minimum(0.0), Constraint::MultipleOf(0.5)];
        let checks = Checks::compile(&cs).unwrap();
        assert_eq!(checks.violations(&json!(-1)), vec!["less than 0 (minimum)".to_string()]);
        assert_eq!(checks.violations(&json!(1.25)), vec!["not a multiple of 0.5 (multipleOf)".to_string()]);
        assert!(checks.violations(&json!(1.5)).is_empty());
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let err = Checks::compile(&[Constraint::Pattern("(".into())]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn multiple_of_must_be_positive_and_finite() {
        for m in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let err = Checks::compile(&[Constraint::MultipleOf(m)]).unwrap_err();
            assert!(err.is_configuration(), "{m}");
            assert!(Constraint::MultipleOf(m).check_schema_type(Some(&json!("number"))).is_err());
        }
        assert!(Checks::compile(&[Constraint::Minimum(f64::NAN)]).is_err());
    }

    #[test]
    fn schema_type_compatibility() {
        assert!(Constraint::MinLength(1).check_schema_type(Some(&json!("string"))).is_ok());
        assert!(Constraint::MinLength(1).check_schema_type(Some(&json!("integer"))).is_err());
        assert!(Constraint::Maximum(1.0).check_schema_type(Some(&json!(["integer", "null"]))).is_ok());
        assert!(Constraint::MinItems(1).check_schema_type(None).is_ok());
        assert_eq!(Constraint::Maximum(2.0).keyword_value(), json!(2));
    }
}
