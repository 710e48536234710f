//! Value-dependent visibility rules.
//!
//! This module is the single source of truth for show/hide decisions. The
//! sanitizer calls [`is_visible`] on save and the read path calls it on
//! render, and both build its scope with [`scope_for`]: the flat map of
//! sibling values at the owning field's nesting level.
//!
//! Rules are conjunctions only. There is no OR or NOT combinator. A shorthand
//! rule naming a key that is not in scope never matches, even when the
//! expected value is empty.
//!
//! # Example
//!
//! ```rust
//! use metabox_fields::visibility::{is_visible, VisibilityRule};
//! use serde_json::json;
//!
//! let rule = VisibilityRule::parse(
//!     &json!({"field": "discount", "operator": ">", "value": 0}),
//!     "sale_start",
//! )
//! .unwrap();
//!
//! let scope = json!({"discount": "15"});
//! assert!(is_visible(Some(&rule), scope.as_object().unwrap()));
//!
//! let scope = json!({"discount": 0});
//! assert!(!is_visible(Some(&rule), scope.as_object().unwrap()));
//! ```

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::capability::Capabilities;
use crate::error::ConfigError;
use crate::types::FieldSpec;

/// Comparison operator of an explicit condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "in" => Ok(Operator::In),
            "not_in" => Ok(Operator::NotIn),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
        };
        f.write_str(s)
    }
}

/// One `{field, operator, value}` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate against the sibling scope. Missing siblings read as null.
    pub fn evaluate(&self, scope: &Map<String, Value>) -> bool {
        let actual = scope.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => loose_eq(actual, &self.value),
            Operator::Ne => !loose_eq(actual, &self.value),
            Operator::Gt => compare(actual, &self.value, |a, b| a > b),
            Operator::Gte => compare(actual, &self.value, |a, b| a >= b),
            Operator::Lt => compare(actual, &self.value, |a, b| a < b),
            Operator::Lte => compare(actual, &self.value, |a, b| a <= b),
            Operator::In => match &self.value {
                Value::Array(set) => is_member(actual, set),
                _ => false,
            },
            Operator::NotIn => match &self.value {
                Value::Array(set) => !is_member(actual, set),
                _ => false,
            },
        }
    }
}

/// A field's visibility rule.
#[derive(Debug, Clone, PartialEq)]
pub enum VisibilityRule {
    /// `sibling_key -> expected` pairs, each a loose equality, all required.
    Equals(Vec<(String, Value)>),
    /// Explicit conditions, all required. Empty means always visible.
    All(Vec<Condition>),
}

impl VisibilityRule {
    /// Parse the raw configuration form.
    ///
    /// Accepts a shorthand map, a single `{field, operator, value}` object, or
    /// a list of such objects. `path` names the owning field for errors.
    pub fn parse(raw: &Value, path: &str) -> Result<Self, ConfigError> {
        match raw {
            Value::Object(map) if map.contains_key("field") => {
                Ok(VisibilityRule::All(vec![parse_condition(raw, path)?]))
            }
            Value::Object(map) => Ok(VisibilityRule::Equals(
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )),
            Value::Array(items) => items
                .iter()
                .map(|item| parse_condition(item, path))
                .collect::<Result<Vec<_>, _>>()
                .map(VisibilityRule::All),
            _ => Err(ConfigError::InvalidVisibility {
                path: path.to_string(),
                message: "expected a map or a list of conditions".into(),
            }),
        }
    }

    pub fn evaluate(&self, scope: &Map<String, Value>) -> bool {
        match self {
            VisibilityRule::Equals(pairs) => pairs
                .iter()
                .all(|(key, expected)| scope.get(key).is_some_and(|actual| loose_eq(actual, expected))),
            VisibilityRule::All(conditions) => conditions.iter().all(|c| c.evaluate(scope)),
        }
    }
}

/// Whether a field with `rule` is shown given its sibling values.
pub fn is_visible(rule: Option<&VisibilityRule>, scope: &Map<String, Value>) -> bool {
    rule.map_or(true, |r| r.evaluate(scope))
}

/// Sibling values visible to rules at one nesting level.
///
/// Each field contributes its value from `values`, or its default when
/// absent. Fields whose `permission` the caller lacks are left out.
pub fn scope_for(
    fields: &[FieldSpec],
    values: &Map<String, Value>,
    caps: &dyn Capabilities,
) -> Map<String, Value> {
    fields
        .iter()
        .filter(|field| field.permission.as_deref().is_none_or(|c| caps.can(c)))
        .map(|field| {
            let value = values
                .get(&field.key)
                .cloned()
                .unwrap_or_else(|| field.default_value());
            (field.key.clone(), value)
        })
        .collect()
}

fn parse_condition(raw: &Value, path: &str) -> Result<Condition, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidVisibility {
        path: path.to_string(),
        message: message.to_string(),
    };
    let map = raw
        .as_object()
        .ok_or_else(|| invalid("condition must be an object"))?;
    let field = map
        .get("field")
        .and_then(Value::as_str)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| invalid("condition is missing 'field'"))?;
    let operator = match map.get("operator").or_else(|| map.get("compare")) {
        None => Operator::Eq,
        Some(Value::String(op)) => {
            op.parse::<Operator>()
                .map_err(|operator| ConfigError::UnknownOperator {
                    path: path.to_string(),
                    operator,
                })?
        }
        Some(_) => return Err(invalid("operator must be a string")),
    };
    let value = map.get("value").cloned().unwrap_or(Value::Null);
    if matches!(operator, Operator::In | Operator::NotIn) && !value.is_array() {
        return Err(invalid("'in' and 'not_in' need a list value"));
    }
    Ok(Condition {
        field: field.to_string(),
        operator,
        value,
    })
}

/// Form-style truthiness: null, false, 0, "", "0", and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric coercion used by ordering operators. `None` fails the comparison.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Type-coerced equality.
///
/// A list on the actual side matches when it contains the expected scalar, so
/// a multi-select "contains X" reads the same as a single select "equals X".
pub fn loose_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), Value::Array(wanted)) => {
            items.len() == wanted.len() && wanted.iter().all(|w| items.iter().any(|i| scalar_eq(i, w)))
        }
        (Value::Array(items), scalar) => items.iter().any(|i| scalar_eq(i, scalar)),
        (a, b) => scalar_eq(a, b),
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(_), _) | (_, Value::Bool(_)) => is_truthy(a) == is_truthy(b),
        (Value::Null, other) | (other, Value::Null) => !is_truthy(other),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => canonical(a).is_some_and(|x| Some(x) == canonical(b)),
        },
    }
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Exact membership. Strings and numbers match by their text form, since
/// submitted values arrive as strings while rule literals are often numbers.
fn is_member(actual: &Value, set: &[Value]) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|i| is_member(i, set)),
        _ => set.iter().any(|candidate| {
            candidate == actual
                || matches!((canonical(actual), canonical(candidate)), (Some(a), Some(c)) if a == c)
        }),
    }
}

fn canonical(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
