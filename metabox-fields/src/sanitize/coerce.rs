//! Per-type coercion of leaf values.
//!
//! Each function turns one raw submitted value into the value that is
//! stored, or returns a message that becomes a [`ValidationError`]. Every
//! output is a fixed point: coercing it again yields the same value.
//!
//! [`ValidationError`]: crate::error::ValidationError

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use serde_json::{json, Map, Number, Value};
use url::Url;

use super::html::filter_html;
use super::{EntityKind, EntityLookup};
use crate::types::{FieldType, NumberConstraints, SelectOption, TextFilter};
use crate::visibility::is_truthy;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M";
const DATETIME_SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIME_FORMAT: &str = "%H:%M";
const TIME_SECONDS_FORMAT: &str = "%H:%M:%S";
const URL_SCHEMES: [&str; 5] = ["http", "https", "mailto", "ftp", "ftps"];

/// Settings shared by every leaf coercion in one sanitizer.
pub(crate) struct LeafContext<'a> {
    pub lookup: &'a dyn EntityLookup,
    pub richtext_allowed_tags: &'a [String],
}

/// Dispatch on the field type. Containers never reach here.
pub(crate) fn coerce_leaf(
    field_type: &FieldType,
    raw: &Value,
    ctx: &LeafContext<'_>,
) -> Result<Value, String> {
    match field_type {
        FieldType::Text(filter) => {
            let text = filtered(raw, filter, &[])?;
            Ok(json!(text.split_whitespace().collect::<Vec<_>>().join(" ")))
        }
        FieldType::Textarea(filter) => {
            let text = filtered(raw, filter, &[])?;
            Ok(json!(text.replace("\r\n", "\n").trim()))
        }
        FieldType::RichText(filter) => {
            let text = filtered(raw, filter, ctx.richtext_allowed_tags)?;
            Ok(json!(text.trim()))
        }
        FieldType::Number(constraints) => number(raw, constraints),
        FieldType::Select {
            options,
            multiple,
            dynamic,
        } => {
            let resolved: Vec<SelectOption> = match dynamic {
                Some(cb) => (cb.func())()
                    .into_iter()
                    .map(|(value, label)| SelectOption { value, label })
                    .collect(),
                None => options.clone(),
            };
            select(raw, &resolved, *multiple)
        }
        FieldType::Checkbox => Ok(checkbox(raw)),
        FieldType::Url => Ok(json!(web_url(raw))),
        FieldType::Email => Ok(json!(email(raw))),
        FieldType::Color => Ok(json!(color(raw))),
        FieldType::Date => date(raw),
        FieldType::DateTime => datetime(raw),
        FieldType::Time => time(raw),
        FieldType::Image | FieldType::File => {
            let ids = existing_ids(raw, EntityKind::Attachment, ctx.lookup)?;
            Ok(ids.first().map_or(Value::Null, |id| json!(id)))
        }
        FieldType::Gallery { max_items } => {
            let mut ids = existing_ids(raw, EntityKind::Attachment, ctx.lookup)?;
            if let Some(max) = max_items {
                ids.truncate(*max);
            }
            Ok(json!(ids))
        }
        FieldType::Relation {
            kind,
            multiple,
            roles,
        } => {
            let mut ids = parse_ids(raw)?;
            if !multiple {
                ids.truncate(1);
            }
            let kind = EntityKind::from(*kind);
            for id in &ids {
                if !ctx.lookup.exists(kind, *id) {
                    return Err(format!("{} {id} does not exist", kind.as_str()));
                }
                if kind == EntityKind::User && !roles.is_empty() {
                    let user_roles = ctx.lookup.user_roles(*id);
                    if !user_roles.iter().any(|r| roles.contains(r)) {
                        return Err(format!("user {id} does not have an allowed role"));
                    }
                }
            }
            if *multiple {
                Ok(json!(ids))
            } else {
                Ok(ids.first().map_or(Value::Null, |id| json!(id)))
            }
        }
        FieldType::AmountType {
            amount,
            type_options,
        } => amount_type(raw, amount, type_options),
        FieldType::Async { multiple, .. } => {
            let values: Vec<String> = scalars(raw)?
                .into_iter()
                .map(|v| filter_html(&v, &[]).trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if *multiple {
                Ok(json!(values))
            } else {
                Ok(json!(values.into_iter().next().unwrap_or_default()))
            }
        }
        FieldType::Group { .. } | FieldType::Repeater { .. } => {
            Err("container fields have no scalar value".into())
        }
    }
}

fn filtered(raw: &Value, filter: &TextFilter, fallback: &[String]) -> Result<String, String> {
    let text = as_text(raw).ok_or_else(|| "expected text".to_string())?;
    let allowed = filter.allowed_tags.as_deref().unwrap_or(fallback);
    Ok(filter_html(&text, allowed))
}

fn as_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => Some(String::new()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1".into() } else { String::new() }),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parse, round to `step` (anchored at `min`), then clamp.
///
/// A `max` that is off the step grid clamps down to the last grid point
/// below it, so the result is always on the grid and inside the bounds.
pub(crate) fn number(raw: &Value, constraints: &NumberConstraints) -> Result<Value, String> {
    let parsed = match raw {
        Value::Null => return Ok(Value::Null),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(Value::Null),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let mut value = parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", display(raw)))?;

    let step = constraints.step.filter(|s| *s > 0.0);
    let base = constraints.min.unwrap_or(0.0);
    if let Some(step) = step {
        value = on_grid(base, step, ((value - base) / step).round());
    }
    if let Some(min) = constraints.min {
        value = value.max(min);
    }
    if let Some(max) = constraints.max.filter(|max| value > *max) {
        value = match step {
            Some(step) => on_grid(base, step, grid_floor((max - base) / step)),
            None => max,
        };
    }
    Ok(number_value(value))
}

fn on_grid(base: f64, step: f64, steps: f64) -> f64 {
    round_to(base + steps * step, decimals(step))
}

/// Floor that treats values within rounding noise of an integer as that integer.
fn grid_floor(steps: f64) -> f64 {
    let nearest = steps.round();
    if (steps - nearest).abs() < 1e-9 {
        nearest
    } else {
        steps.floor()
    }
}

fn decimals(step: f64) -> i32 {
    let text = step.to_string();
    text.split_once('.')
        .map_or(0, |(_, frac)| frac.len().min(10) as i32)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn checkbox(raw: &Value) -> Value {
    let checked = match raw {
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            !matches!(s.as_str(), "" | "0" | "off" | "no" | "false")
        }
        other => is_truthy(other),
    };
    json!(if checked { 1 } else { 0 })
}

fn web_url(raw: &Value) -> String {
    let Some(text) = raw.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    match Url::parse(text) {
        Ok(parsed) if URL_SCHEMES.contains(&parsed.scheme()) => parsed.to_string(),
        _ => String::new(),
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)+$").expect("valid regex")
    })
}

fn email(raw: &Value) -> String {
    raw.as_str()
        .map(str::trim)
        .filter(|s| email_regex().is_match(s))
        .map(str::to_string)
        .unwrap_or_default()
}

fn color_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid regex"))
}

fn color(raw: &Value) -> String {
    raw.as_str()
        .map(str::trim)
        .filter(|s| color_regex().is_match(s))
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn date_input(raw: &Value) -> Result<Option<String>, String> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        other => Err(format!("'{}' is not a date", display(other))),
    }
}

fn date(raw: &Value) -> Result<Value, String> {
    let Some(text) = date_input(raw)? else {
        return Ok(json!(""));
    };
    NaiveDate::parse_from_str(&text, DATE_FORMAT)
        .map(|d| json!(d.format(DATE_FORMAT).to_string()))
        .map_err(|_| format!("'{text}' is not a date (YYYY-MM-DD)"))
}

fn datetime(raw: &Value) -> Result<Value, String> {
    let Some(text) = date_input(raw)? else {
        return Ok(json!(""));
    };
    let normalized = text.replacen(' ', "T", 1);
    let parsed = NaiveDateTime::parse_from_str(&normalized, DATETIME_SECONDS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, DATETIME_FORMAT))
        .map_err(|_| format!("'{text}' is not a date and time"))?;
    let format = if parsed.second() == 0 {
        DATETIME_FORMAT
    } else {
        DATETIME_SECONDS_FORMAT
    };
    Ok(json!(parsed.format(format).to_string()))
}

fn time(raw: &Value) -> Result<Value, String> {
    let Some(text) = date_input(raw)? else {
        return Ok(json!(""));
    };
    let parsed = NaiveTime::parse_from_str(&text, TIME_SECONDS_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(&text, TIME_FORMAT))
        .map_err(|_| format!("'{text}' is not a time"))?;
    let format = if parsed.second() == 0 {
        TIME_FORMAT
    } else {
        TIME_SECONDS_FORMAT
    };
    Ok(json!(parsed.format(format).to_string()))
}

/// Flatten a scalar or a list into strings, skipping empties.
fn scalars(raw: &Value) -> Result<Vec<String>, String> {
    let items: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => return Err("expected a value or a list of values".into()),
        other => vec![other],
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => out.push(s.clone()),
            Value::Number(n) => out.push(n.to_string()),
            Value::Bool(b) => out.push(if *b { "1".into() } else { "0".into() }),
            _ => return Err("expected a value or a list of values".into()),
        }
    }
    Ok(out)
}

fn select(raw: &Value, options: &[SelectOption], multiple: bool) -> Result<Value, String> {
    let mut chosen: Vec<String> = Vec::new();
    for value in scalars(raw)? {
        if !options.iter().any(|o| o.value == value) {
            return Err(format!("'{value}' is not an allowed option"));
        }
        if !chosen.contains(&value) {
            chosen.push(value);
        }
    }
    if multiple {
        Ok(json!(chosen))
    } else {
        Ok(json!(chosen.into_iter().next().unwrap_or_default()))
    }
}

fn parse_ids(raw: &Value) -> Result<Vec<u64>, String> {
    let mut ids = Vec::new();
    for value in scalars(raw)? {
        let id = value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| format!("'{value}' is not a valid id"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn existing_ids(
    raw: &Value,
    kind: EntityKind,
    lookup: &dyn EntityLookup,
) -> Result<Vec<u64>, String> {
    let ids = parse_ids(raw)?;
    if let Some(missing) = ids.iter().find(|id| !lookup.exists(kind, **id)) {
        return Err(format!("{} {missing} does not exist", kind.as_str()));
    }
    Ok(ids)
}

fn amount_type(
    raw: &Value,
    constraints: &NumberConstraints,
    type_options: &[SelectOption],
) -> Result<Value, String> {
    let map = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err("expected an amount and a type".into()),
    };
    let amount = number(map.get("amount").unwrap_or(&Value::Null), constraints)?;
    let kind = map.get("type").and_then(as_text).unwrap_or_default();
    let kind = kind.trim();
    if kind.is_empty() && amount.is_null() {
        return Ok(json!({"amount": Value::Null, "type": ""}));
    }
    if !type_options.iter().any(|o| o.value == kind) {
        return Err(format!("'{kind}' is not an allowed amount type"));
    }
    Ok(json!({"amount": amount, "type": kind}))
}

fn display(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::AssumeExists;

    fn ctx() -> LeafContext<'static> {
        LeafContext {
            lookup: &AssumeExists,
            richtext_allowed_tags: &[],
        }
    }

    fn constraints(min: Option<f64>, max: Option<f64>, step: Option<f64>) -> NumberConstraints {
        NumberConstraints { min, max, step }
    }

    #[test]
    fn number_clamps_to_bounds() {
        let c = constraints(Some(0.0), Some(100.0), Some(1.0));
        assert_eq!(number(&json!(-5), &c).unwrap(), json!(0));
        assert_eq!(number(&json!("150"), &c).unwrap(), json!(100));
        assert_eq!(number(&json!("42"), &c).unwrap(), json!(42));
    }

    #[test]
    fn number_rounds_to_step() {
        let c = constraints(None, None, Some(0.25));
        assert_eq!(number(&json!("1.3"), &c).unwrap(), json!(1.25));
        let c = constraints(Some(1.0), None, Some(2.0));
        assert_eq!(number(&json!(4), &c).unwrap(), json!(5));
        let c = constraints(None, None, Some(0.1));
        assert_eq!(number(&json!(0.30000000000000004), &c).unwrap(), json!(0.3));
    }

    #[test]
    fn number_clamps_onto_the_step_grid() {
        let c = constraints(Some(0.0), Some(100.0), Some(3.0));
        assert_eq!(number(&json!(150), &c).unwrap(), json!(99));
        assert_eq!(number(&json!(100), &c).unwrap(), json!(99));
        assert_eq!(number(&json!(99), &c).unwrap(), json!(99));
        assert_eq!(number(&json!(-4), &c).unwrap(), json!(0));

        let c = constraints(None, Some(1.0), Some(0.3));
        assert_eq!(number(&json!(5), &c).unwrap(), json!(0.9));
        assert_eq!(number(&json!(0.9), &c).unwrap(), json!(0.9));
    }

    #[test]
    fn number_empty_clears_and_garbage_fails() {
        let c = NumberConstraints::default();
        assert_eq!(number(&json!(""), &c).unwrap(), Value::Null);
        assert!(number(&json!("lots"), &c).is_err());
        assert!(number(&json!([1]), &c).is_err());
    }

    #[test]
    fn text_strips_markup_and_collapses_whitespace() {
        let ft = FieldType::Text(TextFilter::default());
        assert_eq!(
            coerce_leaf(&ft, &json!("  <b>Hello</b>\n  world "), &ctx()).unwrap(),
            json!("Hello world")
        );
    }

    #[test]
    fn textarea_keeps_line_breaks() {
        let ft = FieldType::Textarea(TextFilter::default());
        assert_eq!(
            coerce_leaf(&ft, &json!("line one\r\n<i>line</i> two\n"), &ctx()).unwrap(),
            json!("line one\nline two")
        );
    }

    #[test]
    fn richtext_uses_field_allow_list() {
        let ft = FieldType::RichText(TextFilter {
            allowed_tags: Some(vec!["strong".into()]),
        });
        assert_eq!(
            coerce_leaf(&ft, &json!("<strong>Yes</strong><script>x</script>"), &ctx()).unwrap(),
            json!("<strong>Yes</strong>")
        );
    }

    #[test]
    fn checkbox_stores_int() {
        assert_eq!(checkbox(&json!("on")), json!(1));
        assert_eq!(checkbox(&json!(true)), json!(1));
        assert_eq!(checkbox(&json!("0")), json!(0));
        assert_eq!(checkbox(&Value::Null), json!(0));
        assert_eq!(checkbox(&json!(1)), json!(1));
    }

    #[test]
    fn invalid_url_and_email_fall_back_to_empty() {
        assert_eq!(web_url(&json!("https://example.com/a?b=1")), "https://example.com/a?b=1");
        assert_eq!(web_url(&json!("javascript:alert(1)")), "");
        assert_eq!(web_url(&json!("not a url")), "");
        assert_eq!(email(&json!(" me@example.com ")), "me@example.com");
        assert_eq!(email(&json!("me@")), "");
    }

    #[test]
    fn color_is_normalized() {
        assert_eq!(color(&json!("#AABBCC")), "#aabbcc");
        assert_eq!(color(&json!("red")), "");
    }

    #[test]
    fn dates_are_parsed_and_normalized() {
        assert_eq!(date(&json!("2026-01-31")).unwrap(), json!("2026-01-31"));
        assert!(date(&json!("2026-02-31")).is_err());
        assert_eq!(
            datetime(&json!("2026-01-01 00:00")).unwrap(),
            json!("2026-01-01T00:00")
        );
        assert_eq!(
            datetime(&json!("2026-01-01T10:15:30")).unwrap(),
            json!("2026-01-01T10:15:30")
        );
        assert_eq!(time(&json!("09:30")).unwrap(), json!("09:30"));
        assert_eq!(datetime(&json!("")).unwrap(), json!(""));
        assert!(time(&json!("25:00")).is_err());
    }

    #[test]
    fn select_checks_options() {
        let options = vec![SelectOption::new("s", "Small"), SelectOption::new("m", "Medium")];
        assert_eq!(select(&json!("m"), &options, false).unwrap(), json!("m"));
        assert_eq!(select(&json!(["s", "m", "s"]), &options, true).unwrap(), json!(["s", "m"]));
        assert_eq!(select(&json!(["m", "s"]), &options, false).unwrap(), json!("m"));
        assert!(select(&json!("xl"), &options, false).is_err());
        assert_eq!(select(&json!(""), &options, false).unwrap(), json!(""));
    }

    #[test]
    fn amount_type_validates_both_parts() {
        let c = constraints(Some(0.0), None, Some(0.01));
        let types = vec![SelectOption::new("fixed", "Fixed"), SelectOption::new("percent", "%")];
        assert_eq!(
            amount_type(&json!({"amount": "12.5", "type": "percent"}), &c, &types).unwrap(),
            json!({"amount": 12.5, "type": "percent"})
        );
        assert!(amount_type(&json!({"amount": "5", "type": "bogus"}), &c, &types).is_err());
        assert!(amount_type(&json!({"amount": "x", "type": "fixed"}), &c, &types).is_err());
        assert_eq!(
            amount_type(&json!({"amount": "", "type": ""}), &c, &types).unwrap(),
            json!({"amount": null, "type": ""})
        );
    }

    #[test]
    fn gallery_keeps_at_most_max_items() {
        let ft = FieldType::Gallery { max_items: Some(2) };
        assert_eq!(
            coerce_leaf(&ft, &json!(["4", "5", "6"]), &ctx()).unwrap(),
            json!([4, 5])
        );
    }

    struct Staff;

    impl EntityLookup for Staff {
        fn exists(&self, _kind: EntityKind, _id: u64) -> bool {
            true
        }

        fn user_roles(&self, user_id: u64) -> Vec<String> {
            match user_id {
                1 => vec!["editor".into()],
                _ => vec!["subscriber".into()],
            }
        }
    }

    #[test]
    fn user_relation_requires_an_allowed_role() {
        let ft = FieldType::Relation {
            kind: crate::types::RelationKind::User,
            multiple: true,
            roles: vec!["editor".into(), "administrator".into()],
        };
        let ctx = LeafContext {
            lookup: &Staff,
            richtext_allowed_tags: &[],
        };
        assert_eq!(coerce_leaf(&ft, &json!([1]), &ctx).unwrap(), json!([1]));
        assert_eq!(
            coerce_leaf(&ft, &json!([1, 2]), &ctx).unwrap_err(),
            "user 2 does not have an allowed role"
        );
    }

    #[test]
    fn select_options_come_from_callback() {
        let sizes: crate::callbacks::OptionsFn =
            std::sync::Arc::new(|| vec![("s".into(), "Small".into()), ("m".into(), "Medium".into())]);
        let ft = FieldType::Select {
            options: Vec::new(),
            multiple: false,
            dynamic: Some(crate::callbacks::Callback::new("sizes", sizes)),
        };
        assert_eq!(coerce_leaf(&ft, &json!("m"), &ctx()).unwrap(), json!("m"));
        assert!(coerce_leaf(&ft, &json!("xl"), &ctx()).is_err());
    }

    #[test]
    fn async_values_are_stringified_and_stripped() {
        let single = FieldType::Async {
            multiple: false,
            source: None,
        };
        assert_eq!(coerce_leaf(&single, &json!(42), &ctx()).unwrap(), json!("42"));
        assert_eq!(
            coerce_leaf(&single, &json!(["<b>a</b>", "b"]), &ctx()).unwrap(),
            json!("a")
        );
        assert_eq!(coerce_leaf(&single, &json!(""), &ctx()).unwrap(), json!(""));

        let multiple = FieldType::Async {
            multiple: true,
            source: None,
        };
        assert_eq!(
            coerce_leaf(&multiple, &json!(["<i>x</i>", "", 7, " y "]), &ctx()).unwrap(),
            json!(["x", "7", "y"])
        );
        assert!(coerce_leaf(&multiple, &json!({"a": 1}), &ctx()).is_err());
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_ids(&json!(["3", 4, "3"])).unwrap(), vec![3, 4]);
        assert!(parse_ids(&json!("abc")).is_err());
        assert!(parse_ids(&json!(0)).is_err());
        assert!(parse_ids(&json!("")).unwrap().is_empty());
    }
}
