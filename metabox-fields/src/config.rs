//! Config parsing from raw nested configuration to a canonical [`FieldGroup`].
//!
//! Input is a `serde_json::Value`, so YAML and JSON documents both work once
//! deserialized. The parser fills per-type defaults, normalizes shorthands,
//! resolves callback names, and rejects malformed trees before anything is
//! installed in the registry.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::callbacks::Callbacks;
use crate::error::ConfigError;
use crate::sanitize::join_path;
use crate::types::{
    Context, FieldGroup, FieldSpec, FieldType, NumberConstraints, Placement, Priority,
    RelationKind, SelectOption, TextFilter,
};
use crate::visibility::VisibilityRule;

/// Default `step` for `number` fields.
pub const NUMBER_STEP: f64 = 1.0;
/// Default `step` for the amount of `amount_type` fields.
pub const AMOUNT_STEP: f64 = 0.01;

/// Parse with no callbacks available.
pub fn parse(raw: &Value) -> Result<FieldGroup, ConfigError> {
    ConfigParser::new().parse(raw)
}

/// Parses raw configuration, resolving callback names against a table.
#[derive(Debug, Clone, Default)]
pub struct ConfigParser {
    callbacks: Callbacks,
}

impl ConfigParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callbacks(callbacks: Callbacks) -> Self {
        Self { callbacks }
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Parse a group whose id is taken from the `id` key.
    pub fn parse(&self, raw: &Value) -> Result<FieldGroup, ConfigError> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingId)?
            .to_string();
        self.parse_with_id(&id, raw)
    }

    /// Parse a group registered under `id`. An `id` key in `raw` is ignored.
    pub fn parse_with_id(&self, id: &str, raw: &Value) -> Result<FieldGroup, ConfigError> {
        if id.is_empty() {
            return Err(ConfigError::MissingId);
        }
        let map = raw.as_object().ok_or_else(|| ConfigError::InvalidValue {
            path: id.to_string(),
            message: "field group must be a map".into(),
        })?;

        let fields = match map.get("fields") {
            None | Some(Value::Null) => Vec::new(),
            Some(fields) => self.parse_children(fields, "")?,
        };
        if fields.is_empty() {
            return Err(ConfigError::MissingFields {
                group: id.to_string(),
            });
        }

        Ok(FieldGroup {
            id: id.to_string(),
            title: optional_string(map, "title", id)?.unwrap_or_else(|| id.to_string()),
            post_types: post_types(map, id)?,
            placement: Placement {
                context: enum_value::<Context>(map, "context", id)?.unwrap_or_default(),
                priority: enum_value::<Priority>(map, "priority", id)?.unwrap_or_default(),
            },
            capability: optional_string(map, "capability", id)?,
            prefix: optional_string(map, "prefix", id)?,
            fields,
        })
    }

    /// Parse one sibling scope: a map of key to spec, or a list of specs with `key`.
    fn parse_children(&self, raw: &Value, parent: &str) -> Result<Vec<FieldSpec>, ConfigError> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        let mut push = |spec: FieldSpec| -> Result<(), ConfigError> {
            if !seen.insert(spec.key.clone()) {
                return Err(ConfigError::DuplicateKey {
                    path: join_path(parent, &spec.key),
                });
            }
            children.push(spec);
            Ok(())
        };

        match raw {
            Value::Object(map) => {
                for (key, spec) in map {
                    push(self.parse_field(key, spec, parent)?)?;
                }
            }
            Value::Array(items) => {
                for item in items {
                    let key = item
                        .get("key")
                        .or_else(|| item.get("id"))
                        .and_then(Value::as_str)
                        .filter(|k| !k.is_empty())
                        .ok_or_else(|| ConfigError::InvalidValue {
                            path: parent.to_string(),
                            message: "field in list is missing 'key'".into(),
                        })?;
                    push(self.parse_field(key, item, parent)?)?;
                }
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    path: parent.to_string(),
                    message: "fields must be a map or a list".into(),
                })
            }
        }
        Ok(children)
    }

    fn parse_field(&self, key: &str, raw: &Value, parent: &str) -> Result<FieldSpec, ConfigError> {
        let path = join_path(parent, key);
        let map = raw.as_object().ok_or_else(|| ConfigError::InvalidValue {
            path: path.clone(),
            message: "field must be a map".into(),
        })?;
        let type_name = map
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingType { path: path.clone() })?;

        let field_type = self.parse_type(type_name, map, &path)?;

        let visibility = match map.get("visibility") {
            None | Some(Value::Null) => None,
            Some(rule) => Some(VisibilityRule::parse(rule, &path)?),
        };

        let sanitize = match optional_string(map, "sanitize_callback", &path)? {
            None => None,
            Some(name) => Some(self.callbacks.get_sanitizer(&name).ok_or_else(|| {
                ConfigError::UnknownCallback {
                    path: path.clone(),
                    kind: "sanitize",
                    name,
                }
            })?),
        };

        Ok(FieldSpec {
            key: key.to_string(),
            label: optional_string(map, "label", &path)?,
            description: optional_string(map, "description", &path)?,
            field_type,
            default: map.get("default").filter(|d| !d.is_null()).cloned(),
            visibility,
            permission: optional_string(map, "permission", &path)?,
            sanitize,
        })
    }

    fn parse_type(
        &self,
        type_name: &str,
        map: &Map<String, Value>,
        path: &str,
    ) -> Result<FieldType, ConfigError> {
        let field_type = match type_name {
            "text" => FieldType::Text(text_filter(map, path)?),
            "textarea" => FieldType::Textarea(text_filter(map, path)?),
            "richtext" => FieldType::RichText(text_filter(map, path)?),
            "number" => FieldType::Number(number_constraints(map, path, NUMBER_STEP)?),
            "select" => {
                let dynamic = match optional_string(map, "options_callback", path)? {
                    None => None,
                    Some(name) => Some(self.callbacks.get_options(&name).ok_or_else(|| {
                        ConfigError::UnknownCallback {
                            path: path.to_string(),
                            kind: "options",
                            name,
                        }
                    })?),
                };
                let options = match map.get("options") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(raw) => parse_options(raw, path)?,
                };
                if options.is_empty() && dynamic.is_none() {
                    return Err(ConfigError::InvalidValue {
                        path: path.to_string(),
                        message: "select needs options or an options_callback".into(),
                    });
                }
                FieldType::Select {
                    options,
                    multiple: flag(map, "multiple", path)?,
                    dynamic,
                }
            }
            "checkbox" => FieldType::Checkbox,
            "url" => FieldType::Url,
            "email" => FieldType::Email,
            "color" => FieldType::Color,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "time" => FieldType::Time,
            "image" => FieldType::Image,
            "file" => FieldType::File,
            "gallery" => FieldType::Gallery {
                max_items: max_items(map, path)?,
            },
            "post" | "user" | "term" => relation(type_name, map, path)?,
            "relation" => {
                let kind = optional_string(map, "relation", path)?.unwrap_or_default();
                if !matches!(kind.as_str(), "post" | "user" | "term") {
                    return Err(ConfigError::InvalidValue {
                        path: path.to_string(),
                        message: format!("relation must be post, user, or term, not '{kind}'"),
                    });
                }
                relation(&kind, map, path)?
            }
            "amount_type" => {
                let type_options = match map.get("type_options") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(raw) => parse_options(raw, path)?,
                };
                if type_options.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        path: path.to_string(),
                        message: "amount_type needs type_options".into(),
                    });
                }
                FieldType::AmountType {
                    amount: number_constraints(map, path, AMOUNT_STEP)?,
                    type_options,
                }
            }
            "group" => FieldType::Group {
                children: self.container_children(map, path, "group")?,
            },
            "repeater" => FieldType::Repeater {
                children: self.container_children(map, path, "repeater")?,
                max_items: max_items(map, path)?,
            },
            "async" => {
                let source = match optional_string(map, "search_callback", path)? {
                    None => None,
                    Some(name) => Some(self.callbacks.get_search(&name).ok_or_else(|| {
                        ConfigError::UnknownCallback {
                            path: path.to_string(),
                            kind: "search",
                            name,
                        }
                    })?),
                };
                FieldType::Async {
                    multiple: flag(map, "multiple", path)?,
                    source,
                }
            }
            other => {
                return Err(ConfigError::UnknownType {
                    path: path.to_string(),
                    type_name: other.to_string(),
                })
            }
        };
        Ok(field_type)
    }

    fn container_children(
        &self,
        map: &Map<String, Value>,
        path: &str,
        kind: &'static str,
    ) -> Result<Vec<FieldSpec>, ConfigError> {
        let raw = map
            .get("fields")
            .or_else(|| map.get("children"))
            .filter(|v| !v.is_null());
        let children = match raw {
            Some(raw) => self.parse_children(raw, path)?,
            None => Vec::new(),
        };
        if children.is_empty() {
            return Err(ConfigError::MissingChildren {
                path: path.to_string(),
                kind,
            });
        }
        Ok(children)
    }
}

fn relation(kind: &str, map: &Map<String, Value>, path: &str) -> Result<FieldType, ConfigError> {
    let kind = match kind {
        "user" => RelationKind::User,
        "term" => RelationKind::Term,
        _ => RelationKind::Post,
    };
    Ok(FieldType::Relation {
        kind,
        multiple: flag(map, "multiple", path)?,
        roles: string_list(map, "roles", path)?,
    })
}

fn invalid(path: &str, key: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        path: path.to_string(),
        message: format!("'{key}' must be {expected}"),
    }
}

fn optional_string(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(invalid(path, key, "a string")),
    }
}

fn flag(map: &Map<String, Value>, key: &str, path: &str) -> Result<bool, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(invalid(path, key, "true or false")),
    }
}

fn optional_number(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<f64>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(path, key, "a number")),
        Some(_) => Err(invalid(path, key, "a number")),
    }
}

/// A string, or a list of strings.
fn string_list(map: &Map<String, Value>, key: &str, path: &str) -> Result<Vec<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(path, key, "a string or a list of strings"))
            })
            .collect(),
        Some(_) => Err(invalid(path, key, "a string or a list of strings")),
    }
}

fn post_types(map: &Map<String, Value>, path: &str) -> Result<Vec<String>, ConfigError> {
    if map.contains_key("post_types") {
        string_list(map, "post_types", path)
    } else {
        string_list(map, "post_type", path)
    }
}

fn enum_value<T: serde::de::DeserializeOwned>(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<T>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
            ConfigError::InvalidValue {
                path: path.to_string(),
                message: format!("'{key}': {e}"),
            }
        }),
    }
}

fn text_filter(map: &Map<String, Value>, path: &str) -> Result<TextFilter, ConfigError> {
    let allowed_tags = if map.contains_key("allowed_tags") {
        Some(
            string_list(map, "allowed_tags", path)?
                .into_iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        )
    } else {
        None
    };
    Ok(TextFilter { allowed_tags })
}

/// Fills `step` with the type's unit when not configured.
fn number_constraints(
    map: &Map<String, Value>,
    path: &str,
    default_step: f64,
) -> Result<NumberConstraints, ConfigError> {
    let constraints = NumberConstraints {
        min: optional_number(map, "min", path)?,
        max: optional_number(map, "max", path)?,
        step: Some(optional_number(map, "step", path)?.unwrap_or(default_step)),
    };
    if constraints.step.is_some_and(|s| s <= 0.0) {
        return Err(invalid(path, "step", "positive"));
    }
    if let (Some(min), Some(max)) = (constraints.min, constraints.max) {
        if min > max {
            return Err(ConfigError::InvalidValue {
                path: path.to_string(),
                message: format!("min {min} is greater than max {max}"),
            });
        }
    }
    Ok(constraints)
}

fn max_items(map: &Map<String, Value>, path: &str) -> Result<Option<usize>, ConfigError> {
    match map.get("max_items") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) if v > 0 => Ok(Some(v as usize)),
            Some(v) => Err(ConfigError::InvalidMaxItems {
                path: path.to_string(),
                value: v,
            }),
            None => Err(invalid(path, "max_items", "a whole number")),
        },
        Some(_) => Err(invalid(path, "max_items", "a whole number")),
    }
}

/// `{value: label}` map, or a list of `{value, label}` maps or bare values.
fn parse_options(raw: &Value, path: &str) -> Result<Vec<SelectOption>, ConfigError> {
    match raw {
        Value::Object(map) => map
            .iter()
            .map(|(value, label)| {
                let label = match label {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(SelectOption::new(value.clone(), label))
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(SelectOption::new(s.clone(), s.clone())),
                Value::Number(n) => Ok(SelectOption::new(n.to_string(), n.to_string())),
                Value::Object(option) => {
                    let value = match option.get("value") {
                        Some(Value::String(s)) => s.clone(),
                        Some(Value::Number(n)) => n.to_string(),
                        _ => return Err(invalid(path, "options", "a list of {value, label}")),
                    };
                    let label = option
                        .get("label")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.clone());
                    Ok(SelectOption::new(value, label))
                }
                _ => Err(invalid(path, "options", "a list of {value, label}")),
            })
            .collect(),
        _ => Err(invalid(path, "options", "a map or a list")),
    }
}
