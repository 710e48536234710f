//! Core field and field-group types.
//!
//! A [`FieldGroup`] owns an ordered tree of [`FieldSpec`] nodes. Each node's
//! [`FieldType`] is a closed enumeration carrying its type-specific
//! constraints; only `Group` and `Repeater` carry children, so the tree shape
//! and the value shape are checked by the same match.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::callbacks::{Callback, OptionsFn, SanitizeFn, SearchFn};
use crate::visibility::VisibilityRule;

/// A single option in a select field or an amount_type selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// What a relation field points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Post,
    User,
    Term,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Post => "post",
            RelationKind::User => "user",
            RelationKind::Term => "term",
        }
    }
}

/// Numeric constraints shared by `number` and `amount_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NumberConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// HTML allow-list for text-like fields. `None` strips all markup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TextFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tags: Option<Vec<String>>,
}

/// The type of a field, which determines the shape of its value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Text(TextFilter),
    Textarea(TextFilter),
    RichText(TextFilter),
    Number(NumberConstraints),
    Select {
        options: Vec<SelectOption>,
        multiple: bool,
        /// Replaces `options` when set.
        dynamic: Option<Callback<OptionsFn>>,
    },
    Checkbox,
    Url,
    Email,
    Color,
    Date,
    DateTime,
    Time,
    Image,
    File,
    Gallery {
        max_items: Option<usize>,
    },
    /// Stores ids of posts, users, or terms.
    Relation {
        kind: RelationKind,
        multiple: bool,
        roles: Vec<String>,
    },
    /// A number paired with a unit selector (`{amount, type}`).
    AmountType {
        amount: NumberConstraints,
        type_options: Vec<SelectOption>,
    },
    Group {
        children: Vec<FieldSpec>,
    },
    /// Zero or more rows, each shaped like `children`.
    Repeater {
        children: Vec<FieldSpec>,
        max_items: Option<usize>,
    },
    /// Options resolved through a remote search.
    Async {
        multiple: bool,
        source: Option<Callback<SearchFn>>,
    },
}

impl FieldType {
    /// The configuration name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text(_) => "text",
            FieldType::Textarea(_) => "textarea",
            FieldType::RichText(_) => "richtext",
            FieldType::Number(_) => "number",
            FieldType::Select { .. } => "select",
            FieldType::Checkbox => "checkbox",
            FieldType::Url => "url",
            FieldType::Email => "email",
            FieldType::Color => "color",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Time => "time",
            FieldType::Image => "image",
            FieldType::File => "file",
            FieldType::Gallery { .. } => "gallery",
            FieldType::Relation { kind, .. } => kind.as_str(),
            FieldType::AmountType { .. } => "amount_type",
            FieldType::Group { .. } => "group",
            FieldType::Repeater { .. } => "repeater",
            FieldType::Async { .. } => "async",
        }
    }

    /// Children of a group or repeater; empty for leaf types.
    pub fn children(&self) -> &[FieldSpec] {
        match self {
            FieldType::Group { children } | FieldType::Repeater { children, .. } => children,
            _ => &[],
        }
    }

    /// Whether the stored value is a list of selections.
    pub fn is_multiple(&self) -> bool {
        match self {
            FieldType::Select { multiple, .. }
            | FieldType::Relation { multiple, .. }
            | FieldType::Async { multiple, .. } => *multiple,
            FieldType::Gallery { .. } | FieldType::Repeater { .. } => true,
            _ => false,
        }
    }
}

/// One node in the field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub key: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub field_type: FieldType,
    pub default: Option<Value>,
    pub visibility: Option<VisibilityRule>,
    /// Capability required to read or save; `None` defers to the enclosing group.
    pub permission: Option<String>,
    /// Overrides built-in coercion entirely.
    pub sanitize: Option<Callback<SanitizeFn>>,
}

impl FieldSpec {
    /// A bare field of the given type with no constraints beyond the type's own.
    pub fn new(key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: None,
            description: None,
            field_type,
            default: None,
            visibility: None,
            permission: None,
            sanitize: None,
        }
    }

    pub fn children(&self) -> &[FieldSpec] {
        self.field_type.children()
    }

    /// Look up a direct child by key.
    pub fn child(&self, key: &str) -> Option<&FieldSpec> {
        self.children().iter().find(|c| c.key == key)
    }

    /// The value used when nothing is stored.
    ///
    /// The configured default wins; otherwise an empty value of the right
    /// shape. Groups build their map from their children's defaults.
    pub fn default_value(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match &self.field_type {
            FieldType::Number(_) | FieldType::Image | FieldType::File => Value::Null,
            FieldType::Checkbox => json!(0),
            FieldType::Relation { multiple: false, .. } => Value::Null,
            FieldType::AmountType { type_options, .. } => json!({
                "amount": Value::Null,
                "type": type_options.first().map(|o| o.value.clone()).unwrap_or_default(),
            }),
            FieldType::Group { children } => {
                let mut map = Map::new();
                for child in children {
                    map.insert(child.key.clone(), child.default_value());
                }
                Value::Object(map)
            }
            ft if ft.is_multiple() => Value::Array(Vec::new()),
            _ => Value::String(String::new()),
        }
    }
}

/// Where an editor panel is placed on the admin screen.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    #[default]
    Normal,
    Side,
    Advanced,
}

/// Ordering hint among panels sharing a context.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

/// Placement hints for the external renderer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    pub context: Context,
    pub priority: Priority,
}

/// A named group of fields attached to one or more content types.
///
/// Immutable once registered; re-registering under the same id replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub id: String,
    pub title: String,
    /// Empty means every content type.
    pub post_types: Vec<String>,
    pub placement: Placement,
    pub capability: Option<String>,
    pub prefix: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl FieldGroup {
    /// Top-level fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a top-level field by key.
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Resolve `key` or `parent.child`. Only one level of nesting is resolvable.
    pub fn field_path(&self, path: &str) -> Option<&FieldSpec> {
        match path.split_once('.') {
            None => self.field(path),
            Some((parent, child)) if !child.contains('.') => self.field(parent)?.child(child),
            Some(_) => None,
        }
    }

    /// Whether this group is shown for the given content type.
    pub fn applies_to(&self, content_type: &str) -> bool {
        self.post_types.is_empty() || self.post_types.iter().any(|t| t == content_type)
    }

    /// The storage key for a top-level field.
    pub fn meta_key(&self, key: &str, default_prefix: &str) -> String {
        let prefix = self.prefix.as_deref().unwrap_or(default_prefix);
        format!("{prefix}{key}")
    }
}
