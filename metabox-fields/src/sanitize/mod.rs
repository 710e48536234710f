//! Recursive, scope-aware sanitization of submitted field values.
//!
//! The sanitizer walks the field tree in declaration order. At every nesting
//! level it evaluates visibility against that level's own sibling values
//! (stored values, overlaid by the raw submission, overlaid by values already
//! sanitized in this call), built with the same [`scope_for`] the read path
//! uses. Then it either:
//!
//! - skips a hidden field, leaving its stored value untouched,
//! - skips a field whose `permission` the caller lacks,
//! - or coerces the incoming value by type, recursing into groups and
//!   repeater rows with the nested map as the new scope.
//!
//! A repeater row only has a stored counterpart when the submission names it
//! by key (`{"2": {...}}` is stored row 2). Rows submitted as a list start
//! empty, so a hidden or rejected child of such a row is omitted. A repeater
//! whose rows contain a field the caller may not edit is denied as a whole.
//!
//! Failures are collected per field and never abort siblings.
//!
//! [`scope_for`]: crate::visibility::scope_for

mod coerce;
pub mod html;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::capability::{AllowAll, Capabilities};
use crate::error::{PermissionDenied, ValidationError};
use crate::types::{FieldSpec, FieldType, RelationKind};
use crate::visibility::{is_visible, scope_for};

use coerce::{coerce_leaf, LeafContext};

/// Kinds of records a field may reference by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Post,
    User,
    Term,
    Attachment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::User => "user",
            EntityKind::Term => "term",
            EntityKind::Attachment => "attachment",
        }
    }
}

impl From<RelationKind> for EntityKind {
    fn from(kind: RelationKind) -> Self {
        match kind {
            RelationKind::Post => EntityKind::Post,
            RelationKind::User => EntityKind::User,
            RelationKind::Term => EntityKind::Term,
        }
    }
}

/// Host lookup used to validate referenced ids.
pub trait EntityLookup: Send + Sync {
    fn exists(&self, kind: EntityKind, id: u64) -> bool;

    /// Roles held by a user. Only consulted for user relations with `roles`.
    fn user_roles(&self, _user_id: u64) -> Vec<String> {
        Vec::new()
    }
}

/// Treats every id as existing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeExists;

impl EntityLookup for AssumeExists {
    fn exists(&self, _kind: EntityKind, _id: u64) -> bool {
        true
    }
}

/// Result of sanitizing one scope of submitted values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizeOutcome {
    /// Fields to write, by key. Fields absent here keep their stored value.
    pub values: Map<String, Value>,
    /// Dotted paths of hidden fields that were left untouched.
    pub frozen: Vec<String>,
    /// Fields skipped because a capability check failed.
    pub denied: Vec<PermissionDenied>,
    pub errors: Vec<ValidationError>,
}

impl SanitizeOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Inputs besides the submission itself.
pub struct SanitizeContext<'a> {
    /// Currently persisted values for the same scope.
    pub stored: &'a Map<String, Value>,
    pub capabilities: &'a dyn Capabilities,
}

/// Type-dispatched, recursive sanitizer.
#[derive(Clone)]
pub struct Sanitizer {
    lookup: Arc<dyn EntityLookup>,
    richtext_allowed_tags: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(Arc::new(AssumeExists))
    }
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer")
            .field("richtext_allowed_tags", &self.richtext_allowed_tags)
            .finish_non_exhaustive()
    }
}

impl Sanitizer {
    pub fn new(lookup: Arc<dyn EntityLookup>) -> Self {
        Self {
            lookup,
            richtext_allowed_tags: Vec::new(),
        }
    }

    /// Allow-list applied to richtext fields that do not declare their own.
    pub fn with_richtext_allowed_tags(mut self, tags: Vec<String>) -> Self {
        self.richtext_allowed_tags = tags;
        self
    }

    /// Sanitize with nothing stored and every capability granted.
    pub fn sanitize(&self, fields: &[FieldSpec], raw: &Map<String, Value>) -> SanitizeOutcome {
        let stored = Map::new();
        self.sanitize_with(
            fields,
            raw,
            &SanitizeContext {
                stored: &stored,
                capabilities: &AllowAll,
            },
        )
    }

    /// Sanitize `raw` against `fields`, honoring stored values and capabilities.
    pub fn sanitize_with(
        &self,
        fields: &[FieldSpec],
        raw: &Map<String, Value>,
        ctx: &SanitizeContext<'_>,
    ) -> SanitizeOutcome {
        let mut outcome = SanitizeOutcome::default();
        let values = self.sanitize_scope(
            fields,
            raw,
            Some(ctx.stored),
            "",
            ctx.capabilities,
            &mut outcome,
        );
        outcome.values = values;
        outcome
    }

    /// Sanitize one sibling scope. Returns only the fields that were updated.
    fn sanitize_scope(
        &self,
        fields: &[FieldSpec],
        raw: &Map<String, Value>,
        stored: Option<&Map<String, Value>>,
        prefix: &str,
        caps: &dyn Capabilities,
        outcome: &mut SanitizeOutcome,
    ) -> Map<String, Value> {
        let mut current = stored.cloned().unwrap_or_default();
        for (key, value) in raw {
            current.insert(key.clone(), value.clone());
        }
        let mut scope = scope_for(fields, &current, caps);

        let mut updated = Map::new();
        for field in fields {
            let path = join_path(prefix, &field.key);
            let stored_value = stored.and_then(|s| s.get(&field.key));

            if let Some(capability) = denied_capability(field, caps) {
                debug!(field = %path, %capability, "permission denied, field skipped");
                outcome.denied.push(PermissionDenied {
                    path,
                    capability: capability.to_string(),
                });
                continue;
            }

            if !is_visible(field.visibility.as_ref(), &scope) {
                debug!(field = %path, "hidden field left untouched");
                outcome.frozen.push(path);
                restore(&mut scope, field, stored_value);
                continue;
            }

            let incoming = match raw.get(&field.key) {
                Some(value) => value,
                // Unchecked boxes are omitted by HTML forms.
                None if field.field_type == FieldType::Checkbox && field.sanitize.is_none() => {
                    &Value::Null
                }
                None => continue,
            };

            match self.sanitize_field(field, incoming, stored_value, &path, caps, outcome) {
                Ok(value) => {
                    scope.insert(field.key.clone(), value.clone());
                    updated.insert(field.key.clone(), value);
                }
                Err(error) => {
                    debug!(field = %path, %error, "field rejected");
                    outcome.errors.push(error);
                    restore(&mut scope, field, stored_value);
                }
            }
        }
        updated
    }

    fn sanitize_field(
        &self,
        field: &FieldSpec,
        raw: &Value,
        stored: Option<&Value>,
        path: &str,
        caps: &dyn Capabilities,
        outcome: &mut SanitizeOutcome,
    ) -> Result<Value, ValidationError> {
        if let Some(callback) = &field.sanitize {
            return (callback.func())(raw).map_err(|message| ValidationError::new(path, message));
        }

        match &field.field_type {
            FieldType::Group { children } => {
                let empty = Map::new();
                let raw_map = match raw {
                    Value::Object(map) => map,
                    Value::Null => &empty,
                    _ => return Err(ValidationError::new(path, "expected a group of values")),
                };
                let stored_map = stored.and_then(Value::as_object);
                let updated = self.sanitize_scope(children, raw_map, stored_map, path, caps, outcome);
                Ok(Value::Object(merge_children(children, stored_map, updated)))
            }
            FieldType::Repeater {
                children,
                max_items,
            } => {
                let rows = self.submitted_rows(raw, path, outcome)?;
                let stored_rows = stored.and_then(Value::as_array);
                let mut out = Vec::new();
                for (row_key, row) in rows {
                    if max_items.is_some_and(|max| out.len() >= max) {
                        debug!(field = %path, max = ?max_items, "extra repeater rows dropped");
                        break;
                    }
                    let index = out.len();
                    let stored_row = row_key
                        .and_then(|key| stored_rows?.get(key))
                        .and_then(Value::as_object);
                    let row_path = join_path(path, &index.to_string());
                    let updated =
                        self.sanitize_scope(children, row, stored_row, &row_path, caps, outcome);
                    out.push(Value::Object(merge_children(children, stored_row, updated)));
                }
                Ok(Value::Array(out))
            }
            leaf => {
                let ctx = LeafContext {
                    lookup: self.lookup.as_ref(),
                    richtext_allowed_tags: &self.richtext_allowed_tags,
                };
                coerce_leaf(leaf, raw, &ctx).map_err(|message| ValidationError::new(path, message))
            }
        }
    }

    /// Rows in submitted order with empty rows removed, each with the stored
    /// row index it names. Accepts a list (no names) or an object keyed by
    /// stored row index.
    fn submitted_rows<'v>(
        &self,
        raw: &'v Value,
        path: &str,
        outcome: &mut SanitizeOutcome,
    ) -> Result<Vec<(Option<usize>, &'v Map<String, Value>)>, ValidationError> {
        let items: Vec<(Option<usize>, &Value)> = match raw {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().map(|item| (None, item)).collect(),
            Value::Object(map) => map
                .iter()
                .map(|(key, item)| (key.trim().parse::<usize>().ok(), item))
                .collect(),
            _ => return Err(ValidationError::new(path, "expected a list of rows")),
        };
        let mut rows = Vec::new();
        for (position, (row_key, item)) in items.into_iter().enumerate() {
            match item {
                Value::Object(row) if !is_blank(item) => rows.push((row_key, row)),
                _ if is_blank(item) => {}
                _ => outcome.errors.push(ValidationError::new(
                    join_path(path, &position.to_string()),
                    "row is not a group of values",
                )),
            }
        }
        Ok(rows)
    }
}

/// Children in declaration order: updated value, else stored value.
fn merge_children(
    children: &[FieldSpec],
    stored: Option<&Map<String, Value>>,
    mut updated: Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = Map::new();
    for child in children {
        let value = updated
            .remove(&child.key)
            .or_else(|| stored.and_then(|s| s.get(&child.key)).cloned());
        if let Some(value) = value {
            merged.insert(child.key.clone(), value);
        }
    }
    merged
}

/// Put the kept value (stored, else default) back into the scope.
fn restore(scope: &mut Map<String, Value>, field: &FieldSpec, stored: Option<&Value>) {
    let value = stored.cloned().unwrap_or_else(|| field.default_value());
    scope.insert(field.key.clone(), value);
}

/// The capability that stops the caller from editing `field`.
///
/// For a repeater this includes every field inside its rows.
fn denied_capability<'f>(field: &'f FieldSpec, caps: &dyn Capabilities) -> Option<&'f str> {
    match &field.field_type {
        FieldType::Repeater { .. } => denied_within(field, caps),
        _ => field.permission.as_deref().filter(|c| !caps.can(c)),
    }
}

fn denied_within<'f>(field: &'f FieldSpec, caps: &dyn Capabilities) -> Option<&'f str> {
    if let Some(capability) = field.permission.as_deref().filter(|c| !caps.can(c)) {
        return Some(capability);
    }
    match &field.field_type {
        FieldType::Group { children } | FieldType::Repeater { children, .. } => {
            children.iter().find_map(|child| denied_within(child, caps))
        }
        _ => None,
    }
}

/// Null, whitespace-only strings, and containers holding only blanks.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_blank),
        Value::Object(map) => map.values().all(is_blank),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
