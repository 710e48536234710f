//! Save and read workflows tying the registry, sanitizer, and store together.
//!
//! Saving sanitizes a submission against the group's stored values and
//! writes each updated top-level field under its meta key. Reading returns
//! stored values filled with defaults, optionally with hidden fields removed.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::capability::Capabilities;
use crate::error::{FieldsError, PermissionDenied, Result, StoreError, ValidationError};
use crate::registry::FieldRegistry;
use crate::sanitize::{SanitizeContext, Sanitizer};
use crate::store::MetaStore;
use crate::types::{FieldGroup, FieldSpec, FieldType};
use crate::visibility::{is_visible, scope_for};

/// What happened to one save submission.
#[derive(Debug, Default, Serialize)]
pub struct SaveReport {
    /// Top-level keys written to the store.
    pub saved: Vec<String>,
    /// Dotted paths of hidden fields left untouched.
    pub frozen: Vec<String>,
    pub denied: Vec<PermissionDenied>,
    pub errors: Vec<ValidationError>,
    #[serde(skip)]
    pub failed_writes: Vec<StoreError>,
}

impl SaveReport {
    /// No validation errors and no failed writes.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.failed_writes.is_empty()
    }
}

/// Per-request access to field values for registered groups.
pub struct MetaService<'a> {
    registry: &'a FieldRegistry,
    store: &'a dyn MetaStore,
    capabilities: &'a dyn Capabilities,
    sanitizer: Sanitizer,
    default_prefix: String,
}

impl<'a> MetaService<'a> {
    pub fn new(
        registry: &'a FieldRegistry,
        store: &'a dyn MetaStore,
        capabilities: &'a dyn Capabilities,
    ) -> Self {
        Self {
            registry,
            store,
            capabilities,
            sanitizer: Sanitizer::default(),
            default_prefix: String::new(),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Meta-key prefix for groups that do not declare one.
    pub fn with_default_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.default_prefix = prefix.into();
        self
    }

    fn group(&self, group_id: &str) -> Result<std::sync::Arc<FieldGroup>> {
        self.registry
            .get(group_id)
            .ok_or_else(|| FieldsError::GroupNotFound {
                id: group_id.to_string(),
            })
    }

    fn group_denied(&self, group: &FieldGroup) -> Option<PermissionDenied> {
        let capability = group.capability.as_ref()?;
        (!self.capabilities.can(capability)).then(|| PermissionDenied {
            path: group.id.clone(),
            capability: capability.clone(),
        })
    }

    fn field_allowed(&self, field: &FieldSpec) -> bool {
        readable(field, self.capabilities)
    }

    fn stored(&self, group: &FieldGroup, content_id: u64) -> Map<String, Value> {
        let mut stored = Map::new();
        for field in group.fields() {
            let key = group.meta_key(&field.key, &self.default_prefix);
            if let Some(value) = self.store.get(content_id, &key) {
                stored.insert(field.key.clone(), value);
            }
        }
        stored
    }

    /// Sanitize `raw` and persist every updated top-level field.
    ///
    /// Nothing is written when the group does not apply to `content_type` or
    /// the caller lacks the group's capability.
    pub fn save(
        &self,
        group_id: &str,
        content_type: &str,
        content_id: u64,
        raw: &Map<String, Value>,
    ) -> Result<SaveReport> {
        let group = self.group(group_id)?;
        let mut report = SaveReport::default();

        if !group.applies_to(content_type) {
            debug!(group = %group.id, %content_type, "group does not apply, nothing saved");
            return Ok(report);
        }
        if let Some(denied) = self.group_denied(&group) {
            debug!(group = %group.id, capability = %denied.capability, "save denied");
            report.denied.push(denied);
            return Ok(report);
        }

        let stored = self.stored(&group, content_id);
        let outcome = self.sanitizer.sanitize_with(
            group.fields(),
            raw,
            &SanitizeContext {
                stored: &stored,
                capabilities: self.capabilities,
            },
        );

        for (key, value) in outcome.values {
            let meta_key = group.meta_key(&key, &self.default_prefix);
            match self.store.set(content_id, &meta_key, value) {
                Ok(()) => report.saved.push(key),
                Err(e) => {
                    warn!(group = %group.id, content_id, key = %meta_key, %e, "meta write failed");
                    report.failed_writes.push(e);
                }
            }
        }
        report.frozen = outcome.frozen;
        report.denied = outcome.denied;
        report.errors = outcome.errors;

        debug!(
            group = %group.id,
            content_id,
            saved = report.saved.len(),
            errors = report.errors.len(),
            "field group saved"
        );
        Ok(report)
    }

    /// Stored values filled with defaults for every readable field, at every
    /// nesting level.
    pub fn read(
        &self,
        group_id: &str,
        content_type: &str,
        content_id: u64,
    ) -> Result<Map<String, Value>> {
        let group = self.group(group_id)?;
        if !group.applies_to(content_type) || self.group_denied(&group).is_some() {
            return Ok(Map::new());
        }
        let mut stored = self.stored(&group, content_id);
        let mut values = Map::new();
        for field in group.fields() {
            if !self.field_allowed(field) {
                continue;
            }
            values.insert(
                field.key.clone(),
                with_defaults(field, stored.remove(&field.key), self.capabilities),
            );
        }
        Ok(values)
    }

    /// Like [`MetaService::read`], with hidden fields removed at every level.
    pub fn read_visible(
        &self,
        group_id: &str,
        content_type: &str,
        content_id: u64,
    ) -> Result<Map<String, Value>> {
        let mut values = self.read(group_id, content_type, content_id)?;
        let group = self.group(group_id)?;
        retain_visible(group.fields(), &mut values, self.capabilities);
        Ok(values)
    }

    /// One value by `key` or `parent.child`, falling back to defaults.
    ///
    /// A child of a repeater yields that child's value from every row.
    /// Returns `None` for unknown paths and fields the caller may not read.
    pub fn get_value(&self, group_id: &str, content_id: u64, path: &str) -> Result<Option<Value>> {
        let group = self.group(group_id)?;
        if self.group_denied(&group).is_some() {
            return Ok(None);
        }
        let (top_key, child_key) = match path.split_once('.') {
            Some((parent, child)) => (parent, Some(child)),
            None => (path, None),
        };
        let (Some(top), Some(target)) = (group.field(top_key), group.field_path(path)) else {
            return Ok(None);
        };
        if !self.field_allowed(top) || !self.field_allowed(target) {
            return Ok(None);
        }

        let stored = self
            .store
            .get(content_id, &group.meta_key(top_key, &self.default_prefix));
        let value = with_defaults(top, stored, self.capabilities);
        let Some(child_key) = child_key else {
            return Ok(Some(value));
        };
        let value = match (&top.field_type, value) {
            (FieldType::Repeater { .. }, Value::Array(rows)) => Value::Array(
                rows.into_iter()
                    .map(|mut row| take_key(&mut row, child_key).unwrap_or(Value::Null))
                    .collect(),
            ),
            (_, mut value) => take_key(&mut value, child_key).unwrap_or_else(|| target.default_value()),
        };
        Ok(Some(value))
    }
}

fn take_key(value: &mut Value, key: &str) -> Option<Value> {
    value.as_object_mut()?.remove(key)
}

fn readable(field: &FieldSpec, caps: &dyn Capabilities) -> bool {
    field.permission.as_deref().is_none_or(|capability| caps.can(capability))
}

/// Fill missing children of stored groups and repeater rows with defaults,
/// leaving out children the caller may not read.
fn with_defaults(field: &FieldSpec, stored: Option<Value>, caps: &dyn Capabilities) -> Value {
    let stored = stored.unwrap_or_else(|| field.default_value());
    match (&field.field_type, stored) {
        (FieldType::Group { children }, Value::Object(map)) => {
            Value::Object(fill_children(children, map, caps))
        }
        (FieldType::Repeater { children, .. }, Value::Array(rows)) => Value::Array(
            rows.into_iter()
                .map(|row| match row {
                    Value::Object(map) => Value::Object(fill_children(children, map, caps)),
                    other => other,
                })
                .collect(),
        ),
        (_, stored) => stored,
    }
}

fn fill_children(
    children: &[FieldSpec],
    mut stored: Map<String, Value>,
    caps: &dyn Capabilities,
) -> Map<String, Value> {
    let mut filled = Map::new();
    for child in children.iter().filter(|child| readable(child, caps)) {
        filled.insert(child.key.clone(), with_defaults(child, stored.remove(&child.key), caps));
    }
    filled
}

/// Remove hidden fields, evaluating each level against its own siblings.
fn retain_visible(fields: &[FieldSpec], values: &mut Map<String, Value>, caps: &dyn Capabilities) {
    let scope = scope_for(fields, values, caps);
    for field in fields {
        if !is_visible(field.visibility.as_ref(), &scope) {
            values.remove(&field.key);
            continue;
        }
        match (&field.field_type, values.get_mut(&field.key)) {
            (FieldType::Group { children }, Some(Value::Object(map))) => {
                retain_visible(children, map, caps);
            }
            (FieldType::Repeater { children, .. }, Some(Value::Array(rows))) => {
                for row in rows.iter_mut() {
                    if let Value::Object(map) = row {
                        retain_visible(children, map, caps);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AllowAll, CapabilitySet};
    use crate::config::ConfigParser;
    use crate::store::MemoryMetaStore;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn registry() -> FieldRegistry {
        let mut registry = FieldRegistry::new();
        registry
            .register_raw(
                "pricing",
                &json!({
                    "post_types": "product",
                    "prefix": "_shop_",
                    "fields": {
                        "discount": {"type": "number", "default": 0, "min": 0, "max": 100},
                        "sale_start": {
                            "type": "datetime",
                            "visibility": {"field": "discount", "operator": ">", "value": 0}
                        },
                        "cost": {"type": "number", "permission": "view_costs"},
                        "box": {"type": "group", "fields": {
                            "width": {"type": "number"},
                            "unit": {"type": "select", "options": ["cm", "in"], "default": "cm"}
                        }}
                    }
                }),
                &ConfigParser::new(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn save_writes_prefixed_keys() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        let service = MetaService::new(&registry, &store, &AllowAll);

        let report = service
            .save(
                "pricing",
                "product",
                7,
                &obj(json!({"discount": "15", "sale_start": "2025-12-01 09:00"})),
            )
            .unwrap();

        assert!(report.is_ok());
        assert_eq!(report.saved, vec!["discount".to_string(), "sale_start".to_string()]);
        assert_eq!(store.get(7, "_shop_discount"), Some(json!(15)));
        assert_eq!(store.get(7, "_shop_sale_start"), Some(json!("2025-12-01T09:00")));
    }

    #[test]
    fn save_skips_groups_for_other_content_types() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        let service = MetaService::new(&registry, &store, &AllowAll);

        let report = service
            .save("pricing", "page", 7, &obj(json!({"discount": 5})))
            .unwrap();
        assert!(report.saved.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_group_is_an_error() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        let service = MetaService::new(&registry, &store, &AllowAll);
        assert!(matches!(
            service.read("nope", "product", 1),
            Err(FieldsError::GroupNotFound { .. })
        ));
    }

    #[test]
    fn read_fills_defaults_and_hides_denied_fields() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        store.set(3, "_shop_box", json!({"width": 4})).unwrap();
        store.set(3, "_shop_cost", json!(9)).unwrap();
        let caps = CapabilitySet::new(["edit_products"]);
        let service = MetaService::new(&registry, &store, &caps);

        let values = service.read("pricing", "product", 3).unwrap();
        assert_eq!(
            values,
            obj(json!({
                "discount": 0,
                "sale_start": "",
                "box": {"width": 4, "unit": "cm"}
            }))
        );
    }

    #[test]
    fn read_visible_drops_hidden_fields() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        store.set(3, "_shop_sale_start", json!("2025-12-01T09:00")).unwrap();
        let service = MetaService::new(&registry, &store, &AllowAll);

        let values = service.read_visible("pricing", "product", 3).unwrap();
        assert!(!values.contains_key("sale_start"));

        store.set(3, "_shop_discount", json!(10)).unwrap();
        let values = service.read_visible("pricing", "product", 3).unwrap();
        assert_eq!(values["sale_start"], json!("2025-12-01T09:00"));
    }

    #[test]
    fn read_visible_hides_nested_group_children() {
        let mut registry = FieldRegistry::new();
        registry
            .register_raw(
                "shipping",
                &json!({"fields": {"box": {"type": "group", "fields": {
                    "has_depth": {"type": "checkbox"},
                    "depth": {"type": "number", "visibility": {"has_depth": 1}},
                    "inner": {"type": "group", "fields": {
                        "fragile": {"type": "checkbox"},
                        "note": {"type": "text", "visibility": {"fragile": 1}}
                    }}
                }}}}),
                &ConfigParser::new(),
            )
            .unwrap();
        let store = MemoryMetaStore::new();
        store
            .set(1, "box", json!({"has_depth": 0, "depth": 7, "inner": {"fragile": 1, "note": "glass"}}))
            .unwrap();
        let service = MetaService::new(&registry, &store, &AllowAll);

        let values = service.read_visible("shipping", "post", 1).unwrap();
        assert_eq!(
            values["box"],
            json!({"has_depth": 0, "inner": {"fragile": 1, "note": "glass"}})
        );

        store.set(1, "box", json!({"has_depth": 1, "depth": 7})).unwrap();
        let values = service.read_visible("shipping", "post", 1).unwrap();
        assert_eq!(
            values["box"],
            json!({"has_depth": 1, "depth": 7, "inner": {"fragile": 0}})
        );
    }

    #[test]
    fn save_and_render_agree_when_a_sibling_is_denied() {
        let mut registry = FieldRegistry::new();
        registry
            .register_raw(
                "costs",
                &json!({"fields": {
                    "cost": {"type": "number", "permission": "view_costs"},
                    "margin": {
                        "type": "number",
                        "visibility": {"field": "cost", "operator": ">", "value": 0}
                    }
                }}),
                &ConfigParser::new(),
            )
            .unwrap();
        let store = MemoryMetaStore::new();
        store.set(1, "cost", json!(9)).unwrap();
        store.set(1, "margin", json!(2)).unwrap();

        let sales = CapabilitySet::new(["edit_products"]);
        let service = MetaService::new(&registry, &store, &sales);
        let report = service.save("costs", "post", 1, &obj(json!({"margin": "5"}))).unwrap();
        assert!(report.saved.is_empty());
        assert_eq!(report.frozen, vec!["margin".to_string()]);
        assert_eq!(store.get(1, "margin"), Some(json!(2)));
        assert!(service.read_visible("costs", "post", 1).unwrap().is_empty());

        let finance = CapabilitySet::new(["view_costs"]);
        let service = MetaService::new(&registry, &store, &finance);
        let report = service.save("costs", "post", 1, &obj(json!({"margin": "5"}))).unwrap();
        assert_eq!(report.saved, vec!["margin".to_string()]);
        assert_eq!(
            service.read_visible("costs", "post", 1).unwrap(),
            obj(json!({"cost": 9, "margin": 5}))
        );
    }

    #[test]
    fn group_capability_denies_save() {
        let mut registry = FieldRegistry::new();
        registry
            .register_raw(
                "secret",
                &json!({"capability": "manage_options", "fields": {"token": {"type": "text"}}}),
                &ConfigParser::new(),
            )
            .unwrap();
        let store = MemoryMetaStore::new();
        let caps = |cap: &str| cap == "edit_posts";
        let service = MetaService::new(&registry, &store, &caps);

        let report = service
            .save("secret", "post", 1, &obj(json!({"token": "abc"})))
            .unwrap();
        assert_eq!(report.denied[0].capability, "manage_options");
        assert!(store.is_empty());
        assert!(service.read("secret", "post", 1).unwrap().is_empty());
    }

    #[test]
    fn get_value_resolves_one_level() {
        let registry = registry();
        let store = MemoryMetaStore::new();
        store.set(5, "_shop_box", json!({"width": 12})).unwrap();
        let service = MetaService::new(&registry, &store, &AllowAll);

        assert_eq!(service.get_value("pricing", 5, "box.width").unwrap(), Some(json!(12)));
        assert_eq!(service.get_value("pricing", 5, "box.unit").unwrap(), Some(json!("cm")));
        assert_eq!(service.get_value("pricing", 5, "discount").unwrap(), Some(json!(0)));
        assert_eq!(service.get_value("pricing", 5, "box.width.x").unwrap(), None);
    }

    struct ReadOnly(MemoryMetaStore);

    impl MetaStore for ReadOnly {
        fn get(&self, content_id: u64, key: &str) -> Option<Value> {
            self.0.get(content_id, key)
        }

        fn set(&self, content_id: u64, key: &str, _value: Value) -> std::result::Result<(), StoreError> {
            Err(StoreError {
                content_id,
                key: key.to_string(),
                message: "read-only".into(),
            })
        }
    }

    #[test]
    fn failed_writes_are_reported() {
        let registry = registry();
        let store = ReadOnly(MemoryMetaStore::new());
        let service = MetaService::new(&registry, &store, &AllowAll);

        let report = service
            .save("pricing", "product", 1, &obj(json!({"discount": 3})))
            .unwrap();
        assert!(!report.is_ok());
        assert_eq!(report.failed_writes[0].key, "_shop_discount");
        assert!(report.saved.is_empty());
    }
}
