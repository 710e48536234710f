//! The owned map from group id to canonical field group.
//!
//! Groups are registered during an initialization window and read
//! afterwards. Entries are held as `Arc<FieldGroup>` so a reader keeps a
//! consistent snapshot while a later registration replaces the entry.

use std::sync::{Arc, OnceLock, RwLock};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConfigParser;
use crate::error::ConfigError;
use crate::types::{FieldGroup, FieldSpec};

/// Registered field groups in registration order.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    groups: IndexMap<String, Arc<FieldGroup>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `group` under `id`. A prior entry under the same id is replaced.
    pub fn register(&mut self, id: impl Into<String>, group: FieldGroup) -> Arc<FieldGroup> {
        let id = id.into();
        let group = Arc::new(group);
        if self.groups.insert(id.clone(), Arc::clone(&group)).is_some() {
            debug!(group = %id, "field group replaced");
        } else {
            debug!(group = %id, fields = group.fields.len(), "field group registered");
        }
        group
    }

    /// Parse `raw` and install it under `id`.
    ///
    /// On a configuration error nothing is installed and any prior entry
    /// under `id` stays in place.
    pub fn register_raw(
        &mut self,
        id: &str,
        raw: &Value,
        parser: &ConfigParser,
    ) -> Result<Arc<FieldGroup>, ConfigError> {
        match parser.parse_with_id(id, raw) {
            Ok(group) => Ok(self.register(id, group)),
            Err(e) => {
                warn!(group = %id, %e, "rejecting invalid field group");
                Err(e)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<FieldGroup>> {
        self.groups.get(id).cloned()
    }

    /// Alias of [`FieldRegistry::get`] for renderers.
    pub fn get_group(&self, id: &str) -> Option<Arc<FieldGroup>> {
        self.get(id)
    }

    /// All groups in registration order.
    pub fn get_all_groups(&self) -> Vec<Arc<FieldGroup>> {
        self.groups.values().cloned().collect()
    }

    pub fn get_fields(&self, id: &str) -> Option<&[FieldSpec]> {
        self.groups.get(id).map(|g| g.fields())
    }

    /// Resolve `key` or `parent.child` within one group.
    pub fn get_field(&self, id: &str, key: &str) -> Option<&FieldSpec> {
        self.groups.get(id)?.field_path(key)
    }

    /// First top-level field named `key` across all groups, with its group id.
    pub fn find_field(&self, key: &str) -> Option<(&str, &FieldSpec)> {
        self.groups
            .iter()
            .find_map(|(id, group)| group.field(key).map(|f| (id.as_str(), f)))
    }

    /// Groups that apply to a content type, in registration order.
    pub fn groups_for(&self, content_type: &str) -> Vec<Arc<FieldGroup>> {
        self.groups
            .values()
            .filter(|g| g.applies_to(content_type))
            .cloned()
            .collect()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<FieldGroup>> {
        self.groups.shift_remove(id)
    }

    /// Drop every group. Intended for test isolation.
    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// The process-wide registry.
pub fn shared() -> &'static RwLock<FieldRegistry> {
    static REGISTRY: OnceLock<RwLock<FieldRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(FieldRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use tracing_test::traced_test;

    fn shipping() -> Value {
        json!({
            "title": "Shipping",
            "post_types": ["product"],
            "fields": {
                "weight": {"type": "number", "min": 0},
                "dimensions": {"type": "group", "fields": {
                    "width": {"type": "number"},
                    "height": {"type": "number"}
                }}
            }
        })
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = FieldRegistry::new();
        registry
            .register_raw("shipping", &shipping(), &ConfigParser::new())
            .unwrap();

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("shipping").unwrap().title, "Shipping");
        assert_eq!(registry.get_fields("shipping").unwrap().len(), 2);
        assert_eq!(registry.get_field("shipping", "dimensions.width").unwrap().key, "width");
        assert!(registry.get_field("shipping", "dimensions.depth").is_none());
        assert!(registry.get_field("missing", "weight").is_none());

        let (group, field) = registry.find_field("weight").unwrap();
        assert_eq!(group, "shipping");
        assert_eq!(field.key, "weight");
        assert_eq!(registry.groups_for("product").len(), 1);
        assert!(registry.groups_for("page").is_empty());
    }

    #[test]
    fn re_registration_replaces_and_keeps_old_snapshot() {
        let mut registry = FieldRegistry::new();
        let parser = ConfigParser::new();
        let first = registry.register_raw("shipping", &shipping(), &parser).unwrap();
        registry
            .register_raw(
                "shipping",
                &json!({"title": "Freight", "fields": {"weight": {"type": "number"}}}),
                &parser,
            )
            .unwrap();

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get("shipping").unwrap().title, "Freight");
        assert_eq!(first.title, "Shipping");
    }

    #[test]
    #[traced_test]
    fn invalid_group_is_not_installed() {
        let mut registry = FieldRegistry::new();
        let err = registry
            .register_raw(
                "shipping",
                &json!({"fields": {"dimensions": {"type": "group"}}}),
                &ConfigParser::new(),
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::MissingChildren { .. }));
        assert!(registry.get("shipping").is_none());
        assert!(registry.is_empty());
        assert!(logs_contain("rejecting invalid field group"));
    }

    #[test]
    fn remove_and_clear() {
        let mut registry = FieldRegistry::new();
        let parser = ConfigParser::new();
        registry.register_raw("a", &shipping(), &parser).unwrap();
        registry.register_raw("b", &shipping(), &parser).unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        let ids: Vec<_> = registry.get_all_groups().iter().map(|g| g.id.clone()).collect();
        assert_eq!(ids, vec!["b".to_string()]);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    #[serial]
    fn shared_registry_is_process_wide() {
        shared().write().unwrap().clear();
        shared()
            .write()
            .unwrap()
            .register_raw("shipping", &shipping(), &ConfigParser::new())
            .unwrap();

        assert!(shared().read().unwrap().get("shipping").is_some());
        shared().write().unwrap().clear();
        assert!(shared().read().unwrap().is_empty());
    }
}
