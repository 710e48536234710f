//! Remote search endpoint for `async` fields.
//!
//! A request names a group and a field (dotted for one level of nesting)
//! and either a search term or a list of ids to hydrate. The field's search
//! callback produces ordered `{value, label}` pairs.
//!
//! A field the caller may not read is reported as `invalid_field`, the same
//! as a field that does not exist.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub use crate::callbacks::SearchOption;
use crate::capability::Capabilities;
use crate::error::SearchError;
use crate::registry::FieldRegistry;
use crate::types::FieldType;

/// Wire request for the search endpoint.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub group_id: String,
    pub field_key: String,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(group_id: impl Into<String>, field_key: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            field_key: field_key.into(),
            ..Default::default()
        }
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Hydrate these ids instead of searching.
    pub fn with_include<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(ids.into_iter().map(Into::into).collect());
        self
    }
}

/// Resolve a search request against the registry.
///
/// The group `capability` and the `permission` of the field and its parent
/// are checked first. When `include` is present and non-empty the callback
/// receives the ids and an empty query.
pub fn search(
    registry: &FieldRegistry,
    capabilities: &dyn Capabilities,
    request: &SearchRequest,
) -> Result<Vec<SearchOption>, SearchError> {
    let invalid_field = || SearchError::InvalidField {
        group_id: request.group_id.clone(),
        field_key: request.field_key.clone(),
    };
    let group = registry.get(&request.group_id).ok_or_else(invalid_field)?;
    let parent_key = request
        .field_key
        .split_once('.')
        .map_or(request.field_key.as_str(), |(parent, _)| parent);
    let (Some(parent), Some(field)) = (group.field(parent_key), group.field_path(&request.field_key))
    else {
        return Err(invalid_field());
    };

    let denied = group
        .capability
        .iter()
        .chain(&parent.permission)
        .chain(&field.permission)
        .find(|capability| !capabilities.can(capability));
    if let Some(capability) = denied {
        debug!(
            group = %request.group_id,
            field = %request.field_key,
            %capability,
            "search denied"
        );
        return Err(invalid_field());
    }

    let FieldType::Async { source, .. } = &field.field_type else {
        return Err(SearchError::InvalidFieldType {
            field_key: request.field_key.clone(),
            kind: field.field_type.name(),
        });
    };
    let source = source.as_ref().ok_or_else(|| SearchError::InvalidCallback {
        field_key: request.field_key.clone(),
    })?;

    let include = request.include.as_deref().filter(|ids| !ids.is_empty());
    let query = match include {
        Some(_) => "",
        None => request.search.as_deref().unwrap_or_default().trim(),
    };
    debug!(
        group = %request.group_id,
        field = %request.field_key,
        callback = source.name(),
        %query,
        hydrate = include.is_some(),
        "remote search"
    );

    (source.func())(query, include).map_err(|message| {
        warn!(field = %request.field_key, %message, "search callback failed");
        SearchError::CallbackError {
            field_key: request.field_key.clone(),
            message,
        }
    })
}

/// Run a search and shape the wire response as `(status, body)`.
pub fn respond(
    registry: &FieldRegistry,
    capabilities: &dyn Capabilities,
    request: &SearchRequest,
) -> (u16, Value) {
    match search(registry, capabilities, request) {
        Ok(options) => (200, json!(options)),
        Err(e) => (e.status(), json!(e.to_body())),
    }
}
