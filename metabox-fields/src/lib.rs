//! Declarative field groups for content editors
//!
//! `metabox-fields` turns a nested field-group configuration into a typed
//! field tree, decides which fields are visible from their sibling values,
//! and sanitizes submitted values recursively before they are persisted.
//! Rendering and storage belong to the host; this crate only receives and
//! returns values.
//!
//! # Architecture
//!
//! - **Config Parser** ([`config`]): raw YAML/JSON config to a canonical [`FieldGroup`]
//! - **Visibility Evaluator** ([`visibility`]): pure show/hide decision per field
//! - **Sanitizer** ([`sanitize`]): type-dispatched, recursive over groups and repeater rows
//! - **Field Registry** ([`registry`]): group id to field group, plus a process-wide instance
//! - **Adapters**: [`MetaStore`] for persistence, [`Capabilities`] for access checks,
//!   search callbacks for `async` fields ([`search`])
//!
//! Hidden fields are frozen: a save never clears them, so revealing a field
//! again shows the last value saved while it was visible.

pub mod callbacks;
pub mod capability;
pub mod config;
pub mod error;
pub mod loader;
pub mod registry;
pub mod sanitize;
pub mod search;
pub mod settings;
pub mod store;
pub mod types;
pub mod values;
pub mod visibility;

pub use callbacks::{Callback, Callbacks, SearchOption};
pub use capability::{AllowAll, Capabilities, CapabilitySet};
pub use config::ConfigParser;
pub use error::{
    ConfigError, FieldsError, PermissionDenied, Result, SearchError, StoreError, ValidationError,
};
pub use registry::FieldRegistry;
pub use sanitize::{EntityKind, EntityLookup, SanitizeContext, SanitizeOutcome, Sanitizer};
pub use search::SearchRequest;
pub use settings::Settings;
pub use store::{MemoryMetaStore, MetaStore};
pub use types::{FieldGroup, FieldSpec, FieldType, SelectOption};
pub use values::{MetaService, SaveReport};
pub use visibility::{is_visible, VisibilityRule};
