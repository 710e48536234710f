//! Injectable strategies that override built-in field behavior.
//!
//! Configuration refers to callbacks by name (`sanitize_callback: slugify`).
//! The parser resolves those names against a [`Callbacks`] table, so a
//! parsed [`FieldSpec`](crate::FieldSpec) holds the function value itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One label/value pair returned by a remote search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOption {
    pub value: String,
    pub label: String,
}

impl SearchOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// Replaces built-in coercion for a field. `Err` becomes a validation error.
pub type SanitizeFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Resolves a search query, or hydrates known ids when `include` is given.
pub type SearchFn =
    Arc<dyn Fn(&str, Option<&[String]>) -> Result<Vec<SearchOption>, String> + Send + Sync>;

/// Produces the option list of a select field at sanitize time.
pub type OptionsFn = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

/// A named callback attached to a field.
#[derive(Clone)]
pub struct Callback<F> {
    name: String,
    func: F,
}

impl<F> Callback<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> &F {
        &self.func
    }
}

impl<F> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.name).finish()
    }
}

// Two callbacks are the same if they were registered under the same name.
impl<F> PartialEq for Callback<F> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Named callback table consulted by the config parser.
#[derive(Clone, Default)]
pub struct Callbacks {
    sanitizers: HashMap<String, SanitizeFn>,
    searches: HashMap<String, SearchFn>,
    options: HashMap<String, OptionsFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a custom sanitizer.
    pub fn sanitizer<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.sanitizers.insert(name.into(), Arc::new(f));
        self
    }

    /// Add a remote-search source for async fields.
    pub fn search<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, Option<&[String]>) -> Result<Vec<SearchOption>, String>
            + Send
            + Sync
            + 'static,
    {
        self.searches.insert(name.into(), Arc::new(f));
        self
    }

    /// Add a dynamic option list for select fields.
    pub fn options<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Vec<(String, String)> + Send + Sync + 'static,
    {
        self.options.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get_sanitizer(&self, name: &str) -> Option<Callback<SanitizeFn>> {
        self.sanitizers
            .get(name)
            .map(|f| Callback::new(name, Arc::clone(f)))
    }

    pub fn get_search(&self, name: &str) -> Option<Callback<SearchFn>> {
        self.searches
            .get(name)
            .map(|f| Callback::new(name, Arc::clone(f)))
    }

    pub fn get_options(&self, name: &str) -> Option<Callback<OptionsFn>> {
        self.options
            .get(name)
            .map(|f| Callback::new(name, Arc::clone(f)))
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("sanitizers", &self.sanitizers.keys().collect::<Vec<_>>())
            .field("searches", &self.searches.keys().collect::<Vec<_>>())
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .finish()
    }
}
