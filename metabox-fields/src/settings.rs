//! Layered crate settings.
//!
//! Sources in precedence order (later overrides earlier):
//! 1. Built-in defaults
//! 2. An optional settings file (TOML, YAML, or JSON by extension)
//! 3. Environment variables prefixed `METAFIELDS_`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::sanitize::{EntityLookup, Sanitizer};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "METAFIELDS_";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory of field-group definitions to load at startup.
    pub definitions_dir: Option<PathBuf>,
    /// Meta-key prefix for groups that declare none.
    pub default_prefix: String,
    /// HTML tags kept in richtext fields without their own allow-list.
    pub richtext_allowed_tags: Vec<String>,
}

impl Settings {
    /// The layered provider chain, before extraction.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().to_lowercase().into()))
    }

    /// Load settings from defaults, `path` if given, and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let settings: Settings = Self::figment(path).extract()?;
        debug!(?settings, "settings loaded");
        Ok(settings)
    }

    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// A sanitizer configured with these settings.
    pub fn sanitizer(&self, lookup: Arc<dyn EntityLookup>) -> Sanitizer {
        Sanitizer::new(lookup).with_richtext_allowed_tags(self.richtext_allowed_tags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn defaults_without_sources() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    #[serial]
    fn file_values_are_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metafields.toml");
        fs::write(
            &path,
            r#"
definitions_dir = "groups"
default_prefix = "_mf_"
richtext_allowed_tags = ["p", "strong"]
"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(settings.definitions_dir, Some(PathBuf::from("groups")));
        assert_eq!(settings.default_prefix, "_mf_");
        assert_eq!(settings.richtext_allowed_tags, vec!["p", "strong"]);
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metafields.yaml");
        fs::write(&path, "default_prefix: _file_\n").unwrap();

        std::env::set_var("METAFIELDS_DEFAULT_PREFIX", "_env_");
        let settings = Settings::load_from(Some(&path));
        std::env::remove_var("METAFIELDS_DEFAULT_PREFIX");

        assert_eq!(settings.unwrap().default_prefix, "_env_");
    }
}
