//! Runtime settings.
//!
//! Settings are plain data, usually embedded in the host's own config file:
//!
//! ```toml
//! schema = "public"
//! prune_on_install = true
//! install_on_migrate = false
//! ```

use crate::error::{TriggerError, TriggerResult};
use crate::ident::Ident;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Schema holding the shared `_pgtrigger_should_ignore` function.
    pub schema: String,
    /// Prune orphaned triggers after bulk install/uninstall.
    pub prune_on_install: bool,
    /// Install triggers after the host runs its migrations.
    pub install_on_migrate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            prune_on_install: true,
            install_on_migrate: false,
        }
    }
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> TriggerResult<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> TriggerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TriggerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> TriggerResult<()> {
        let ident = Ident::parse(&self.schema)
            .map_err(|e| TriggerError::Config(format!("invalid schema {:?}: {e}", self.schema)))?;
        if ident.parts.len() != 1 {
            return Err(TriggerError::Config(format!(
                "schema must be a single identifier, got {:?}",
                self.schema
            )));
        }
        Ok(())
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_prune_on_install(mut self, prune: bool) -> Self {
        self.prune_on_install = prune;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.schema, "public");
        assert!(s.prune_on_install);
        assert!(!s.install_on_migrate);
    }

    #[test]
    fn parses_partial_toml() {
        let s = Settings::from_toml_str("prune_on_install = false\n").unwrap();
        assert_eq!(s.schema, "public");
        assert!(!s.prune_on_install);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_schema() {
        assert!(Settings::from_toml_str("nope = 1").is_err());
        assert!(Settings::from_toml_str("schema = \"a;b\"").is_err());
        assert!(Settings::from_toml_str("schema = \"a.b\"").is_err());
    }
}
