//! `pgtrigger.toml`: settings plus the databases commands connect to.
//!
//! ```toml
//! [settings]
//! schema = "public"
//! prune_on_install = true
//!
//! [[databases]]
//! name = "default"
//! url = "${DATABASE_URL}"
//!
//! [[databases]]
//! name = "audit"
//! url = "postgres://localhost/audit"
//! ```
//!
//! Without a config file, `DATABASE_URL` is used as the `default` database.

use pgtrigger::{DEFAULT_DATABASE, Settings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub config_path: Option<PathBuf>,
    pub file: ConfigFile,
}

impl ProjectConfig {
    /// Load `config_path`, falling back to `DATABASE_URL` when the file does
    /// not exist.
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let url = std::env::var("DATABASE_URL").map_err(|_| {
                anyhow::anyhow!(
                    "config file {} not found and DATABASE_URL is not set",
                    config_path.display()
                )
            })?;
            tracing::debug!(path = %config_path.display(), "no config file, using DATABASE_URL");
            return Ok(Self {
                config_path: None,
                file: ConfigFile {
                    settings: Settings::default(),
                    databases: vec![DatabaseConfig {
                        name: DEFAULT_DATABASE.to_string(),
                        url,
                    }],
                },
            });
        }

        let raw = std::fs::read_to_string(config_path).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file {}: {e}",
                config_path.display()
            )
        })?;
        let file = ConfigFile::parse(&raw).map_err(|e| {
            anyhow::anyhow!(
                "invalid config file {}: {e:#}",
                config_path.display()
            )
        })?;

        Ok(Self {
            config_path: Some(config_path.to_path_buf()),
            file,
        })
    }

    pub fn database(&self, name: &str) -> anyhow::Result<&DatabaseConfig> {
        self.file
            .databases
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| anyhow::anyhow!("database {name:?} is not configured"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub settings: Settings,
    pub databases: Vec<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: String,
    pub url: String,
}

impl ConfigFile {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut file: ConfigFile = toml::from_str(raw)?;
        file.expand_env()?;
        file.validate()?;
        Ok(file)
    }

    fn expand_env(&mut self) -> anyhow::Result<()> {
        for db in &mut self.databases {
            db.name = expand_env_vars(&db.name)?;
            db.url = expand_env_vars(&db.url)?;
        }
        self.settings.schema = expand_env_vars(&self.settings.schema)?;
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;

        if self.databases.is_empty() {
            anyhow::bail!("at least one [[databases]] entry is required");
        }

        let mut seen = std::collections::HashSet::<&str>::new();
        for db in &self.databases {
            if db.name.trim().is_empty() {
                anyhow::bail!("databases.name must not be empty");
            }
            if !seen.insert(db.name.as_str()) {
                anyhow::bail!("duplicate databases.name: {}", db.name);
            }
            if db.url.trim().is_empty() {
                anyhow::bail!("databases.url must not be empty (database: {})", db.name);
            }
        }

        Ok(())
    }
}

fn expand_env_vars(input: &str) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                anyhow::bail!("unterminated env var reference: ${{{key}");
            }
            if key.is_empty() {
                anyhow::bail!("invalid env var reference: ${{}}");
            }

            let v = std::env::var(&key)
                .map_err(|_| anyhow::anyhow!("missing env var for config expansion: {key}"))?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}
