//! Data source configuration.
//!
//! Options live under a `database:` section of the application YAML:
//!
//! ```yaml
//! database:
//!   dialect: sqlite
//!   synchronize: true
//!   migrations_table: schema_history
//!   migrations_run: true
//! ```
//!
//! `R2E_ORM_<FIELD>` environment variables override file values.

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::query::is_valid_identifier;
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "R2E_ORM_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataSourceOptions {
    pub dialect: Dialect,
    /// Create missing tables from registered metadata on startup.
    pub synchronize: bool,
    pub migrations_table: String,
    /// Run pending migrations on startup, reverting one step on failure.
    pub migrations_run: bool,
    /// Fail instead of warning when an isolation level cannot be rendered.
    pub strict_isolation: bool,
    /// Log every compiled statement at debug level.
    pub logging: bool,
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            synchronize: false,
            migrations_table: "migrations".to_string(),
            migrations_run: false,
            strict_isolation: false,
            logging: true,
        }
    }
}

impl DataSourceOptions {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Default::default()
        }
    }

    /// Parse the `database:` section of a YAML document. A missing section
    /// yields the defaults.
    pub fn from_yaml_str(content: &str) -> OrmResult<Self> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| OrmError::Config(e.to_string()))?;
        let options = match yaml.get("database") {
            Some(section) => serde_yaml::from_value(section.clone())
                .map_err(|e| OrmError::Config(e.to_string()))?,
            None => Self::default(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrmError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    /// File, then process environment.
    pub fn load(path: impl AsRef<Path>) -> OrmResult<Self> {
        let mut options = Self::from_yaml_file(path)?;
        options.apply_env()?;
        Ok(options)
    }

    pub fn apply_env(&mut self) -> OrmResult<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `R2E_ORM_<FIELD>` overrides from any key/value source. Keys
    /// without the prefix are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> OrmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field.to_ascii_lowercase().as_str() {
                "dialect" => {
                    self.dialect = serde_yaml::from_str(value)
                        .map_err(|_| OrmError::Config(format!("unknown dialect '{value}'")))?;
                }
                "synchronize" => self.synchronize = parse_flag(field, value)?,
                "migrations_table" => self.migrations_table = value.to_string(),
                "migrations_run" => self.migrations_run = parse_flag(field, value)?,
                "strict_isolation" => self.strict_isolation = parse_flag(field, value)?,
                "logging" => self.logging = parse_flag(field, value)?,
                _ => tracing::debug!(key = key.as_ref(), "ignoring unknown override"),
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> OrmResult<()> {
        if !is_valid_identifier(&self.migrations_table, false) {
            return Err(OrmError::InvalidIdentifier {
                kind: "table",
                ident: self.migrations_table.clone(),
            });
        }
        Ok(())
    }
}

fn parse_flag(field: &str, value: &str) -> OrmResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(OrmError::Config(format!(
            "{ENV_PREFIX}{field}: expected a boolean, got '{value}'"
        ))),
    }
}
