//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Parsing and validation are separate steps: callers that overlay
    /// values from elsewhere (CLI flags) apply them first, then call
    /// [`validate`](Config::validate).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_minimal() {
        let yaml = r#"
source:
  backend: sqlite
  path: data/app.db
target:
  backend: postgres
  host: db.internal
  user: app
  password: secret
  database: app_db
migration:
  tables: [members, savings_groups, loans]
  batch_size: 250
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.source.backend, BackendKind::Sqlite);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.ssl_mode, "prefer");
        assert_eq!(config.migration.batch_size, 250);
        assert_eq!(config.migration.retry_attempts, 3);
        assert_eq!(
            config.migration.tables,
            vec!["members", "savings_groups", "loans"]
        );
    }

    #[test]
    fn test_from_yaml_rejects_unknown_backend() {
        let yaml = r#"
source:
  backend: oracle
target:
  backend: sqlite
  path: b.db
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_settings_to_job() {
        let mut settings = MigrationSettings::default();
        settings.tables = vec!["members".into()];
        settings.timeout_seconds = 5;
        let job = settings.to_job();
        assert_eq!(job.attempt_timeout.as_secs(), 5);
        assert!(job.cursors.is_empty());
    }
}
