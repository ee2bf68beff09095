//! Configuration validation.

use super::{BackendKind, Config, DbConfig};
use crate::error::{DbError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_db(&config.source, "source")?;
    validate_db(&config.target, "target")?;

    // Cannot migrate a database into itself
    match (config.source.backend, config.target.backend) {
        (BackendKind::Sqlite, BackendKind::Sqlite)
            if config.source.path == config.target.path =>
        {
            return Err(DbError::Config(
                "source and target cannot be the same database file".into(),
            ));
        }
        (BackendKind::Postgres, BackendKind::Postgres)
            if config.source.host == config.target.host
                && config.source.port == config.target.port
                && config.source.database == config.target.database =>
        {
            return Err(DbError::Config(
                "source and target cannot be the same database".into(),
            ));
        }
        _ => {}
    }

    if config.migration.batch_size == 0 {
        return Err(DbError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.migration.retry_attempts == 0 {
        return Err(DbError::Config(
            "migration.retry_attempts must be at least 1".into(),
        ));
    }
    if config.migration.writers == 0 {
        return Err(DbError::Config(
            "migration.writers must be at least 1".into(),
        ));
    }
    // Each writer holds one target connection with an open transaction
    // while it waits for its commit turn. More writers than connections
    // leaves the next-to-commit batch unable to begin, and every batch
    // attempt then runs out its timeout against a starved pool.
    if config.migration.writers > config.target.pool.max_open as usize {
        return Err(DbError::Config(format!(
            "migration.writers ({}) must not exceed target.pool.max_open ({})",
            config.migration.writers, config.target.pool.max_open
        )));
    }

    Ok(())
}

/// Validate one backend's connection parameters.
pub fn validate_db(config: &DbConfig, which: &str) -> Result<()> {
    if config.pool.max_open == 0 {
        return Err(DbError::Config(format!(
            "{}.pool.max_open must be at least 1",
            which
        )));
    }

    match config.backend {
        BackendKind::Sqlite => {
            if config.path.as_os_str().is_empty() {
                return Err(DbError::Config(format!("{}.path is required", which)));
            }
        }
        BackendKind::Postgres => {
            if config.host.is_empty() {
                return Err(DbError::Config(format!("{}.host is required", which)));
            }
            if config.database.is_empty() {
                return Err(DbError::Config(format!("{}.database is required", which)));
            }
            if config.user.is_empty() {
                return Err(DbError::Config(format!("{}.user is required", which)));
            }
            match config.ssl_mode.as_str() {
                "disable" | "allow" | "prefer" | "require" | "verify-ca" | "verify-full" => {}
                other => {
                    return Err(DbError::Config(format!(
                        "{}.ssl_mode '{}' is not valid",
                        which, other
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationSettings;

    fn valid_config() -> Config {
        Config {
            source: DbConfig::sqlite("data/app.db"),
            target: DbConfig::postgres("localhost", 5432, "app", "password", "app_db"),
            migration: MigrationSettings::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_sqlite_path() {
        let mut config = valid_config();
        config.source.path = "".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_postgres_host() {
        let mut config = valid_config();
        config.target.host = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_postgres_user() {
        let mut config = valid_config();
        config.target.user = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "maybe".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_sqlite_file_rejected() {
        let mut config = valid_config();
        config.target = DbConfig::sqlite("data/app.db");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_postgres_database_rejected() {
        let mut config = valid_config();
        config.source = config.target.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = valid_config();
        config.migration.retry_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_writers_beyond_target_pool_rejected() {
        let mut config = valid_config();
        config.target.pool.max_open = 2;
        config.migration.writers = 4;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_open"));

        config.migration.writers = 2;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }
}
