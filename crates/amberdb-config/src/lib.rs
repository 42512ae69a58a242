//! Connection and session configuration for AmberDB.
//!
//! Configuration is explicit: a [`Config`] is parsed from TOML, validated,
//! and handed to the session factory at construction time. There is no
//! process-wide implicit configuration source.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

///
/// Config
///
/// Top-level configuration supplied at process start.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub datasource: DataSource,
    pub session: SessionDefaults,
}

impl Config {
    /// Parse and validate a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;

        Ok(config)
    }

    /// Load, parse, and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_toml(&text)
    }

    /// Check field-level constraints that TOML parsing cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasource.address.is_empty() {
            return Err(ConfigError::Invalid(
                "datasource.address must not be empty".to_string(),
            ));
        }
        if self.datasource.schema.is_empty() {
            return Err(ConfigError::Invalid(
                "datasource.schema must not be empty".to_string(),
            ));
        }
        if self.datasource.credentials.username.is_empty()
            && !self.datasource.credentials.password.is_empty()
        {
            return Err(ConfigError::Invalid(
                "datasource.credentials.password set without a username".to_string(),
            ));
        }

        Ok(())
    }
}

///
/// DataSource
///
/// Where the relational store lives and how to authenticate against it.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSource {
    /// Store address, e.g. `host:port` or a backend-specific locator.
    pub address: String,

    /// Logical schema (namespace) all mapped tables live in.
    pub schema: String,

    pub credentials: Credentials,
}

impl Default for DataSource {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            schema: "public".to_string(),
            credentials: Credentials::default(),
        }
    }
}

///
/// Credentials
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

///
/// SessionDefaults
///
/// Defaults applied to every session the factory opens.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionDefaults {
    /// Emit rendered statements and flush plans at debug level.
    pub debug: bool,

    /// Flush pending writes before every query so reads observe the
    /// session's own writes.
    pub flush_before_query: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            debug: false,
            flush_before_query: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = Config::from_toml(
            r#"
            [datasource]
            address = "db.internal:5432"
            schema = "shop"

            [datasource.credentials]
            username = "app"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.datasource.address, "db.internal:5432");
        assert_eq!(config.datasource.schema, "shop");
        assert_eq!(config.datasource.credentials.username, "app");
        assert!(config.session.flush_before_query);
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.datasource.address, "localhost");
        assert_eq!(config.datasource.schema, "public");
        assert!(!config.session.debug);
    }

    #[test]
    fn rejects_empty_address() {
        let err = Config::from_toml(
            r#"
            [datasource]
            address = ""
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = Config::from_toml(
            r#"
            [datasource]
            adress = "typo"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_password_without_username() {
        let err = Config::from_toml(
            r#"
            [datasource.credentials]
            password = "secret"
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
