//! TOML-based configuration system for propsync.
//!
//! The bind password is never stored in the file: `bind_password_env` names
//! an environment variable that is resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::convert::ConverterKind;
use crate::errors::ConfigError;
use crate::models::{AttributeDescriptor, Multiplicity};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory server and user lookup settings.
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    /// Optional SQLite store for the mapping table and audit log.
    #[serde(default)]
    pub store: StoreConfig,

    /// The configured attribute mapping table, in order.
    #[serde(default)]
    pub attributes: Vec<AttributeMappingConfig>,

    /// Converter registrations applied on top of the standard syntaxes.
    #[serde(default)]
    pub converters: Vec<ConverterRegistration>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Search scope for user lookups.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    One,
    #[default]
    Sub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// `ldap://` or `ldaps://` URL of the directory server.
    pub url: String,

    /// DN to bind as. Anonymous when absent.
    #[serde(default)]
    pub bind_dn: Option<String>,

    /// Environment variable holding the bind password.
    #[serde(default)]
    pub bind_password_env: Option<String>,

    /// Resolved bind password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub bind_password: Option<String>,

    /// Base DN under which user entries live.
    pub users_base: String,

    #[serde(default)]
    pub users_scope: SearchScope,

    /// Attribute holding the user id (default `uid`).
    #[serde(default = "default_uid_attribute")]
    pub uid_attribute: String,

    /// Object classes whose attribute types are resolved from the schema.
    #[serde(default = "default_user_object_classes")]
    pub user_object_classes: Vec<String>,

    /// Connect and operation timeout in seconds (default 10).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// How long a fetched user entry is reused, in seconds (default 30).
    /// `0` disables the cache.
    #[serde(default = "default_user_cache_ttl")]
    pub user_cache_ttl_secs: u64,
}

fn default_uid_attribute() -> String {
    "uid".into()
}
fn default_user_object_classes() -> Vec<String> {
    ["top", "person", "organizationalPerson", "inetOrgPerson"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_timeout() -> u64 {
    10
}
fn default_user_cache_ttl() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Schema / store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Syntax assumed for attribute types whose supertype chain declares none.
    #[serde(default)]
    pub default_syntax: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database. No store is used when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Mapping table and converters
// ---------------------------------------------------------------------------

/// One `[[attributes]]` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeMappingConfig {
    /// Directory attribute name.
    pub ldap_name: String,
    /// Application property name.
    pub public_name: String,
    #[serde(default)]
    pub multivalued: bool,
}

impl AttributeMappingConfig {
    pub fn to_descriptor(&self) -> AttributeDescriptor {
        AttributeDescriptor::new(
            self.ldap_name.trim(),
            self.public_name.trim(),
            Multiplicity::from_multivalued(self.multivalued),
        )
    }
}

/// One `[[converters]]` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConverterRegistration {
    /// Syntax OID; a `{length}` bound is ignored.
    pub syntax: String,
    pub kind: ConverterKind,
    /// Restrict the registration to one attribute name.
    #[serde(default)]
    pub attribute: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!(
            attributes = config.attributes.len(),
            converters = config.converters.len(),
            "configuration parsed successfully"
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; the session then
    /// binds with an empty password.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.directory.bind_password_env {
            self.directory.bind_password =
                resolve_optional_env(env_name, "directory.bind_password_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.directory.url.trim();
        if url.is_empty() {
            return Err(invalid("directory.url", "directory URL must not be empty"));
        }
        if !(url.starts_with("ldap://") || url.starts_with("ldaps://")) {
            return Err(invalid(
                "directory.url",
                "directory URL must start with ldap:// or ldaps://",
            ));
        }
        if self.directory.users_base.trim().is_empty() {
            return Err(invalid("directory.users_base", "users base DN must not be empty"));
        }
        if self.directory.uid_attribute.trim().is_empty() {
            return Err(invalid("directory.uid_attribute", "uid attribute must not be empty"));
        }
        if self.directory.timeout_secs == 0 {
            return Err(invalid("directory.timeout_secs", "timeout must be > 0"));
        }

        let mut pairs = HashSet::new();
        let mut public_names = HashSet::new();
        for (i, attr) in self.attributes.iter().enumerate() {
            let ldap_name = attr.ldap_name.trim();
            let public_name = attr.public_name.trim();
            if ldap_name.is_empty() {
                return Err(invalid(
                    &format!("attributes[{}].ldap_name", i),
                    "LDAP attribute name must not be empty",
                ));
            }
            if !pairs.insert((ldap_name.to_ascii_lowercase(), public_name.to_string())) {
                return Err(invalid(
                    &format!("attributes[{}]", i),
                    &format!("duplicate mapping {} -> {}", ldap_name, public_name),
                ));
            }
            if !public_name.is_empty() && !public_names.insert(public_name.to_string()) {
                return Err(invalid(
                    &format!("attributes[{}].public_name", i),
                    &format!("property '{}' is mapped more than once", public_name),
                ));
            }
        }

        for (i, reg) in self.converters.iter().enumerate() {
            if reg.syntax.trim().is_empty() {
                return Err(invalid(
                    &format!("converters[{}].syntax", i),
                    "syntax OID must not be empty",
                ));
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[logging]
level = "debug"

[directory]
url = "ldap://ldap.example.com"
bind_dn = "cn=admin,dc=example,dc=com"
bind_password_env = "LDAP_BIND_PASSWORD"
users_base = "ou=people,dc=example,dc=com"
users_scope = "one"
user_object_classes = ["person", "inetOrgPerson"]

[schema]
default_syntax = "1.3.6.1.4.1.1466.115.121.1.15"

[store]
path = "/tmp/propsync.db"

[[attributes]]
ldap_name = "cn"
public_name = "fullname"

[[attributes]]
ldap_name = "telephoneNumber"
public_name = "phones"
multivalued = true

[[converters]]
syntax = "1.3.6.1.4.1.1466.115.121.1.36"
kind = "numeric"

[[converters]]
syntax = "1.3.6.1.4.1.1466.115.121.1.15"
kind = "integer"
attribute = "employeeNumber"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.directory.users_scope, SearchScope::One);
        assert_eq!(config.directory.uid_attribute, "uid");
        assert_eq!(config.attributes.len(), 2);
        assert_eq!(
            config.attributes[1].to_descriptor(),
            AttributeDescriptor::multi("telephoneNumber", "phones")
        );
        assert_eq!(config.converters[0].kind, ConverterKind::Numeric);
        assert_eq!(config.converters[1].attribute.as_deref(), Some("employeeNumber"));
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/propsync.db")));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.directory.url, "ldap://ldap.example.com");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = AppConfig::from_toml("[directory\nurl = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = AppConfig::from_toml(sample_toml()).unwrap();
        config.directory.url = "http://ldap.example.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "directory.url"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_public_name() {
        let mut config = AppConfig::from_toml(sample_toml()).unwrap();
        config.attributes.push(AttributeMappingConfig {
            ldap_name: "displayName".into(),
            public_name: "fullname".into(),
            multivalued: false,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "attributes[2].public_name"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::from_toml(sample_toml()).unwrap();
        config.directory.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_PROPSYNC_BIND_PW", "s3cret");

        let toml_str = r#"
[directory]
url = "ldaps://ldap.example.com"
users_base = "ou=people,dc=example,dc=com"
bind_password_env = "TEST_PROPSYNC_BIND_PW"
"#;
        let mut config = AppConfig::from_toml(toml_str).unwrap();
        config.resolve_env_vars().unwrap();
        assert_eq!(config.directory.bind_password.as_deref(), Some("s3cret"));

        std::env::remove_var("TEST_PROPSYNC_BIND_PW");
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[directory]
url = "ldap://localhost"
users_base = "dc=test"
"#;
        let config = AppConfig::from_toml(minimal).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.directory.users_scope, SearchScope::Sub);
        assert_eq!(config.directory.timeout_secs, 10);
        assert_eq!(config.directory.user_cache_ttl_secs, 30);
        assert_eq!(config.directory.user_object_classes.len(), 4);
        assert!(config.directory.bind_dn.is_none());
        assert!(config.schema.default_syntax.is_none());
        assert!(config.store.path.is_none());
        assert!(config.attributes.is_empty());
        config.validate().unwrap();
    }
}
