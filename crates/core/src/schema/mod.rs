//! Directory schema metadata.
//!
//! The [`SchemaResolver`] reads the directory's subschema subentry once and
//! produces a [`SchemaMetadata`] table: for every attribute type reachable
//! from the configured user object classes, the syntax it uses (inherited
//! through supertypes when not declared directly). The table lives in a
//! [`SchemaCache`] that is refreshed and invalidated explicitly.

pub mod parser;
pub mod resolver;

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

pub use resolver::{SchemaCache, SchemaResolver};

/// Well-known LDAP syntax OIDs (RFC 4517).
pub mod syntax {
    pub const BINARY: &str = "1.3.6.1.4.1.1466.115.121.1.5";
    pub const BOOLEAN: &str = "1.3.6.1.4.1.1466.115.121.1.7";
    pub const CERTIFICATE: &str = "1.3.6.1.4.1.1466.115.121.1.8";
    pub const COUNTRY_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.11";
    pub const DN: &str = "1.3.6.1.4.1.1466.115.121.1.12";
    pub const DIRECTORY_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.15";
    pub const GENERALIZED_TIME: &str = "1.3.6.1.4.1.1466.115.121.1.24";
    pub const IA5_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.26";
    pub const INTEGER: &str = "1.3.6.1.4.1.1466.115.121.1.27";
    pub const JPEG: &str = "1.3.6.1.4.1.1466.115.121.1.28";
    pub const NUMERIC_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.36";
    pub const OID: &str = "1.3.6.1.4.1.1466.115.121.1.38";
    pub const OCTET_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.40";
    pub const POSTAL_ADDRESS: &str = "1.3.6.1.4.1.1466.115.121.1.41";
    pub const PRINTABLE_STRING: &str = "1.3.6.1.4.1.1466.115.121.1.44";
    pub const TELEPHONE_NUMBER: &str = "1.3.6.1.4.1.1466.115.121.1.50";
}

/// One attribute type of the directory's published schema, with its
/// resolved syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeSyntaxInfo {
    /// Primary (first declared) name of the attribute type.
    pub directory_name: String,
    pub oid: String,
    /// Syntax OID, declared or inherited. `None` when the supertype chain
    /// is exhausted without one and no default was supplied.
    pub syntax: Option<String>,
    /// Declared supertype, if any.
    pub superior: Option<String>,
    pub single_value: bool,
}

/// Outcome of the last schema resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    /// No resolution has been attempted yet.
    NotLoaded,
    Loaded,
    /// The directory schema could not be read. Every attribute falls back
    /// to pass-through conversion.
    Unavailable(String),
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "not loaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Attribute name -> syntax info, keyed case-insensitively on every alias
/// an attribute type declares.
#[derive(Debug, Clone)]
pub struct SchemaMetadata {
    attributes: HashMap<String, AttributeSyntaxInfo>,
    status: SchemaStatus,
}

impl SchemaMetadata {
    pub fn not_loaded() -> Self {
        Self {
            attributes: HashMap::new(),
            status: SchemaStatus::NotLoaded,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            attributes: HashMap::new(),
            status: SchemaStatus::Unavailable(reason.into()),
        }
    }

    pub(crate) fn loaded(attributes: HashMap<String, AttributeSyntaxInfo>) -> Self {
        Self {
            attributes,
            status: SchemaStatus::Loaded,
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSyntaxInfo> {
        self.attributes.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn status(&self) -> &SchemaStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        self.status == SchemaStatus::Loaded
    }

    /// Number of registered names (aliases count separately).
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// `(name, info)` pairs sorted by name.
    pub fn entries(&self) -> Vec<(&str, &AttributeSyntaxInfo)> {
        let mut entries: Vec<_> = self
            .attributes
            .iter()
            .map(|(name, info)| (name.as_str(), info))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
