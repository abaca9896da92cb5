//! propsync core library.
//!
//! Synchronizes user attributes between an LDAP directory and an
//! application's typed user properties: directory schema discovery,
//! per-syntax value converters, the attribute mapping table, and the
//! property sheet synchronizer that reads values and writes minimal deltas.

pub mod config;
pub mod convert;
pub mod db;
pub mod directory;
pub mod errors;
pub mod mapping;
pub mod models;
pub mod property_sheet;
pub mod schema;

// Re-exports for convenience.
pub use config::AppConfig;
pub use convert::{Converter, ConverterKind, ConverterRegistry};
pub use db::Database;
pub use directory::{DirectorySession, LdapSession, MemoryDirectory};
pub use mapping::AttributeMappingTable;
pub use models::{AttributeDescriptor, Multiplicity, PropertyMapping, PropertyValue};
pub use property_sheet::{PropertySheet, PropertySynchronizer, WriteOutcome};
pub use schema::{SchemaCache, SchemaMetadata, SchemaResolver};
