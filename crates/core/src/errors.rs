//! Error types for the propsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors raised by a directory session facade.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Could not open a connection to the directory server.
    #[error("directory connection to '{url}' failed: {detail}")]
    Connection { url: String, detail: String },

    /// The bind (authentication) step was rejected.
    #[error("directory bind as '{bind_dn}' failed: {detail}")]
    Bind { bind_dn: String, detail: String },

    /// A search request failed.
    #[error("directory search under '{base}' failed: {detail}")]
    Search { base: String, detail: String },

    /// The subschema subentry could not be located or read.
    #[error("directory schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// The directory rejected or failed a modify request.
    #[error("directory modify of '{dn}' failed: {detail}")]
    WriteFailed { dn: String, detail: String },
}

// ---------------------------------------------------------------------------
// Conversion errors
// ---------------------------------------------------------------------------

/// A typed converter could not translate a value.
///
/// The offending value is deliberately absent from the message: attribute
/// values may be sensitive and these errors end up in logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("attribute '{attribute}': {converter} converter expected {expected}")]
    InvalidValue {
        attribute: String,
        converter: String,
        expected: String,
    },
}

// ---------------------------------------------------------------------------
// Synchronization errors
// ---------------------------------------------------------------------------

/// Errors from the property sheet synchronizer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The user has no entry in the directory.
    #[error("user '{0}' not found in directory")]
    UserNotFound(String),

    /// A directory value could not be converted.
    #[error("property conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// A directory lookup failed.
    #[error("directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    /// Two changed properties are mapped to the same directory attribute but
    /// convert to different values. Nothing was written.
    #[error("properties '{first}' and '{second}' write different values to attribute '{attribute}'")]
    ConflictingChanges {
        attribute: String,
        first: String,
        second: String,
    },

    /// The modify call carrying the changeset failed. Nothing was applied.
    #[error("directory write to '{dn}' failed: {source}")]
    DirectoryWrite {
        dn: String,
        #[source]
        source: DirectoryError,
    },
}

impl SyncError {
    /// True when the error only means "this user has no directory entry".
    pub fn is_user_not_found(&self) -> bool {
        matches!(self, Self::UserNotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored row could not be decoded.
    #[error("corrupt {table} row: {detail}")]
    CorruptRow { table: String, detail: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
