//! Directory session facade.
//!
//! The synchronizer and the schema resolver never talk to a directory
//! server directly; they go through a [`DirectorySession`]. Two
//! implementations ship with the crate:
//!
//! - [`LdapSession`] -- a real LDAP client built on `ldap3`.
//! - [`MemoryDirectory`] -- an in-process directory for tests and for hosts
//!   that keep user entries elsewhere.

pub mod ldap;
pub mod memory;

pub use ldap::LdapSession;
pub use memory::MemoryDirectory;

use crate::errors::DirectoryError;
use crate::models::{Changeset, RawEntry};

/// Entry lookup, subschema introspection and modify operations.
///
/// Methods take `&self`; implementations that hold a connection guard it
/// internally so a session can be shared behind an `Arc`.
pub trait DirectorySession: Send + Sync {
    /// Read the subschema subentry (`attributeTypes`, `objectClasses`).
    ///
    /// Fails with [`DirectoryError::SchemaUnavailable`] on any connection or
    /// protocol error.
    fn fetch_subschema_entry(&self) -> Result<RawEntry, DirectoryError>;

    /// Look up a user's entry. `Ok(None)` when the user does not exist.
    fn fetch_user_entry(&self, user_id: &str) -> Result<Option<RawEntry>, DirectoryError>;

    /// Apply a whole changeset to one entry in a single modify request.
    fn modify_entry(&self, dn: &str, changes: &Changeset) -> Result<(), DirectoryError>;

    /// Drop anything cached about `user_id`. Best effort.
    fn invalidate_user_cache(&self, _user_id: &str) {}
}
