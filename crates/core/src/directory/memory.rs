//! In-process directory.
//!
//! Holds user entries and a subschema entry in memory, applies modify
//! calls to them, and records every call so tests can assert on what the
//! synchronizer sent.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::DirectorySession;
use crate::errors::DirectoryError;
use crate::models::{Changeset, RawEntry};

#[derive(Debug, Default)]
struct State {
    /// user id -> entry
    users: BTreeMap<String, RawEntry>,
    subschema: Option<RawEntry>,
    fail_schema_reads: bool,
    fail_writes: bool,
    subschema_reads: usize,
    modify_calls: Vec<(String, Changeset)>,
    invalidations: Vec<String>,
}

/// A [`DirectorySession`] backed by in-memory entries.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subschema(self, entry: RawEntry) -> Self {
        self.state().subschema = Some(entry);
        self
    }

    pub fn with_user(self, user_id: &str, entry: RawEntry) -> Self {
        self.add_user(user_id, entry);
        self
    }

    pub fn add_user(&self, user_id: &str, entry: RawEntry) {
        self.state().users.insert(user_id.to_string(), entry);
    }

    /// Make subsequent subschema reads fail (or succeed again).
    pub fn fail_schema_reads(&self, fail: bool) {
        self.state().fail_schema_reads = fail;
    }

    /// Make subsequent modify calls fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Current copy of a user's entry.
    pub fn user_entry(&self, user_id: &str) -> Option<RawEntry> {
        self.state().users.get(user_id).cloned()
    }

    /// Number of subschema reads attempted so far.
    pub fn subschema_reads(&self) -> usize {
        self.state().subschema_reads
    }

    /// Every modify call received, as `(dn, changeset)`, including failed ones.
    pub fn modify_calls(&self) -> Vec<(String, Changeset)> {
        self.state().modify_calls.clone()
    }

    /// User ids passed to `invalidate_user_cache`, in call order.
    pub fn invalidations(&self) -> Vec<String> {
        self.state().invalidations.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory directory mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl DirectorySession for MemoryDirectory {
    fn fetch_subschema_entry(&self) -> Result<RawEntry, DirectoryError> {
        let mut state = self.state();
        state.subschema_reads += 1;
        if state.fail_schema_reads {
            return Err(DirectoryError::SchemaUnavailable(
                "subschema read refused".into(),
            ));
        }
        state
            .subschema
            .clone()
            .ok_or_else(|| DirectoryError::SchemaUnavailable("no subschema subentry".into()))
    }

    fn fetch_user_entry(&self, user_id: &str) -> Result<Option<RawEntry>, DirectoryError> {
        Ok(self.state().users.get(user_id).cloned())
    }

    fn modify_entry(&self, dn: &str, changes: &Changeset) -> Result<(), DirectoryError> {
        let mut state = self.state();
        state.modify_calls.push((dn.to_string(), changes.clone()));

        if state.fail_writes {
            return Err(DirectoryError::WriteFailed {
                dn: dn.to_string(),
                detail: "modify refused".into(),
            });
        }

        let entry = state
            .users
            .values_mut()
            .find(|entry| entry.dn.eq_ignore_ascii_case(dn))
            .ok_or_else(|| DirectoryError::WriteFailed {
                dn: dn.to_string(),
                detail: "no such object".into(),
            })?;

        for (name, values) in changes.iter() {
            // Replace semantics, matching the attribute case-insensitively.
            let existing = entry
                .attributes
                .keys()
                .find(|key| key.eq_ignore_ascii_case(name))
                .cloned();
            if let Some(key) = existing {
                entry.attributes.remove(&key);
            }
            let kept: Vec<_> = values.iter().filter(|v| !v.is_empty()).cloned().collect();
            if !kept.is_empty() {
                entry.attributes.insert(name.clone(), kept);
            }
        }

        debug!(dn, attributes = changes.len(), "memory directory entry modified");
        Ok(())
    }

    fn invalidate_user_cache(&self, user_id: &str) {
        self.state().invalidations.push(user_id.to_string());
    }
}
