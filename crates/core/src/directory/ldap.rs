//! LDAP directory session built on the synchronous `ldap3` client.
//!
//! The connection is opened lazily on first use and reused for the lifetime
//! of the session. Found user entries are reused for a configured time or
//! until [`DirectorySession::invalidate_user_cache`] is called for that
//! user; misses are never cached.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ldap3::{ldap_escape, LdapConn, LdapConnSettings, Mod, Scope, SearchEntry};
use tracing::{debug, error, info, warn};

use super::DirectorySession;
use crate::config::{DirectoryConfig, SearchScope};
use crate::errors::DirectoryError;
use crate::models::{Changeset, RawEntry, RawValue};

/// Fallback location of the subschema subentry when the root DSE does not
/// publish `subschemaSubentry`.
const DEFAULT_SUBSCHEMA_DN: &str = "cn=Subschema";

/// Attributes requested for user entries: all user attributes plus the
/// operational ones (`modifyTimestamp`, `pwdChangedTime`, ...), which servers
/// only return when asked.
fn user_search_attributes() -> Vec<&'static str> {
    vec!["*", "+"]
}

// ---------------------------------------------------------------------------
// User entry cache
// ---------------------------------------------------------------------------

/// Found user entries with their fetch time. A zero TTL disables it.
struct UserCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, RawEntry)>,
}

impl UserCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    fn get(&self, user_id: &str) -> Option<&RawEntry> {
        self.entries
            .get(user_id)
            .filter(|(fetched, _)| fetched.elapsed() < self.ttl)
            .map(|(_, entry)| entry)
    }

    /// Remember a found entry. `None` (no such user) is not stored so a user
    /// created later is seen on the next lookup.
    fn store(&mut self, user_id: &str, entry: Option<&RawEntry>) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries.retain(|_, (fetched, _)| now.duration_since(*fetched) < ttl);
        if let Some(entry) = entry {
            if !ttl.is_zero() {
                self.entries.insert(user_id.to_string(), (now, entry.clone()));
            }
        }
    }

    fn remove(&mut self, user_id: &str) -> bool {
        self.entries.remove(user_id).is_some()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A [`DirectorySession`] talking to a real LDAP server.
pub struct LdapSession {
    url: String,
    bind_dn: Option<String>,
    bind_password: Option<String>,
    users_base: String,
    users_scope: SearchScope,
    uid_attribute: String,
    timeout: Duration,
    conn: Mutex<Option<LdapConn>>,
    user_cache: Mutex<UserCache>,
}

impl LdapSession {
    /// Create a session from resolved directory configuration.
    ///
    /// This does not connect; the connection is made on the first request.
    pub fn new(config: &DirectoryConfig) -> Self {
        let session = Self {
            url: config.url.clone(),
            bind_dn: config.bind_dn.clone().filter(|dn| !dn.is_empty()),
            bind_password: config.bind_password.clone(),
            users_base: config.users_base.clone(),
            users_scope: config.users_scope,
            uid_attribute: config.uid_attribute.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            conn: Mutex::new(None),
            user_cache: Mutex::new(UserCache::new(Duration::from_secs(config.user_cache_ttl_secs))),
        };
        info!(
            url = %session.url,
            users_base = %session.users_base,
            "created LDAP session"
        );
        session
    }

    /// Return whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock_conn().is_some()
    }

    fn lock_conn(&self) -> MutexGuard<'_, Option<LdapConn>> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("LDAP connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, UserCache> {
        self.user_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `op` against a connected (and bound) client.
    ///
    /// A failed operation drops the connection so the next call reconnects.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut LdapConn) -> Result<T, DirectoryError>,
    ) -> Result<T, DirectoryError> {
        let mut guard = self.lock_conn();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let conn = match guard.as_mut() {
            Some(conn) => conn,
            None => {
                return Err(DirectoryError::Connection {
                    url: self.url.clone(),
                    detail: "connection unavailable".into(),
                })
            }
        };

        let result = op(conn);
        if result.is_err() {
            *guard = None;
        }
        result
    }

    fn connect(&self) -> Result<LdapConn, DirectoryError> {
        debug!(url = %self.url, "connecting to LDAP server");
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let mut conn =
            LdapConn::with_settings(settings, &self.url).map_err(|e| DirectoryError::Connection {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;
        conn.with_timeout(self.timeout);

        if let Some(ref bind_dn) = self.bind_dn {
            debug!(bind_dn = %bind_dn, "performing LDAP simple bind");
            let password = self.bind_password.as_deref().unwrap_or("");
            conn.simple_bind(bind_dn, password)
                .and_then(|res| res.success())
                .map_err(|e| DirectoryError::Bind {
                    bind_dn: bind_dn.clone(),
                    detail: e.to_string(),
                })?;
        }

        info!(url = %self.url, "connected to LDAP server");
        Ok(conn)
    }

    fn search_one(
        conn: &mut LdapConn,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: Vec<&'static str>,
    ) -> Result<Option<RawEntry>, DirectoryError> {
        let search_err = |e: ldap3::LdapError| DirectoryError::Search {
            base: base.to_string(),
            detail: e.to_string(),
        };
        let (entries, _res) = conn
            .search(base, scope, filter, attrs)
            .and_then(|res| res.success())
            .map_err(search_err)?;

        if entries.len() > 1 {
            warn!(base, count = entries.len(), "search matched several entries, using the first");
        }
        Ok(entries
            .into_iter()
            .next()
            .map(|e| raw_entry_from(SearchEntry::construct(e))))
    }
}

fn ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::One => Scope::OneLevel,
        SearchScope::Sub => Scope::Subtree,
    }
}

/// Flatten text and binary attributes into one raw entry.
fn raw_entry_from(entry: SearchEntry) -> RawEntry {
    let mut attributes: BTreeMap<String, Vec<RawValue>> = BTreeMap::new();
    for (name, values) in entry.attrs {
        attributes.insert(name, values.into_iter().map(String::into_bytes).collect());
    }
    for (name, values) in entry.bin_attrs {
        attributes.entry(name).or_default().extend(values);
    }
    RawEntry {
        dn: entry.dn,
        attributes,
    }
}

/// One `Replace` per attribute. An empty value list, or a list holding
/// only empty strings, clears the attribute.
fn build_mods(changes: &Changeset) -> Vec<Mod<Vec<u8>>> {
    changes
        .iter()
        .map(|(name, values)| {
            let set: HashSet<Vec<u8>> = values.iter().filter(|v| !v.is_empty()).cloned().collect();
            Mod::Replace(name.as_bytes().to_vec(), set)
        })
        .collect()
}

impl DirectorySession for LdapSession {
    fn fetch_subschema_entry(&self) -> Result<RawEntry, DirectoryError> {
        let unavailable = |e: DirectoryError| DirectoryError::SchemaUnavailable(e.to_string());

        self.with_connection(|conn| {
            let root_dse = Self::search_one(
                conn,
                "",
                Scope::Base,
                "(objectClass=*)",
                vec!["subschemaSubentry"],
            )?;
            let schema_dn = root_dse
                .and_then(|dse| dse.text_values("subschemaSubentry").into_iter().next())
                .unwrap_or_else(|| DEFAULT_SUBSCHEMA_DN.to_string());
            debug!(schema_dn = %schema_dn, "reading subschema subentry");

            Self::search_one(
                conn,
                &schema_dn,
                Scope::Base,
                "(objectClass=subschema)",
                vec!["attributeTypes", "objectClasses"],
            )?
            .ok_or_else(|| {
                DirectoryError::SchemaUnavailable(format!("subschema entry '{}' not found", schema_dn))
            })
        })
        .map_err(|e| match e {
            DirectoryError::SchemaUnavailable(_) => e,
            other => unavailable(other),
        })
    }

    fn fetch_user_entry(&self, user_id: &str) -> Result<Option<RawEntry>, DirectoryError> {
        if let Some(cached) = self.lock_cache().get(user_id) {
            debug!(user_id, "user entry served from cache");
            return Ok(Some(cached.clone()));
        }

        let filter = format!(
            "(&(objectClass=*)({}={}))",
            self.uid_attribute,
            ldap_escape(user_id)
        );
        debug!(user_id, filter = %filter, "searching for user entry");

        let entry = self.with_connection(|conn| {
            Self::search_one(
                conn,
                &self.users_base,
                ldap_scope(self.users_scope),
                &filter,
                user_search_attributes(),
            )
        })?;

        if entry.is_none() {
            debug!(user_id, "no directory entry for user");
        }
        self.lock_cache().store(user_id, entry.as_ref());
        Ok(entry)
    }

    fn modify_entry(&self, dn: &str, changes: &Changeset) -> Result<(), DirectoryError> {
        let mods = build_mods(changes);
        let names = changes.attribute_names();

        self.with_connection(|conn| {
            conn.modify(dn, mods)
                .and_then(|res| res.success())
                .map(|_| ())
                .map_err(|e| DirectoryError::WriteFailed {
                    dn: dn.to_string(),
                    detail: e.to_string(),
                })
        })
        .map_err(|e| {
            error!(dn, attributes = ?names, error = %e, "directory modify failed");
            match e {
                DirectoryError::WriteFailed { .. } => e,
                other => DirectoryError::WriteFailed {
                    dn: dn.to_string(),
                    detail: other.to_string(),
                },
            }
        })?;

        info!(dn, attributes = ?names, "directory entry modified");
        Ok(())
    }

    fn invalidate_user_cache(&self, user_id: &str) {
        if self.lock_cache().remove(user_id) {
            debug!(user_id, "dropped cached user entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            url: "ldap://127.0.0.1:1".into(),
            bind_dn: Some("cn=admin,dc=example,dc=com".into()),
            bind_password_env: None,
            bind_password: Some("secret".into()),
            users_base: "ou=people,dc=example,dc=com".into(),
            users_scope: SearchScope::One,
            uid_attribute: "uid".into(),
            user_object_classes: vec!["person".into()],
            timeout_secs: 1,
            user_cache_ttl_secs: 30,
        }
    }

    #[test]
    fn test_session_connects_lazily() {
        let session = LdapSession::new(&config());
        assert!(!session.is_connected());
        assert!(matches!(ldap_scope(session.users_scope), Scope::OneLevel));
    }

    #[test]
    fn test_unreachable_server_reports_schema_unavailable() {
        let session = LdapSession::new(&config());
        let err = session.fetch_subschema_entry().unwrap_err();
        assert!(matches!(err, DirectoryError::SchemaUnavailable(_)));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_unreachable_server_reports_write_failure() {
        let session = LdapSession::new(&config());
        let mut changes = Changeset::new();
        changes.insert("mail", vec![b"a@example.com".to_vec()]);
        let err = session.modify_entry("uid=jdoe,ou=people", &changes).unwrap_err();
        assert!(matches!(err, DirectoryError::WriteFailed { .. }));
    }

    #[test]
    fn test_user_search_requests_operational_attributes() {
        let attrs = user_search_attributes();
        assert!(attrs.contains(&"*"));
        assert!(attrs.contains(&"+"));
    }

    #[test]
    fn test_user_cache_skips_misses() {
        let mut cache = UserCache::new(Duration::from_secs(30));
        cache.store("ghost", None);
        assert_eq!(cache.len(), 0);
        assert!(cache.get("ghost").is_none());

        let entry = RawEntry::new("uid=jdoe,ou=people").with_text("cn", ["John"]);
        cache.store("jdoe", Some(&entry));
        assert_eq!(cache.get("jdoe"), Some(&entry));
        assert!(cache.remove("jdoe"));
        assert!(cache.get("jdoe").is_none());
    }

    #[test]
    fn test_user_cache_expires_entries() {
        let entry = RawEntry::new("uid=jdoe,ou=people");

        let mut disabled = UserCache::new(Duration::ZERO);
        disabled.store("jdoe", Some(&entry));
        assert_eq!(disabled.len(), 0);

        let mut cache = UserCache::new(Duration::from_millis(20));
        cache.store("jdoe", Some(&entry));
        assert!(cache.get("jdoe").is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("jdoe").is_none());

        // Expired entries are purged on the next store.
        cache.store("other", None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_build_mods_clears_empty_values() {
        let mut changes = Changeset::new();
        changes.insert("cn", vec![b"John".to_vec()]);
        changes.insert("description", vec![Vec::new()]);
        changes.insert("telephoneNumber", Vec::new());

        let mods = build_mods(&changes);
        assert_eq!(mods.len(), 3);
        for m in mods {
            match m {
                Mod::Replace(name, values) if name == b"cn" => assert_eq!(values.len(), 1),
                Mod::Replace(_, values) => assert!(values.is_empty()),
                _ => panic!("expected only Replace modifications"),
            }
        }
    }

    #[test]
    fn test_raw_entry_merges_binary_attributes() {
        let mut attrs = HashMap::new();
        attrs.insert("cn".to_string(), vec!["John".to_string()]);
        let mut bin_attrs = HashMap::new();
        bin_attrs.insert("jpegPhoto".to_string(), vec![vec![0xff, 0xd8]]);

        let entry = raw_entry_from(SearchEntry {
            dn: "uid=jdoe".into(),
            attrs,
            bin_attrs,
        });
        assert_eq!(entry.text_values("cn"), vec!["John"]);
        assert_eq!(entry.get("jpegphoto").unwrap()[0], vec![0xff, 0xd8]);
    }
}
