//! Typed query helpers for the propsync store.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::{debug, info};

use super::Database;
use crate::errors::DatabaseError;
use crate::mapping::AttributeMappingTable;
use crate::models::{AttributeDescriptor, AuditEntry, Multiplicity};

impl Database {
    // -- attribute_mappings -------------------------------------------------

    /// Replace the stored mapping table with `table`, keeping its order.
    pub fn replace_attribute_mappings(
        &self,
        table: &AttributeMappingTable,
    ) -> Result<usize, DatabaseError> {
        let count = self.transaction(|conn| {
            conn.execute("DELETE FROM attribute_mappings", [])?;
            let mut stmt = conn.prepare(
                "INSERT INTO attribute_mappings (position, ldap_name, public_name, multivalued)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, d) in table.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    d.directory_name,
                    d.application_name,
                    d.multiplicity.is_multi(),
                ])?;
            }
            Ok(table.len())
        })?;
        info!(count, "stored attribute mapping table");
        Ok(count)
    }

    /// Load the stored mapping table. Empty when nothing was stored.
    pub fn load_attribute_mappings(&self) -> Result<AttributeMappingTable, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ldap_name, public_name, multivalued
             FROM attribute_mappings ORDER BY position",
        )?;
        let descriptors = stmt
            .query_map([], |row| {
                Ok(AttributeDescriptor::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    Multiplicity::from_multivalued(row.get(2)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = descriptors.len(), "loaded attribute mapping table");
        Ok(AttributeMappingTable::new(descriptors))
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit entry.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, user_id, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.action,
                entry.user_id,
                entry.details,
                entry.success,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, "inserted audit_log entry");
        Ok(id)
    }

    /// Most recent audit entries first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT action, user_id, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(action, user_id, details, success, created_at)| {
                let timestamp = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| DatabaseError::CorruptRow {
                        table: "audit_log".into(),
                        detail: format!("bad created_at '{}': {}", created_at, e),
                    })?
                    .with_timezone(&Utc);
                Ok(AuditEntry {
                    action,
                    user_id,
                    details,
                    success,
                    timestamp,
                })
            })
            .collect()
    }

    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_mapping_round_trip_keeps_order() {
        let db = db();
        assert!(db.load_attribute_mappings().unwrap().is_empty());

        let table = AttributeMappingTable::new(vec![
            AttributeDescriptor::single("mail", "email"),
            AttributeDescriptor::multi("telephoneNumber", "phones"),
            AttributeDescriptor::single("cn", "fullname"),
        ]);
        assert_eq!(db.replace_attribute_mappings(&table).unwrap(), 3);
        assert_eq!(db.load_attribute_mappings().unwrap(), table);

        let smaller = AttributeMappingTable::new(vec![AttributeDescriptor::single("cn", "fullname")]);
        db.replace_attribute_mappings(&smaller).unwrap();
        assert_eq!(db.load_attribute_mappings().unwrap(), smaller);
    }

    #[test]
    fn test_audit_log() {
        let db = db();
        db.insert_audit_entry(&AuditEntry::success("property_write", Some("jdoe"), "mail"))
            .unwrap();
        db.insert_audit_entry(&AuditEntry::failure("property_write", Some("asmith"), "cn: refused"))
            .unwrap();
        db.insert_audit_entry(&AuditEntry::success("mapping_import", None, "3 attributes"))
            .unwrap();

        assert_eq!(db.count_audit_log().unwrap(), 3);

        let recent = db.list_audit_log(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "mapping_import");
        assert!(recent[0].user_id.is_none());
        assert_eq!(recent[1].user_id.as_deref(), Some("asmith"));
        assert!(!recent[1].success);
    }

    #[test]
    fn test_corrupt_timestamp_is_reported() {
        let db = db();
        db.conn()
            .execute(
                "INSERT INTO audit_log (action, details, success, created_at)
                 VALUES ('x', '', 1, 'yesterday')",
                [],
            )
            .unwrap();
        assert!(matches!(
            db.list_audit_log(10),
            Err(DatabaseError::CorruptRow { .. })
        ));
    }
}
