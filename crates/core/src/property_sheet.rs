//! Property sheet synchronization.
//!
//! The [`PropertySynchronizer`] moves one user's attributes between the
//! directory and the application:
//!
//! 1. **Read**: fetch the user's entry, bind every mapped attribute to a
//!    converter, convert present values and substitute defaults for absent
//!    ones. The result is a [`PropertySheet`], which doubles as the snapshot
//!    for change detection.
//! 2. **Write**: diff the desired values against the sheet, convert only what
//!    changed, and send the whole changeset in one modify call. The sheet is
//!    updated only after the directory accepted the write.
//!
//! Writes for the same user are not serialized here; hosts that allow
//! concurrent writes for one user must lock per user.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::convert::{Converter, ConverterBindings, ConverterRegistry};
use crate::db::Database;
use crate::directory::DirectorySession;
use crate::errors::{ConversionError, SyncError};
use crate::mapping::{AttributeMappingTable, BoundAttribute};
use crate::models::{
    AttributeDescriptor, AuditEntry, Changeset, Multiplicity, PropertyMapping, PropertyValue,
    RawValue,
};
use crate::schema::{SchemaCache, SchemaMetadata, SchemaResolver};

/// Audit action recorded for every write attempt that reaches the directory.
const WRITE_ACTION: &str = "property_write";

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Phases a read or write call passes through. Only used for logging; no
/// state survives between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Loading,
    Loaded,
    Diffing,
    Writing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Diffing => write!(f, "diffing"),
            Self::Writing => write!(f, "writing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Property sheet
// ---------------------------------------------------------------------------

/// One user's properties as last read from (or written to) the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySheet {
    user_id: String,
    dn: String,
    properties: PropertyMapping,
    /// Converter default per property, for `get_property_or_default`.
    defaults: BTreeMap<String, PropertyValue>,
}

impl PropertySheet {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// DN of the directory entry the sheet was read from.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn properties(&self) -> &PropertyMapping {
        &self.properties
    }

    pub fn into_properties(self) -> PropertyMapping {
        self.properties
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The value of `name`, or `default` when it is missing or `Null`.
    pub fn get_property_or(&self, name: &str, default: PropertyValue) -> PropertyValue {
        match self.properties.get(name) {
            Some(value) if !value.is_null() => value.clone(),
            _ => default,
        }
    }

    /// The value of `name`, or the bound converter's default when it is
    /// `Null`. `None` for properties that are not mapped.
    pub fn get_property_or_default(&self, name: &str) -> Option<PropertyValue> {
        match self.properties.get(name) {
            Some(value) if !value.is_null() => Some(value.clone()),
            Some(_) => self.defaults.get(name).cloned(),
            None => None,
        }
    }
}

/// Result of a successful [`PropertySynchronizer::write_properties`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub dn: String,
    /// Application properties whose value changed.
    pub changed_properties: Vec<String>,
    /// Directory attributes sent in the modify call.
    pub changed_attributes: Vec<String>,
}

impl WriteOutcome {
    /// True when nothing differed and no modify call was made.
    pub fn is_noop(&self) -> bool {
        self.changed_attributes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// Reads and writes property sheets through a [`DirectorySession`].
pub struct PropertySynchronizer {
    session: Arc<dyn DirectorySession>,
    registry: Arc<ConverterRegistry>,
    table: AttributeMappingTable,
    resolver: SchemaResolver,
    schema: SchemaCache,
    audit: Option<Arc<Database>>,
}

impl PropertySynchronizer {
    /// Create a synchronizer. The schema cache starts empty; call
    /// [`refresh_schema`](Self::refresh_schema) to load it.
    pub fn new(
        session: Arc<dyn DirectorySession>,
        registry: Arc<ConverterRegistry>,
        table: AttributeMappingTable,
        resolver: SchemaResolver,
    ) -> Self {
        info!(mapped_attributes = table.len(), "initializing property synchronizer");
        Self {
            session,
            registry,
            table,
            resolver,
            schema: SchemaCache::new(),
            audit: None,
        }
    }

    /// Record every write attempt in the store's audit log.
    pub fn with_audit(mut self, db: Arc<Database>) -> Self {
        self.audit = Some(db);
        self
    }

    /// Re-read the directory schema. Never fails; an unreadable schema is
    /// recorded and every attribute passes through until the next refresh.
    pub fn refresh_schema(&mut self) -> &SchemaMetadata {
        let metadata = self.schema.refresh(&self.resolver, self.session.as_ref());
        if !metadata.is_available() {
            warn!(status = %metadata.status(), "directory schema unavailable, using pass-through conversion");
        }
        self.table.report_schema_mismatches(metadata);
        metadata
    }

    /// Forget the cached schema, e.g. after an administrative schema change.
    pub fn invalidate_schema(&mut self) {
        self.schema.invalidate();
    }

    pub fn schema(&self) -> &SchemaMetadata {
        self.schema.metadata()
    }

    pub fn table(&self) -> &AttributeMappingTable {
        &self.table
    }

    /// Replace the mapping table; takes effect on the next call.
    pub fn set_table(&mut self, table: AttributeMappingTable) {
        info!(mapped_attributes = table.len(), "attribute mapping table replaced");
        table.report_schema_mismatches(self.schema.metadata());
        self.table = table;
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Read every mapped property of `user_id`.
    ///
    /// Fails with [`SyncError::UserNotFound`] when the user has no entry.
    pub fn read_properties(&self, user_id: &str) -> Result<PropertySheet, SyncError> {
        debug!(user_id, phase = %SyncPhase::Loading, "reading properties");

        let entry = self
            .session
            .fetch_user_entry(user_id)
            .map_err(|e| {
                error!(user_id, error = %e, "user lookup failed");
                SyncError::Directory(e)
            })?
            .ok_or_else(|| SyncError::UserNotFound(user_id.to_string()))?;

        let mut bindings = ConverterBindings::new(&self.registry);
        let mut properties = PropertyMapping::new();
        let mut defaults = BTreeMap::new();

        for bound in self.table.bind(self.schema.metadata()) {
            let descriptor = &bound.descriptor;
            let converter =
                bindings.converter(bound.syntax.as_ref(), Some(descriptor.directory_name.as_str()));
            defaults.insert(descriptor.application_name.clone(), converter.default_value());

            let value = match entry.get(&descriptor.directory_name) {
                Some(values) if !values.is_empty() => {
                    from_directory(converter.as_ref(), values, descriptor).map_err(|e| {
                        error!(user_id, attribute = %descriptor.directory_name, error = %e, "conversion failed");
                        e
                    })?
                }
                _ => absent_value(descriptor.multiplicity),
            };
            properties.insert(descriptor.application_name.clone(), value);
        }

        debug!(
            user_id,
            dn = %entry.dn,
            count = properties.len(),
            converters = bindings.len(),
            phase = %SyncPhase::Loaded,
            "properties read"
        );

        Ok(PropertySheet {
            user_id: user_id.to_string(),
            dn: entry.dn,
            properties,
            defaults,
        })
    }

    /// Like [`read_properties`](Self::read_properties), but a user without a
    /// directory entry yields `Ok(None)`.
    pub fn properties_for_user(&self, user_id: &str) -> Result<Option<PropertySheet>, SyncError> {
        match self.read_properties(user_id) {
            Ok(sheet) => Ok(Some(sheet)),
            Err(e) if e.is_user_not_found() => {
                debug!(user_id, "user not in directory, no properties");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Write the properties of `desired` that differ from `sheet`.
    ///
    /// Keys that are not mapped are ignored. All changed attributes go to the
    /// directory in one modify call; when nothing changed no call is made.
    /// `sheet` is updated only after the directory accepted the changes.
    pub fn write_properties(
        &self,
        sheet: &mut PropertySheet,
        desired: &PropertyMapping,
    ) -> Result<WriteOutcome, SyncError> {
        let user_id = sheet.user_id.clone();
        debug!(user_id = %user_id, phase = %SyncPhase::Diffing, "diffing properties");

        let bound: HashMap<String, BoundAttribute> = self
            .table
            .bind(self.schema.metadata())
            .into_iter()
            .map(|b| (b.descriptor.application_name.clone(), b))
            .collect();

        let mut bindings = ConverterBindings::new(&self.registry);
        let mut changes = Changeset::new();
        let mut accepted: Vec<(String, PropertyValue)> = Vec::new();
        // lowercase directory name -> property that staged it
        let mut staged: HashMap<String, String> = HashMap::new();

        for (name, value) in desired {
            let Some(b) = bound.get(name) else {
                debug!(property = %name, "property not mapped, ignored");
                continue;
            };
            let descriptor = &b.descriptor;
            let value = normalize(value, descriptor.multiplicity);
            if sheet.properties.get(name) == Some(&value) {
                continue;
            }

            let converter =
                bindings.converter(b.syntax.as_ref(), Some(descriptor.directory_name.as_str()));
            let outgoing = to_directory(converter.as_ref(), &value, descriptor)?;

            let key = descriptor.directory_name.to_ascii_lowercase();
            if let Some(first) = staged.get(&key) {
                let first_directory_name = &bound[first].descriptor.directory_name;
                if changes.get(first_directory_name) != Some(outgoing.as_slice()) {
                    error!(
                        user_id = %user_id,
                        attribute = %descriptor.directory_name,
                        first = %first,
                        second = %name,
                        "two properties write different values to one attribute"
                    );
                    return Err(SyncError::ConflictingChanges {
                        attribute: descriptor.directory_name.clone(),
                        first: first.clone(),
                        second: name.clone(),
                    });
                }
            } else {
                staged.insert(key, name.clone());
                changes.insert(descriptor.directory_name.clone(), outgoing);
            }
            accepted.push((name.clone(), value));
        }

        let outcome = WriteOutcome {
            dn: sheet.dn.clone(),
            changed_properties: accepted.iter().map(|(name, _)| name.clone()).collect(),
            changed_attributes: changes.attribute_names(),
        };

        if changes.is_empty() {
            debug!(user_id = %user_id, "no property changes, nothing written");
            return Ok(outcome);
        }

        debug!(
            user_id = %user_id,
            dn = %sheet.dn,
            attributes = ?outcome.changed_attributes,
            phase = %SyncPhase::Writing,
            "writing changeset"
        );

        if let Err(source) = self.session.modify_entry(&sheet.dn, &changes) {
            error!(
                user_id = %user_id,
                dn = %sheet.dn,
                attributes = ?outcome.changed_attributes,
                error = %source,
                "property write failed"
            );
            self.record_audit(AuditEntry::failure(
                WRITE_ACTION,
                Some(&user_id),
                &format!("{}: {}", outcome.changed_attributes.join(", "), source),
            ));
            return Err(SyncError::DirectoryWrite {
                dn: sheet.dn.clone(),
                source,
            });
        }

        for (name, value) in accepted {
            sheet.properties.insert(name, value);
        }
        self.refresh_shared_properties(sheet, &bound, &mut bindings, &changes, &outcome);
        self.session.invalidate_user_cache(&user_id);

        info!(
            user_id = %user_id,
            dn = %sheet.dn,
            count = outcome.changed_attributes.len(),
            "properties written"
        );
        self.record_audit(AuditEntry::success(
            WRITE_ACTION,
            Some(&user_id),
            &outcome.changed_attributes.join(", "),
        ));

        Ok(outcome)
    }

    /// Unchanged properties mapped to an attribute that was just written now
    /// hold what a fresh read would return.
    fn refresh_shared_properties(
        &self,
        sheet: &mut PropertySheet,
        bound: &HashMap<String, BoundAttribute>,
        bindings: &mut ConverterBindings<'_>,
        changes: &Changeset,
        outcome: &WriteOutcome,
    ) {
        for (name, b) in bound {
            if outcome.changed_properties.contains(name) {
                continue;
            }
            let descriptor = &b.descriptor;
            let Some(written) = changes
                .iter()
                .find(|(attr, _)| attr.eq_ignore_ascii_case(&descriptor.directory_name))
                .map(|(_, values)| values)
            else {
                continue;
            };

            let present: Vec<RawValue> = written.iter().filter(|v| !v.is_empty()).cloned().collect();
            let value = if present.is_empty() {
                Ok(absent_value(descriptor.multiplicity))
            } else {
                let converter =
                    bindings.converter(b.syntax.as_ref(), Some(descriptor.directory_name.as_str()));
                from_directory(converter.as_ref(), &present, descriptor)
            };
            match value {
                Ok(value) => {
                    sheet.properties.insert(name.clone(), value);
                }
                Err(e) => warn!(
                    property = %name,
                    attribute = %descriptor.directory_name,
                    error = %e,
                    "could not refresh property sharing a written attribute"
                ),
            }
        }
    }

    fn record_audit(&self, entry: AuditEntry) {
        if let Some(ref db) = self.audit {
            if let Err(e) = db.insert_audit_entry(&entry) {
                warn!(action = %entry.action, error = %e, "failed to record audit entry");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

fn absent_value(multiplicity: Multiplicity) -> PropertyValue {
    match multiplicity {
        Multiplicity::Multi => PropertyValue::List(Vec::new()),
        Multiplicity::Single => PropertyValue::Null,
    }
}

/// Multi-valued properties are always lists: a scalar becomes a one-element
/// list and `Null` an empty one.
fn normalize(value: &PropertyValue, multiplicity: Multiplicity) -> PropertyValue {
    match (multiplicity, value) {
        (Multiplicity::Multi, PropertyValue::Null) => PropertyValue::List(Vec::new()),
        (Multiplicity::Multi, PropertyValue::List(_)) => value.clone(),
        (Multiplicity::Multi, scalar) => PropertyValue::List(vec![scalar.clone()]),
        (Multiplicity::Single, _) => value.clone(),
    }
}

fn from_directory(
    converter: &dyn Converter,
    values: &[RawValue],
    descriptor: &AttributeDescriptor,
) -> Result<PropertyValue, ConversionError> {
    match descriptor.multiplicity {
        Multiplicity::Multi => values
            .iter()
            .map(|raw| converter.from_directory(raw, descriptor))
            .collect::<Result<Vec<_>, _>>()
            .map(PropertyValue::List),
        Multiplicity::Single => match values.first() {
            Some(raw) => converter.from_directory(raw, descriptor),
            None => Ok(PropertyValue::Null),
        },
    }
}

/// `Null` is written as an empty string without consulting the converter.
fn scalar_to_directory(
    converter: &dyn Converter,
    value: &PropertyValue,
    descriptor: &AttributeDescriptor,
) -> Result<RawValue, ConversionError> {
    match value {
        PropertyValue::Null => Ok(Vec::new()),
        PropertyValue::List(_) => Err(ConversionError::InvalidValue {
            attribute: descriptor.directory_name.clone(),
            converter: converter.name().to_string(),
            expected: "a single value".into(),
        }),
        scalar => converter.to_directory(scalar, descriptor),
    }
}

/// Directory writes are always sequences.
fn to_directory(
    converter: &dyn Converter,
    value: &PropertyValue,
    descriptor: &AttributeDescriptor,
) -> Result<Vec<RawValue>, ConversionError> {
    match value {
        PropertyValue::List(items) if descriptor.multiplicity.is_multi() => items
            .iter()
            .map(|item| scalar_to_directory(converter, item, descriptor))
            .collect(),
        other => Ok(vec![scalar_to_directory(converter, other, descriptor)?]),
    }
}
