//! Subschema resolution and the session-scoped schema cache.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use super::parser::{self, AttributeTypeDefinition, ObjectClassDefinition};
use super::{AttributeSyntaxInfo, SchemaMetadata};
use crate::config::AppConfig;
use crate::directory::DirectorySession;
use crate::models::RawEntry;

/// Resolves attribute syntaxes for a set of user object classes.
#[derive(Debug, Clone, Default)]
pub struct SchemaResolver {
    object_classes: Vec<String>,
    default_syntax: Option<String>,
}

impl SchemaResolver {
    /// `object_classes` selects which attribute types are resolved; an empty
    /// list resolves every attribute type in the subschema.
    /// `default_syntax` is used when a supertype chain ends without a syntax.
    pub fn new(object_classes: Vec<String>, default_syntax: Option<String>) -> Self {
        Self {
            object_classes,
            default_syntax: default_syntax.map(|s| parser::normalize_syntax(&s)),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.directory.user_object_classes.clone(),
            config.schema.default_syntax.clone(),
        )
    }

    /// Query the directory once and build the metadata table.
    ///
    /// Never fails: when the subschema cannot be read the failure is logged
    /// and an `Unavailable` (empty) table is returned, which callers must
    /// treat as "schema unknown" rather than "no attributes".
    pub fn resolve(&self, session: &dyn DirectorySession) -> SchemaMetadata {
        match session.fetch_subschema_entry() {
            Ok(entry) => self.resolve_entry(&entry),
            Err(e) => {
                error!(
                    object_classes = ?self.object_classes,
                    error = %e,
                    "error while gathering directory attribute schema metadata"
                );
                SchemaMetadata::unavailable(e.to_string())
            }
        }
    }

    /// Build the metadata table from an already fetched subschema entry.
    pub fn resolve_entry(&self, entry: &RawEntry) -> SchemaMetadata {
        let attribute_defs: Vec<AttributeTypeDefinition> = entry
            .text_values("attributeTypes")
            .iter()
            .filter_map(|def| {
                let parsed = parser::parse_attribute_type(def);
                if parsed.is_none() {
                    warn!("skipping unparseable attributeTypes value");
                }
                parsed
            })
            .collect();

        if attribute_defs.is_empty() {
            error!(dn = %entry.dn, "subschema entry lists no attribute types");
            return SchemaMetadata::unavailable(format!(
                "subschema entry '{}' lists no attribute types",
                entry.dn
            ));
        }

        let object_class_defs: Vec<ObjectClassDefinition> = entry
            .text_values("objectClasses")
            .iter()
            .filter_map(|def| parser::parse_object_class(def))
            .collect();

        let by_name = index_attribute_types(&attribute_defs);
        let wanted = self.wanted_attribute_types(&attribute_defs, &object_class_defs, &by_name);

        let mut attributes = HashMap::new();
        for idx in wanted {
            let def = &attribute_defs[idx];
            let info = AttributeSyntaxInfo {
                directory_name: def.primary_name().to_string(),
                oid: def.oid.clone(),
                syntax: resolve_syntax(def, &attribute_defs, &by_name, self.default_syntax.as_deref()),
                superior: def.superior.clone(),
                single_value: def.single_value,
            };
            for name in &def.names {
                attributes.insert(name.to_ascii_lowercase(), info.clone());
            }
        }

        info!(
            attribute_types = attribute_defs.len(),
            resolved_names = attributes.len(),
            "directory schema resolved"
        );
        SchemaMetadata::loaded(attributes)
    }

    /// Indices of the attribute types required or allowed by the configured
    /// object classes, including those inherited from superclasses.
    fn wanted_attribute_types(
        &self,
        attribute_defs: &[AttributeTypeDefinition],
        object_class_defs: &[ObjectClassDefinition],
        by_name: &HashMap<String, usize>,
    ) -> Vec<usize> {
        if self.object_classes.is_empty() {
            return (0..attribute_defs.len()).collect();
        }

        let mut classes: HashMap<String, &ObjectClassDefinition> = HashMap::new();
        for oc in object_class_defs {
            classes.insert(oc.oid.to_ascii_lowercase(), oc);
            for name in &oc.names {
                classes.insert(name.to_ascii_lowercase(), oc);
            }
        }

        let mut pending: Vec<String> = self
            .object_classes
            .iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let mut visited_classes = HashSet::new();
        let mut seen = HashSet::new();
        let mut wanted = Vec::new();

        while let Some(class_name) = pending.pop() {
            if !visited_classes.insert(class_name.clone()) {
                continue;
            }
            let Some(oc) = classes.get(&class_name) else {
                warn!(object_class = %class_name, "object class not present in directory schema");
                continue;
            };
            for attr in oc.must.iter().chain(oc.may.iter()) {
                match by_name.get(&attr.to_ascii_lowercase()) {
                    Some(&idx) => {
                        if seen.insert(idx) {
                            wanted.push(idx);
                        }
                    }
                    None => debug!(attribute = %attr, "attribute type not defined in schema"),
                }
            }
            pending.extend(oc.superiors.iter().map(|s| s.to_ascii_lowercase()));
        }

        wanted
    }
}

fn index_attribute_types(defs: &[AttributeTypeDefinition]) -> HashMap<String, usize> {
    let mut by_name = HashMap::new();
    for (idx, def) in defs.iter().enumerate() {
        by_name.insert(def.oid.to_ascii_lowercase(), idx);
        for name in &def.names {
            by_name.insert(name.to_ascii_lowercase(), idx);
        }
    }
    by_name
}

/// Declared syntax of `def`, else the nearest supertype's, else `default`.
/// Cyclic supertype chains count as exhausted.
fn resolve_syntax(
    def: &AttributeTypeDefinition,
    defs: &[AttributeTypeDefinition],
    by_name: &HashMap<String, usize>,
    default: Option<&str>,
) -> Option<String> {
    let mut current = Some(def);
    let mut visited = HashSet::new();

    while let Some(attr) = current {
        if let Some(ref syntax) = attr.syntax {
            return Some(syntax.clone());
        }
        if !visited.insert(attr.oid.as_str()) {
            break;
        }
        current = attr
            .superior
            .as_ref()
            .and_then(|sup| by_name.get(&sup.to_ascii_lowercase()))
            .map(|&idx| &defs[idx]);
    }

    default.map(str::to_string)
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Holds the resolved schema for the lifetime of one session.
///
/// Nothing here populates itself: callers `refresh` explicitly and
/// `invalidate` when the directory schema is known to have changed.
#[derive(Debug, Clone)]
pub struct SchemaCache {
    metadata: SchemaMetadata,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            metadata: SchemaMetadata::not_loaded(),
        }
    }

    /// Re-run the resolver against `session` and keep the result.
    pub fn refresh(
        &mut self,
        resolver: &SchemaResolver,
        session: &dyn DirectorySession,
    ) -> &SchemaMetadata {
        self.metadata = resolver.resolve(session);
        &self.metadata
    }

    /// Drop the cached table; until the next `refresh` every attribute uses
    /// pass-through conversion.
    pub fn invalidate(&mut self) {
        debug!("invalidating schema cache");
        self.metadata = SchemaMetadata::not_loaded();
    }

    pub fn metadata(&self) -> &SchemaMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::schema::{syntax, SchemaStatus};

    fn subschema() -> RawEntry {
        RawEntry::new("cn=Subschema").with_text(
            "attributeTypes",
            [
                "( 2.5.4.41 NAME 'name' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{32768} )",
                "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
                "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )",
                "( 0.9.2342.19200300.100.1.3 NAME ( 'mail' 'rfc822Mailbox' ) \
                 SYNTAX 1.3.6.1.4.1.1466.115.121.1.26{256} )",
                "( 1.3.6.1.1.1.1.0 NAME 'uidNumber' SYNTAX 1.3.6.1.4.1.1466.115.121.1.27 SINGLE-VALUE )",
                "( 1.1.1 NAME 'orphanAttr' SUP missingParent )",
                "( 1.1.2 NAME 'loopA' SUP loopB )",
                "( 1.1.3 NAME 'loopB' SUP loopA )",
                "( 2.5.4.0 NAME 'objectClass' SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 )",
            ],
        )
        .with_text(
            "objectClasses",
            [
                "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
                "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) )",
                "( 9.9.9 NAME 'exampleAccount' SUP person STRUCTURAL \
                 MAY ( mail $ uidNumber $ orphanAttr $ loopA ) )",
            ],
        )
    }

    #[test]
    fn test_inherited_syntax() {
        let resolver = SchemaResolver::new(vec!["exampleAccount".into()], None);
        let meta = resolver.resolve_entry(&subschema());

        assert!(meta.is_available());
        let cn = meta.get("cn").unwrap();
        assert_eq!(cn.syntax.as_deref(), Some(syntax::DIRECTORY_STRING));
        assert_eq!(cn.superior.as_deref(), Some("name"));
        // Every alias points at the same info.
        assert_eq!(meta.get("commonName"), Some(cn));
        assert_eq!(meta.get("SURNAME").unwrap().syntax.as_deref(), Some(syntax::DIRECTORY_STRING));
        assert_eq!(meta.get("mail").unwrap().syntax.as_deref(), Some(syntax::IA5_STRING));
        assert!(meta.get("uidNumber").unwrap().single_value);
    }

    #[test]
    fn test_object_class_filter_includes_superclasses() {
        let resolver = SchemaResolver::new(vec!["exampleAccount".into()], None);
        let meta = resolver.resolve_entry(&subschema());
        // objectClass comes from `top`, two levels up.
        assert!(meta.contains("objectClass"));
        // `name` is only a supertype, not required/allowed by any class.
        assert!(!meta.contains("name"));

        let resolver = SchemaResolver::new(vec!["person".into()], None);
        let meta = resolver.resolve_entry(&subschema());
        assert!(meta.contains("cn"));
        assert!(!meta.contains("mail"));
    }

    #[test]
    fn test_unresolvable_syntax_uses_default() {
        let resolver = SchemaResolver::new(vec!["exampleAccount".into()], None);
        let meta = resolver.resolve_entry(&subschema());
        assert_eq!(meta.get("orphanAttr").unwrap().syntax, None);
        assert_eq!(meta.get("loopA").unwrap().syntax, None);

        let resolver = SchemaResolver::new(
            vec!["exampleAccount".into()],
            Some(syntax::OCTET_STRING.into()),
        );
        let meta = resolver.resolve_entry(&subschema());
        assert_eq!(
            meta.get("orphanAttr").unwrap().syntax.as_deref(),
            Some(syntax::OCTET_STRING)
        );
        assert_eq!(
            meta.get("loopB").unwrap().syntax.as_deref(),
            Some(syntax::OCTET_STRING)
        );
    }

    #[test]
    fn test_empty_object_class_list_resolves_everything() {
        let resolver = SchemaResolver::new(Vec::new(), None);
        let meta = resolver.resolve_entry(&subschema());
        assert!(meta.contains("name"));
        assert!(meta.contains("rfc822Mailbox"));
    }

    #[test]
    fn test_unavailable_schema_is_recorded() {
        let directory = MemoryDirectory::new();
        directory.fail_schema_reads(true);

        let resolver = SchemaResolver::new(vec!["person".into()], None);
        let meta = resolver.resolve(&directory);
        assert!(meta.is_empty());
        assert!(matches!(meta.status(), SchemaStatus::Unavailable(_)));
    }

    #[test]
    fn test_subschema_without_attribute_types() {
        let resolver = SchemaResolver::new(vec!["person".into()], None);
        let meta = resolver.resolve_entry(&RawEntry::new("cn=Subschema"));
        assert!(!meta.is_available());
    }

    #[test]
    fn test_cache_refresh_and_invalidate() {
        let directory = MemoryDirectory::new().with_subschema(subschema());
        let resolver = SchemaResolver::new(vec!["person".into()], None);

        let mut cache = SchemaCache::new();
        assert_eq!(cache.metadata().status(), &SchemaStatus::NotLoaded);

        cache.refresh(&resolver, &directory);
        assert!(cache.metadata().contains("cn"));
        assert_eq!(directory.subschema_reads(), 1);

        // Reading the cache does not touch the directory.
        let _ = cache.metadata().get("sn");
        assert_eq!(directory.subschema_reads(), 1);

        cache.invalidate();
        assert!(cache.metadata().is_empty());
        assert_eq!(cache.metadata().status(), &SchemaStatus::NotLoaded);
    }
}
