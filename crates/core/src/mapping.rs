//! The attribute mapping table: which directory attributes surface as which
//! application properties.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::AttributeMappingConfig;
use crate::models::AttributeDescriptor;
use crate::schema::{AttributeSyntaxInfo, SchemaMetadata};

/// An ordered collection of [`AttributeDescriptor`]s.
///
/// Changes take effect on the next read or write; nothing is migrated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMappingTable {
    descriptors: Vec<AttributeDescriptor>,
}

/// A descriptor paired with the schema information resolved for it.
#[derive(Debug, Clone)]
pub struct BoundAttribute {
    pub descriptor: AttributeDescriptor,
    /// `None` when the schema is unavailable or does not define the attribute.
    pub syntax: Option<AttributeSyntaxInfo>,
}

impl AttributeMappingTable {
    pub fn new(descriptors: Vec<AttributeDescriptor>) -> Self {
        let mut table = Self::default();
        for d in descriptors {
            table.push(d);
        }
        table
    }

    /// Build the table from `[[attributes]]` rows. Rows without a property
    /// name are not mapped.
    pub fn from_config(rows: &[AttributeMappingConfig]) -> Self {
        let mut table = Self::default();
        for row in rows {
            let descriptor = row.to_descriptor();
            if descriptor.application_name.is_empty() {
                debug!(attribute = %descriptor.directory_name, "attribute has no property name, not mapped");
                continue;
            }
            table.push(descriptor);
        }
        table
    }

    /// Append a descriptor. An identical triple is only kept once.
    pub fn push(&mut self, descriptor: AttributeDescriptor) {
        if !self.descriptors.contains(&descriptor) {
            self.descriptors.push(descriptor);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// The descriptor mapped to an application property name.
    pub fn by_application_name(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.descriptors.iter().find(|d| d.application_name == name)
    }

    /// Directory attribute names, each once, in table order.
    pub fn directory_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.descriptors
            .iter()
            .map(|d| d.directory_name.as_str())
            .filter(|name| seen.insert(name.to_ascii_lowercase()))
            .collect()
    }

    /// Pair every descriptor with its schema information.
    pub fn bind(&self, schema: &SchemaMetadata) -> Vec<BoundAttribute> {
        self.descriptors
            .iter()
            .map(|descriptor| BoundAttribute {
                descriptor: descriptor.clone(),
                syntax: schema.get(&descriptor.directory_name).cloned(),
            })
            .collect()
    }

    /// Descriptors that are multi-valued although the schema declares their
    /// attribute type SINGLE-VALUE.
    pub fn single_value_conflicts(&self, schema: &SchemaMetadata) -> Vec<&AttributeDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.multiplicity.is_multi())
            .filter(|d| schema.get(&d.directory_name).is_some_and(|info| info.single_value))
            .collect()
    }

    /// Log mapping problems visible against `schema`. Called when either the
    /// table or the schema changes, not per read or write.
    pub fn report_schema_mismatches(&self, schema: &SchemaMetadata) {
        for descriptor in self.single_value_conflicts(schema) {
            warn!(
                attribute = %descriptor.directory_name,
                property = %descriptor.application_name,
                "multi-valued mapping targets a SINGLE-VALUE attribute type"
            );
        }
        if schema.is_available() {
            for descriptor in self.descriptors.iter().filter(|d| !schema.contains(&d.directory_name)) {
                debug!(
                    attribute = %descriptor.directory_name,
                    "attribute not described by directory schema"
                );
            }
        }
    }
}

impl<'a> IntoIterator for &'a AttributeMappingTable {
    type Item = &'a AttributeDescriptor;
    type IntoIter = std::slice::Iter<'a, AttributeDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Multiplicity;

    fn rows() -> Vec<AttributeMappingConfig> {
        vec![
            AttributeMappingConfig {
                ldap_name: "cn".into(),
                public_name: "fullname".into(),
                multivalued: false,
            },
            AttributeMappingConfig {
                ldap_name: "mail".into(),
                public_name: " email ".into(),
                multivalued: false,
            },
            AttributeMappingConfig {
                ldap_name: "sn".into(),
                public_name: String::new(),
                multivalued: false,
            },
            AttributeMappingConfig {
                ldap_name: "telephoneNumber".into(),
                public_name: "phones".into(),
                multivalued: true,
            },
        ]
    }

    #[test]
    fn test_from_config_skips_unnamed_rows() {
        let table = AttributeMappingTable::from_config(&rows());
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.by_application_name("email").unwrap().directory_name,
            "mail"
        );
        assert_eq!(
            table.by_application_name("phones").unwrap().multiplicity,
            Multiplicity::Multi
        );
        assert!(table.by_application_name("sn").is_none());
        assert_eq!(table.directory_names(), vec!["cn", "mail", "telephoneNumber"]);
    }

    #[test]
    fn test_identical_triples_kept_once() {
        let table = AttributeMappingTable::new(vec![
            AttributeDescriptor::single("cn", "fullname"),
            AttributeDescriptor::single("cn", "fullname"),
            AttributeDescriptor::single("cn", "title"),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.directory_names(), vec!["cn"]);
    }

    #[test]
    fn test_bind_against_unavailable_schema() {
        let table = AttributeMappingTable::from_config(&rows());
        let bound = table.bind(&SchemaMetadata::unavailable("down"));
        assert_eq!(bound.len(), 3);
        assert!(bound.iter().all(|b| b.syntax.is_none()));
    }

    #[test]
    fn test_single_value_conflicts() {
        let info = |name: &str, single_value: bool| AttributeSyntaxInfo {
            directory_name: name.into(),
            oid: "1.2.3".into(),
            syntax: Some("1.3.6.1.4.1.1466.115.121.1.15".into()),
            superior: None,
            single_value,
        };
        let mut attributes = std::collections::HashMap::new();
        attributes.insert("uidnumber".to_string(), info("uidNumber", true));
        attributes.insert("mail".to_string(), info("mail", false));
        let schema = SchemaMetadata::loaded(attributes);

        let table = AttributeMappingTable::new(vec![
            AttributeDescriptor::multi("uidNumber", "uid_numbers"),
            AttributeDescriptor::single("uidNumber", "uid_number"),
            AttributeDescriptor::multi("mail", "addresses"),
            AttributeDescriptor::multi("unknownAttr", "unknown"),
        ]);
        let conflicts = table.single_value_conflicts(&schema);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].application_name, "uid_numbers");

        assert!(table
            .single_value_conflicts(&SchemaMetadata::unavailable("down"))
            .is_empty());
    }
}
