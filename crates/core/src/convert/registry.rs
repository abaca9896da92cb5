//! Converter registry and per-call binding cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    BooleanConverter, Converter, DateTimeConverter, IntegerConverter, NullConverter,
    PassthroughConverter, StringConverter,
};
use crate::config::ConverterRegistration;
use crate::schema::parser::normalize_syntax;
use crate::schema::{syntax, AttributeSyntaxInfo};

/// Maps `(syntax, name)` and `syntax` to converter instances.
///
/// Registrations happen once at startup; [`resolve`](Self::resolve) is a
/// pure lookup afterwards and never fails.
#[derive(Debug, Default, Clone)]
pub struct ConverterRegistry {
    /// `(syntax, lowercase name)` -> converter
    named: HashMap<(String, String), Arc<dyn Converter>>,
    /// syntax -> converter
    defaults: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// An empty registry: every lookup falls through to pass-through.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with converters for the standard LDAP
    /// syntaxes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let string: Arc<dyn Converter> = Arc::new(StringConverter);
        for oid in [
            syntax::DIRECTORY_STRING,
            syntax::IA5_STRING,
            syntax::PRINTABLE_STRING,
            syntax::TELEPHONE_NUMBER,
            syntax::POSTAL_ADDRESS,
            syntax::DN,
            syntax::OID,
            syntax::COUNTRY_STRING,
            syntax::NUMERIC_STRING,
        ] {
            registry.register(oid, string.clone());
        }

        registry.register(syntax::INTEGER, Arc::new(IntegerConverter));
        registry.register(syntax::BOOLEAN, Arc::new(BooleanConverter));
        registry.register(syntax::GENERALIZED_TIME, Arc::new(DateTimeConverter));

        let null: Arc<dyn Converter> = Arc::new(NullConverter);
        for oid in [
            syntax::OCTET_STRING,
            syntax::JPEG,
            syntax::BINARY,
            syntax::CERTIFICATE,
        ] {
            registry.register(oid, null.clone());
        }

        registry
    }

    /// Register the default converter for a syntax, replacing any previous one.
    pub fn register(&mut self, syntax: &str, converter: Arc<dyn Converter>) {
        let key = normalize_syntax(syntax);
        debug!(syntax = %key, converter = converter.name(), "registering converter");
        self.defaults.insert(key, converter);
    }

    /// Register a converter for one attribute name under a syntax.
    pub fn register_named(&mut self, syntax: &str, name: &str, converter: Arc<dyn Converter>) {
        let key = (normalize_syntax(syntax), name.to_ascii_lowercase());
        debug!(
            syntax = %key.0,
            attribute = name,
            converter = converter.name(),
            "registering named converter"
        );
        self.named.insert(key, converter);
    }

    /// Apply `[[converters]]` entries from configuration.
    pub fn apply_config(&mut self, registrations: &[ConverterRegistration]) {
        for reg in registrations {
            let converter = reg.kind.build();
            match reg.attribute.as_deref() {
                Some(name) => self.register_named(&reg.syntax, name, converter),
                None => self.register(&reg.syntax, converter),
            }
        }
        if !registrations.is_empty() {
            info!(count = registrations.len(), "applied configured converter registrations");
        }
    }

    /// Look up the converter for an attribute.
    ///
    /// Order: the named converter for `(syntax, name)`, then the default
    /// converter for `syntax`, then a [`PassthroughConverter`] built around
    /// `attribute`. An attribute with no known syntax always passes through.
    pub fn resolve(
        &self,
        attribute: Option<&AttributeSyntaxInfo>,
        name: Option<&str>,
    ) -> Arc<dyn Converter> {
        let syntax = attribute.and_then(|a| a.syntax.as_deref()).map(normalize_syntax);

        if let Some(ref syntax) = syntax {
            if let Some(name) = name {
                if let Some(c) = self.named.get(&(syntax.clone(), name.to_ascii_lowercase())) {
                    return c.clone();
                }
            }
            if let Some(c) = self.defaults.get(syntax) {
                return c.clone();
            }
        }

        Arc::new(PassthroughConverter::new(attribute.cloned()))
    }

    /// Registered `(syntax, name, converter)` triples, sorted, for display.
    /// Default registrations have no name.
    pub fn registrations(&self) -> Vec<(String, Option<String>, String)> {
        let mut out: Vec<_> = self
            .defaults
            .iter()
            .map(|(syntax, c)| (syntax.clone(), None, c.name().to_string()))
            .chain(
                self.named
                    .iter()
                    .map(|((syntax, name), c)| (syntax.clone(), Some(name.clone()), c.name().to_string())),
            )
            .collect();
        out.sort();
        out
    }
}

/// Converters resolved during one read or write call, keyed by
/// `(syntax, name)` so the registry is consulted once per distinct pair.
///
/// The synchronizer passes the directory attribute name as `name`, so a
/// lookup is only reused when several properties map to the same attribute
/// within a call. Distinct attributes of one syntax each resolve once.
pub struct ConverterBindings<'a> {
    registry: &'a ConverterRegistry,
    cache: HashMap<(Option<String>, Option<String>), Arc<dyn Converter>>,
}

impl<'a> ConverterBindings<'a> {
    pub fn new(registry: &'a ConverterRegistry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    pub fn converter(
        &mut self,
        attribute: Option<&AttributeSyntaxInfo>,
        name: Option<&str>,
    ) -> Arc<dyn Converter> {
        let key = (
            attribute.and_then(|a| a.syntax.clone()),
            name.map(str::to_ascii_lowercase),
        );
        let registry = self.registry;
        self.cache
            .entry(key)
            .or_insert_with(|| registry.resolve(attribute, name))
            .clone()
    }

    /// Number of distinct bindings resolved so far.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConverterKind, NumericConverter};
    use crate::models::{AttributeDescriptor, PropertyValue};

    fn info(name: &str, syntax: Option<&str>) -> AttributeSyntaxInfo {
        AttributeSyntaxInfo {
            directory_name: name.into(),
            oid: "1.1.1".into(),
            syntax: syntax.map(str::to_string),
            superior: None,
            single_value: false,
        }
    }

    #[test]
    fn test_default_syntaxes() {
        let registry = ConverterRegistry::with_defaults();
        let cn = info("cn", Some(syntax::DIRECTORY_STRING));
        assert_eq!(registry.resolve(Some(&cn), Some("cn")).name(), "string");

        let uid_number = info("uidNumber", Some(syntax::INTEGER));
        assert_eq!(registry.resolve(Some(&uid_number), None).name(), "integer");

        let photo = info("jpegPhoto", Some(syntax::JPEG));
        assert_eq!(registry.resolve(Some(&photo), None).name(), "null");
    }

    #[test]
    fn test_named_override_wins() {
        let mut registry = ConverterRegistry::with_defaults();
        registry.register_named(
            &format!("{}{{32}}", syntax::DIRECTORY_STRING),
            "employeeNumber",
            Arc::new(IntegerConverter),
        );

        let employee = info("employeeNumber", Some(syntax::DIRECTORY_STRING));
        assert_eq!(
            registry.resolve(Some(&employee), Some("EMPLOYEENUMBER")).name(),
            "integer"
        );
        // Other attributes of the same syntax keep the default.
        assert_eq!(registry.resolve(Some(&employee), Some("cn")).name(), "string");
        assert_eq!(registry.resolve(Some(&employee), None).name(), "string");
    }

    #[test]
    fn test_unknown_syntax_falls_back_to_passthrough() {
        let registry = ConverterRegistry::with_defaults();
        let custom = info("x-custom", Some("1.2.3.4.5"));
        let converter = registry.resolve(Some(&custom), Some("x-custom"));
        assert_eq!(converter.name(), "passthrough");

        let attr = AttributeDescriptor::single("x-custom", "custom");
        assert_eq!(
            converter.from_directory(b"value", &attr).unwrap(),
            PropertyValue::text("value")
        );

        assert_eq!(registry.resolve(None, Some("cn")).name(), "passthrough");
        assert_eq!(
            ConverterRegistry::new()
                .resolve(Some(&info("cn", Some(syntax::DIRECTORY_STRING))), None)
                .name(),
            "passthrough"
        );
    }

    #[test]
    fn test_apply_config() {
        let mut registry = ConverterRegistry::with_defaults();
        registry.apply_config(&[
            ConverterRegistration {
                syntax: syntax::NUMERIC_STRING.into(),
                kind: ConverterKind::Numeric,
                attribute: None,
            },
            ConverterRegistration {
                syntax: syntax::DIRECTORY_STRING.into(),
                kind: ConverterKind::Boolean,
                attribute: Some("isActive".into()),
            },
        ]);

        let numeric = info("quota", Some(syntax::NUMERIC_STRING));
        assert_eq!(registry.resolve(Some(&numeric), None).name(), "numeric");
        let active = info("isActive", Some(syntax::DIRECTORY_STRING));
        assert_eq!(registry.resolve(Some(&active), Some("isActive")).name(), "boolean");

        let regs = registry.registrations();
        assert!(regs.contains(&(
            syntax::DIRECTORY_STRING.to_string(),
            Some("isactive".to_string()),
            "boolean".to_string()
        )));
    }

    #[test]
    fn test_bindings_cache_per_pair() {
        let mut registry = ConverterRegistry::new();
        registry.register(syntax::NUMERIC_STRING, Arc::new(NumericConverter));
        let quota = info("quota", Some(syntax::NUMERIC_STRING));

        let mut bindings = ConverterBindings::new(&registry);
        let a = bindings.converter(Some(&quota), Some("quota"));
        let b = bindings.converter(Some(&quota), Some("QUOTA"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bindings.len(), 1);

        bindings.converter(Some(&quota), Some("other"));
        bindings.converter(None, Some("quota"));
        assert_eq!(bindings.len(), 3);
    }
}
