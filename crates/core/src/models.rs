//! Domain model types shared by the converters, the synchronizer, the
//! directory facade and the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// `strftime` pattern of the LDAP generalized-time values we read and write.
pub const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

// ---------------------------------------------------------------------------
// Attribute descriptors
// ---------------------------------------------------------------------------

/// Whether a mapped attribute holds one value or an ordered sequence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    #[default]
    Single,
    Multi,
}

impl Multiplicity {
    pub fn from_multivalued(multivalued: bool) -> Self {
        if multivalued {
            Self::Multi
        } else {
            Self::Single
        }
    }

    pub fn is_multi(self) -> bool {
        self == Self::Multi
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Multi => write!(f, "multi"),
        }
    }
}

/// One configured mapping between a directory attribute and an application
/// property. The whole triple is the lookup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AttributeDescriptor {
    pub directory_name: String,
    pub application_name: String,
    pub multiplicity: Multiplicity,
}

impl AttributeDescriptor {
    pub fn new(
        directory_name: impl Into<String>,
        application_name: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            directory_name: directory_name.into(),
            application_name: application_name.into(),
            multiplicity,
        }
    }

    pub fn single(directory_name: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self::new(directory_name, application_name, Multiplicity::Single)
    }

    pub fn multi(directory_name: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self::new(directory_name, application_name, Multiplicity::Multi)
    }
}

// ---------------------------------------------------------------------------
// Property values
// ---------------------------------------------------------------------------

/// A typed application-side property value.
///
/// `Null` stands for "no value". Multi-valued properties are `List`s of
/// scalars; converters never see a `List`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// A naive date/time, assumed to already be in UTC.
    DateTime(NaiveDateTime),
    /// A timezone-aware instant; normalized to UTC before it is written.
    Timestamp(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness used by the boolean converter and the string converter's
    /// "empty value" check.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Text(s) => !s.is_empty(),
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Boolean(b) => *b,
            Self::DateTime(_) | Self::Timestamp(_) => true,
            Self::Binary(b) => !b.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Build a value from loosely typed JSON input (CLI, host APIs).
    ///
    /// Strings always become `Text`; converters decide how to interpret them.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }
}

/// Renders the value the way it is written to the directory when a
/// converter has to stringify a foreign type.
impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Text(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Boolean(true) => write!(f, "TRUE"),
            Self::Boolean(false) => write!(f, "FALSE"),
            Self::DateTime(dt) => write!(f, "{}", dt.format(GENERALIZED_TIME_FORMAT)),
            Self::Timestamp(ts) => write!(
                f,
                "{}",
                ts.with_timezone(&Utc).format(GENERALIZED_TIME_FORMAT)
            ),
            Self::Binary(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Application property name -> typed value.
pub type PropertyMapping = BTreeMap<String, PropertyValue>;

// ---------------------------------------------------------------------------
// Raw directory data
// ---------------------------------------------------------------------------

/// A raw directory value, exactly as it travels on the wire.
pub type RawValue = Vec<u8>;

/// One directory entry: a DN plus named, possibly multi-valued raw values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<RawValue>>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder helper: add a text-valued attribute.
    pub fn with_text<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.attributes.insert(
            name.to_string(),
            values
                .into_iter()
                .map(|v| v.as_ref().as_bytes().to_vec())
                .collect(),
        );
        self
    }

    /// Values of `name`, matched case-insensitively as LDAP requires.
    pub fn get(&self, name: &str) -> Option<&[RawValue]> {
        if let Some(values) = self.attributes.get(name) {
            return Some(values);
        }
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Values of `name` decoded as (lossy) UTF-8 text.
    pub fn text_values(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|values| {
                values
                    .iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The attribute updates sent to the directory in one modify call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    changes: BTreeMap<String, Vec<RawValue>>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, directory_name: impl Into<String>, values: Vec<RawValue>) {
        self.changes.insert(directory_name.into(), values);
    }

    pub fn get(&self, directory_name: &str) -> Option<&[RawValue]> {
        self.changes.get(directory_name).map(Vec::as_slice)
    }

    pub fn contains(&self, directory_name: &str) -> bool {
        self.changes.contains_key(directory_name)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Changed attribute names, safe to log.
    pub fn attribute_names(&self) -> Vec<String> {
        self.changes.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<RawValue>)> {
        self.changes.iter()
    }
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub user_id: Option<String>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, user_id: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            user_id: user_id.map(str::to_string),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, user_id: Option<&str>, details: &str) -> Self {
        Self {
            action: action.to_string(),
            user_id: user_id.map(str::to_string),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_entry_case_insensitive_lookup() {
        let entry = RawEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_text("mail", ["jdoe@example.com"])
            .with_text("telephoneNumber", ["+1 555 0100", "+1 555 0101"]);

        assert_eq!(entry.text_values("MAIL"), vec!["jdoe@example.com"]);
        assert_eq!(entry.get("telephonenumber").map(<[_]>::len), Some(2));
        assert!(entry.get("cn").is_none());
        assert!(entry.text_values("cn").is_empty());
    }

    #[test]
    fn test_truthiness() {
        assert!(!PropertyValue::Null.is_truthy());
        assert!(!PropertyValue::text("").is_truthy());
        assert!(!PropertyValue::Integer(0).is_truthy());
        assert!(!PropertyValue::List(vec![]).is_truthy());
        assert!(PropertyValue::text("x").is_truthy());
        assert!(PropertyValue::Float(0.5).is_truthy());
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!(["a", 1, 2.5, true, null]);
        assert_eq!(
            PropertyValue::from_json(&json),
            PropertyValue::List(vec![
                PropertyValue::text("a"),
                PropertyValue::Integer(1),
                PropertyValue::Float(2.5),
                PropertyValue::Boolean(true),
                PropertyValue::Null,
            ])
        );
    }

    #[test]
    fn test_display_uses_directory_forms() {
        let dt = NaiveDateTime::parse_from_str("20230615120000Z", GENERALIZED_TIME_FORMAT).unwrap();
        assert_eq!(PropertyValue::DateTime(dt).to_string(), "20230615120000Z");
        assert_eq!(PropertyValue::Boolean(true).to_string(), "TRUE");
        assert_eq!(PropertyValue::Null.to_string(), "");
        assert_eq!(
            PropertyValue::from(vec!["a", "b"]).to_string(),
            "a, b"
        );
    }

    #[test]
    fn test_changeset_names() {
        let mut changes = Changeset::new();
        assert!(changes.is_empty());
        changes.insert("mail", vec![b"a@example.com".to_vec()]);
        changes.insert("cn", vec![b"A".to_vec()]);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.attribute_names(), vec!["cn", "mail"]);
        assert!(changes.contains("mail"));
    }
}
