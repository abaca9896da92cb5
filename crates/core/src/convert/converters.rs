//! Built-in converters.

use std::num::IntErrorKind;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use super::Converter;
use crate::errors::ConversionError;
use crate::models::{AttributeDescriptor, PropertyValue, RawValue, GENERALIZED_TIME_FORMAT};
use crate::schema::AttributeSyntaxInfo;

/// Application property that reads as a timezone-aware timestamp rather than
/// a naive date/time.
const LOGIN_TIME_PROPERTY: &str = "login_time";

fn invalid(attribute: &AttributeDescriptor, converter: &str, expected: &str) -> ConversionError {
    ConversionError::InvalidValue {
        attribute: attribute.directory_name.clone(),
        converter: converter.to_string(),
        expected: expected.to_string(),
    }
}

fn utf8<'a>(
    raw: &'a [u8],
    attribute: &AttributeDescriptor,
    converter: &str,
) -> Result<&'a str, ConversionError> {
    std::str::from_utf8(raw).map_err(|_| invalid(attribute, converter, "UTF-8 text"))
}

/// Text values go out as their bytes, binary as-is, anything else through
/// its directory `Display` form.
fn stringify(value: &PropertyValue) -> RawValue {
    match value {
        PropertyValue::Text(s) => s.as_bytes().to_vec(),
        PropertyValue::Binary(bytes) => bytes.clone(),
        other => other.to_string().into_bytes(),
    }
}

// ---------------------------------------------------------------------------
// String
// ---------------------------------------------------------------------------

/// Directory strings and everything else that is plain UTF-8 text. Also the
/// "default" converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringConverter;

impl Converter for StringConverter {
    fn name(&self) -> &str {
        "string"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        utf8(raw, attribute, self.name()).map(PropertyValue::text)
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        Ok(match value {
            PropertyValue::Null => Vec::new(),
            PropertyValue::Text(s) if s.is_empty() => Vec::new(),
            other => stringify(other),
        })
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::text("")
    }
}

// ---------------------------------------------------------------------------
// Null (identity)
// ---------------------------------------------------------------------------

/// Keeps raw values untouched. Meant for internal or binary attribute types
/// (`objectClass`, `jpegPhoto`, certificates).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConverter;

impl Converter for NullConverter {
    fn name(&self) -> &str {
        "null"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        _attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        Ok(PropertyValue::Binary(raw.to_vec()))
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        Ok(stringify(value))
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::Null
    }
}

// ---------------------------------------------------------------------------
// Integer / Numeric
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn name(&self) -> &str {
        "integer"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        utf8(raw, attribute, self.name())?
            .trim()
            .parse::<i64>()
            .map(PropertyValue::Integer)
            .map_err(|e| {
                let expected = match e.kind() {
                    IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                        "an integer within the 64-bit signed range"
                    }
                    _ => "a base-10 integer",
                };
                invalid(attribute, self.name(), expected)
            })
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        Ok(stringify(value))
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::Integer(0)
    }
}

/// Floating point values. No standard LDAP syntax maps here; it is
/// registered through configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericConverter;

impl Converter for NumericConverter {
    fn name(&self) -> &str {
        "numeric"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        utf8(raw, attribute, self.name())?
            .trim()
            .parse::<f64>()
            .map(PropertyValue::Float)
            .map_err(|_| invalid(attribute, self.name(), "a floating point number"))
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        Ok(stringify(value))
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::Float(0.0)
    }
}

// ---------------------------------------------------------------------------
// Boolean
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn name(&self) -> &str {
        "boolean"
    }

    /// Only the literal `TRUE` is true.
    fn from_directory(
        &self,
        raw: &[u8],
        _attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        Ok(PropertyValue::Boolean(raw == b"TRUE"))
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        let truth = match value {
            PropertyValue::Text(s) => s.trim().eq_ignore_ascii_case("true"),
            other => other.is_truthy(),
        };
        Ok(if truth { b"TRUE".to_vec() } else { b"FALSE".to_vec() })
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::Boolean(false)
    }
}

// ---------------------------------------------------------------------------
// DateTime
// ---------------------------------------------------------------------------

/// Generalized time (`YYYYMMDDHHMMSSZ`). Directory times are always UTC.
///
/// Unparseable directory values read as `Null` instead of failing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeConverter;

impl Converter for DateTimeConverter {
    fn name(&self) -> &str {
        "datetime"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        let parsed = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), GENERALIZED_TIME_FORMAT).ok());

        let Some(naive) = parsed else {
            return Ok(PropertyValue::Null);
        };

        if attribute.application_name == LOGIN_TIME_PROPERTY {
            let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
            let aware: DateTime<FixedOffset> = utc.into();
            return Ok(PropertyValue::Timestamp(aware));
        }
        Ok(PropertyValue::DateTime(naive))
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        let formatted = match value {
            PropertyValue::Null => String::new(),
            PropertyValue::DateTime(naive) => naive.format(GENERALIZED_TIME_FORMAT).to_string(),
            PropertyValue::Timestamp(aware) => aware
                .with_timezone(&Utc)
                .format(GENERALIZED_TIME_FORMAT)
                .to_string(),
            PropertyValue::Text(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(aware) => aware
                    .with_timezone(&Utc)
                    .format(GENERALIZED_TIME_FORMAT)
                    .to_string(),
                Err(_) => s.clone(),
            },
            other => return Ok(stringify(other)),
        };
        Ok(formatted.into_bytes())
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::Null
    }
}

// ---------------------------------------------------------------------------
// Pass-through fallback
// ---------------------------------------------------------------------------

/// What the registry hands out when nothing is registered for a syntax.
///
/// Never fails: text stays text, anything that is not UTF-8 stays binary.
#[derive(Debug, Default, Clone)]
pub struct PassthroughConverter {
    attribute: Option<AttributeSyntaxInfo>,
}

impl PassthroughConverter {
    pub fn new(attribute: Option<AttributeSyntaxInfo>) -> Self {
        Self { attribute }
    }

    /// The schema information this converter was built around, if any.
    pub fn attribute(&self) -> Option<&AttributeSyntaxInfo> {
        self.attribute.as_ref()
    }
}

impl Converter for PassthroughConverter {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn from_directory(
        &self,
        raw: &[u8],
        _attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError> {
        Ok(match std::str::from_utf8(raw) {
            Ok(text) => PropertyValue::text(text),
            Err(_) => PropertyValue::Binary(raw.to_vec()),
        })
    }

    fn to_directory(
        &self,
        value: &PropertyValue,
        _attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError> {
        Ok(match value {
            PropertyValue::Text(s) => s.trim().as_bytes().to_vec(),
            other => stringify(other),
        })
    }

    fn default_value(&self) -> PropertyValue {
        PropertyValue::text("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    fn attr(name: &str) -> AttributeDescriptor {
        AttributeDescriptor::single(name, name)
    }

    #[test]
    fn test_string_converter() {
        let c = StringConverter;
        let a = attr("cn");
        assert_eq!(
            c.from_directory("Zoë".as_bytes(), &a).unwrap(),
            PropertyValue::text("Zoë")
        );
        assert!(c.from_directory(&[0xff, 0xfe], &a).is_err());

        assert_eq!(c.to_directory(&PropertyValue::text("Zoë"), &a).unwrap(), "Zoë".as_bytes());
        assert_eq!(c.to_directory(&PropertyValue::Null, &a).unwrap(), b"");
        assert_eq!(c.to_directory(&PropertyValue::text(""), &a).unwrap(), b"");
        assert_eq!(c.to_directory(&PropertyValue::Integer(7), &a).unwrap(), b"7");
        assert_eq!(c.to_directory(&PropertyValue::Integer(0), &a).unwrap(), b"0");
        assert_eq!(c.default_value(), PropertyValue::text(""));
    }

    #[test]
    fn test_null_converter_is_identity() {
        let c = NullConverter;
        let a = attr("jpegPhoto");
        let raw = vec![0xff, 0xd8, 0x00];
        let value = c.from_directory(&raw, &a).unwrap();
        assert_eq!(value, PropertyValue::Binary(raw.clone()));
        assert_eq!(c.to_directory(&value, &a).unwrap(), raw);
        assert_eq!(c.default_value(), PropertyValue::Null);
    }

    #[test]
    fn test_integer_converter() {
        let c = IntegerConverter;
        let a = attr("uidNumber");
        assert_eq!(c.from_directory(b"42", &a).unwrap(), PropertyValue::Integer(42));
        assert_eq!(c.from_directory(b" -7 ", &a).unwrap(), PropertyValue::Integer(-7));
        assert_eq!(c.to_directory(&PropertyValue::Integer(42), &a).unwrap(), b"42");

        let err = c.from_directory(b"forty-two", &a).unwrap_err();
        assert!(err.to_string().contains("uidNumber"));
        assert!(!err.to_string().contains("forty-two"));
        assert!(err.to_string().contains("a base-10 integer"));

        let err = c.from_directory(b"99999999999999999999", &a).unwrap_err();
        assert!(err.to_string().contains("64-bit signed range"));
        assert!(!err.to_string().contains("base-10"));
        assert_eq!(c.default_value(), PropertyValue::Integer(0));
    }

    #[test]
    fn test_numeric_converter() {
        let c = NumericConverter;
        let a = attr("quota");
        assert_eq!(c.from_directory(b"2.5", &a).unwrap(), PropertyValue::Float(2.5));
        assert_eq!(c.to_directory(&PropertyValue::Float(2.5), &a).unwrap(), b"2.5");
        assert!(c.from_directory(b"lots", &a).is_err());
        assert_eq!(c.default_value(), PropertyValue::Float(0.0));
    }

    #[test]
    fn test_boolean_converter() {
        let c = BooleanConverter;
        let a = attr("isActive");
        assert_eq!(c.from_directory(b"TRUE", &a).unwrap(), PropertyValue::Boolean(true));
        for raw in [&b"FALSE"[..], &b"true"[..], &b""[..], &b"yes"[..]] {
            assert_eq!(c.from_directory(raw, &a).unwrap(), PropertyValue::Boolean(false));
        }

        assert_eq!(c.to_directory(&PropertyValue::Boolean(true), &a).unwrap(), b"TRUE");
        assert_eq!(c.to_directory(&PropertyValue::Boolean(false), &a).unwrap(), b"FALSE");
        assert_eq!(c.to_directory(&PropertyValue::text("true"), &a).unwrap(), b"TRUE");
        assert_eq!(c.to_directory(&PropertyValue::text("false"), &a).unwrap(), b"FALSE");
        assert_eq!(c.to_directory(&PropertyValue::Integer(1), &a).unwrap(), b"TRUE");
        assert_eq!(c.to_directory(&PropertyValue::Null, &a).unwrap(), b"FALSE");
    }

    #[test]
    fn test_datetime_converter_reads_generalized_time() {
        let c = DateTimeConverter;
        let a = attr("modifyTimestamp");
        let value = c.from_directory(b"20230615120000Z", &a).unwrap();
        let PropertyValue::DateTime(dt) = value else {
            panic!("expected a naive date/time, got {:?}", value);
        };
        assert_eq!((dt.year(), dt.month(), dt.day()), (2023, 6, 15));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (12, 0, 0));

        assert_eq!(c.from_directory(b"not-a-date", &a).unwrap(), PropertyValue::Null);
        assert_eq!(c.from_directory(&[0xff], &a).unwrap(), PropertyValue::Null);
        assert_eq!(c.to_directory(&value, &a).unwrap(), b"20230615120000Z");
    }

    #[test]
    fn test_datetime_converter_login_time_is_aware() {
        let c = DateTimeConverter;
        let a = AttributeDescriptor::single("lastLogin", "login_time");
        let value = c.from_directory(b"20230615120000Z", &a).unwrap();
        let PropertyValue::Timestamp(ts) = value else {
            panic!("expected a timestamp, got {:?}", value);
        };
        assert_eq!(ts.with_timezone(&Utc), Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_datetime_converter_normalizes_to_utc() {
        let c = DateTimeConverter;
        let a = attr("modifyTimestamp");
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let aware = tz.with_ymd_and_hms(2023, 6, 15, 14, 0, 0).unwrap();
        assert_eq!(
            c.to_directory(&PropertyValue::Timestamp(aware), &a).unwrap(),
            b"20230615120000Z"
        );
        assert_eq!(
            c.to_directory(&PropertyValue::text("2023-06-15T14:00:00+02:00"), &a)
                .unwrap(),
            b"20230615120000Z"
        );
        assert_eq!(
            c.to_directory(&PropertyValue::text("20230615120000Z"), &a).unwrap(),
            b"20230615120000Z"
        );
        assert_eq!(c.to_directory(&PropertyValue::Null, &a).unwrap(), b"");
        assert_eq!(c.default_value(), PropertyValue::Null);
    }

    #[test]
    fn test_passthrough_converter() {
        let c = PassthroughConverter::new(None);
        let a = attr("x-custom");
        assert_eq!(c.from_directory(b"abc", &a).unwrap(), PropertyValue::text("abc"));
        assert_eq!(
            c.from_directory(&[0xff, 0x00], &a).unwrap(),
            PropertyValue::Binary(vec![0xff, 0x00])
        );
        assert_eq!(c.to_directory(&PropertyValue::text("  abc "), &a).unwrap(), b"abc");
        assert_eq!(c.to_directory(&PropertyValue::Boolean(true), &a).unwrap(), b"TRUE");
        assert!(c.attribute().is_none());
    }
}
