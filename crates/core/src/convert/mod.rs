//! Bidirectional value conversion between raw directory values and typed
//! application properties.
//!
//! A [`Converter`] is scalar: it translates exactly one raw value to one
//! [`PropertyValue`] and back. Multi-valued attributes are handled by the
//! synchronizer, which applies the converter element-wise.
//!
//! Converters are looked up through the [`ConverterRegistry`], keyed by
//! attribute syntax and an optional name.

pub mod converters;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::ConversionError;
use crate::models::{AttributeDescriptor, PropertyValue, RawValue};

pub use converters::{
    BooleanConverter, DateTimeConverter, IntegerConverter, NullConverter, NumericConverter,
    PassthroughConverter, StringConverter,
};
pub use registry::{ConverterBindings, ConverterRegistry};

/// Extension contract for attribute representations.
///
/// Implementations must be stateless with respect to individual attributes:
/// the registry shares one instance between every attribute bound to it.
pub trait Converter: Send + Sync + fmt::Debug {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Translate one raw directory value.
    fn from_directory(
        &self,
        raw: &[u8],
        attribute: &AttributeDescriptor,
    ) -> Result<PropertyValue, ConversionError>;

    /// Translate one application value (never a `List`) for writing.
    fn to_directory(
        &self,
        value: &PropertyValue,
        attribute: &AttributeDescriptor,
    ) -> Result<RawValue, ConversionError>;

    /// Value substituted when the directory holds nothing for the attribute.
    fn default_value(&self) -> PropertyValue;
}

/// The built-in converters, by configuration name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    #[serde(alias = "default")]
    String,
    Null,
    Integer,
    Numeric,
    Boolean,
    #[serde(alias = "timestamp")]
    DateTime,
}

impl ConverterKind {
    /// Instantiate the converter this kind names.
    pub fn build(self) -> Arc<dyn Converter> {
        match self {
            Self::String => Arc::new(StringConverter),
            Self::Null => Arc::new(NullConverter),
            Self::Integer => Arc::new(IntegerConverter),
            Self::Numeric => Arc::new(NumericConverter),
            Self::Boolean => Arc::new(BooleanConverter),
            Self::DateTime => Arc::new(DateTimeConverter),
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
        };
        write!(f, "{}", name)
    }
}
