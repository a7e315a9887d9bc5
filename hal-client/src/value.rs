//! Typed property values
//!
//! The registry stores six value types. `PropertyType` carries the numeric
//! codes the daemon uses on the wire; `PropertyValue` holds an actual value
//! and converts to and from bus values. `Invalid` is only ever a query
//! answer ("no such property"), never a stored value.

use std::fmt;

use hal_bus::BusValue;
use serde::{Deserialize, Serialize};

use crate::error::{HalError, Result};

/// Type tag of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Invalid,
    Int32,
    UInt64,
    Double,
    Bool,
    String,
    StrList,
}

impl PropertyType {
    /// Numeric code used by the daemon
    pub const fn code(self) -> i32 {
        match self {
            Self::Invalid => 0,
            Self::Int32 => b'i' as i32,
            Self::UInt64 => b't' as i32,
            Self::Double => b'd' as i32,
            Self::Bool => b'b' as i32,
            Self::String => b's' as i32,
            Self::StrList => ((b's' as i32) << 8) + b'l' as i32,
        }
    }

    /// Map a daemon type code; unknown codes become `Invalid`
    pub fn from_code(code: i32) -> Self {
        [
            Self::Int32,
            Self::UInt64,
            Self::Double,
            Self::Bool,
            Self::String,
            Self::StrList,
        ]
        .into_iter()
        .find(|ty| ty.code() == code)
        .unwrap_or(Self::Invalid)
    }

    pub fn is_valid(self) -> bool {
        self != Self::Invalid
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Int32 => "int32",
            Self::UInt64 => "uint64",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::String => "string",
            Self::StrList => "strlist",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property value of one of the six stored types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Int32(i32),
    UInt64(u64),
    Double(f64),
    Bool(bool),
    StrList(Vec<String>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::Int32(_) => PropertyType::Int32,
            Self::UInt64(_) => PropertyType::UInt64,
            Self::Double(_) => PropertyType::Double,
            Self::Bool(_) => PropertyType::Bool,
            Self::StrList(_) => PropertyType::StrList,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_strlist(&self) -> Option<&[String]> {
        match self {
            Self::StrList(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a bus value, looking through variant wrappers
    ///
    /// Bus types without a property counterpart yield `None`; nothing is
    /// coerced.
    pub fn from_bus(value: &BusValue) -> Option<Self> {
        match value.unwrap_variant() {
            BusValue::Str(v) => Some(Self::String(v.clone())),
            BusValue::Int32(v) => Some(Self::Int32(*v)),
            BusValue::UInt64(v) => Some(Self::UInt64(*v)),
            BusValue::Double(v) => Some(Self::Double(*v)),
            BusValue::Bool(v) => Some(Self::Bool(*v)),
            BusValue::StrArray(v) => Some(Self::StrList(v.clone())),
            _ => None,
        }
    }

    pub fn to_bus(&self) -> BusValue {
        match self {
            Self::String(v) => BusValue::Str(v.clone()),
            Self::Int32(v) => BusValue::Int32(*v),
            Self::UInt64(v) => BusValue::UInt64(*v),
            Self::Double(v) => BusValue::Double(*v),
            Self::Bool(v) => BusValue::Bool(*v),
            Self::StrList(v) => BusValue::StrArray(v.clone()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "'{}'", v),
            Self::Int32(v) => write!(f, "{} (0x{:x})", v, v),
            Self::UInt64(v) => write!(f, "{} (0x{:x})", v, v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::StrList(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

/// Property keys must be non-empty ASCII
pub(crate) fn validate_key(key: &str) -> Result<()> {
    validate_name("key", key)
}

/// Names passed to the daemon (keys, interfaces, callers, capabilities,
/// actions, conditions) must be non-empty ASCII
pub(crate) fn validate_name(parameter: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        tracing::warn!(parameter, "Rejected empty name");
        return Err(HalError::invalid_argument(parameter, "must not be empty"));
    }
    if !value.is_ascii() {
        tracing::warn!(parameter, value, "Rejected non-ASCII name");
        return Err(HalError::invalid_argument(parameter, format!("{:?} is not ASCII", value)));
    }
    Ok(())
}

/// Strings sent to the daemon cannot carry NUL bytes
pub(crate) fn validate_text(parameter: &'static str, value: &str) -> Result<()> {
    if value.contains('\0') {
        tracing::warn!(parameter, "Rejected string containing NUL");
        return Err(HalError::invalid_argument(parameter, "contains a NUL byte"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(PropertyType::Invalid, 0)]
    #[case(PropertyType::Int32, 105)]
    #[case(PropertyType::UInt64, 116)]
    #[case(PropertyType::Double, 100)]
    #[case(PropertyType::Bool, 98)]
    #[case(PropertyType::String, 115)]
    #[case(PropertyType::StrList, 29548)]
    fn test_type_codes(#[case] ty: PropertyType, #[case] code: i32) {
        assert_eq!(ty.code(), code);
        assert_eq!(PropertyType::from_code(code), ty);
    }

    #[test]
    fn test_unknown_code_is_invalid() {
        assert_eq!(PropertyType::from_code(42), PropertyType::Invalid);
        assert!(!PropertyType::from_code(-1).is_valid());
    }

    #[test]
    fn test_from_bus_rejects_unsupported_types() {
        assert_eq!(PropertyValue::from_bus(&BusValue::UInt32(3)), None);
        assert_eq!(PropertyValue::from_bus(&BusValue::Dict(Vec::new())), None);
        assert_eq!(
            PropertyValue::from_bus(&BusValue::variant(7i32)),
            Some(PropertyValue::Int32(7))
        );
    }

    #[test]
    fn test_typed_accessors() {
        let value = PropertyValue::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(value.property_type(), PropertyType::StrList);
        assert_eq!(value.as_strlist().map(<[String]>::len), Some(2));
        assert_eq!(value.as_str(), None);
        assert_eq!(value.to_string(), "{'a', 'b'}");
    }

    #[rstest]
    #[case("")]
    #[case("info.prodüct")]
    fn test_invalid_keys(#[case] key: &str) {
        assert!(matches!(
            validate_key(key),
            Err(HalError::InvalidArgument { parameter: "key", .. })
        ));
    }

    #[rstest]
    #[case("interface", "")]
    #[case("caller", ":1.é")]
    #[case("capability", "")]
    fn test_invalid_names_report_their_parameter(#[case] parameter: &'static str, #[case] value: &str) {
        match validate_name(parameter, value) {
            Err(HalError::InvalidArgument { parameter: reported, .. }) => assert_eq!(reported, parameter),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_text_rejects_nul() {
        assert!(validate_text("value", "ok").is_ok());
        assert!(validate_text("value", "a\0b").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(PropertyValue::from("Laptop").to_string(), "'Laptop'");
        assert_eq!(PropertyValue::Int32(255).to_string(), "255 (0xff)");
        assert_eq!(PropertyValue::Bool(true).to_string(), "true");
    }
}
