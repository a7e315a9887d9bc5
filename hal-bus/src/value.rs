//! Wire values carried in method calls, replies and signals
//!
//! `BusValue` covers the subset of the bus type system the HAL protocol uses:
//! basic types, string arrays, variants, string-keyed dictionaries (`a{sv}`),
//! generic arrays and structs. The wire form of every value is a
//! [`zvariant::Value`]; signatures and encoding come from there.

use serde::{Deserialize, Serialize};
use zbus::zvariant::{Array, Dict, Signature, StructureBuilder, Value};

use crate::error::BusError;

/// A single typed value on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BusValue {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    UInt64(u64),
    Double(f64),
    Str(String),
    StrArray(Vec<String>),
    Variant(Box<BusValue>),
    /// `a{sv}`; entry order is preserved as sent
    Dict(Vec<(String, BusValue)>),
    Array(Vec<BusValue>),
    Struct(Vec<BusValue>),
}

impl BusValue {
    /// Wrap a value in a variant
    pub fn variant(inner: impl Into<BusValue>) -> Self {
        Self::Variant(Box::new(inner.into()))
    }

    /// Type signature of this value
    ///
    /// Empty generic arrays report `av` since their element type is unknown.
    /// A struct without fields has no wire form and reports `()`.
    pub fn signature(&self) -> String {
        self.to_zvariant()
            .map(|value| value.value_signature().to_string())
            .unwrap_or_else(|_| "()".to_string())
    }

    /// Encode as a wire value
    ///
    /// Dictionary values that are not already variants get wrapped in one, so
    /// every `Dict` goes out as `a{sv}`.
    pub fn to_zvariant(&self) -> Result<Value<'static>, BusError> {
        Ok(match self {
            Self::Bool(v) => Value::from(*v),
            Self::Int32(v) => Value::from(*v),
            Self::UInt32(v) => Value::from(*v),
            Self::UInt64(v) => Value::from(*v),
            Self::Double(v) => Value::from(*v),
            Self::Str(v) => Value::from(v.clone()),
            Self::StrArray(v) => Value::from(v.clone()),
            Self::Variant(inner) => Value::Value(Box::new(inner.to_zvariant()?)),
            Self::Dict(entries) => {
                let mut dict = Dict::new(&Signature::Str, &Signature::Variant);
                for (key, value) in entries {
                    let value = match value.to_zvariant()? {
                        wrapped @ Value::Value(_) => wrapped,
                        plain => Value::Value(Box::new(plain)),
                    };
                    dict.append(Value::from(key.clone()), value)
                        .map_err(|e| BusError::Encoding(e.to_string()))?;
                }
                Value::Dict(dict)
            }
            Self::Array(items) => {
                let items = items
                    .iter()
                    .map(BusValue::to_zvariant)
                    .collect::<Result<Vec<_>, _>>()?;
                let element = items
                    .first()
                    .map(|item| item.value_signature().clone())
                    .unwrap_or(Signature::Variant);
                let mut array = Array::new(&element);
                for item in items {
                    array
                        .append(item)
                        .map_err(|e| BusError::Encoding(e.to_string()))?;
                }
                Value::Array(array)
            }
            Self::Struct(fields) => {
                let mut builder = StructureBuilder::new();
                for field in fields {
                    builder = builder.append_field(field.to_zvariant()?);
                }
                let structure = builder
                    .build()
                    .map_err(|e| BusError::Encoding(e.to_string()))?;
                Value::Structure(structure)
            }
        })
    }

    /// Decode a wire value
    ///
    /// Object paths decode as strings. Types the HAL protocol never sends
    /// (bytes, 16- and 64-bit signed integers, file descriptors) are rejected.
    pub fn from_zvariant(value: &Value<'_>) -> Result<Self, BusError> {
        Ok(match value {
            Value::Bool(v) => Self::Bool(*v),
            Value::I32(v) => Self::Int32(*v),
            Value::U32(v) => Self::UInt32(*v),
            Value::U64(v) => Self::UInt64(*v),
            Value::F64(v) => Self::Double(*v),
            Value::Str(v) => Self::Str(v.as_str().to_string()),
            Value::ObjectPath(v) => Self::Str(v.as_str().to_string()),
            Value::Value(inner) => Self::Variant(Box::new(Self::from_zvariant(inner)?)),
            Value::Array(array) if array.element_signature().to_string() == "s" => Self::StrArray(
                array
                    .iter()
                    .map(|item| match item {
                        Value::Str(s) => Ok(s.as_str().to_string()),
                        other => Err(unsupported(other)),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Value::Array(array) => Self::Array(
                array
                    .iter()
                    .map(Self::from_zvariant)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(dict) => Self::Dict(
                dict.iter()
                    .map(|(key, value)| match key {
                        Value::Str(key) => Ok((key.as_str().to_string(), Self::from_zvariant(value)?)),
                        other => Err(unsupported(other)),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Value::Structure(structure) => Self::Struct(
                structure
                    .fields()
                    .iter()
                    .map(Self::from_zvariant)
                    .collect::<Result<_, _>>()?,
            ),
            other => return Err(unsupported(other)),
        })
    }

    /// Strip any number of variant wrappers
    pub fn unwrap_variant(&self) -> &BusValue {
        let mut value = self;
        while let Self::Variant(inner) = value {
            value = inner;
        }
        value
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrap_variant() {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self.unwrap_variant() {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.unwrap_variant() {
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.unwrap_variant() {
            Self::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.unwrap_variant() {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_variant() {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self.unwrap_variant() {
            Self::StrArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, BusValue)]> {
        match self.unwrap_variant() {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[BusValue]> {
        match self.unwrap_variant() {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[BusValue]> {
        match self.unwrap_variant() {
            Self::Struct(v) => Some(v),
            _ => None,
        }
    }
}

fn unsupported(value: &Value<'_>) -> BusError {
    BusError::MalformedReply(format!("unsupported type {}", value.value_signature()))
}

impl TryFrom<&BusValue> for Value<'static> {
    type Error = BusError;

    fn try_from(value: &BusValue) -> Result<Self, Self::Error> {
        value.to_zvariant()
    }
}

impl TryFrom<&Value<'_>> for BusValue {
    type Error = BusError;

    fn try_from(value: &Value<'_>) -> Result<Self, Self::Error> {
        BusValue::from_zvariant(value)
    }
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for BusValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u32> for BusValue {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<u64> for BusValue {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for BusValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<String>> for BusValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrArray(v)
    }
}
