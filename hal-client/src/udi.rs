//! Device identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HalError, Result};

/// Every device identifier starts with this prefix
pub const UDI_PREFIX: &str = "/org/freedesktop/Hal/devices/";

/// Unique device identifier, the bus object path of a device
///
/// Construction only checks the registry prefix; whether the device exists
/// is up to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Udi(String);

impl Udi {
    pub fn new(udi: impl Into<String>) -> Result<Self> {
        let udi = udi.into();
        if !udi.starts_with(UDI_PREFIX) {
            tracing::warn!(udi = %udi, "Rejected device identifier without registry prefix");
            return Err(HalError::InvalidUdi(udi));
        }
        Ok(Self(udi))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the registry prefix, e.g. `computer`
    pub fn name(&self) -> &str {
        &self.0[UDI_PREFIX.len()..]
    }
}

impl fmt::Display for Udi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Udi {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Udi {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Udi {
    type Error = HalError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Udi {
    type Error = HalError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Udi> for String {
    fn from(udi: Udi) -> Self {
        udi.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_udi() {
        let udi = Udi::new("/org/freedesktop/Hal/devices/computer").unwrap();
        assert_eq!(udi.name(), "computer");
        assert_eq!(udi.to_string(), "/org/freedesktop/Hal/devices/computer");
    }

    #[test]
    fn test_invalid_udi() {
        for bad in ["", "computer", "/org/freedesktop/Hal/Manager", "/org/freedesktop/Hal/devices"] {
            assert!(matches!(Udi::new(bad), Err(HalError::InvalidUdi(_))), "{bad}");
        }
    }

    #[test]
    fn test_serde_validates() {
        let udi: Udi = serde_json::from_str("\"/org/freedesktop/Hal/devices/a\"").unwrap();
        assert_eq!(udi.name(), "a");
        assert!(serde_json::from_str::<Udi>("\"/tmp/a\"").is_err());
    }
}
