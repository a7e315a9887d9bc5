//! Configuration types for the hal-client crate
//!
//! This module defines the names a [`Context`](crate::Context) uses to
//! address the daemon. The defaults are the freedesktop HAL names; tests and
//! alternative daemons can override them.

use crate::error::{HalError, Result};

/// Configuration for a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Well-known bus name of the daemon
    /// Default: `org.freedesktop.Hal`
    pub service_name: String,

    /// Object path of the manager object
    /// Default: `/org/freedesktop/Hal/Manager`
    pub manager_path: String,

    /// Default: `org.freedesktop.Hal.Manager`
    pub manager_interface: String,

    /// Default: `org.freedesktop.Hal.Device`
    pub device_interface: String,

    /// Interface of singleton addon notifications
    /// Default: `org.freedesktop.Hal.SingletonAddon`
    pub singleton_interface: String,

    /// Environment variable holding the daemon's private address
    /// Default: `HALD_DIRECT_ADDR`
    pub direct_address_env: String,

    /// Initial value of the context's cache flag
    /// Default: false
    pub use_cache: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            service_name: "org.freedesktop.Hal".to_string(),
            manager_path: "/org/freedesktop/Hal/Manager".to_string(),
            manager_interface: "org.freedesktop.Hal.Manager".to_string(),
            device_interface: "org.freedesktop.Hal.Device".to_string(),
            singleton_interface: "org.freedesktop.Hal.SingletonAddon".to_string(),
            direct_address_env: "HALD_DIRECT_ADDR".to_string(),
            use_cache: false,
        }
    }
}

impl ContextConfig {
    /// Create a new ContextConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("service name", &self.service_name),
            ("manager interface", &self.manager_interface),
            ("device interface", &self.device_interface),
            ("singleton interface", &self.singleton_interface),
        ];
        for (what, name) in names {
            if name.is_empty() || !name.contains('.') {
                return Err(HalError::Configuration(format!(
                    "Invalid {}: {:?} is not a dotted bus name",
                    what, name
                )));
            }
        }

        if !self.manager_path.starts_with('/') {
            return Err(HalError::Configuration(format!(
                "Manager path must be absolute, got {:?}",
                self.manager_path
            )));
        }

        if self.direct_address_env.is_empty() {
            return Err(HalError::Configuration(
                "Direct address variable name must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Address from the direct-connection environment variable, if set
    pub fn direct_address(&self) -> Option<String> {
        std::env::var(&self.direct_address_env)
            .ok()
            .filter(|addr| !addr.is_empty())
    }
}
