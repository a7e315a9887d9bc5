//! In-memory HAL daemon for tests
//!
//! `FakeHald` implements the daemon side of the HAL bus protocol entirely in
//! memory: a device list with ordered properties, capabilities, temporary
//! devices, whole-device locks, per-device and global interface locks, and
//! the signals the real daemon emits when any of that changes. Each call to
//! [`FakeHald::connect`] yields a [`FakeConnection`] with its own unique bus
//! name, match rules and signal queue, so multi-process scenarios (one
//! process locking, another being locked out) can run inside one test.
//!
//! # Quick Start
//!
//! ```rust
//! use hal_bus::{BusValue, MethodCall, Transport};
//! use hal_testkit::FakeHald;
//!
//! let hald = FakeHald::new();
//! hald.add_device(
//!     "/org/freedesktop/Hal/devices/computer",
//!     vec![("system.hardware.serial", BusValue::from("ABC123"))],
//! );
//!
//! let conn = hald.connect();
//! let reply = conn
//!     .call(
//!         &MethodCall::new(
//!             hal_testkit::SERVICE,
//!             "/org/freedesktop/Hal/devices/computer",
//!             hal_testkit::DEVICE_INTERFACE,
//!             "GetProperty",
//!         )
//!         .arg("system.hardware.serial"),
//!     )
//!     .unwrap();
//! assert_eq!(reply[0].as_str(), Some("ABC123"));
//! ```
//!
//! # Architecture
//!
//! ```text
//! FakeHald (Arc<Mutex<DaemonState>>)
//!     │
//!     ├── DeviceStore: udi -> DeviceRecord { PropertyBag, locks }
//!     ├── LockTable (global interface locks)
//!     └── connections: Vec<Weak<ConnectionShared>>
//!             │
//!             └── FakeConnection { match rules, signal queue, call log }
//! ```

pub mod connection;
pub mod daemon;
pub mod locks;
pub mod store;

pub use connection::FakeConnection;
pub use daemon::FakeHald;
pub use locks::LockTable;
pub use store::{DeviceLock, DeviceRecord, DeviceStore, PropertyBag};

/// Well-known bus name of the daemon
pub const SERVICE: &str = "org.freedesktop.Hal";

/// Object path of the manager object
pub const MANAGER_PATH: &str = "/org/freedesktop/Hal/Manager";

pub const MANAGER_INTERFACE: &str = "org.freedesktop.Hal.Manager";
pub const DEVICE_INTERFACE: &str = "org.freedesktop.Hal.Device";
pub const SINGLETON_INTERFACE: &str = "org.freedesktop.Hal.SingletonAddon";

/// Every device identifier starts with this prefix
pub const DEVICE_PREFIX: &str = "/org/freedesktop/Hal/devices/";

/// Error names the daemon replies with
pub mod errors {
    pub const NO_SUCH_DEVICE: &str = "org.freedesktop.Hal.NoSuchDevice";
    pub const NO_SUCH_PROPERTY: &str = "org.freedesktop.Hal.NoSuchProperty";
    pub const TYPE_MISMATCH: &str = "org.freedesktop.Hal.TypeMismatch";
    pub const DEVICE_ALREADY_LOCKED: &str = "org.freedesktop.Hal.DeviceAlreadyLocked";
    pub const DEVICE_NOT_LOCKED: &str = "org.freedesktop.Hal.DeviceNotLocked";
    pub const INTERFACE_ALREADY_LOCKED: &str = "org.freedesktop.Hal.Device.InterfaceAlreadyLocked";
    pub const INTERFACE_NOT_LOCKED: &str = "org.freedesktop.Hal.Device.InterfaceNotLocked";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
}

/// Operation codes carried by `CommitChangeSet` entries
///
/// Plain sets use the property type code of the value; the remaining
/// operations follow the string-list code's `('s' << 8) + letter` scheme.
pub mod ops {
    pub const TYPE_INT32: u32 = b'i' as u32;
    pub const TYPE_UINT64: u32 = b't' as u32;
    pub const TYPE_DOUBLE: u32 = b'd' as u32;
    pub const TYPE_BOOL: u32 = b'b' as u32;
    pub const TYPE_STRING: u32 = b's' as u32;
    pub const TYPE_STRLIST: u32 = ((b's' as u32) << 8) + b'l' as u32;
    pub const REMOVE: u32 = b'r' as u32;
    pub const STRLIST_APPEND: u32 = ((b's' as u32) << 8) + b'a' as u32;
    pub const STRLIST_PREPEND: u32 = ((b's' as u32) << 8) + b'p' as u32;
    pub const STRLIST_REMOVE_INDEX: u32 = ((b's' as u32) << 8) + b'i' as u32;
    pub const STRLIST_REMOVE_VALUE: u32 = ((b's' as u32) << 8) + b'r' as u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strlist_code_matches_wire_value() {
        assert_eq!(ops::TYPE_STRLIST, 29548);
        assert_eq!(ops::TYPE_STRING, 115);
    }
}
