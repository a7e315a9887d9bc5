//! Advisory locks: per-device interface locks, global interface locks and
//! the legacy whole-device lock
//!
//! Locks are owned by the bus connection, not the context. The daemon
//! releases everything a connection holds when it disconnects.

use hal_bus::BusValue;
use tracing::{debug, warn};

use crate::context::{reply_bool, Context};
use crate::error::{names, HalError, Result};
use crate::udi::Udi;
use crate::value::{validate_name, validate_text};

impl Context {
    /// Take a lock on `interface` for one device
    ///
    /// An exclusive lock fails while anyone else holds the interface; a
    /// shared lock fails only while someone holds it exclusively.
    pub fn acquire_interface_lock(&self, udi: &str, interface: &str, exclusive: bool) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_name("interface", interface)?;
        self.call_device(
            &udi,
            "AcquireInterfaceLock",
            vec![BusValue::from(interface), BusValue::Bool(exclusive)],
        )?;
        debug!(udi = %udi, interface, exclusive, "Acquired interface lock");
        Ok(())
    }

    pub fn release_interface_lock(&self, udi: &str, interface: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_name("interface", interface)?;
        self.call_device(&udi, "ReleaseInterfaceLock", vec![BusValue::from(interface)])?;
        debug!(udi = %udi, interface, "Released interface lock");
        Ok(())
    }

    /// Take a lock on `interface` across every device
    pub fn acquire_global_interface_lock(&self, interface: &str, exclusive: bool) -> Result<()> {
        validate_name("interface", interface)?;
        self.call_manager(
            "AcquireGlobalInterfaceLock",
            vec![BusValue::from(interface), BusValue::Bool(exclusive)],
        )?;
        debug!(interface, exclusive, "Acquired global interface lock");
        Ok(())
    }

    pub fn release_global_interface_lock(&self, interface: &str) -> Result<()> {
        validate_name("interface", interface)?;
        self.call_manager("ReleaseGlobalInterfaceLock", vec![BusValue::from(interface)])?;
        debug!(interface, "Released global interface lock");
        Ok(())
    }

    /// Whether the bus client `caller` is locked out of `interface` on a device
    ///
    /// Device and global locks both count. `caller` is a unique bus name
    /// such as `:1.42`.
    pub fn is_caller_locked_out(&self, udi: &str, interface: &str, caller: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_name("interface", interface)?;
        validate_name("caller", caller)?;
        let reply = self.call_device(
            &udi,
            "IsCallerLockedOut",
            vec![BusValue::from(interface), BusValue::from(caller)],
        )?;
        reply_bool("IsCallerLockedOut", &reply)
    }

    /// Whether anyone other than this connection holds a lock on `interface`
    pub fn is_locked_by_others(&self, udi: &str, interface: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_name("interface", interface)?;
        let reply = self.call_device(&udi, "IsLockedByOthers", vec![BusValue::from(interface)])?;
        reply_bool("IsLockedByOthers", &reply)
    }

    /// Take the whole-device lock
    ///
    /// Fails with [`HalError::DeviceAlreadyLocked`] carrying the current
    /// holder's reason when the device is taken.
    pub fn device_lock(&self, udi: &str, reason: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_text("reason", reason)?;
        match self.call_device(&udi, "Lock", vec![BusValue::from(reason)]) {
            Ok(reply) => {
                reply_bool("Lock", &reply)?;
                debug!(udi = %udi, reason, "Locked device");
                Ok(())
            }
            Err(HalError::Daemon { name, message }) if name == names::DEVICE_ALREADY_LOCKED => {
                warn!(udi = %udi, holder_reason = %message, "Device is already locked");
                Err(HalError::DeviceAlreadyLocked {
                    udi: udi.to_string(),
                    reason: message,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Release the whole-device lock held by this connection
    pub fn device_unlock(&self, udi: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        let reply = self.call_device(&udi, "Unlock", Vec::new())?;
        reply_bool("Unlock", &reply)?;
        debug!(udi = %udi, "Unlocked device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_testkit::FakeHald;

    const DISC: &str = "/org/freedesktop/Hal/devices/disc";

    fn context_for(hald: &FakeHald) -> Context {
        let mut ctx = Context::new();
        ctx.set_transport(hald.connect()).unwrap();
        ctx.init().unwrap();
        ctx
    }

    fn hald_with_disc() -> FakeHald {
        let hald = FakeHald::new();
        hald.add_device(DISC, vec![("info.product", BusValue::from("DVD"))]);
        hald
    }

    #[test]
    fn test_device_lock_reports_holder_reason() {
        let hald = hald_with_disc();
        let first = context_for(&hald);
        let second = context_for(&hald);

        first.device_lock(DISC, "burning").unwrap();
        assert_eq!(
            second.device_lock(DISC, "ripping"),
            Err(HalError::DeviceAlreadyLocked {
                udi: DISC.to_string(),
                reason: "burning".to_string(),
            })
        );

        let err = second.device_unlock(DISC).unwrap_err();
        assert!(err.is_daemon_error(names::DEVICE_NOT_LOCKED));

        first.device_unlock(DISC).unwrap();
        second.device_lock(DISC, "ripping").unwrap();
    }

    #[test]
    fn test_shared_interface_locks() {
        let hald = hald_with_disc();
        let first = context_for(&hald);
        let second = context_for(&hald);

        first.acquire_interface_lock(DISC, "org.freedesktop.Hal.Device.Storage", false).unwrap();
        second.acquire_interface_lock(DISC, "org.freedesktop.Hal.Device.Storage", false).unwrap();
        assert!(first.is_locked_by_others(DISC, "org.freedesktop.Hal.Device.Storage").unwrap());

        second.release_interface_lock(DISC, "org.freedesktop.Hal.Device.Storage").unwrap();
        assert!(!first.is_locked_by_others(DISC, "org.freedesktop.Hal.Device.Storage").unwrap());
    }

    #[test]
    fn test_global_lock_counts_for_device_queries() {
        let hald = hald_with_disc();
        let first = context_for(&hald);
        let second = context_for(&hald);

        first.acquire_global_interface_lock("org.freedesktop.Hal.Device.Storage", true).unwrap();
        assert!(second.is_locked_by_others(DISC, "org.freedesktop.Hal.Device.Storage").unwrap());

        first.release_global_interface_lock("org.freedesktop.Hal.Device.Storage").unwrap();
        assert!(!second.is_locked_by_others(DISC, "org.freedesktop.Hal.Device.Storage").unwrap());
    }
}
