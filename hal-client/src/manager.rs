//! Device registry queries and device creation through the manager object

use hal_bus::BusValue;

use crate::context::{first_arg, reply_bool, reply_string, reply_udis, Context};
use crate::error::{HalError, Result};
use crate::property_set::PropertySet;
use crate::udi::Udi;
use crate::value::{validate_key, validate_name, validate_text};

impl Context {
    /// Identifiers of every device in the registry
    pub fn get_all_devices(&self) -> Result<Vec<Udi>> {
        let reply = self.call_manager("GetAllDevices", Vec::new())?;
        reply_udis("GetAllDevices", &reply)
    }

    /// Every device together with a snapshot of its properties
    pub fn get_all_devices_with_properties(&self) -> Result<Vec<(Udi, PropertySet)>> {
        const METHOD: &str = "GetAllDevicesWithProperties";

        let reply = self.call_manager(METHOD, Vec::new())?;
        let value = first_arg(METHOD, &reply)?;
        let entries = value
            .as_array()
            .ok_or_else(|| HalError::malformed(METHOD, format!("expected a(sa{{sv}}), got {}", value.signature())))?;

        let mut devices = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry.as_struct() {
                Some([udi, properties]) => {
                    let udi = udi
                        .as_str()
                        .ok_or_else(|| HalError::malformed(METHOD, "device entry without identifier"))?;
                    let udi = Udi::new(udi).map_err(|e| HalError::malformed(METHOD, e.to_string()))?;
                    devices.push((udi, PropertySet::from_bus(METHOD, properties)?));
                }
                _ => {
                    return Err(HalError::malformed(
                        METHOD,
                        format!("unexpected device entry {}", entry.signature()),
                    ))
                }
            }
        }
        Ok(devices)
    }

    pub fn device_exists(&self, udi: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        let reply = self.call_manager("DeviceExists", vec![BusValue::from(udi.as_str())])?;
        reply_bool("DeviceExists", &reply)
    }

    /// Devices whose string property `key` equals `value`
    pub fn find_device_string_match(&self, key: &str, value: &str) -> Result<Vec<Udi>> {
        validate_key(key)?;
        validate_text("value", value)?;
        let reply = self.call_manager(
            "FindDeviceStringMatch",
            vec![BusValue::from(key), BusValue::from(value)],
        )?;
        reply_udis("FindDeviceStringMatch", &reply)
    }

    pub fn find_device_by_capability(&self, capability: &str) -> Result<Vec<Udi>> {
        validate_name("capability", capability)?;
        let reply = self.call_manager("FindDeviceByCapability", vec![BusValue::from(capability)])?;
        reply_udis("FindDeviceByCapability", &reply)
    }

    /// Create a temporary device outside the registry
    ///
    /// The device can be populated through its identifier and becomes
    /// visible once passed to [`Context::commit_to_gdl`].
    pub fn new_device(&self) -> Result<Udi> {
        let reply = self.call_manager("NewDevice", Vec::new())?;
        let udi = reply_string("NewDevice", &reply)?;
        Udi::new(udi).map_err(|e| HalError::malformed("NewDevice", e.to_string()))
    }

    /// Move a temporary device into the registry under `udi`
    pub fn commit_to_gdl(&self, temp_udi: &str, udi: &str) -> Result<()> {
        let temp_udi = Udi::new(temp_udi)?;
        let udi = Udi::new(udi)?;
        self.call_manager(
            "CommitToGdl",
            vec![BusValue::from(temp_udi.as_str()), BusValue::from(udi.as_str())],
        )?;
        Ok(())
    }

    /// Remove a device from the registry, or discard a temporary one
    pub fn remove_device(&self, udi: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        self.call_manager("Remove", vec![BusValue::from(udi.as_str())])?;
        Ok(())
    }

    /// Report that a singleton addon started with `command_line` is ready
    pub fn singleton_addon_is_ready(&self, command_line: &str) -> Result<()> {
        if command_line.is_empty() {
            return Err(HalError::invalid_argument("command_line", "must not be empty"));
        }
        validate_text("command_line", command_line)?;
        self.call_manager("SingletonAddonIsReady", vec![BusValue::from(command_line)])?;
        Ok(())
    }
}
