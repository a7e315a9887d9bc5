//! Per-device operations
//!
//! Every method validates its identifier and key locally, then makes
//! exactly one call to the device object, except for the composite helpers
//! at the end which combine several.

use std::io::Write;

use hal_bus::BusValue;

use crate::changeset::ChangeSet;
use crate::context::{first_arg, reply_bool, reply_string, Context};
use crate::error::{names, HalError, Result};
use crate::property_set::PropertySet;
use crate::udi::Udi;
use crate::value::{validate_key, validate_name, validate_text, PropertyType, PropertyValue};

impl Context {
    /// Snapshot of every property of a device
    pub fn get_all_properties(&self, udi: &str) -> Result<PropertySet> {
        let udi = Udi::new(udi)?;
        let reply = self.call_device(&udi, "GetAllProperties", Vec::new())?;
        PropertySet::from_bus("GetAllProperties", first_arg("GetAllProperties", &reply)?)
    }

    pub fn get_property(&self, udi: &str, key: &str) -> Result<PropertyValue> {
        let udi = Udi::new(udi)?;
        validate_key(key)?;
        let reply = self.call_device(&udi, "GetProperty", vec![BusValue::from(key)])?;
        let value = first_arg("GetProperty", &reply)?;
        PropertyValue::from_bus(value).ok_or_else(|| {
            HalError::malformed(
                "GetProperty",
                format!("unsupported type {}", value.unwrap_variant().signature()),
            )
        })
    }

    /// Type of a property; `Invalid` when the device has no such property
    pub fn get_property_type(&self, udi: &str, key: &str) -> Result<PropertyType> {
        let udi = Udi::new(udi)?;
        validate_key(key)?;
        match self.call_device(&udi, "GetPropertyType", vec![BusValue::from(key)]) {
            Ok(reply) => {
                let value = first_arg("GetPropertyType", &reply)?;
                let code = value.as_i32().ok_or_else(|| {
                    HalError::malformed("GetPropertyType", format!("expected i, got {}", value.signature()))
                })?;
                Ok(PropertyType::from_code(code))
            }
            Err(e) if e.is_daemon_error(names::NO_SUCH_PROPERTY) => Ok(PropertyType::Invalid),
            Err(e) => Err(e),
        }
    }

    fn get_typed<T>(
        &self,
        udi: &str,
        key: &str,
        expected: PropertyType,
        extract: impl FnOnce(PropertyValue) -> Option<T>,
    ) -> Result<T> {
        let value = self.get_property(udi, key)?;
        let found = value.property_type();
        extract(value).ok_or_else(|| HalError::TypeMismatch {
            key: key.to_string(),
            expected,
            found,
        })
    }

    pub fn get_property_string(&self, udi: &str, key: &str) -> Result<String> {
        self.get_typed(udi, key, PropertyType::String, |value| match value {
            PropertyValue::String(v) => Some(v),
            _ => None,
        })
    }

    pub fn get_property_int32(&self, udi: &str, key: &str) -> Result<i32> {
        self.get_typed(udi, key, PropertyType::Int32, |value| value.as_i32())
    }

    pub fn get_property_uint64(&self, udi: &str, key: &str) -> Result<u64> {
        self.get_typed(udi, key, PropertyType::UInt64, |value| value.as_u64())
    }

    pub fn get_property_double(&self, udi: &str, key: &str) -> Result<f64> {
        self.get_typed(udi, key, PropertyType::Double, |value| value.as_f64())
    }

    pub fn get_property_bool(&self, udi: &str, key: &str) -> Result<bool> {
        self.get_typed(udi, key, PropertyType::Bool, |value| value.as_bool())
    }

    pub fn get_property_strlist(&self, udi: &str, key: &str) -> Result<Vec<String>> {
        self.get_typed(udi, key, PropertyType::StrList, |value| match value {
            PropertyValue::StrList(v) => Some(v),
            _ => None,
        })
    }

    fn set_property(&self, udi: &str, key: &str, member: &str, value: BusValue) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_key(key)?;
        self.call_device(&udi, member, vec![BusValue::from(key), value])?;
        Ok(())
    }

    pub fn set_property_string(&self, udi: &str, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.set_property(udi, key, "SetPropertyString", BusValue::from(value))
    }

    pub fn set_property_int32(&self, udi: &str, key: &str, value: i32) -> Result<()> {
        self.set_property(udi, key, "SetPropertyInteger", BusValue::Int32(value))
    }

    /// 64-bit values share the daemon's integer setter
    pub fn set_property_uint64(&self, udi: &str, key: &str, value: u64) -> Result<()> {
        self.set_property(udi, key, "SetPropertyInteger", BusValue::UInt64(value))
    }

    pub fn set_property_double(&self, udi: &str, key: &str, value: f64) -> Result<()> {
        self.set_property(udi, key, "SetPropertyDouble", BusValue::Double(value))
    }

    pub fn set_property_bool(&self, udi: &str, key: &str, value: bool) -> Result<()> {
        self.set_property(udi, key, "SetPropertyBoolean", BusValue::Bool(value))
    }

    pub fn set_property_strlist<S: AsRef<str>>(&self, udi: &str, key: &str, values: &[S]) -> Result<()> {
        let mut list = Vec::with_capacity(values.len());
        for value in values {
            validate_text("value", value.as_ref())?;
            list.push(value.as_ref().to_string());
        }
        self.set_property(udi, key, "SetPropertyStringList", BusValue::StrArray(list))
    }

    pub fn remove_property(&self, udi: &str, key: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_key(key)?;
        self.call_device(&udi, "RemoveProperty", vec![BusValue::from(key)])?;
        Ok(())
    }

    pub fn property_strlist_append(&self, udi: &str, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.set_property(udi, key, "StringListAppend", BusValue::from(value))
    }

    pub fn property_strlist_prepend(&self, udi: &str, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.set_property(udi, key, "StringListPrepend", BusValue::from(value))
    }

    pub fn property_strlist_remove_index(&self, udi: &str, key: &str, index: u32) -> Result<()> {
        self.set_property(udi, key, "StringListRemoveIndex", BusValue::UInt32(index))
    }

    /// Remove `value` from a string list
    pub fn property_strlist_remove(&self, udi: &str, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.set_property(udi, key, "StringListRemove", BusValue::from(value))
    }

    pub fn property_exists(&self, udi: &str, key: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_key(key)?;
        let reply = self.call_device(&udi, "PropertyExists", vec![BusValue::from(key)])?;
        reply_bool("PropertyExists", &reply)
    }

    pub fn add_capability(&self, udi: &str, capability: &str) -> Result<()> {
        let udi = Udi::new(udi)?;
        validate_name("capability", capability)?;
        self.call_device(&udi, "AddCapability", vec![BusValue::from(capability)])?;
        Ok(())
    }

    pub fn query_capability(&self, udi: &str, capability: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_name("capability", capability)?;
        let reply = self.call_device(&udi, "QueryCapability", vec![BusValue::from(capability)])?;
        reply_bool("QueryCapability", &reply)
    }

    /// Send a whole changeset in one request
    ///
    /// Set-only changesets go out as `SetMultipleProperties`; anything with
    /// removals or list edits goes out as `CommitChangeSet`. An empty
    /// changeset succeeds without contacting the daemon.
    pub fn commit_changeset(&self, changeset: &ChangeSet) -> Result<()> {
        self.ready()?;
        if changeset.is_empty() {
            tracing::debug!(udi = %changeset.udi(), "Skipping empty changeset");
            return Ok(());
        }

        let member = if changeset.is_set_only() {
            "SetMultipleProperties"
        } else {
            "CommitChangeSet"
        };
        tracing::debug!(udi = %changeset.udi(), changes = changeset.len(), member, "Committing changeset");
        self.call_device(changeset.udi(), member, vec![changeset.to_bus()])?;
        Ok(())
    }

    pub fn rescan(&self, udi: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        let reply = self.call_device(&udi, "Rescan", Vec::new())?;
        reply_bool("Rescan", &reply)
    }

    pub fn reprobe(&self, udi: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        let reply = self.call_device(&udi, "Reprobe", Vec::new())?;
        reply_bool("Reprobe", &reply)
    }

    /// Broadcast a condition such as a button press; meant for daemon helpers
    pub fn emit_condition(&self, udi: &str, name: &str, details: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_name("name", name)?;
        validate_text("details", details)?;
        let reply = self.call_device(
            &udi,
            "EmitCondition",
            vec![BusValue::from(name), BusValue::from(details)],
        )?;
        reply_bool("EmitCondition", &reply)
    }

    /// Tell the daemon an addon finished setting up a device
    pub fn addon_is_ready(&self, udi: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        let reply = self.call_device(&udi, "AddonIsReady", Vec::new())?;
        reply_bool("AddonIsReady", &reply)
    }

    /// Export an interface on a device object, with its introspection XML
    pub fn claim_interface(&self, udi: &str, interface: &str, introspection_xml: &str) -> Result<bool> {
        let udi = Udi::new(udi)?;
        validate_name("interface", interface)?;
        validate_text("introspection_xml", introspection_xml)?;
        let reply = self.call_device(
            &udi,
            "ClaimInterface",
            vec![BusValue::from(interface), BusValue::from(introspection_xml)],
        )?;
        reply_bool("ClaimInterface", &reply)
    }

    /// Ask the daemon's policy whether `caller` may perform `action`
    ///
    /// Returns the daemon's answer verbatim, e.g. `yes` or `no`.
    pub fn is_caller_privileged(&self, udi: &str, action: &str, caller: &str) -> Result<String> {
        let udi = Udi::new(udi)?;
        validate_name("action", action)?;
        validate_name("caller", caller)?;
        let reply = self.call_device(
            &udi,
            "IsCallerPrivileged",
            vec![BusValue::from(action), BusValue::from(caller)],
        )?;
        reply_string("IsCallerPrivileged", &reply)
    }

    /// Copy every property of `source` onto `target` in one changeset
    pub fn merge_properties(&self, target: &str, source: &str) -> Result<()> {
        let target = Udi::new(target)?;
        let properties = self.get_all_properties(source)?;

        let mut changeset = ChangeSet::for_device(target);
        for property in &properties {
            changeset.set_property(property.key(), property.value())?;
        }
        self.commit_changeset(&changeset)
    }

    /// Whether every property of `udi1` under `namespace` exists on `udi2`
    /// with the same type and value
    ///
    /// Properties present only on `udi2` are not considered.
    pub fn device_matches(&self, udi1: &str, udi2: &str, namespace: &str) -> Result<bool> {
        Udi::new(udi2)?;
        if namespace.is_empty() {
            return Err(HalError::invalid_argument("namespace", "must not be empty"));
        }

        let first = self.get_all_properties(udi1)?;
        let second = self.get_all_properties(udi2)?;
        Ok(first
            .iter()
            .filter(|property| property.key().starts_with(namespace))
            .all(|property| second.get(property.key()) == Some(property.value())))
    }

    /// Write a human-readable dump of a device
    pub fn device_print<W: Write>(&self, udi: &str, writer: &mut W) -> Result<()> {
        let properties = self.get_all_properties(udi)?;
        writeln!(writer, "device_id = {}", udi)?;
        write!(writer, "{}", properties)?;
        writeln!(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_testkit::FakeHald;

    const LAPTOP: &str = "/org/freedesktop/Hal/devices/laptop";

    fn setup() -> (FakeHald, Context) {
        let hald = FakeHald::new();
        hald.add_device(
            LAPTOP,
            vec![
                ("info.product", BusValue::from("Laptop")),
                ("battery.present", BusValue::from(true)),
            ],
        );
        let mut ctx = Context::new();
        ctx.set_transport(hald.connect()).unwrap();
        ctx.init().unwrap();
        (hald, ctx)
    }

    #[test]
    fn test_get_property_type_maps_missing_to_invalid() {
        let (_hald, ctx) = setup();
        assert_eq!(ctx.get_property_type(LAPTOP, "info.product").unwrap(), PropertyType::String);
        assert_eq!(ctx.get_property_type(LAPTOP, "no.such").unwrap(), PropertyType::Invalid);
    }

    #[test]
    fn test_typed_getter_mismatch() {
        let (_hald, ctx) = setup();
        assert_eq!(
            ctx.get_property_int32(LAPTOP, "info.product"),
            Err(HalError::TypeMismatch {
                key: "info.product".to_string(),
                expected: PropertyType::Int32,
                found: PropertyType::String,
            })
        );
        assert!(ctx.get_property_bool(LAPTOP, "battery.present").unwrap());
    }

    #[test]
    fn test_commit_empty_changeset_skips_round_trip() {
        let hald = FakeHald::new();
        let conn = hald.connect();
        let mut ctx = Context::new();
        ctx.set_transport(conn.clone()).unwrap();
        ctx.init().unwrap();

        let changeset = ChangeSet::new(LAPTOP).unwrap();
        ctx.commit_changeset(&changeset).unwrap();
        assert_eq!(conn.call_count(), 0);
    }

    #[test]
    fn test_device_print() {
        let (_hald, ctx) = setup();
        let mut out = Vec::new();
        ctx.device_print(LAPTOP, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("device_id = /org/freedesktop/Hal/devices/laptop\n"));
        assert!(text.contains("info.product = 'Laptop' (string)\n"));
        assert!(text.contains("battery.present = true (bool)\n"));
    }
}
