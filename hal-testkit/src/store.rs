//! Ordered property storage for the fake daemon
//!
//! - `PropertyBag`: one device's properties in insertion order, with change detection
//! - `DeviceRecord`: a bag plus the device-scoped lock state
//! - `DeviceStore`: committed devices and not-yet-committed temporary devices

use std::collections::BTreeMap;

use hal_bus::BusValue;

use crate::locks::LockTable;

/// Property that lists a device's capabilities
pub const CAPABILITIES_KEY: &str = "info.capabilities";

// ============================================================================
// PropertyBag - ordered property storage for a single device
// ============================================================================

/// Properties of one device, kept in the order they were first set
///
/// Replacing a value keeps its original position, so `GetAllProperties`
/// returns a stable order for the lifetime of the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: Vec<(String, BusValue)>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from `(key, value)` pairs; later duplicates replace earlier ones
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, BusValue)>,
        K: Into<String>,
    {
        let mut bag = Self::new();
        for (key, value) in entries {
            bag.set(key.into(), value);
        }
        bag
    }

    pub fn get(&self, key: &str) -> Option<&BusValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut BusValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Set a value, returning whether anything changed
    pub fn set(&mut self, key: String, value: BusValue) -> bool {
        let value = value.unwrap_variant().clone();
        match self.get_mut(&key) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.entries.push((key, value));
                true
            }
        }
    }

    /// Remove a property, returning whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BusValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Wire form: `a{sv}` with every value wrapped in a variant
    pub fn to_dict(&self) -> BusValue {
        BusValue::Dict(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), BusValue::variant(v.clone())))
                .collect(),
        )
    }
}

// ============================================================================
// DeviceRecord / DeviceStore
// ============================================================================

/// Advisory whole-device lock taken with `Lock`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLock {
    pub owner: String,
    pub reason: String,
}

/// Everything the daemon knows about one device
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub properties: PropertyBag,
    pub lock: Option<DeviceLock>,
    pub interface_locks: LockTable,
    pub claimed_interfaces: Vec<String>,
}

impl DeviceRecord {
    pub fn with_properties(properties: PropertyBag) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.properties
            .get(CAPABILITIES_KEY)
            .and_then(BusValue::as_str_array)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c == capability)
    }
}

/// The global device list plus temporary devices awaiting `CommitToGdl`
#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: BTreeMap<String, DeviceRecord>,
    temporary: BTreeMap<String, DeviceRecord>,
    next_temporary: u32,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a committed or temporary device
    pub fn get(&self, udi: &str) -> Option<&DeviceRecord> {
        self.devices.get(udi).or_else(|| self.temporary.get(udi))
    }

    pub fn get_mut(&mut self, udi: &str) -> Option<&mut DeviceRecord> {
        match self.devices.get_mut(udi) {
            Some(record) => Some(record),
            None => self.temporary.get_mut(udi),
        }
    }

    /// Whether a device is in the global device list (temporary devices are not)
    pub fn exists(&self, udi: &str) -> bool {
        self.devices.contains_key(udi)
    }

    pub fn insert(&mut self, udi: String, record: DeviceRecord) {
        self.devices.insert(udi, record);
    }

    pub fn remove(&mut self, udi: &str) -> Option<DeviceRecord> {
        self.devices
            .remove(udi)
            .or_else(|| self.temporary.remove(udi))
    }

    /// Allocate an empty temporary device and return its identifier
    pub fn new_temporary(&mut self, prefix: &str) -> String {
        let udi = format!("{}tmp{}", prefix, self.next_temporary);
        self.next_temporary += 1;
        self.temporary.insert(udi.clone(), DeviceRecord::default());
        udi
    }

    /// Move a temporary device into the global device list under a new name
    pub fn commit_temporary(&mut self, temp_udi: &str, udi: String) -> bool {
        match self.temporary.remove(temp_udi) {
            Some(record) => {
                self.devices.insert(udi, record);
                true
            }
            None => false,
        }
    }

    /// Committed devices in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceRecord)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut DeviceRecord)> {
        self.devices
            .iter_mut()
            .chain(self.temporary.iter_mut())
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_bag_change_detection() {
        let mut bag = PropertyBag::new();
        assert!(bag.is_empty());

        assert!(bag.set("info.product".to_string(), BusValue::from("Laptop")));
        assert!(!bag.set("info.product".to_string(), BusValue::from("Laptop")));
        assert!(bag.set("info.product".to_string(), BusValue::from("Desktop")));

        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("info.product"), Some(&BusValue::from("Desktop")));
    }

    #[test]
    fn test_property_bag_keeps_first_insertion_position() {
        let mut bag = PropertyBag::new();
        bag.set("b".to_string(), BusValue::from(1i32));
        bag.set("a".to_string(), BusValue::from(2i32));
        bag.set("b".to_string(), BusValue::from(3i32));

        let keys: Vec<&str> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_property_bag_stores_unwrapped_values() {
        let mut bag = PropertyBag::new();
        bag.set("k".to_string(), BusValue::variant(5u64));
        assert_eq!(bag.get("k"), Some(&BusValue::UInt64(5)));

        match bag.to_dict() {
            BusValue::Dict(entries) => {
                assert_eq!(entries[0].1, BusValue::variant(5u64));
            }
            other => panic!("Expected dict, got {:?}", other),
        }
    }

    #[test]
    fn test_property_bag_remove() {
        let mut bag = PropertyBag::from_entries(vec![("k", BusValue::from(true))]);
        assert!(bag.remove("k"));
        assert!(!bag.remove("k"));
        assert!(!bag.contains("k"));
    }

    #[test]
    fn test_temporary_device_commit() {
        let mut store = DeviceStore::new();
        let temp = store.new_temporary("/org/freedesktop/Hal/devices/");
        assert!(store.get(&temp).is_some());
        assert!(!store.exists(&temp));

        let udi = "/org/freedesktop/Hal/devices/usb_1".to_string();
        assert!(store.commit_temporary(&temp, udi.clone()));
        assert!(store.exists(&udi));
        assert!(store.get(&temp).is_none());
        assert!(!store.commit_temporary(&temp, udi));
    }

    #[test]
    fn test_capabilities() {
        let record = DeviceRecord::with_properties(PropertyBag::from_entries(vec![(
            CAPABILITIES_KEY,
            BusValue::from(vec!["block".to_string(), "storage".to_string()]),
        )]));
        assert!(record.has_capability("storage"));
        assert!(!record.has_capability("net"));
    }
}
