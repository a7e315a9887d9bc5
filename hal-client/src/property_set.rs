//! Snapshot of a device's properties
//!
//! A [`PropertySet`] is what `get_all_properties` returns: every property of
//! one device at the time of the call, in the order the daemon sent them.
//! The set never talks to the daemon again; it is plain owned data.
//!
//! Absent keys are not errors. Typed getters answer `None` when the key is
//! missing or holds another type, and [`PropertySet::get_type`] answers
//! [`PropertyType::Invalid`].
//!
//! [`PropertySetIterator`] walks a set with an explicit cursor for callers
//! that want position-based access; ordinary code can use
//! [`PropertySet::iter`].

use std::collections::HashMap;
use std::fmt;

use hal_bus::BusValue;
use serde::{Deserialize, Serialize};

use crate::error::{HalError, Result};
use crate::value::{PropertyType, PropertyValue};

/// One key/value pair of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    key: String,
    value: PropertyValue,
}

impl Property {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }
}

/// All properties of one device, in daemon order
///
/// Serializes as a list of properties. Deserializing applies the same rules
/// as decoding a reply: empty keys are rejected and a repeated key keeps its
/// first position and its last value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Property>", into = "Vec<Property>")]
pub struct PropertySet {
    properties: Vec<Property>,
    /// Key to position in `properties`
    index: HashMap<String, usize>,
}

impl PropertySet {
    /// Decode an `a{sv}` reply
    ///
    /// A key sent twice keeps its first position and its last value.
    pub(crate) fn from_bus(method: &str, reply: &BusValue) -> Result<Self> {
        let entries = reply
            .as_dict()
            .ok_or_else(|| HalError::malformed(method, format!("expected a{{sv}}, got {}", reply.signature())))?;

        let mut set = Self::with_capacity(entries.len());
        for (key, value) in entries {
            let value = PropertyValue::from_bus(value).ok_or_else(|| {
                HalError::malformed(
                    method,
                    format!("property {} has unsupported type {}", key, value.unwrap_variant().signature()),
                )
            })?;
            set.insert(method, key.clone(), value)?;
        }
        Ok(set)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            properties: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    fn insert(&mut self, method: &str, key: String, value: PropertyValue) -> Result<()> {
        if key.is_empty() {
            return Err(HalError::malformed(method, "empty property key"));
        }
        match self.index.get(&key) {
            Some(&position) => self.properties[position].value = value,
            None => {
                self.index.insert(key.clone(), self.properties.len());
                self.properties.push(Property { key, value });
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .properties
            .iter()
            .enumerate()
            .map(|(position, p)| (p.key.clone(), position))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.index
            .get(key)
            .and_then(|&position| self.properties.get(position))
            .map(|p| &p.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Type of a property, `Invalid` when absent
    pub fn get_type(&self, key: &str) -> PropertyType {
        self.get(key)
            .map(PropertyValue::property_type)
            .unwrap_or(PropertyType::Invalid)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    pub fn get_int32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(PropertyValue::as_i32)
    }

    pub fn get_uint64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(PropertyValue::as_u64)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropertyValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(PropertyValue::as_bool)
    }

    pub fn get_strlist(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(PropertyValue::as_strlist)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.properties.iter()
    }

    /// Order properties by key
    ///
    /// Keys are unique, so sorting twice is the same as sorting once.
    pub fn sort(&mut self) {
        self.properties.sort_by(|a, b| a.key.cmp(&b.key));
        self.reindex();
    }
}

impl PartialEq for PropertySet {
    fn eq(&self, other: &Self) -> bool {
        self.properties == other.properties
    }
}

impl TryFrom<Vec<Property>> for PropertySet {
    type Error = HalError;

    fn try_from(properties: Vec<Property>) -> Result<Self> {
        let mut set = Self::with_capacity(properties.len());
        for Property { key, value } in properties {
            set.insert("PropertySet", key, value)?;
        }
        Ok(set)
    }
}

impl From<PropertySet> for Vec<Property> {
    fn from(set: PropertySet) -> Self {
        set.properties
    }
}

impl<'a> IntoIterator for &'a PropertySet {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for property in &self.properties {
            writeln!(
                f,
                "{} = {} ({})",
                property.key,
                property.value,
                property.property_type()
            )?;
        }
        Ok(())
    }
}

/// Cursor over a [`PropertySet`]
///
/// ```rust,ignore
/// let mut it = PropertySetIterator::new(&set);
/// while it.has_more() {
///     println!("{} is a {}", it.key().unwrap_or_default(), it.value_type());
///     it.advance();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PropertySetIterator<'a> {
    set: &'a PropertySet,
    index: usize,
}

impl<'a> PropertySetIterator<'a> {
    pub fn new(set: &'a PropertySet) -> Self {
        Self { set, index: 0 }
    }

    pub fn has_more(&self) -> bool {
        self.index < self.set.len()
    }

    /// Step to the next property; `false` when already past the end
    pub fn advance(&mut self) -> bool {
        if !self.has_more() {
            return false;
        }
        self.index += 1;
        true
    }

    fn current(&self) -> Option<&'a Property> {
        self.set.properties.get(self.index)
    }

    pub fn key(&self) -> Option<&'a str> {
        self.current().map(Property::key)
    }

    pub fn value(&self) -> Option<&'a PropertyValue> {
        self.current().map(Property::value)
    }

    /// Type at the cursor, `Invalid` past the end
    pub fn value_type(&self) -> PropertyType {
        self.current()
            .map(Property::property_type)
            .unwrap_or(PropertyType::Invalid)
    }

    pub fn get_string(&self) -> Option<&'a str> {
        self.value().and_then(PropertyValue::as_str)
    }

    pub fn get_int32(&self) -> Option<i32> {
        self.value().and_then(PropertyValue::as_i32)
    }

    pub fn get_uint64(&self) -> Option<u64> {
        self.value().and_then(PropertyValue::as_u64)
    }

    pub fn get_double(&self) -> Option<f64> {
        self.value().and_then(PropertyValue::as_f64)
    }

    pub fn get_bool(&self) -> Option<bool> {
        self.value().and_then(PropertyValue::as_bool)
    }

    pub fn get_strlist(&self) -> Option<&'a [String]> {
        self.value().and_then(PropertyValue::as_strlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dict(entries: Vec<(&str, BusValue)>) -> BusValue {
        BusValue::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), BusValue::variant(v)))
                .collect(),
        )
    }

    fn sample() -> PropertySet {
        PropertySet::from_bus(
            "GetAllProperties",
            &dict(vec![
                ("info.product", BusValue::from("Laptop")),
                ("battery.charge_level.percentage", BusValue::from(87i32)),
                ("storage.size", BusValue::from(500_107_862_016u64)),
                ("info.capabilities", BusValue::from(vec!["battery".to_string()])),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_typed_getters() {
        let set = sample();
        assert_eq!(set.len(), 4);
        assert_eq!(set.get_string("info.product"), Some("Laptop"));
        assert_eq!(set.get_int32("battery.charge_level.percentage"), Some(87));
        assert_eq!(set.get_uint64("storage.size"), Some(500_107_862_016));
        assert_eq!(
            set.get_strlist("info.capabilities"),
            Some(&["battery".to_string()][..])
        );
    }

    #[test]
    fn test_absent_and_mistyped_keys() {
        let set = sample();
        assert_eq!(set.get_type("no.such.key"), PropertyType::Invalid);
        assert_eq!(set.get_string("no.such.key"), None);
        assert_eq!(set.get_int32("info.product"), None);
        assert_eq!(set.get_bool("storage.size"), None);
    }

    #[test]
    fn test_duplicate_key_keeps_position_and_last_value() {
        let set = PropertySet::from_bus(
            "GetAllProperties",
            &dict(vec![
                ("a", BusValue::from(1i32)),
                ("b", BusValue::from(2i32)),
                ("a", BusValue::from(3i32)),
            ]),
        )
        .unwrap();
        let keys: Vec<&str> = set.iter().map(Property::key).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(set.get_int32("a"), Some(3));
    }

    #[test]
    fn test_unsupported_wire_type_is_rejected() {
        let err = PropertySet::from_bus(
            "GetAllProperties",
            &dict(vec![("x", BusValue::UInt32(1))]),
        )
        .unwrap_err();
        assert!(matches!(err, HalError::MalformedReply { .. }));

        assert!(PropertySet::from_bus("GetAllProperties", &BusValue::from("x")).is_err());
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut set = sample();
        set.sort();
        let once = set.clone();
        set.sort();
        assert_eq!(set, once);
        assert_eq!(set.iter().next().map(Property::key), Some("battery.charge_level.percentage"));
    }

    #[test]
    fn test_lookups_follow_sort() {
        let mut set = sample();
        set.sort();
        assert_eq!(set.get_string("info.product"), Some("Laptop"));
        assert_eq!(set.get_int32("battery.charge_level.percentage"), Some(87));
        assert_eq!(set.get_uint64("storage.size"), Some(500_107_862_016));
        assert_eq!(set.get_type("info.capabilities"), PropertyType::StrList);
    }

    #[test]
    fn test_large_set_lookups() {
        let entries: Vec<(String, BusValue)> = (0..5_000)
            .map(|i| (format!("key.{:05}", i), BusValue::variant(i)))
            .collect();
        let set = PropertySet::from_bus("GetAllProperties", &BusValue::Dict(entries)).unwrap();
        assert_eq!(set.len(), 5_000);
        for i in (0..5_000).step_by(499) {
            assert_eq!(set.get_int32(&format!("key.{:05}", i)), Some(i));
        }
        assert!(!set.contains_key("key.5000"));
    }

    #[test]
    fn test_deserialize_applies_reply_rules() {
        let json = r#"[
            {"key": "a", "value": {"Int32": 1}},
            {"key": "b", "value": {"Bool": true}},
            {"key": "a", "value": {"Int32": 2}}
        ]"#;
        let set: PropertySet = serde_json::from_str(json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_int32("a"), Some(2));
        let keys: Vec<&str> = set.iter().map(Property::key).collect();
        assert_eq!(keys, vec!["a", "b"]);

        let json = r#"[
            {"key": "a", "value": {"Int32": 1}},
            {"key": "", "value": {"Int32": 3}}
        ]"#;
        assert!(serde_json::from_str::<PropertySet>(json).is_err());
    }

    #[test]
    fn test_serde_json_shape() {
        let set = PropertySet::from_bus(
            "GetAllProperties",
            &dict(vec![("info.product", BusValue::from("Laptop"))]),
        )
        .unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"[{"key":"info.product","value":{"String":"Laptop"}}]"#);
        let back: PropertySet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.get_string("info.product"), Some("Laptop"));
    }

    #[test]
    fn test_iterator_sentinels() {
        let set = sample();
        let mut it = PropertySetIterator::new(&set);
        assert_eq!(it.key(), Some("info.product"));
        assert_eq!(it.get_string(), Some("Laptop"));
        assert_eq!(it.get_int32(), None);

        while it.advance() {}
        assert!(!it.has_more());
        assert_eq!(it.key(), None);
        assert_eq!(it.value_type(), PropertyType::Invalid);
        assert!(!it.advance());
    }

    #[test]
    fn test_display() {
        let set = PropertySet::from_bus(
            "GetAllProperties",
            &dict(vec![("info.product", BusValue::from("Laptop"))]),
        )
        .unwrap();
        assert_eq!(set.to_string(), "info.product = 'Laptop' (string)\n");
    }

    proptest! {
        #[test]
        fn prop_len_matches_advances(keys in proptest::collection::btree_set("[a-z]{1,8}(\\.[a-z]{1,8}){0,2}", 0..32)) {
            let entries: Vec<(&str, BusValue)> = keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.as_str(), BusValue::from(i as i32)))
                .collect();
            let set = PropertySet::from_bus("GetAllProperties", &dict(entries)).unwrap();

            let mut it = PropertySetIterator::new(&set);
            let mut advances = 0;
            while it.has_more() {
                prop_assert!(it.key().is_some());
                prop_assert!(it.advance());
                advances += 1;
            }
            prop_assert_eq!(advances, set.len());
            prop_assert_eq!(set.len(), keys.len());
        }
    }
}
