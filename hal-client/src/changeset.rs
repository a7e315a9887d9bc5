//! Batched property updates
//!
//! A [`ChangeSet`] collects property changes for one device and sends them
//! in a single request with [`Context::commit_changeset`]. The daemon applies
//! the whole batch in insertion order or none of it, so a key written twice
//! ends up with the last value.
//!
//! Every setter copies its arguments; a setter that fails validation leaves
//! the changeset as it was.
//!
//! [`Context::commit_changeset`]: crate::Context::commit_changeset

use hal_bus::BusValue;

use crate::error::Result;
use crate::udi::Udi;
use crate::value::{validate_key, validate_text, PropertyValue};

const OP_REMOVE: u32 = b'r' as u32;
const OP_STRLIST_APPEND: u32 = ((b's' as u32) << 8) + b'a' as u32;
const OP_STRLIST_PREPEND: u32 = ((b's' as u32) << 8) + b'p' as u32;
const OP_STRLIST_REMOVE_INDEX: u32 = ((b's' as u32) << 8) + b'i' as u32;
const OP_STRLIST_REMOVE_VALUE: u32 = ((b's' as u32) << 8) + b'r' as u32;

/// What a single change does to its key
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOp {
    Set(PropertyValue),
    Remove,
    StrListAppend(String),
    StrListPrepend(String),
    StrListRemoveIndex(u32),
    StrListRemoveValue(String),
}

impl ChangeOp {
    /// Operation code carried on the wire
    pub fn code(&self) -> u32 {
        match self {
            Self::Set(value) => value.property_type().code() as u32,
            Self::Remove => OP_REMOVE,
            Self::StrListAppend(_) => OP_STRLIST_APPEND,
            Self::StrListPrepend(_) => OP_STRLIST_PREPEND,
            Self::StrListRemoveIndex(_) => OP_STRLIST_REMOVE_INDEX,
            Self::StrListRemoveValue(_) => OP_STRLIST_REMOVE_VALUE,
        }
    }

    fn operand(&self) -> BusValue {
        match self {
            Self::Set(value) => value.to_bus(),
            Self::Remove => BusValue::Bool(false),
            Self::StrListAppend(s) | Self::StrListPrepend(s) | Self::StrListRemoveValue(s) => {
                BusValue::Str(s.clone())
            }
            Self::StrListRemoveIndex(index) => BusValue::UInt32(*index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    key: String,
    op: ChangeOp,
}

impl Change {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn op(&self) -> &ChangeOp {
        &self.op
    }
}

/// Pending property changes for one device
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    udi: Udi,
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Start an empty changeset; fails locally on a malformed identifier
    pub fn new(udi: &str) -> Result<Self> {
        Ok(Self::for_device(Udi::new(udi)?))
    }

    pub fn for_device(udi: Udi) -> Self {
        Self {
            udi,
            changes: Vec::new(),
        }
    }

    pub fn udi(&self) -> &Udi {
        &self.udi
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    fn push(&mut self, key: &str, op: ChangeOp) -> Result<()> {
        validate_key(key)?;
        self.changes.push(Change {
            key: key.to_string(),
            op,
        });
        Ok(())
    }

    pub fn set_property_string(&mut self, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.push(key, ChangeOp::Set(PropertyValue::String(value.to_string())))
    }

    pub fn set_property_int32(&mut self, key: &str, value: i32) -> Result<()> {
        self.push(key, ChangeOp::Set(PropertyValue::Int32(value)))
    }

    pub fn set_property_uint64(&mut self, key: &str, value: u64) -> Result<()> {
        self.push(key, ChangeOp::Set(PropertyValue::UInt64(value)))
    }

    pub fn set_property_double(&mut self, key: &str, value: f64) -> Result<()> {
        self.push(key, ChangeOp::Set(PropertyValue::Double(value)))
    }

    pub fn set_property_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.push(key, ChangeOp::Set(PropertyValue::Bool(value)))
    }

    /// Replace a string list; elements keep their order
    pub fn set_property_strlist<S: AsRef<str>>(&mut self, key: &str, values: &[S]) -> Result<()> {
        validate_key(key)?;
        for value in values {
            validate_text("value", value.as_ref())?;
        }
        let list: Vec<String> = values.iter().map(|s| s.as_ref().to_string()).collect();
        self.push(key, ChangeOp::Set(PropertyValue::StrList(list)))
    }

    /// Set from an already typed value
    pub fn set_property(&mut self, key: &str, value: &PropertyValue) -> Result<()> {
        match value {
            PropertyValue::String(s) => self.set_property_string(key, s),
            PropertyValue::StrList(list) => self.set_property_strlist(key, list),
            other => self.push(key, ChangeOp::Set(other.clone())),
        }
    }

    pub fn remove_property(&mut self, key: &str) -> Result<()> {
        self.push(key, ChangeOp::Remove)
    }

    pub fn strlist_append(&mut self, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.push(key, ChangeOp::StrListAppend(value.to_string()))
    }

    pub fn strlist_prepend(&mut self, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.push(key, ChangeOp::StrListPrepend(value.to_string()))
    }

    /// Out-of-range indexes are ignored by the daemon
    pub fn strlist_remove_index(&mut self, key: &str, index: u32) -> Result<()> {
        self.push(key, ChangeOp::StrListRemoveIndex(index))
    }

    pub fn strlist_remove_value(&mut self, key: &str, value: &str) -> Result<()> {
        validate_text("value", value)?;
        self.push(key, ChangeOp::StrListRemoveValue(value.to_string()))
    }

    /// Whether every change is a plain set
    pub(crate) fn is_set_only(&self) -> bool {
        self.changes
            .iter()
            .all(|change| matches!(change.op, ChangeOp::Set(_)))
    }

    /// Request argument: `a{sv}` when set-only, `a(suv)` otherwise
    pub(crate) fn to_bus(&self) -> BusValue {
        if self.is_set_only() {
            BusValue::Dict(
                self.changes
                    .iter()
                    .map(|change| (change.key.clone(), BusValue::variant(change.op.operand())))
                    .collect(),
            )
        } else {
            BusValue::Array(
                self.changes
                    .iter()
                    .map(|change| {
                        BusValue::Struct(vec![
                            BusValue::Str(change.key.clone()),
                            BusValue::UInt32(change.op.code()),
                            BusValue::variant(change.op.operand()),
                        ])
                    })
                    .collect(),
            )
        }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HalError;

    const DEVICE: &str = "/org/freedesktop/Hal/devices/computer";

    #[test]
    fn test_new_rejects_bad_udi() {
        assert!(matches!(ChangeSet::new("computer"), Err(HalError::InvalidUdi(_))));
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut cs = ChangeSet::new(DEVICE).unwrap();
        cs.set_property_int32("b", 1).unwrap();
        cs.set_property_string("a", "x").unwrap();
        cs.set_property_int32("b", 2).unwrap();

        let keys: Vec<&str> = cs.iter().map(Change::key).collect();
        assert_eq!(keys, vec!["b", "a", "b"]);
        assert_eq!(cs.len(), 3);
    }

    #[test]
    fn test_failed_setter_leaves_changeset_unchanged() {
        let mut cs = ChangeSet::new(DEVICE).unwrap();
        cs.set_property_bool("ok", true).unwrap();
        let before = cs.clone();

        assert!(cs.set_property_string("", "x").is_err());
        assert!(cs.set_property_string("k", "a\0b").is_err());
        assert!(cs.set_property_strlist("k", &["fine", "bad\0"]).is_err());
        assert!(cs.strlist_append("kéy", "x").is_err());

        assert_eq!(cs, before);
    }

    #[test]
    fn test_set_only_encodes_as_dict() {
        let mut cs = ChangeSet::new(DEVICE).unwrap();
        cs.set_property_string("info.product", "Laptop").unwrap();
        cs.set_property_uint64("storage.size", 7).unwrap();

        assert!(cs.is_set_only());
        assert_eq!(
            cs.to_bus(),
            BusValue::Dict(vec![
                ("info.product".to_string(), BusValue::variant("Laptop")),
                ("storage.size".to_string(), BusValue::variant(7u64)),
            ])
        );
    }

    #[test]
    fn test_mixed_ops_encode_with_codes() {
        let mut cs = ChangeSet::new(DEVICE).unwrap();
        cs.set_property_strlist("x.list", &["a"]).unwrap();
        cs.strlist_append("x.list", "b").unwrap();
        cs.strlist_remove_index("x.list", 0).unwrap();
        cs.remove_property("x.old").unwrap();

        assert!(!cs.is_set_only());
        let entries = match cs.to_bus() {
            BusValue::Array(entries) => entries,
            other => panic!("Expected array, got {:?}", other),
        };
        let codes: Vec<u32> = entries
            .iter()
            .map(|entry| entry.as_struct().unwrap()[1].as_u32().unwrap())
            .collect();
        assert_eq!(codes, vec![29548, 29537, 29545, 114]);
        assert_eq!(entries[0].signature(), "(suv)");
    }
}
