//! The fake daemon: method handlers, change application and signal fan-out

use std::sync::{Arc, Weak};

use hal_bus::{names, BusError, BusValue, MethodCall, Signal};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::connection::{ConnectionShared, FakeConnection};
use crate::locks::LockTable;
use crate::store::{DeviceLock, DeviceRecord, DeviceStore, PropertyBag, CAPABILITIES_KEY};
use crate::{errors, ops, DEVICE_INTERFACE, DEVICE_PREFIX, MANAGER_INTERFACE, MANAGER_PATH, SERVICE};

/// `(key, removed, added)` as carried by `PropertyModified`
type Modification = (String, bool, bool);

#[derive(Debug, Default)]
struct DaemonState {
    store: DeviceStore,
    global_locks: LockTable,
    connections: Vec<Weak<ConnectionShared>>,
    next_connection: u32,
    ready_singletons: Vec<String>,
}

/// An in-memory HAL daemon
///
/// Cloning yields another handle to the same daemon.
#[derive(Debug, Clone, Default)]
pub struct FakeHald {
    state: Arc<Mutex<DaemonState>>,
}

impl FakeHald {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new client connection with its own unique name
    pub fn connect(&self) -> Arc<FakeConnection> {
        let mut state = self.state.lock();
        state.next_connection += 1;
        let name = format!(":1.{}", state.next_connection);
        let shared = Arc::new(ConnectionShared::new(name));
        state.connections.push(Arc::downgrade(&shared));
        drop(state);

        debug!(connection = %shared.unique_name, "Client connected");
        Arc::new(FakeConnection::new(self.clone(), shared))
    }

    /// Add (or replace) a device in the global device list
    pub fn add_device<I, K>(&self, udi: &str, properties: I)
    where
        I: IntoIterator<Item = (K, BusValue)>,
        K: Into<String>,
    {
        let record = DeviceRecord::with_properties(PropertyBag::from_entries(properties));
        let mut state = self.state.lock();
        state.store.insert(udi.to_string(), record);
        state.broadcast(&manager_signal("DeviceAdded", vec![BusValue::from(udi)]));
    }

    /// Drop a device from the device list, announcing its removal
    pub fn remove_device(&self, udi: &str) -> bool {
        let mut state = self.state.lock();
        let removed = state.store.remove(udi).is_some();
        if removed {
            state.broadcast(&manager_signal("DeviceRemoved", vec![BusValue::from(udi)]));
        }
        removed
    }

    /// Broadcast an arbitrary signal to every connection whose rules select it
    pub fn emit(&self, signal: Signal) {
        self.state.lock().broadcast(&signal);
    }

    pub fn device_exists(&self, udi: &str) -> bool {
        self.state.lock().store.exists(udi)
    }

    pub fn device_count(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Properties of a device in daemon order, variants stripped
    pub fn device_properties(&self, udi: &str) -> Option<Vec<(String, BusValue)>> {
        self.state.lock().store.get(udi).map(|record| {
            record
                .properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect()
        })
    }

    pub fn property(&self, udi: &str, key: &str) -> Option<BusValue> {
        self.state
            .lock()
            .store
            .get(udi)
            .and_then(|record| record.properties.get(key).cloned())
    }

    pub fn device_lock(&self, udi: &str) -> Option<DeviceLock> {
        self.state
            .lock()
            .store
            .get(udi)
            .and_then(|record| record.lock.clone())
    }

    pub fn interface_lock_holders(&self, udi: &str, interface: &str) -> Vec<String> {
        self.state
            .lock()
            .store
            .get(udi)
            .map(|record| record.interface_locks.holders(interface))
            .unwrap_or_default()
    }

    pub fn global_lock_holders(&self, interface: &str) -> Vec<String> {
        self.state.lock().global_locks.holders(interface)
    }

    pub fn claimed_interfaces(&self, udi: &str) -> Vec<String> {
        self.state
            .lock()
            .store
            .get(udi)
            .map(|record| record.claimed_interfaces.clone())
            .unwrap_or_default()
    }

    /// Command lines reported through `SingletonAddonIsReady`
    pub fn ready_singletons(&self) -> Vec<String> {
        self.state.lock().ready_singletons.clone()
    }

    pub(crate) fn handle(&self, caller: &str, call: &MethodCall) -> Result<Vec<BusValue>, BusError> {
        trace!(
            caller,
            path = %call.path,
            interface = %call.interface,
            member = %call.member,
            "Handling method call"
        );

        let mut state = self.state.lock();
        let mut signals = Vec::new();
        let result = state.dispatch(caller, call, &mut signals);
        for signal in &signals {
            state.broadcast(signal);
        }

        if let Err(err) = &result {
            debug!(member = %call.member, error = %err, "Method call failed");
        }
        result
    }

    /// Forget a connection and release everything it held
    pub(crate) fn disconnect(&self, name: &str) {
        let mut state = self.state.lock();
        let mut signals = Vec::new();

        for (udi, record) in state.store.iter_mut() {
            if record.lock.as_ref().is_some_and(|lock| lock.owner == name) {
                record.lock = None;
            }
            for (interface, remaining) in record.interface_locks.release_all(name) {
                signals.push(device_signal(
                    udi,
                    "InterfaceLockReleased",
                    lock_args(&interface, name, remaining),
                ));
            }
        }
        for (interface, remaining) in state.global_locks.release_all(name) {
            signals.push(manager_signal(
                "GlobalInterfaceLockReleased",
                lock_args(&interface, name, remaining),
            ));
        }

        state
            .connections
            .retain(|weak| weak.upgrade().is_some_and(|conn| conn.unique_name != name));
        for signal in &signals {
            state.broadcast(signal);
        }

        debug!(connection = name, released = signals.len(), "Client disconnected");
    }
}

impl DaemonState {
    fn broadcast(&mut self, signal: &Signal) {
        self.connections.retain(|weak| match weak.upgrade() {
            Some(conn) => {
                conn.deliver(signal);
                true
            }
            None => false,
        });
    }

    fn dispatch(
        &mut self,
        caller: &str,
        call: &MethodCall,
        signals: &mut Vec<Signal>,
    ) -> Result<Vec<BusValue>, BusError> {
        if call.destination != SERVICE {
            return Err(BusError::remote(
                errors::SERVICE_UNKNOWN,
                format!("The name {} was not provided by any service", call.destination),
            ));
        }

        match call.interface.as_str() {
            MANAGER_INTERFACE if call.path == MANAGER_PATH => self.manager_call(caller, call, signals),
            DEVICE_INTERFACE => self.device_call(caller, call, signals),
            _ => Err(unknown_method(call)),
        }
    }

    fn manager_call(
        &mut self,
        caller: &str,
        call: &MethodCall,
        signals: &mut Vec<Signal>,
    ) -> Result<Vec<BusValue>, BusError> {
        let args = Args(call);

        match call.member.as_str() {
            "GetAllDevices" => {
                let udis = self.store.iter().map(|(udi, _)| udi.to_string()).collect();
                Ok(vec![BusValue::StrArray(udis)])
            }
            "GetAllDevicesWithProperties" => {
                let entries = self
                    .store
                    .iter()
                    .map(|(udi, record)| {
                        BusValue::Struct(vec![BusValue::from(udi), record.properties.to_dict()])
                    })
                    .collect();
                Ok(vec![BusValue::Array(entries)])
            }
            "DeviceExists" => {
                let udi = args.str(0)?;
                Ok(vec![BusValue::Bool(self.store.exists(udi))])
            }
            "FindDeviceStringMatch" => {
                let key = args.str(0)?;
                let value = args.str(1)?;
                let found = self
                    .store
                    .iter()
                    .filter(|(_, record)| {
                        record.properties.get(key).and_then(BusValue::as_str) == Some(value)
                    })
                    .map(|(udi, _)| udi.to_string())
                    .collect();
                Ok(vec![BusValue::StrArray(found)])
            }
            "FindDeviceByCapability" => {
                let capability = args.str(0)?;
                let found = self
                    .store
                    .iter()
                    .filter(|(_, record)| record.has_capability(capability))
                    .map(|(udi, _)| udi.to_string())
                    .collect();
                Ok(vec![BusValue::StrArray(found)])
            }
            "NewDevice" => Ok(vec![BusValue::Str(self.store.new_temporary(DEVICE_PREFIX))]),
            "CommitToGdl" => {
                let temp_udi = args.str(0)?;
                let udi = args.str(1)?;
                if !self.store.commit_temporary(temp_udi, udi.to_string()) {
                    return Err(no_such_device(temp_udi));
                }
                signals.push(manager_signal("DeviceAdded", vec![BusValue::from(udi)]));
                Ok(Vec::new())
            }
            "Remove" => {
                let udi = args.str(0)?;
                let committed = self.store.exists(udi);
                self.store.remove(udi).ok_or_else(|| no_such_device(udi))?;
                if committed {
                    signals.push(manager_signal("DeviceRemoved", vec![BusValue::from(udi)]));
                }
                Ok(Vec::new())
            }
            "AcquireGlobalInterfaceLock" => {
                let interface = args.str(0)?;
                let exclusive = args.bool(1)?;
                let holders = self.global_locks.acquire(interface, caller, exclusive)?;
                signals.push(manager_signal(
                    "GlobalInterfaceLockAcquired",
                    lock_args(interface, caller, holders),
                ));
                Ok(Vec::new())
            }
            "ReleaseGlobalInterfaceLock" => {
                let interface = args.str(0)?;
                let remaining = self.global_locks.release(interface, caller)?;
                signals.push(manager_signal(
                    "GlobalInterfaceLockReleased",
                    lock_args(interface, caller, remaining),
                ));
                Ok(Vec::new())
            }
            "SingletonAddonIsReady" => {
                let command_line = args.str(0)?;
                self.ready_singletons.push(command_line.to_string());
                Ok(Vec::new())
            }
            _ => Err(unknown_method(call)),
        }
    }

    fn device_call(
        &mut self,
        caller: &str,
        call: &MethodCall,
        signals: &mut Vec<Signal>,
    ) -> Result<Vec<BusValue>, BusError> {
        let udi = call.path.as_str();
        let args = Args(call);
        let member = call.member.as_str();
        let record = self.store.get_mut(udi).ok_or_else(|| no_such_device(udi))?;

        match member {
            "GetAllProperties" => Ok(vec![record.properties.to_dict()]),
            "GetProperty" => {
                let key = args.str(0)?;
                let value = record
                    .properties
                    .get(key)
                    .ok_or_else(|| no_such_property(udi, key))?;
                Ok(vec![BusValue::variant(value.clone())])
            }
            "GetPropertyType" => {
                let key = args.str(0)?;
                let value = record
                    .properties
                    .get(key)
                    .ok_or_else(|| no_such_property(udi, key))?;
                let code = type_code(value).unwrap_or(0);
                Ok(vec![BusValue::Int32(code as i32)])
            }
            "PropertyExists" => {
                let key = args.str(0)?;
                Ok(vec![BusValue::Bool(record.properties.contains(key))])
            }
            "SetPropertyString" | "SetPropertyInteger" | "SetPropertyDouble"
            | "SetPropertyBoolean" | "SetPropertyStringList" => {
                let key = args.str(0)?;
                let value = args.value(1)?.unwrap_variant().clone();
                let accepted = match (member, &value) {
                    ("SetPropertyString", BusValue::Str(_)) => true,
                    ("SetPropertyInteger", BusValue::Int32(_) | BusValue::UInt64(_)) => true,
                    ("SetPropertyDouble", BusValue::Double(_)) => true,
                    ("SetPropertyBoolean", BusValue::Bool(_)) => true,
                    ("SetPropertyStringList", BusValue::StrArray(_)) => true,
                    _ => false,
                };
                if !accepted {
                    return Err(invalid_args(call, "value of the wrong type"));
                }
                let code = type_code(&value).unwrap_or(0);
                apply_changes(record, udi, vec![(key.to_string(), code, value)], signals)?;
                Ok(Vec::new())
            }
            "SetMultipleProperties" => {
                let dict = args.value(0)?.as_dict().ok_or_else(|| invalid_args(call, "a{sv}"))?;
                let mut changes = Vec::with_capacity(dict.len());
                for (key, value) in dict {
                    let value = value.unwrap_variant().clone();
                    let code = type_code(&value)
                        .ok_or_else(|| invalid_args(call, "values of a property type"))?;
                    changes.push((key.clone(), code, value));
                }
                apply_changes(record, udi, changes, signals)?;
                Ok(Vec::new())
            }
            "CommitChangeSet" => {
                let entries = args.value(0)?.as_array().ok_or_else(|| invalid_args(call, "a(suv)"))?;
                let mut changes = Vec::with_capacity(entries.len());
                for entry in entries {
                    let change = match entry.as_struct() {
                        Some([key, op, value]) => key
                            .as_str()
                            .zip(op.as_u32())
                            .map(|(key, op)| (key.to_string(), op, value.unwrap_variant().clone())),
                        _ => None,
                    };
                    changes.push(change.ok_or_else(|| invalid_args(call, "(suv) entries"))?);
                }
                apply_changes(record, udi, changes, signals)?;
                Ok(Vec::new())
            }
            "RemoveProperty" => {
                let key = args.str(0)?;
                if !record.properties.contains(key) {
                    return Err(no_such_property(udi, key));
                }
                let change = (key.to_string(), ops::REMOVE, BusValue::Bool(false));
                apply_changes(record, udi, vec![change], signals)?;
                Ok(Vec::new())
            }
            "StringListAppend" | "StringListPrepend" | "StringListRemove" => {
                let key = args.str(0)?;
                let item = args.str(1)?;
                let op = match member {
                    "StringListAppend" => ops::STRLIST_APPEND,
                    "StringListPrepend" => ops::STRLIST_PREPEND,
                    _ => ops::STRLIST_REMOVE_VALUE,
                };
                let change = (key.to_string(), op, BusValue::from(item));
                apply_changes(record, udi, vec![change], signals)?;
                Ok(Vec::new())
            }
            "StringListRemoveIndex" => {
                let key = args.str(0)?;
                let index = args.u32(1)?;
                let change = (key.to_string(), ops::STRLIST_REMOVE_INDEX, BusValue::UInt32(index));
                apply_changes(record, udi, vec![change], signals)?;
                Ok(Vec::new())
            }
            "AddCapability" => {
                let capability = args.str(0)?;
                if !record.has_capability(capability) {
                    let change = (
                        CAPABILITIES_KEY.to_string(),
                        ops::STRLIST_APPEND,
                        BusValue::from(capability),
                    );
                    apply_changes(record, udi, vec![change], signals)?;
                    signals.push(manager_signal(
                        "NewCapability",
                        vec![BusValue::from(udi), BusValue::from(capability)],
                    ));
                }
                Ok(Vec::new())
            }
            "QueryCapability" => {
                let capability = args.str(0)?;
                Ok(vec![BusValue::Bool(record.has_capability(capability))])
            }
            "Lock" => {
                let reason = args.str(0)?;
                if let Some(lock) = &record.lock {
                    return Err(BusError::remote(errors::DEVICE_ALREADY_LOCKED, lock.reason.clone()));
                }
                record.lock = Some(DeviceLock {
                    owner: caller.to_string(),
                    reason: reason.to_string(),
                });
                Ok(vec![BusValue::Bool(true)])
            }
            "Unlock" => {
                let held_by_caller = record.lock.as_ref().map(|lock| lock.owner == caller);
                match held_by_caller {
                    Some(true) => {
                        record.lock = None;
                        Ok(vec![BusValue::Bool(true)])
                    }
                    Some(false) => Err(BusError::remote(
                        errors::DEVICE_NOT_LOCKED,
                        format!("Device {} is locked by another process", udi),
                    )),
                    None => Err(BusError::remote(
                        errors::DEVICE_NOT_LOCKED,
                        format!("Device {} is not locked", udi),
                    )),
                }
            }
            "AcquireInterfaceLock" => {
                let interface = args.str(0)?;
                let exclusive = args.bool(1)?;
                let holders = record.interface_locks.acquire(interface, caller, exclusive)?;
                signals.push(device_signal(
                    udi,
                    "InterfaceLockAcquired",
                    lock_args(interface, caller, holders),
                ));
                Ok(Vec::new())
            }
            "ReleaseInterfaceLock" => {
                let interface = args.str(0)?;
                let remaining = record.interface_locks.release(interface, caller)?;
                signals.push(device_signal(
                    udi,
                    "InterfaceLockReleased",
                    lock_args(interface, caller, remaining),
                ));
                Ok(Vec::new())
            }
            "IsCallerLockedOut" => {
                let interface = args.str(0)?;
                let who = args.str(1)?;
                let locked_out = record.interface_locks.is_locked_out(interface, who)
                    || self.global_locks.is_locked_out(interface, who);
                Ok(vec![BusValue::Bool(locked_out)])
            }
            "IsLockedByOthers" => {
                let interface = args.str(0)?;
                let locked = record.interface_locks.is_locked_by_others(interface, caller)
                    || self.global_locks.is_locked_by_others(interface, caller);
                Ok(vec![BusValue::Bool(locked)])
            }
            "IsCallerPrivileged" => {
                args.str(0)?;
                args.str(1)?;
                Ok(vec![BusValue::from("yes")])
            }
            "Rescan" | "Reprobe" | "AddonIsReady" => Ok(vec![BusValue::Bool(true)]),
            "EmitCondition" => {
                let name = args.str(0)?;
                let details = args.str(1)?;
                signals.push(device_signal(
                    udi,
                    "Condition",
                    vec![BusValue::from(name), BusValue::from(details)],
                ));
                Ok(vec![BusValue::Bool(true)])
            }
            "ClaimInterface" => {
                let interface = args.str(0)?;
                args.str(1)?;
                record.claimed_interfaces.push(interface.to_string());
                Ok(vec![BusValue::Bool(true)])
            }
            _ => Err(unknown_method(call)),
        }
    }
}

/// Apply a batch of `(key, op, value)` changes all-or-nothing, in order
fn apply_changes(
    record: &mut DeviceRecord,
    udi: &str,
    changes: Vec<(String, u32, BusValue)>,
    signals: &mut Vec<Signal>,
) -> Result<(), BusError> {
    let mut properties = record.properties.clone();
    let mut modified = Vec::new();

    for (key, op, value) in changes {
        if let Some(modification) = apply_one(&mut properties, udi, key, op, value)? {
            modified.push(modification);
        }
    }

    record.properties = properties;
    if !modified.is_empty() {
        signals.push(property_modified(udi, &modified));
    }
    Ok(())
}

fn apply_one(
    properties: &mut PropertyBag,
    udi: &str,
    key: String,
    op: u32,
    value: BusValue,
) -> Result<Option<Modification>, BusError> {
    let existed = properties.contains(&key);

    match op {
        ops::REMOVE => Ok(properties.remove(&key).then(|| (key, true, false))),
        ops::STRLIST_APPEND | ops::STRLIST_PREPEND => {
            let item = value.as_str().ok_or_else(|| wrong_operand(op))?.to_string();
            let mut list = string_list(properties, udi, &key)?.unwrap_or_default();
            if op == ops::STRLIST_APPEND {
                list.push(item);
            } else {
                list.insert(0, item);
            }
            properties.set(key.clone(), BusValue::StrArray(list));
            Ok(Some((key, false, !existed)))
        }
        ops::STRLIST_REMOVE_INDEX => {
            let index = value.as_u32().ok_or_else(|| wrong_operand(op))? as usize;
            let mut list = string_list(properties, udi, &key)?
                .ok_or_else(|| no_such_property(udi, &key))?;
            if index >= list.len() {
                return Ok(None);
            }
            list.remove(index);
            properties.set(key.clone(), BusValue::StrArray(list));
            Ok(Some((key, false, false)))
        }
        ops::STRLIST_REMOVE_VALUE => {
            let item = value.as_str().ok_or_else(|| wrong_operand(op))?;
            let mut list = string_list(properties, udi, &key)?
                .ok_or_else(|| no_such_property(udi, &key))?;
            let before = list.len();
            list.retain(|s| s != item);
            if list.len() == before {
                return Ok(None);
            }
            properties.set(key.clone(), BusValue::StrArray(list));
            Ok(Some((key, false, false)))
        }
        code => {
            if type_code(&value) != Some(code) {
                return Err(wrong_operand(op));
            }
            if let Some(current) = properties.get(&key) {
                if type_code(current) != Some(code) {
                    return Err(type_mismatch(udi, &key));
                }
            }
            let changed = properties.set(key.clone(), value);
            Ok(changed.then(|| (key, false, !existed)))
        }
    }
}

fn string_list(
    properties: &PropertyBag,
    udi: &str,
    key: &str,
) -> Result<Option<Vec<String>>, BusError> {
    match properties.get(key) {
        None => Ok(None),
        Some(BusValue::StrArray(list)) => Ok(Some(list.clone())),
        Some(_) => Err(type_mismatch(udi, key)),
    }
}

/// Property type code of a stored value
fn type_code(value: &BusValue) -> Option<u32> {
    match value {
        BusValue::Int32(_) => Some(ops::TYPE_INT32),
        BusValue::UInt64(_) => Some(ops::TYPE_UINT64),
        BusValue::Double(_) => Some(ops::TYPE_DOUBLE),
        BusValue::Bool(_) => Some(ops::TYPE_BOOL),
        BusValue::Str(_) => Some(ops::TYPE_STRING),
        BusValue::StrArray(_) => Some(ops::TYPE_STRLIST),
        _ => None,
    }
}

fn property_modified(udi: &str, modified: &[Modification]) -> Signal {
    let entries = modified
        .iter()
        .map(|(key, removed, added)| {
            BusValue::Struct(vec![
                BusValue::from(key.as_str()),
                BusValue::Bool(*removed),
                BusValue::Bool(*added),
            ])
        })
        .collect();
    device_signal(
        udi,
        "PropertyModified",
        vec![BusValue::Int32(modified.len() as i32), BusValue::Array(entries)],
    )
}

fn manager_signal(member: &str, args: Vec<BusValue>) -> Signal {
    Signal::new(SERVICE, MANAGER_PATH, MANAGER_INTERFACE, member, args)
}

fn device_signal(udi: &str, member: &str, args: Vec<BusValue>) -> Signal {
    Signal::new(SERVICE, udi, DEVICE_INTERFACE, member, args)
}

fn lock_args(interface: &str, owner: &str, holders: usize) -> Vec<BusValue> {
    vec![
        BusValue::from(interface),
        BusValue::from(owner),
        BusValue::Int32(holders as i32),
    ]
}

fn no_such_device(udi: &str) -> BusError {
    BusError::remote(errors::NO_SUCH_DEVICE, format!("No device with id {}", udi))
}

fn no_such_property(udi: &str, key: &str) -> BusError {
    BusError::remote(
        errors::NO_SUCH_PROPERTY,
        format!("No property {} on device with id {}", key, udi),
    )
}

fn type_mismatch(udi: &str, key: &str) -> BusError {
    BusError::remote(
        errors::TYPE_MISMATCH,
        format!("Type mismatch setting property {} on device {}", key, udi),
    )
}

fn wrong_operand(op: u32) -> BusError {
    BusError::remote(
        names::INVALID_ARGS,
        format!("Operand does not fit change operation {}", op),
    )
}

fn unknown_method(call: &MethodCall) -> BusError {
    BusError::remote(
        names::UNKNOWN_METHOD,
        format!(
            "Method {} with signature {} on interface {} doesn't exist",
            call.member,
            call.signature(),
            call.interface
        ),
    )
}

fn invalid_args(call: &MethodCall, expected: &str) -> BusError {
    BusError::remote(
        names::INVALID_ARGS,
        format!("{} expects {}, got signature {}", call.member, expected, call.signature()),
    )
}

/// Positional argument accessors that fail with `InvalidArgs`
struct Args<'a>(&'a MethodCall);

impl<'a> Args<'a> {
    fn value(&self, index: usize) -> Result<&'a BusValue, BusError> {
        self.0
            .args
            .get(index)
            .ok_or_else(|| invalid_args(self.0, &format!("argument {}", index)))
    }

    fn str(&self, index: usize) -> Result<&'a str, BusError> {
        self.value(index)?
            .as_str()
            .ok_or_else(|| invalid_args(self.0, &format!("a string at argument {}", index)))
    }

    fn bool(&self, index: usize) -> Result<bool, BusError> {
        self.value(index)?
            .as_bool()
            .ok_or_else(|| invalid_args(self.0, &format!("a boolean at argument {}", index)))
    }

    fn u32(&self, index: usize) -> Result<u32, BusError> {
        self.value(index)?
            .as_u32()
            .ok_or_else(|| invalid_args(self.0, &format!("an unsigned integer at argument {}", index)))
    }
}
