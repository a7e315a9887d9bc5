//! Registry notifications
//!
//! The daemon announces registry changes as bus signals. [`decode_signal`]
//! turns one signal into zero or more [`HalEvent`]s; a `PropertyModified`
//! signal carrying several keys becomes one event per key. Signals that do
//! not decode are dropped.

use hal_bus::Signal;
use serde::Serialize;

use crate::config::ContextConfig;
use crate::property_set::PropertySet;
use crate::udi::Udi;

/// A registry notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HalEvent {
    DeviceAdded {
        udi: Udi,
    },
    DeviceRemoved {
        udi: Udi,
    },
    NewCapability {
        udi: Udi,
        capability: String,
    },
    LostCapability {
        udi: Udi,
        capability: String,
    },
    PropertyModified {
        udi: Udi,
        key: String,
        is_removed: bool,
        is_added: bool,
    },
    Condition {
        udi: Udi,
        name: String,
        details: String,
    },
    GlobalInterfaceLockAcquired {
        interface: String,
        lock_owner: String,
        num_holders: i32,
    },
    GlobalInterfaceLockReleased {
        interface: String,
        lock_owner: String,
        num_holders: i32,
    },
    InterfaceLockAcquired {
        udi: Udi,
        interface: String,
        lock_owner: String,
        num_holders: i32,
    },
    InterfaceLockReleased {
        udi: Udi,
        interface: String,
        lock_owner: String,
        num_holders: i32,
    },
    SingletonDeviceAdded {
        udi: Udi,
        properties: PropertySet,
    },
    SingletonDeviceRemoved {
        udi: Udi,
        properties: PropertySet,
    },
}

/// Discriminant of [`HalEvent`], used to address registry slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKind {
    DeviceAdded,
    DeviceRemoved,
    NewCapability,
    LostCapability,
    PropertyModified,
    Condition,
    GlobalInterfaceLockAcquired,
    GlobalInterfaceLockReleased,
    InterfaceLockAcquired,
    InterfaceLockReleased,
    SingletonDeviceAdded,
    SingletonDeviceRemoved,
}

impl EventKind {
    pub(crate) const COUNT: usize = 12;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::DeviceAdded,
        EventKind::DeviceRemoved,
        EventKind::NewCapability,
        EventKind::LostCapability,
        EventKind::PropertyModified,
        EventKind::Condition,
        EventKind::GlobalInterfaceLockAcquired,
        EventKind::GlobalInterfaceLockReleased,
        EventKind::InterfaceLockAcquired,
        EventKind::InterfaceLockReleased,
        EventKind::SingletonDeviceAdded,
        EventKind::SingletonDeviceRemoved,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl HalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceAdded { .. } => EventKind::DeviceAdded,
            Self::DeviceRemoved { .. } => EventKind::DeviceRemoved,
            Self::NewCapability { .. } => EventKind::NewCapability,
            Self::LostCapability { .. } => EventKind::LostCapability,
            Self::PropertyModified { .. } => EventKind::PropertyModified,
            Self::Condition { .. } => EventKind::Condition,
            Self::GlobalInterfaceLockAcquired { .. } => EventKind::GlobalInterfaceLockAcquired,
            Self::GlobalInterfaceLockReleased { .. } => EventKind::GlobalInterfaceLockReleased,
            Self::InterfaceLockAcquired { .. } => EventKind::InterfaceLockAcquired,
            Self::InterfaceLockReleased { .. } => EventKind::InterfaceLockReleased,
            Self::SingletonDeviceAdded { .. } => EventKind::SingletonDeviceAdded,
            Self::SingletonDeviceRemoved { .. } => EventKind::SingletonDeviceRemoved,
        }
    }

    /// Device the event concerns; global lock events have none
    pub fn udi(&self) -> Option<&Udi> {
        match self {
            Self::DeviceAdded { udi }
            | Self::DeviceRemoved { udi }
            | Self::NewCapability { udi, .. }
            | Self::LostCapability { udi, .. }
            | Self::PropertyModified { udi, .. }
            | Self::Condition { udi, .. }
            | Self::InterfaceLockAcquired { udi, .. }
            | Self::InterfaceLockReleased { udi, .. }
            | Self::SingletonDeviceAdded { udi, .. }
            | Self::SingletonDeviceRemoved { udi, .. } => Some(udi),
            Self::GlobalInterfaceLockAcquired { .. } | Self::GlobalInterfaceLockReleased { .. } => None,
        }
    }
}

/// Decode a daemon signal into events
pub fn decode_signal(config: &ContextConfig, signal: &Signal) -> Vec<HalEvent> {
    let decoded = if signal.interface == config.manager_interface {
        decode_manager(signal)
    } else if signal.interface == config.device_interface {
        decode_device(signal)
    } else if signal.interface == config.singleton_interface {
        decode_singleton(signal)
    } else {
        None
    };

    decoded.unwrap_or_else(|| {
        tracing::trace!(
            interface = %signal.interface,
            member = %signal.member,
            "Ignoring signal that does not decode"
        );
        Vec::new()
    })
}

fn str_arg(signal: &Signal, index: usize) -> Option<&str> {
    signal.args.get(index)?.as_str()
}

fn udi_arg(signal: &Signal, index: usize) -> Option<Udi> {
    Udi::new(str_arg(signal, index)?).ok()
}

fn lock_args(signal: &Signal) -> Option<(String, String, i32)> {
    Some((
        str_arg(signal, 0)?.to_string(),
        str_arg(signal, 1)?.to_string(),
        signal.args.get(2)?.as_i32()?,
    ))
}

fn decode_manager(signal: &Signal) -> Option<Vec<HalEvent>> {
    let event = match signal.member.as_str() {
        "DeviceAdded" => HalEvent::DeviceAdded {
            udi: udi_arg(signal, 0)?,
        },
        "DeviceRemoved" => HalEvent::DeviceRemoved {
            udi: udi_arg(signal, 0)?,
        },
        "NewCapability" => HalEvent::NewCapability {
            udi: udi_arg(signal, 0)?,
            capability: str_arg(signal, 1)?.to_string(),
        },
        "LostCapability" => HalEvent::LostCapability {
            udi: udi_arg(signal, 0)?,
            capability: str_arg(signal, 1)?.to_string(),
        },
        "GlobalInterfaceLockAcquired" => {
            let (interface, lock_owner, num_holders) = lock_args(signal)?;
            HalEvent::GlobalInterfaceLockAcquired {
                interface,
                lock_owner,
                num_holders,
            }
        }
        "GlobalInterfaceLockReleased" => {
            let (interface, lock_owner, num_holders) = lock_args(signal)?;
            HalEvent::GlobalInterfaceLockReleased {
                interface,
                lock_owner,
                num_holders,
            }
        }
        _ => return None,
    };
    Some(vec![event])
}

fn decode_device(signal: &Signal) -> Option<Vec<HalEvent>> {
    let udi = Udi::new(signal.path.as_str()).ok()?;

    match signal.member.as_str() {
        "PropertyModified" => {
            let updates = signal.args.get(1)?.as_array()?;
            updates
                .iter()
                .map(|update| match update.as_struct()? {
                    [key, removed, added] => Some(HalEvent::PropertyModified {
                        udi: udi.clone(),
                        key: key.as_str()?.to_string(),
                        is_removed: removed.as_bool()?,
                        is_added: added.as_bool()?,
                    }),
                    _ => None,
                })
                .collect()
        }
        "Condition" => Some(vec![HalEvent::Condition {
            name: str_arg(signal, 0)?.to_string(),
            details: str_arg(signal, 1)?.to_string(),
            udi,
        }]),
        "InterfaceLockAcquired" => {
            let (interface, lock_owner, num_holders) = lock_args(signal)?;
            Some(vec![HalEvent::InterfaceLockAcquired {
                udi,
                interface,
                lock_owner,
                num_holders,
            }])
        }
        "InterfaceLockReleased" => {
            let (interface, lock_owner, num_holders) = lock_args(signal)?;
            Some(vec![HalEvent::InterfaceLockReleased {
                udi,
                interface,
                lock_owner,
                num_holders,
            }])
        }
        _ => None,
    }
}

fn decode_singleton(signal: &Signal) -> Option<Vec<HalEvent>> {
    let udi = udi_arg(signal, 0)?;
    let properties = PropertySet::from_bus(&signal.member, signal.args.get(1)?).ok()?;

    let event = match signal.member.as_str() {
        "DeviceAdded" => HalEvent::SingletonDeviceAdded { udi, properties },
        "DeviceRemoved" => HalEvent::SingletonDeviceRemoved { udi, properties },
        _ => return None,
    };
    Some(vec![event])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_bus::BusValue;

    const DEVICE: &str = "/org/freedesktop/Hal/devices/computer";

    fn signal(path: &str, interface: &str, member: &str, args: Vec<BusValue>) -> Signal {
        Signal::new("org.freedesktop.Hal", path, interface, member, args)
    }

    fn modified(key: &str, removed: bool, added: bool) -> BusValue {
        BusValue::Struct(vec![
            BusValue::from(key),
            BusValue::Bool(removed),
            BusValue::Bool(added),
        ])
    }

    #[test]
    fn test_property_modified_fans_out() {
        let config = ContextConfig::default();
        let events = decode_signal(
            &config,
            &signal(
                DEVICE,
                "org.freedesktop.Hal.Device",
                "PropertyModified",
                vec![
                    BusValue::Int32(2),
                    BusValue::Array(vec![modified("a", false, true), modified("b", true, false)]),
                ],
            ),
        );

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            HalEvent::PropertyModified {
                udi: Udi::new(DEVICE).unwrap(),
                key: "b".to_string(),
                is_removed: true,
                is_added: false,
            }
        );
    }

    #[test]
    fn test_manager_signals() {
        let config = ContextConfig::default();
        let events = decode_signal(
            &config,
            &signal(
                "/org/freedesktop/Hal/Manager",
                "org.freedesktop.Hal.Manager",
                "NewCapability",
                vec![BusValue::from(DEVICE), BusValue::from("battery")],
            ),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::NewCapability);
        assert_eq!(events[0].udi().map(Udi::as_str), Some(DEVICE));

        let events = decode_signal(
            &config,
            &signal(
                "/org/freedesktop/Hal/Manager",
                "org.freedesktop.Hal.Manager",
                "GlobalInterfaceLockReleased",
                vec![BusValue::from("org.example.X"), BusValue::from(":1.4"), BusValue::Int32(0)],
            ),
        );
        assert_eq!(events[0].udi(), None);
    }

    #[test]
    fn test_singleton_device_added() {
        let config = ContextConfig::default();
        let events = decode_signal(
            &config,
            &signal(
                "/org/freedesktop/Hal/Manager",
                "org.freedesktop.Hal.SingletonAddon",
                "DeviceAdded",
                vec![
                    BusValue::from(DEVICE),
                    BusValue::Dict(vec![("info.product".to_string(), BusValue::variant("Laptop"))]),
                ],
            ),
        );
        match &events[..] {
            [HalEvent::SingletonDeviceAdded { properties, .. }] => {
                assert_eq!(properties.get_string("info.product"), Some("Laptop"));
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_signals_are_dropped() {
        let config = ContextConfig::default();
        let bad_args = signal(
            DEVICE,
            "org.freedesktop.Hal.Device",
            "Condition",
            vec![BusValue::Int32(1)],
        );
        assert!(decode_signal(&config, &bad_args).is_empty());

        let foreign = signal("/x", "org.example.Other", "DeviceAdded", Vec::new());
        assert!(decode_signal(&config, &foreign).is_empty());

        let bad_path = signal("/x", "org.freedesktop.Hal.Device", "Condition", vec![
            BusValue::from("ButtonPressed"),
            BusValue::from("power"),
        ]);
        assert!(decode_signal(&config, &bad_path).is_empty());
    }

    #[test]
    fn test_kind_indexes_are_dense() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
