//! Per-context event registry
//!
//! Each [`EventKind`] has one slot. A slot holds either a callback, invoked
//! synchronously with the context and the event, or a channel sender that
//! receives a clone of the event. Setting a slot replaces whatever was
//! there; kinds with an empty slot are dropped on the floor.

use std::fmt;
use std::sync::mpsc::Sender;

use hal_bus::Signal;
use tracing::trace;

use crate::context::Context;
use crate::error::Result;
use crate::events::{decode_signal, EventKind, HalEvent};
use crate::property_set::PropertySet;
use crate::udi::Udi;

/// Callback stored in a registry slot
pub type EventCallback = Box<dyn Fn(&Context, &HalEvent) + Send>;

enum Slot {
    Callback(EventCallback),
    Channel(Sender<HalEvent>),
}

/// One handler slot per event kind
pub struct EventRegistry {
    slots: [Option<Slot>; EventKind::COUNT],
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<EventKind> = EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.is_registered(*kind))
            .collect();
        f.debug_struct("EventRegistry")
            .field("registered", &registered)
            .finish()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn set(&mut self, kind: EventKind, slot: Option<Slot>) {
        self.slots[kind.index()] = slot;
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Deliver one event; returns whether a slot was occupied
    fn deliver(&self, ctx: &Context, event: &HalEvent) -> bool {
        match &self.slots[event.kind().index()] {
            Some(Slot::Callback(callback)) => {
                callback(ctx, event);
                true
            }
            Some(Slot::Channel(sender)) => {
                if sender.send(event.clone()).is_err() {
                    trace!(kind = ?event.kind(), "Event receiver dropped");
                }
                true
            }
            None => false,
        }
    }
}

impl Context {
    /// Register a callback for one kind of event, replacing the previous handler
    pub fn set_handler<F>(&mut self, kind: EventKind, callback: F)
    where
        F: Fn(&Context, &HalEvent) + Send + 'static,
    {
        self.registry.set(kind, Some(Slot::Callback(Box::new(callback))));
    }

    /// Forward one kind of event to a channel, replacing the previous handler
    pub fn set_channel(&mut self, kind: EventKind, sender: Sender<HalEvent>) {
        self.registry.set(kind, Some(Slot::Channel(sender)));
    }

    pub fn clear_handler(&mut self, kind: EventKind) {
        self.registry.set(kind, None);
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        self.registry.is_registered(kind)
    }

    pub fn set_device_added<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi) + Send + 'static,
    {
        self.set_handler(EventKind::DeviceAdded, move |ctx, event| {
            if let HalEvent::DeviceAdded { udi } = event {
                callback(ctx, udi);
            }
        });
    }

    pub fn set_device_removed<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi) + Send + 'static,
    {
        self.set_handler(EventKind::DeviceRemoved, move |ctx, event| {
            if let HalEvent::DeviceRemoved { udi } = event {
                callback(ctx, udi);
            }
        });
    }

    pub fn set_new_capability<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str) + Send + 'static,
    {
        self.set_handler(EventKind::NewCapability, move |ctx, event| {
            if let HalEvent::NewCapability { udi, capability } = event {
                callback(ctx, udi, capability);
            }
        });
    }

    pub fn set_lost_capability<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str) + Send + 'static,
    {
        self.set_handler(EventKind::LostCapability, move |ctx, event| {
            if let HalEvent::LostCapability { udi, capability } = event {
                callback(ctx, udi, capability);
            }
        });
    }

    /// Callback receives `(udi, key, is_removed, is_added)`
    pub fn set_property_modified<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str, bool, bool) + Send + 'static,
    {
        self.set_handler(EventKind::PropertyModified, move |ctx, event| {
            if let HalEvent::PropertyModified {
                udi,
                key,
                is_removed,
                is_added,
            } = event
            {
                callback(ctx, udi, key, *is_removed, *is_added);
            }
        });
    }

    pub fn set_condition<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str, &str) + Send + 'static,
    {
        self.set_handler(EventKind::Condition, move |ctx, event| {
            if let HalEvent::Condition { udi, name, details } = event {
                callback(ctx, udi, name, details);
            }
        });
    }

    /// Callback receives `(interface, lock_owner, num_holders)`
    pub fn set_global_interface_lock_acquired<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &str, &str, i32) + Send + 'static,
    {
        self.set_handler(EventKind::GlobalInterfaceLockAcquired, move |ctx, event| {
            if let HalEvent::GlobalInterfaceLockAcquired {
                interface,
                lock_owner,
                num_holders,
            } = event
            {
                callback(ctx, interface, lock_owner, *num_holders);
            }
        });
    }

    pub fn set_global_interface_lock_released<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &str, &str, i32) + Send + 'static,
    {
        self.set_handler(EventKind::GlobalInterfaceLockReleased, move |ctx, event| {
            if let HalEvent::GlobalInterfaceLockReleased {
                interface,
                lock_owner,
                num_holders,
            } = event
            {
                callback(ctx, interface, lock_owner, *num_holders);
            }
        });
    }

    /// Callback receives `(udi, interface, lock_owner, num_holders)`
    pub fn set_interface_lock_acquired<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str, &str, i32) + Send + 'static,
    {
        self.set_handler(EventKind::InterfaceLockAcquired, move |ctx, event| {
            if let HalEvent::InterfaceLockAcquired {
                udi,
                interface,
                lock_owner,
                num_holders,
            } = event
            {
                callback(ctx, udi, interface, lock_owner, *num_holders);
            }
        });
    }

    pub fn set_interface_lock_released<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &str, &str, i32) + Send + 'static,
    {
        self.set_handler(EventKind::InterfaceLockReleased, move |ctx, event| {
            if let HalEvent::InterfaceLockReleased {
                udi,
                interface,
                lock_owner,
                num_holders,
            } = event
            {
                callback(ctx, udi, interface, lock_owner, *num_holders);
            }
        });
    }

    pub fn set_singleton_device_added<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &PropertySet) + Send + 'static,
    {
        self.set_handler(EventKind::SingletonDeviceAdded, move |ctx, event| {
            if let HalEvent::SingletonDeviceAdded { udi, properties } = event {
                callback(ctx, udi, properties);
            }
        });
    }

    pub fn set_singleton_device_removed<F>(&mut self, callback: F)
    where
        F: Fn(&Context, &Udi, &PropertySet) + Send + 'static,
    {
        self.set_handler(EventKind::SingletonDeviceRemoved, move |ctx, event| {
            if let HalEvent::SingletonDeviceRemoved { udi, properties } = event {
                callback(ctx, udi, properties);
            }
        });
    }

    /// Decode a signal and run the matching handlers
    ///
    /// Returns how many handlers ran. Does nothing unless the context is
    /// initialized.
    pub fn dispatch_signal(&self, signal: &Signal) -> usize {
        if !self.is_initialized() {
            trace!(member = %signal.member, "Context not initialized, dropping signal");
            return 0;
        }

        let mut handled = 0;
        for event in decode_signal(self.config(), signal) {
            if self.dispatch(&event) {
                handled += 1;
            }
        }
        handled
    }

    /// Run the handler for an already decoded event
    pub fn dispatch(&self, event: &HalEvent) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let delivered = self.registry.deliver(self, event);
        trace!(kind = ?event.kind(), delivered, "Dispatched event");
        delivered
    }

    /// Drain the transport's signal queue through the registry
    ///
    /// Returns how many handlers ran.
    pub fn process_pending(&self) -> Result<usize> {
        let transport = self.ready()?;
        let mut handled = 0;
        while let Some(signal) = transport.poll_signal() {
            handled += self.dispatch_signal(&signal);
        }
        Ok(handled)
    }
}
