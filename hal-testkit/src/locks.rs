//! Interface lock bookkeeping for the fake daemon
//!
//! The same table type backs both per-device interface locks and the
//! registry-wide global interface locks.

use std::collections::BTreeMap;

use hal_bus::BusError;

use crate::errors;

#[derive(Debug, Clone, PartialEq, Eq)]
struct InterfaceLock {
    exclusive: bool,
    holders: Vec<String>,
}

/// Shared/exclusive locks keyed by interface name
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    locks: BTreeMap<String, InterfaceLock>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a lock for `caller`, returning the number of holders afterwards
    ///
    /// A caller may hold at most one lock per interface. Exclusive locks
    /// conflict with everything; shared locks only with exclusive ones.
    pub fn acquire(
        &mut self,
        interface: &str,
        caller: &str,
        exclusive: bool,
    ) -> Result<usize, BusError> {
        match self.locks.get_mut(interface) {
            None => {
                self.locks.insert(
                    interface.to_string(),
                    InterfaceLock {
                        exclusive,
                        holders: vec![caller.to_string()],
                    },
                );
                Ok(1)
            }
            Some(lock) if lock.holders.iter().any(|h| h == caller) => Err(BusError::remote(
                errors::INTERFACE_ALREADY_LOCKED,
                format!("Caller {} already holds a lock on {}", caller, interface),
            )),
            Some(lock) if lock.exclusive || exclusive => Err(BusError::remote(
                errors::INTERFACE_ALREADY_LOCKED,
                format!("Interface {} is locked by {}", interface, lock.holders.join(", ")),
            )),
            Some(lock) => {
                lock.holders.push(caller.to_string());
                Ok(lock.holders.len())
            }
        }
    }

    /// Drop `caller`'s lock, returning the number of remaining holders
    pub fn release(&mut self, interface: &str, caller: &str) -> Result<usize, BusError> {
        let not_locked = || {
            BusError::remote(
                errors::INTERFACE_NOT_LOCKED,
                format!("Caller {} does not hold a lock on {}", caller, interface),
            )
        };

        let lock = self.locks.get_mut(interface).ok_or_else(not_locked)?;
        let position = lock
            .holders
            .iter()
            .position(|h| h == caller)
            .ok_or_else(not_locked)?;
        lock.holders.remove(position);

        let remaining = lock.holders.len();
        if remaining == 0 {
            self.locks.remove(interface);
        }
        Ok(remaining)
    }

    /// Release every lock held by `caller`, returning `(interface, remaining)` pairs
    pub fn release_all(&mut self, caller: &str) -> Vec<(String, usize)> {
        let held: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, lock)| lock.holders.iter().any(|h| h == caller))
            .map(|(name, _)| name.clone())
            .collect();

        held.into_iter()
            .filter_map(|name| {
                let remaining = self.release(&name, caller).ok()?;
                Some((name, remaining))
            })
            .collect()
    }

    /// Someone holds the lock and `caller` is not among them
    pub fn is_locked_out(&self, interface: &str, caller: &str) -> bool {
        self.locks
            .get(interface)
            .map(|lock| !lock.holders.iter().any(|h| h == caller))
            .unwrap_or(false)
    }

    /// Some holder other than `caller` exists
    pub fn is_locked_by_others(&self, interface: &str, caller: &str) -> bool {
        self.locks
            .get(interface)
            .map(|lock| lock.holders.iter().any(|h| h != caller))
            .unwrap_or(false)
    }

    pub fn holders(&self, interface: &str) -> Vec<String> {
        self.locks
            .get(interface)
            .map(|lock| lock.holders.clone())
            .unwrap_or_default()
    }
}
