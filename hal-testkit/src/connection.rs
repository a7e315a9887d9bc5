//! Per-client connections to the fake daemon

use std::collections::VecDeque;
use std::sync::Arc;

use hal_bus::{names, BusError, BusValue, MatchRule, MethodCall, Signal, Transport};
use parking_lot::Mutex;

use crate::daemon::FakeHald;

/// State shared between a connection and the daemon's broadcast list
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    pub(crate) unique_name: String,
    rules: Mutex<Vec<MatchRule>>,
    queue: Mutex<VecDeque<Signal>>,
    calls: Mutex<Vec<MethodCall>>,
    match_requests: Mutex<usize>,
}

impl ConnectionShared {
    pub(crate) fn new(unique_name: String) -> Self {
        Self {
            unique_name,
            rules: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            match_requests: Mutex::new(0),
        }
    }

    /// Queue the signal if any of this connection's rules select it
    pub(crate) fn deliver(&self, signal: &Signal) {
        if self.rules.lock().iter().any(|rule| rule.matches(signal)) {
            self.queue.lock().push_back(signal.clone());
        }
    }
}

/// One client's connection to a [`FakeHald`]
///
/// Dropping the connection behaves like the client exiting: the daemon
/// releases every lock it held.
#[derive(Debug)]
pub struct FakeConnection {
    daemon: FakeHald,
    shared: Arc<ConnectionShared>,
}

impl FakeConnection {
    pub(crate) fn new(daemon: FakeHald, shared: Arc<ConnectionShared>) -> Self {
        Self { daemon, shared }
    }

    /// The unique bus name assigned to this connection, e.g. `:1.3`
    pub fn name(&self) -> &str {
        &self.shared.unique_name
    }

    /// Number of method calls sent so far
    pub fn call_count(&self) -> usize {
        self.shared.calls.lock().len()
    }

    /// Method calls plus match-rule requests sent so far
    pub fn request_count(&self) -> usize {
        self.call_count() + *self.shared.match_requests.lock()
    }

    /// Every method call sent so far, oldest first
    pub fn calls(&self) -> Vec<MethodCall> {
        self.shared.calls.lock().clone()
    }

    /// Member names of every method call sent so far
    pub fn members(&self) -> Vec<String> {
        self.shared
            .calls
            .lock()
            .iter()
            .map(|call| call.member.clone())
            .collect()
    }

    pub fn match_rules(&self) -> Vec<MatchRule> {
        self.shared.rules.lock().clone()
    }

    /// Number of signals waiting in this connection's queue
    pub fn pending_signals(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

impl Transport for FakeConnection {
    fn call(&self, call: &MethodCall) -> Result<Vec<BusValue>, BusError> {
        self.shared.calls.lock().push(call.clone());
        self.daemon.handle(&self.shared.unique_name, call)
    }

    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        *self.shared.match_requests.lock() += 1;
        self.shared.rules.lock().push(rule.clone());
        Ok(())
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        *self.shared.match_requests.lock() += 1;
        let mut rules = self.shared.rules.lock();
        match rules.iter().position(|r| r == rule) {
            Some(index) => {
                rules.remove(index);
                Ok(())
            }
            None => Err(BusError::remote(
                names::MATCH_RULE_NOT_FOUND,
                format!("No match rule {}", rule),
            )),
        }
    }

    fn poll_signal(&self) -> Option<Signal> {
        self.shared.queue.lock().pop_front()
    }

    fn unique_name(&self) -> Option<String> {
        Some(self.shared.unique_name.clone())
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.daemon.disconnect(&self.shared.unique_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEVICE_INTERFACE, SERVICE};

    fn condition(path: &str) -> Signal {
        Signal::new(SERVICE, path, DEVICE_INTERFACE, "Condition", Vec::new())
    }

    #[test]
    fn test_unique_names_are_distinct() {
        let hald = FakeHald::new();
        let a = hald.connect();
        let b = hald.connect();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with(":1."));
    }

    #[test]
    fn test_signals_need_a_matching_rule() {
        let hald = FakeHald::new();
        let conn = hald.connect();

        hald.emit(condition("/org/freedesktop/Hal/devices/a"));
        assert!(conn.poll_signal().is_none());

        conn.add_match(&MatchRule::new().path("/org/freedesktop/Hal/devices/a"))
            .unwrap();
        hald.emit(condition("/org/freedesktop/Hal/devices/b"));
        hald.emit(condition("/org/freedesktop/Hal/devices/a"));

        assert_eq!(conn.pending_signals(), 1);
        let signal = conn.poll_signal().unwrap();
        assert_eq!(signal.path, "/org/freedesktop/Hal/devices/a");
    }

    #[test]
    fn test_remove_unknown_rule_fails() {
        let hald = FakeHald::new();
        let conn = hald.connect();
        let err = conn.remove_match(&MatchRule::new().member("X")).unwrap_err();
        assert!(err.is(names::MATCH_RULE_NOT_FOUND));
        assert_eq!(conn.request_count(), 1);
    }
}
