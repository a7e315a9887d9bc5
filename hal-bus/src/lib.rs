//! Private message-bus transport seam for the HAL client SDK
//!
//! This crate defines what the client needs from a message bus and nothing
//! more: method calls with typed arguments, error replies carrying a
//! machine-readable name, signals, and match rules that select which signals
//! a connection receives. Connection setup, framing and authentication belong
//! to whatever implements [`Transport`].
//!
//! [`BusConnection`] implements the trait over a real `zbus` connection; the
//! in-memory daemon in the testkit implements it for tests.

mod connection;
mod error;
mod value;

pub use connection::BusConnection;
pub use error::{names, BusError};
pub use value::BusValue;

use std::fmt;
use std::sync::Arc;

/// A method call addressed to an object on a remote peer
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Well-known or unique bus name of the peer
    pub destination: String,
    /// Object path the call is addressed to
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<BusValue>,
}

impl MethodCall {
    /// Create a call with no arguments
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, value: impl Into<BusValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Concatenated signature of all arguments
    pub fn signature(&self) -> String {
        self.args.iter().map(BusValue::signature).collect()
    }
}

/// A signal broadcast by a peer
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub sender: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<BusValue>,
}

impl Signal {
    pub fn new(
        sender: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            args,
        }
    }
}

/// Selects which signals are routed to a connection
///
/// Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl MatchRule {
    /// A rule matching every signal
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Whether a signal satisfies every field of this rule
    pub fn matches(&self, signal: &Signal) -> bool {
        fn field_ok(rule: &Option<String>, actual: &str) -> bool {
            rule.as_deref().map_or(true, |expected| expected == actual)
        }

        field_ok(&self.sender, &signal.sender)
            && field_ok(&self.path, &signal.path)
            && field_ok(&self.interface, &signal.interface)
            && field_ok(&self.member, &signal.member)
    }

    /// The equivalent `zbus` rule, restricted to signals
    ///
    /// Fails when a field is not a valid bus name, object path, interface or
    /// member name.
    pub fn to_bus_rule(&self) -> Result<zbus::MatchRule<'_>, BusError> {
        let invalid = |e: zbus::Error| BusError::Encoding(format!("invalid match rule: {}", e));

        let mut builder = zbus::MatchRule::builder().msg_type(zbus::message::Type::Signal);
        if let Some(sender) = &self.sender {
            builder = builder.sender(sender.as_str()).map_err(invalid)?;
        }
        if let Some(interface) = &self.interface {
            builder = builder.interface(interface.as_str()).map_err(invalid)?;
        }
        if let Some(member) = &self.member {
            builder = builder.member(member.as_str()).map_err(invalid)?;
        }
        if let Some(path) = &self.path {
            builder = builder.path(path.as_str()).map_err(invalid)?;
        }
        Ok(builder.build())
    }
}

impl fmt::Display for MatchRule {
    /// Bus match-rule syntax, e.g. `type='signal',interface='x',path='/y'`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bus_rule() {
            Ok(rule) => fmt::Display::fmt(&rule, f),
            Err(e) => write!(f, "<{}>", e),
        }
    }
}

/// A connection to a message bus
///
/// Implementations are owned by the application; the client only borrows a
/// shared handle and never closes it. Every method is synchronous: `call`
/// blocks for one round trip, and `poll_signal` never blocks.
pub trait Transport: Send + Sync {
    /// Send a method call and wait for its reply arguments
    fn call(&self, call: &MethodCall) -> Result<Vec<BusValue>, BusError>;

    /// Ask the bus to start routing signals matching `rule` to this connection
    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError>;

    /// Stop routing signals for a previously added rule
    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError>;

    /// Take the next queued signal, if any
    fn poll_signal(&self) -> Option<Signal>;

    /// The unique name the bus assigned to this connection
    fn unique_name(&self) -> Option<String> {
        None
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(&self, call: &MethodCall) -> Result<Vec<BusValue>, BusError> {
        (**self).call(call)
    }

    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        (**self).add_match(rule)
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        (**self).remove_match(rule)
    }

    fn poll_signal(&self) -> Option<Signal> {
        (**self).poll_signal()
    }

    fn unique_name(&self) -> Option<String> {
        (**self).unique_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property_modified() -> Signal {
        Signal::new(
            "org.freedesktop.Hal",
            "/org/freedesktop/Hal/devices/computer",
            "org.freedesktop.Hal.Device",
            "PropertyModified",
            Vec::new(),
        )
    }

    #[test]
    fn test_method_call_builder() {
        let call = MethodCall::new(
            "org.freedesktop.Hal",
            "/org/freedesktop/Hal/devices/computer",
            "org.freedesktop.Hal.Device",
            "SetPropertyInteger",
        )
        .arg("info.level")
        .arg(3i32);

        assert_eq!(call.args.len(), 2);
        assert_eq!(call.signature(), "si");
    }

    #[test]
    fn test_empty_rule_matches_everything() {
        assert!(MatchRule::new().matches(&property_modified()));
    }

    #[test]
    fn test_rule_fields_must_all_match() {
        let signal = property_modified();

        let rule = MatchRule::new()
            .interface("org.freedesktop.Hal.Device")
            .path("/org/freedesktop/Hal/devices/computer");
        assert!(rule.matches(&signal));

        let other_path = rule.clone().path("/org/freedesktop/Hal/devices/other");
        assert!(!other_path.matches(&signal));

        let other_member = MatchRule::new().member("Condition");
        assert!(!other_member.matches(&signal));
    }

    #[test]
    fn test_rule_display() {
        let rule = MatchRule::new()
            .sender("org.freedesktop.Hal")
            .interface("org.freedesktop.Hal.Manager")
            .path("/org/freedesktop/Hal/Manager");
        let text = rule.to_string();
        assert!(text.contains("type='signal'"), "{}", text);
        assert!(text.contains("sender='org.freedesktop.Hal'"), "{}", text);
        assert!(text.contains("interface='org.freedesktop.Hal.Manager'"), "{}", text);
        assert!(text.contains("path='/org/freedesktop/Hal/Manager'"), "{}", text);
        assert!(!text.contains("member="), "{}", text);
    }

    #[test]
    fn test_invalid_rule_fields_are_reported() {
        let rule = MatchRule::new().interface("no dots here");
        assert!(matches!(rule.to_bus_rule(), Err(BusError::Encoding(_))));
        assert!(rule.to_string().starts_with("<Cannot encode value: invalid match rule"));

        let rule = MatchRule::new().path("relative/path");
        assert!(rule.to_bus_rule().is_err());
    }
}
