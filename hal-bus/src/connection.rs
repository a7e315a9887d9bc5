//! [`Transport`] over a live bus connection

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, warn};
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{connection, Connection};
use zbus::message::Type as MessageType;
use zbus::zvariant::{Structure, StructureBuilder};
use zbus::{DBusError, Message, MessageStream};

use crate::{BusError, BusValue, MatchRule, MethodCall, Signal, Transport};

/// A blocking `zbus` connection usable as a [`Transport`]
///
/// Incoming messages are queued by the connection's own reader; signals that
/// match one of the rules added through this handle are handed out by
/// [`Transport::poll_signal`] in arrival order.
pub struct BusConnection {
    connection: Connection,
    incoming: Mutex<MessageStream>,
    rules: Mutex<Vec<MatchRule>>,
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("unique_name", &self.connection.unique_name())
            .field("rules", &self.rules.lock().len())
            .finish()
    }
}

impl BusConnection {
    /// Connect to the system bus, where the daemon lives
    pub fn system() -> Result<Self, BusError> {
        Connection::system().map(Self::new).map_err(from_zbus)
    }

    pub fn session() -> Result<Self, BusError> {
        Connection::session().map(Self::new).map_err(from_zbus)
    }

    /// Connect to a bus at an explicit address such as `unix:path=/run/hald.sock`
    pub fn connect(address: &str) -> Result<Self, BusError> {
        let connection = connection::Builder::address(address)
            .and_then(|builder| builder.build())
            .map_err(from_zbus)?;
        debug!(address = %address, "Connected to bus");
        Ok(Self::new(connection))
    }

    /// Wrap an already established connection
    pub fn new(connection: Connection) -> Self {
        let incoming = MessageStream::from(connection.inner());
        Self {
            connection,
            incoming: Mutex::new(incoming),
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn dbus(&self) -> Result<DBusProxy<'_>, BusError> {
        DBusProxy::new(&self.connection).map_err(from_zbus)
    }

    fn wanted(&self, signal: &Signal) -> bool {
        // The bus has already filtered by sender; it reports unique names
        // where rules usually carry the well-known one.
        self.rules.lock().iter().any(|rule| {
            MatchRule {
                sender: None,
                ..rule.clone()
            }
            .matches(signal)
        })
    }
}

impl Transport for BusConnection {
    fn call(&self, call: &MethodCall) -> Result<Vec<BusValue>, BusError> {
        let destination = Some(call.destination.as_str());
        let interface = Some(call.interface.as_str());
        let reply = if call.args.is_empty() {
            self.connection.call_method(
                destination,
                call.path.as_str(),
                interface,
                call.member.as_str(),
                &(),
            )
        } else {
            let body = encode_args(&call.args)?;
            self.connection.call_method(
                destination,
                call.path.as_str(),
                interface,
                call.member.as_str(),
                &body,
            )
        }
        .map_err(from_zbus)?;

        decode_body(&reply)
    }

    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let bus_rule = rule.to_bus_rule()?;
        self.dbus()?
            .add_match_rule(bus_rule)
            .map_err(|e| BusError::remote(e.name().to_string(), e.description().unwrap_or_default()))?;
        self.rules.lock().push(rule.clone());
        Ok(())
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let bus_rule = rule.to_bus_rule()?;
        self.dbus()?
            .remove_match_rule(bus_rule)
            .map_err(|e| BusError::remote(e.name().to_string(), e.description().unwrap_or_default()))?;
        let mut rules = self.rules.lock();
        if let Some(index) = rules.iter().position(|r| r == rule) {
            rules.remove(index);
        }
        Ok(())
    }

    fn poll_signal(&self) -> Option<Signal> {
        let mut incoming = self.incoming.lock();
        loop {
            let message = match incoming.next().now_or_never() {
                Some(Some(Ok(message))) => message,
                Some(Some(Err(e))) => {
                    warn!(error = %e, "Dropping unreadable message");
                    continue;
                }
                Some(None) | None => return None,
            };
            if message.message_type() != MessageType::Signal {
                continue;
            }
            match signal_from_message(&message) {
                Ok(signal) if self.wanted(&signal) => return Some(signal),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Dropping malformed signal"),
            }
        }
    }

    fn unique_name(&self) -> Option<String> {
        self.connection.unique_name().map(|name| name.to_string())
    }
}

/// Multiple arguments travel as one structure whose fields become the body
fn encode_args(args: &[BusValue]) -> Result<Structure<'static>, BusError> {
    let mut builder = StructureBuilder::new();
    for arg in args {
        builder = builder.append_field(arg.to_zvariant()?);
    }
    builder.build().map_err(|e| BusError::Encoding(e.to_string()))
}

fn decode_body(message: &Message) -> Result<Vec<BusValue>, BusError> {
    let body = message.body();
    if body.signature().to_string().is_empty() {
        return Ok(Vec::new());
    }
    let fields: Structure<'_> = body
        .deserialize()
        .map_err(|e| BusError::MalformedReply(e.to_string()))?;
    let args = fields
        .fields()
        .iter()
        .map(BusValue::from_zvariant)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(args)
}

fn signal_from_message(message: &Message) -> Result<Signal, BusError> {
    let header = message.header();
    Ok(Signal::new(
        header.sender().map(|s| s.to_string()).unwrap_or_default(),
        header.path().map(|p| p.to_string()).unwrap_or_default(),
        header.interface().map(|i| i.to_string()).unwrap_or_default(),
        header.member().map(|m| m.to_string()).unwrap_or_default(),
        decode_body(message)?,
    ))
}

fn from_zbus(error: zbus::Error) -> BusError {
    match error {
        zbus::Error::MethodError(name, description, _) => {
            BusError::remote(name.to_string(), description.unwrap_or_default())
        }
        zbus::Error::FDO(e) => BusError::remote(e.name().to_string(), e.description().unwrap_or_default()),
        zbus::Error::Variant(e) => BusError::MalformedReply(e.to_string()),
        other => BusError::Disconnected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names;

    #[test]
    fn test_args_become_one_structure() {
        let body = encode_args(&[BusValue::from("info.level"), BusValue::from(3i32)]).unwrap();
        assert_eq!(body.fields().len(), 2);
        let value = zbus::zvariant::Value::Structure(body);
        assert_eq!(value.value_signature().to_string(), "(si)");
    }

    #[test]
    fn test_unencodable_arg_is_rejected() {
        let err = encode_args(&[BusValue::Struct(Vec::new())]).unwrap_err();
        assert!(matches!(err, BusError::Encoding(_)));
    }

    #[test]
    fn test_error_replies_keep_their_name() {
        let err = from_zbus(zbus::Error::FDO(Box::new(zbus::fdo::Error::AccessDenied(
            "not allowed".to_string(),
        ))));
        assert_eq!(err, BusError::remote(names::ACCESS_DENIED, "not allowed"));

        let err = from_zbus(zbus::Error::InvalidReply);
        assert!(matches!(err, BusError::Disconnected(_)));
    }
}
