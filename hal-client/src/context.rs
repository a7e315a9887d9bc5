//! The client context: transport handle, lifecycle and per-context state
//!
//! A [`Context`] goes through three states in order:
//!
//! ```text
//! New --init()--> Initialized --shutdown()--> ShutDown
//! ```
//!
//! Protocol calls are only accepted while initialized. A context that has
//! been shut down stays shut down; create a new one to reconnect.
//!
//! The transport is shared with the caller. The context keeps an
//! `Arc<dyn Transport>` and never closes the connection; shutdown only
//! removes the match rules the context installed.

use std::any::Any;
use std::sync::Arc;

use hal_bus::{BusValue, MatchRule, MethodCall, Transport};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ContextConfig;
use crate::dispatch::EventRegistry;
use crate::error::{HalError, Result};
use crate::udi::Udi;

/// Where a context is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    New,
    Initialized,
    ShutDown,
}

/// Connection to the HAL daemon plus event handlers and user data
pub struct Context {
    config: ContextConfig,
    transport: Option<Arc<dyn Transport>>,
    state: ContextState,
    direct: bool,
    cache: bool,
    user_data: Option<Box<dyn Any + Send>>,
    pub(crate) registry: EventRegistry,
    match_rules: Mutex<Vec<MatchRule>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state)
            .field("direct", &self.direct)
            .field("cache", &self.cache)
            .field("has_transport", &self.transport.is_some())
            .field("has_user_data", &self.user_data.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create an uninitialized context with the default daemon names
    pub fn new() -> Self {
        Self::build(ContextConfig::default())
    }

    /// Create an uninitialized context with custom daemon names
    pub fn with_config(config: ContextConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ContextConfig) -> Self {
        Self {
            cache: config.use_cache,
            config,
            transport: None,
            state: ContextState::New,
            direct: false,
            user_data: None,
            registry: EventRegistry::new(),
            match_rules: Mutex::new(Vec::new()),
        }
    }

    /// Connect straight to the daemon's private socket
    ///
    /// Reads the address from `HALD_DIRECT_ADDR` and hands it to `connect`.
    /// Nothing is returned when the variable is unset. Direct contexts are
    /// initialized on return and receive no registry signals.
    pub fn init_direct<F>(connect: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Arc<dyn Transport>>,
    {
        Self::init_direct_with_config(ContextConfig::default(), connect)
    }

    pub fn init_direct_with_config<F>(config: ContextConfig, connect: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Arc<dyn Transport>>,
    {
        config.validate()?;
        let address = config.direct_address().ok_or_else(|| {
            warn!(variable = %config.direct_address_env, "Direct daemon address is not set");
            HalError::DirectAddressMissing(config.direct_address_env.clone())
        })?;

        let transport = connect(&address)?;
        let mut ctx = Self::build(config);
        ctx.transport = Some(transport);
        ctx.direct = true;
        ctx.state = ContextState::Initialized;

        info!(address = %address, "Connected directly to daemon");
        Ok(ctx)
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Attach the bus connection to use; only allowed before `init`
    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        match self.state {
            ContextState::New => {
                self.transport = Some(transport);
                Ok(())
            }
            ContextState::Initialized => {
                warn!("Refusing to replace the transport of an initialized context");
                Err(HalError::Configuration(
                    "Transport cannot be replaced after init".to_string(),
                ))
            }
            ContextState::ShutDown => Err(HalError::ShutDown),
        }
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn set_cache(&mut self, use_cache: bool) {
        self.cache = use_cache;
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache
    }

    /// Start talking to the daemon
    ///
    /// Installs the match rules for manager and singleton notifications.
    /// Calling `init` on an initialized context does nothing.
    pub fn init(&mut self) -> Result<()> {
        match self.state {
            ContextState::Initialized => {
                debug!("Context already initialized");
                return Ok(());
            }
            ContextState::ShutDown => {
                warn!("Refusing to re-initialize a context that was shut down");
                return Err(HalError::ShutDown);
            }
            ContextState::New => {}
        }

        let transport = self.transport.clone().ok_or_else(|| {
            warn!("Context initialized without a transport");
            HalError::NoTransport
        })?;

        let rules = [
            MatchRule::new()
                .interface(self.config.manager_interface.as_str())
                .path(self.config.manager_path.as_str()),
            MatchRule::new().interface(self.config.singleton_interface.as_str()),
        ];
        for rule in rules {
            transport.add_match(&rule)?;
            debug!(rule = %rule, "Added match rule");
            self.match_rules.lock().push(rule);
        }

        self.state = ContextState::Initialized;
        info!(unique_name = ?transport.unique_name(), "Context initialized");
        Ok(())
    }

    /// Stop dispatching and remove installed match rules
    ///
    /// Every rule removal is attempted; the first failure is returned after
    /// the context has moved to `ShutDown`.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            ContextState::New => return Err(HalError::NotInitialized),
            ContextState::ShutDown => return Ok(()),
            ContextState::Initialized => {}
        }

        let mut first_error = None;
        if let Some(transport) = &self.transport {
            for rule in self.match_rules.lock().drain(..) {
                if let Err(e) = transport.remove_match(&rule) {
                    warn!(rule = %rule, error = %e, "Failed to remove match rule");
                    first_error.get_or_insert(HalError::from(e));
                }
            }
        }

        self.state = ContextState::ShutDown;
        info!("Context shut down");
        first_error.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ContextState::Initialized
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Store arbitrary data, replacing anything stored before
    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    /// Borrow the stored data if it is a `T`
    pub fn user_data<T: Any + Send>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref::<T>()
    }

    pub fn user_data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut()?.downcast_mut::<T>()
    }

    /// Remove and return the stored data if it is a `T`; other types stay put
    pub fn take_user_data<T: Any + Send>(&mut self) -> Option<T> {
        let data = self.user_data.take()?;
        match data.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(data) => {
                self.user_data = Some(data);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Watches
    // ------------------------------------------------------------------

    /// Receive property and condition signals for one device
    pub fn add_property_watch(&self, udi: &str) -> Result<()> {
        let rule = self.device_rule().path(Udi::new(udi)?.as_str());
        self.add_rule(rule)
    }

    pub fn remove_property_watch(&self, udi: &str) -> Result<()> {
        let rule = self.device_rule().path(Udi::new(udi)?.as_str());
        self.remove_rule(&rule)
    }

    /// Receive property and condition signals for every device
    pub fn watch_all(&self) -> Result<()> {
        self.add_rule(self.device_rule())
    }

    pub fn remove_watch_all(&self) -> Result<()> {
        self.remove_rule(&self.device_rule())
    }

    fn device_rule(&self) -> MatchRule {
        MatchRule::new().interface(self.config.device_interface.as_str())
    }

    fn add_rule(&self, rule: MatchRule) -> Result<()> {
        let transport = self.ready()?;
        transport.add_match(&rule)?;
        debug!(rule = %rule, "Added match rule");
        self.match_rules.lock().push(rule);
        Ok(())
    }

    fn remove_rule(&self, rule: &MatchRule) -> Result<()> {
        let transport = self.ready()?;
        transport.remove_match(rule)?;
        debug!(rule = %rule, "Removed match rule");
        let mut rules = self.match_rules.lock();
        if let Some(index) = rules.iter().position(|r| r == rule) {
            rules.remove(index);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Call plumbing shared by the protocol modules
    // ------------------------------------------------------------------

    /// The transport, if the context accepts protocol calls
    pub(crate) fn ready(&self) -> Result<&Arc<dyn Transport>> {
        match self.state {
            ContextState::New => Err(HalError::NotInitialized),
            ContextState::ShutDown => Err(HalError::ShutDown),
            ContextState::Initialized => self.transport.as_ref().ok_or(HalError::NoTransport),
        }
    }

    pub(crate) fn call_manager(&self, member: &str, args: Vec<BusValue>) -> Result<Vec<BusValue>> {
        let path = self.config.manager_path.clone();
        let interface = self.config.manager_interface.clone();
        self.call(path, interface, member, args)
    }

    pub(crate) fn call_device(&self, udi: &Udi, member: &str, args: Vec<BusValue>) -> Result<Vec<BusValue>> {
        let interface = self.config.device_interface.clone();
        self.call(udi.to_string(), interface, member, args)
    }

    fn call(&self, path: String, interface: String, member: &str, args: Vec<BusValue>) -> Result<Vec<BusValue>> {
        let transport = self.ready()?;
        let call = MethodCall {
            destination: self.config.service_name.clone(),
            path,
            interface,
            member: member.to_string(),
            args,
        };

        debug!(method = member, object = %call.path, signature = %call.signature(), "Calling daemon");
        transport.call(&call).map_err(|e| {
            debug!(method = member, object = %call.path, error = %e, "Daemon call failed");
            HalError::from(e)
        })
    }
}

/// First reply argument or a malformed-reply error
pub(crate) fn first_arg<'a>(method: &str, reply: &'a [BusValue]) -> Result<&'a BusValue> {
    reply
        .first()
        .ok_or_else(|| HalError::malformed(method, "empty reply"))
}

pub(crate) fn reply_bool(method: &str, reply: &[BusValue]) -> Result<bool> {
    let value = first_arg(method, reply)?;
    value
        .as_bool()
        .ok_or_else(|| HalError::malformed(method, format!("expected b, got {}", value.signature())))
}

pub(crate) fn reply_string(method: &str, reply: &[BusValue]) -> Result<String> {
    let value = first_arg(method, reply)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HalError::malformed(method, format!("expected s, got {}", value.signature())))
}

pub(crate) fn reply_strings(method: &str, reply: &[BusValue]) -> Result<Vec<String>> {
    let value = first_arg(method, reply)?;
    value
        .as_str_array()
        .map(<[String]>::to_vec)
        .ok_or_else(|| HalError::malformed(method, format!("expected as, got {}", value.signature())))
}

pub(crate) fn reply_udis(method: &str, reply: &[BusValue]) -> Result<Vec<Udi>> {
    reply_strings(method, reply)?
        .into_iter()
        .map(|udi| Udi::new(udi).map_err(|e| HalError::malformed(method, e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_testkit::FakeHald;

    fn context_for(hald: &FakeHald) -> Context {
        let mut ctx = Context::new();
        ctx.set_transport(hald.connect()).unwrap();
        ctx
    }

    #[test]
    fn test_lifecycle() {
        let hald = FakeHald::new();
        let mut ctx = context_for(&hald);
        assert_eq!(ctx.state(), ContextState::New);

        ctx.init().unwrap();
        assert!(ctx.is_initialized());
        ctx.init().unwrap();

        ctx.shutdown().unwrap();
        assert_eq!(ctx.state(), ContextState::ShutDown);
        assert_eq!(ctx.init(), Err(HalError::ShutDown));
    }

    #[test]
    fn test_init_requires_transport() {
        let mut ctx = Context::new();
        assert_eq!(ctx.init(), Err(HalError::NoTransport));
        assert_eq!(ctx.state(), ContextState::New);
    }

    #[test]
    fn test_calls_rejected_outside_initialized_state() {
        let hald = FakeHald::new();
        let mut ctx = context_for(&hald);
        assert_eq!(ctx.ready().err(), Some(HalError::NotInitialized));

        ctx.init().unwrap();
        ctx.shutdown().unwrap();
        assert_eq!(ctx.ready().err(), Some(HalError::ShutDown));
    }

    #[test]
    fn test_shutdown_removes_rules_but_keeps_transport() {
        let hald = FakeHald::new();
        let conn = hald.connect();
        let mut ctx = Context::new();
        ctx.set_transport(conn.clone()).unwrap();
        ctx.init().unwrap();
        ctx.watch_all().unwrap();
        assert_eq!(conn.match_rules().len(), 3);

        ctx.shutdown().unwrap();
        assert!(conn.match_rules().is_empty());
        assert!(ctx.transport().is_some());
    }

    #[test]
    fn test_transport_cannot_be_swapped_after_init() {
        let hald = FakeHald::new();
        let mut ctx = context_for(&hald);
        ctx.init().unwrap();
        assert!(matches!(
            ctx.set_transport(hald.connect()),
            Err(HalError::Configuration(_))
        ));
    }

    #[test]
    fn test_user_data() {
        let mut ctx = Context::new();
        assert!(ctx.user_data::<u32>().is_none());

        ctx.set_user_data(41u32);
        *ctx.user_data_mut::<u32>().unwrap() += 1;
        assert_eq!(ctx.user_data::<u32>(), Some(&42));
        assert!(ctx.user_data::<String>().is_none());

        assert_eq!(ctx.take_user_data::<String>(), None);
        assert_eq!(ctx.take_user_data::<u32>(), Some(42));
        assert!(ctx.user_data::<u32>().is_none());
    }

    #[test]
    fn test_cache_flag_follows_config() {
        let config = ContextConfig {
            use_cache: true,
            ..Default::default()
        };
        let mut ctx = Context::with_config(config).unwrap();
        assert!(ctx.cache_enabled());
        ctx.set_cache(false);
        assert!(!ctx.cache_enabled());
    }

    #[test]
    fn test_init_direct_without_address() {
        let config = ContextConfig {
            direct_address_env: "HAL_CLIENT_TEST_NO_DIRECT_ADDR_91c2".to_string(),
            ..Default::default()
        };
        let mut connected = false;
        let result = Context::init_direct_with_config(config, |_| {
            connected = true;
            Err(HalError::Transport("unreachable".to_string()))
        });
        assert_eq!(
            result.err(),
            Some(HalError::DirectAddressMissing(
                "HAL_CLIENT_TEST_NO_DIRECT_ADDR_91c2".to_string()
            ))
        );
        assert!(!connected);
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Context>();
    }
}
