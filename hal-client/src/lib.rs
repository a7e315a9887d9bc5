//! # HAL Client - typed access to the HAL device registry
//!
//! Client library for the HAL hardware abstraction daemon. A [`Context`]
//! wraps a bus connection and exposes the daemon's device registry:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hal_client::{BusConnection, ChangeSet, Context};
//!
//! let mut ctx = Context::new();
//! ctx.set_transport(Arc::new(BusConnection::system()?))?;
//! ctx.init()?;
//!
//! // Query devices and read typed properties
//! for udi in ctx.find_device_by_capability("storage")? {
//!     let vendor = ctx.get_property_string(udi.as_str(), "storage.vendor")?;
//!     println!("{}: {}", udi, vendor);
//! }
//!
//! // Batch several edits into one request
//! let mut changes = ChangeSet::new("/org/freedesktop/Hal/devices/computer")?;
//! changes.set_property_string("info.product", "Workstation")?;
//! changes.strlist_append("info.addons", "hald-addon-acpi")?;
//! ctx.commit_changeset(&changes)?;
//!
//! // React to registry changes
//! ctx.set_property_modified(|_ctx, udi, key, removed, added| {
//!     println!("{} {} removed={} added={}", udi, key, removed, added);
//! });
//! ctx.watch_all()?;
//! ctx.process_pending()?;
//! ```
//!
//! ## Key Features
//!
//! - **Typed properties**: six value types with checked getters and setters
//! - **Snapshots**: [`PropertySet`] captures every property of a device in
//!   one round trip and can be walked with [`PropertySetIterator`]
//! - **Changesets**: ordered batches of edits committed all-or-nothing
//! - **Events**: one handler slot per [`EventKind`], fed from bus signals
//! - **Locks**: per-device and global interface locks plus the whole-device
//!   lock
//! - **Local validation**: malformed identifiers and keys never reach the bus
//!
//! ## Architecture
//!
//! ```text
//! Context (lifecycle, user data, match rules)
//!     ├── device / manager / locking   one bus call per operation
//!     ├── EventRegistry                signal -> HalEvent -> handler
//!     └── Arc<dyn Transport>           hal-bus connection
//! ```
//!
//! The context never spawns threads or owns an event loop. Signals are
//! pulled from the transport by [`Context::process_pending`], or fed in by
//! the caller through [`Context::dispatch_signal`].

pub mod config;
pub mod events;
pub mod logging;

mod changeset;
mod context;
mod device;
mod dispatch;
mod error;
mod locking;
mod manager;
mod property_set;
mod udi;
mod value;

pub use changeset::{Change, ChangeOp, ChangeSet};
pub use config::ContextConfig;
pub use context::{Context, ContextState};
pub use dispatch::{EventCallback, EventRegistry};
pub use error::{names, HalError, Result};
pub use events::{decode_signal, EventKind, HalEvent};
pub use property_set::{Property, PropertySet, PropertySetIterator};
pub use udi::{Udi, UDI_PREFIX};
pub use value::{PropertyType, PropertyValue};

// Re-export the bus types callers need to plug in a connection
pub use hal_bus::{BusConnection, BusValue, MatchRule, Signal, Transport};
