//! # Globals
//!
//! A global advertises one interface, up to some version, to every client of
//! a runtime. Binding it creates a fresh resource on the binding connection.
//!
//! ## Architecture
//!
//! The only context a bind carries is the global's [`RegistryKey`]. The
//! runtime keeps the global alive; the handle registry maps the key back to
//! it on every bind. Once destroyed the key no longer resolves, so late binds
//! fail with `UnknownGlobal` instead of reaching a dead global.

use std::sync::Arc;
use std::sync::Weak;

use wlwire::InterfaceRef;

use crate::connection::Connection;
use crate::error::Error;
use crate::error::Result;
use crate::object::WireObject;
use crate::registry::RegistryKey;
use crate::runtime::Runtime;
use crate::signal::ListenerHandle;
use crate::signal::Signal;

/// Called with the binding connection, the requested version and the new
/// protocol id. Returns the resource it created.
pub type BindFn = dyn Fn(&Connection, u32, u32) -> anyhow::Result<WireObject> + Send + Sync;

pub(crate) struct GlobalState {
    interface: InterfaceRef,
    version: u32,
    bind: Box<BindFn>,
    destroyed: Signal,
}

impl GlobalState {
    pub(crate) fn bind(&self, connection: &Connection, version: u32, id: u32) -> Result<WireObject> {
        if version == 0 || version > self.version {
            return Err(Error::InvalidVersion {
                interface: self.interface.name.clone(),
                version,
                supported: self.version,
            });
        }
        let resource = (self.bind)(connection, version, id).map_err(|cause| Error::HandlerInvocation {
            handler: "global bind",
            message: self.interface.name.clone(),
            cause,
        })?;
        tracing::debug!(
            interface = %self.interface,
            connection = %connection.id(),
            version,
            resource = ?resource,
            "bound global"
        );
        Ok(resource)
    }
}

#[derive(Clone)]
pub struct Global {
    state: Arc<GlobalState>,
    key: RegistryKey,
    runtime: Weak<Runtime>,
}

impl Global {
    /// Advertises `interface` at `version` on `runtime`.
    ///
    /// `version` must be at least 1 and no higher than the interface's.
    pub fn new<F>(runtime: &Arc<Runtime>, interface: InterfaceRef, version: u32, bind: F) -> Result<Self>
    where
        F: Fn(&Connection, u32, u32) -> anyhow::Result<WireObject> + Send + Sync + 'static,
    {
        if version == 0 || version > interface.version {
            return Err(Error::InvalidVersion {
                interface: interface.name.clone(),
                version,
                supported: interface.version,
            });
        }
        let state = Arc::new(GlobalState { interface, version, bind: Box::new(bind), destroyed: Signal::new() });
        let key = runtime.registry.register(&state);
        runtime.globals.insert(key, Arc::clone(&state));
        tracing::debug!(interface = %state.interface, version, %key, "global created");
        Ok(Self { state, key, runtime: Arc::downgrade(runtime) })
    }

    /// The bind context handed to clients.
    pub fn key(&self) -> RegistryKey {
        self.key
    }

    pub fn interface(&self) -> &InterfaceRef {
        &self.state.interface
    }

    /// Highest version a client may bind.
    pub fn version(&self) -> u32 {
        self.state.version
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.is_fired()
    }

    /// Runs `callback` once when the global is destroyed.
    pub fn add_destroy_listener(&self, callback: impl FnOnce() + Send + 'static) -> ListenerHandle {
        self.state.destroyed.subscribe(callback)
    }

    /// Withdraws the global. Resources already bound are left alone.
    pub fn destroy(&self) -> Result<()> {
        self.state.destroyed.emit(&format!("global {}", self.state.interface.name))?;
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.globals.remove(&self.key);
            runtime.registry.remove(self.key);
        }
        tracing::debug!(interface = %self.state.interface, key = %self.key, "global destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "global {} v{} ({})", self.state.interface.name, self.state.version, self.key)
    }
}
