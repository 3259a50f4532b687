//! Registry of installed addons.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use super::{Addon, Capabilities, Operation, Provides};

struct Registration {
    name: String,
    addon: Arc<dyn Addon>,
    capabilities: Capabilities,
}

/// Addons by name, kept in registration order.
#[derive(Default)]
pub struct AddonRegistry {
    entries: RwLock<Vec<Registration>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `addon` under `name`.
    ///
    /// Registering a name again replaces the addon but keeps its original
    /// position.
    pub fn register(&self, name: impl Into<String>, addon: Arc<dyn Addon>) {
        let name = name.into();
        let mut capabilities = Capabilities::default();
        addon.clone().declare(&mut capabilities);
        info!(addon = %name, operations = ?capabilities.operations(), "Registering addon");

        let registration = Registration {
            name,
            addon,
            capabilities,
        };

        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.name == registration.name) {
            Some(existing) => {
                debug!(addon = %registration.name, "Replacing addon");
                *existing = registration;
            }
            None => entries.push(registration),
        }
    }

    /// Remove an addon, returning whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Addon>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.addon.clone())
    }

    /// The provider of `Op` registered under `name`, if that addon serves it.
    pub fn provider<Op: Operation>(&self, name: &str) -> Option<Arc<dyn Provides<Op>>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.capabilities.get::<Op>())
    }

    /// Every addon serving `Op`, in registration order.
    pub fn get_by_operation<Op: Operation>(&self) -> Vec<(String, Arc<dyn Provides<Op>>)> {
        self.entries
            .read()
            .iter()
            .filter_map(|e| e.capabilities.get::<Op>().map(|p| (e.name.clone(), p)))
            .collect()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
