//! Process-wide map of port names to command tables.
//!
//! Read-mostly: lookups take a shared lock, registration an exclusive one.
//! A table is fully built before it is inserted, so a concurrent `open`
//! either sees the whole table or none of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::{CommandTable, PortHandle};
use crate::errors::PortError;

#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: RwLock<HashMap<String, Arc<CommandTable>>>,
    next_session: AtomicU64,
}

static GLOBAL: OnceLock<PortRegistry> = OnceLock::new();

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created empty on first use.
    pub fn global() -> &'static PortRegistry {
        GLOBAL.get_or_init(PortRegistry::new)
    }

    /// Register a port.  A name that is already taken is rejected; use
    /// [`replace`](Self::replace) to swap a table deliberately.
    pub fn register(&self, table: CommandTable) -> Result<(), PortError> {
        let mut ports = self.ports.write();
        if ports.contains_key(table.name()) {
            return Err(PortError::AlreadyRegistered(table.name().to_owned()));
        }
        log::debug!("registered port '{}' ({} commands)", table.name(), table.len());
        ports.insert(table.name().to_owned(), Arc::new(table));
        Ok(())
    }

    /// Register or atomically swap a port, returning the previous table.
    /// Handles opened earlier keep the table they were opened with.
    pub fn replace(&self, table: CommandTable) -> Option<Arc<CommandTable>> {
        log::debug!("replacing port '{}'", table.name());
        self.ports
            .write()
            .insert(table.name().to_owned(), Arc::new(table))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<CommandTable>> {
        self.ports.write().remove(name)
    }

    /// Remove every port.  Open handles stay usable.
    pub fn clear(&self) {
        self.ports.write().clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ports.read().contains_key(name)
    }

    /// Exact-name lookup.  Never creates a port.
    pub fn open(&self, name: &str) -> Result<PortHandle, PortError> {
        let table = self
            .ports
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PortError::UnknownPort(name.to_owned()))?;
        let session = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("opened port '{name}' (session {session})");
        Ok(PortHandle::new(table, session))
    }

    /// Registered port names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ports.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}
