//! Named command ports.
//!
//! A port is a [`CommandTable`] registered under a well-known name in a
//! [`PortRegistry`].  Opening a port yields a [`PortHandle`]: a shared
//! reference to the table plus a session that belongs to that handle alone.
//! [`dispatch::execute`] turns a JSON call into a [`DispatchResult`].

pub mod args;
pub mod command;
pub mod dispatch;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use command::{Command, CommandContext, CommandDef, CommandTable, ParamDef, PortDescription};
pub use dispatch::DispatchResult;
pub use registry::PortRegistry;

/// Per-handle state.  Never shared between handles.
#[derive(Debug)]
pub struct PortSession {
    id: u64,
    calls: AtomicU64,
}

impl PortSession {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            calls: AtomicU64::new(0),
        }
    }

    /// Registry-unique id of the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commands executed through this handle so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn record_call(&self) -> u64 {
        self.calls.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// An open port.  Dropping it releases the session only; the port stays
/// registered.
#[derive(Debug)]
pub struct PortHandle {
    table: Arc<CommandTable>,
    session: PortSession,
}

impl PortHandle {
    pub(crate) fn new(table: Arc<CommandTable>, session_id: u64) -> Self {
        Self {
            table,
            session: PortSession::new(session_id),
        }
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn session(&self) -> &PortSession {
        &self.session
    }

    pub fn describe(&self) -> PortDescription {
        self.table.describe()
    }

    /// Execute `command` with a JSON object of arguments (`None` or empty
    /// means no arguments).
    pub fn execute(&self, command: &str, args_json: Option<&str>) -> DispatchResult {
        dispatch::execute(self, command, args_json)
    }
}
