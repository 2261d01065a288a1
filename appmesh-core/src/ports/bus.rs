//! Lazily opened session-bus connection shared by the D-Bus backed ports.

use parking_lot::Mutex;
use zbus::blocking::{Connection, Proxy};

use crate::errors::CommandError;

#[derive(Default)]
pub struct SessionBus {
    conn: Mutex<Option<Connection>>,
}

impl SessionBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<Connection, CommandError> {
        let mut slot = self.conn.lock();
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = Connection::session().map_err(bus_error)?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Proxy for `interface` on `path` of `service`.
    pub fn proxy(
        &self,
        service: &'static str,
        path: &'static str,
        interface: &'static str,
    ) -> Result<Proxy<'static>, CommandError> {
        let conn = self.connection()?;
        Proxy::new(&conn, service, path, interface).map_err(bus_error)
    }

    /// Proxy for an object whose path is only known at run time.
    pub fn proxy_at(
        &self,
        service: &'static str,
        path: String,
        interface: &'static str,
    ) -> Result<Proxy<'static>, CommandError> {
        let conn = self.connection()?;
        Proxy::new(&conn, service, path, interface).map_err(bus_error)
    }

    /// Drop the cached connection so the next call reconnects.
    pub fn reset(&self) {
        self.conn.lock().take();
    }
}

pub fn bus_error(err: zbus::Error) -> CommandError {
    CommandError::failed(format!("D-Bus: {err}"))
}
