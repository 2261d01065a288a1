//! Session connector: the single outbound event stream into the desktop.
//!
//! [`Connector`] hides transport negotiation; the [`Connection`] it returns
//! is a single-owner capability the injector uses to emit primitive key
//! events.  Connectors never retry: a failed `connect` is reported to the
//! caller, who decides whether to open again.
//!
//! | Backend | Transport |
//! |---------|-----------|
//! | [`eis::EisConnector`] | EIS socket from `LIBEI_SOCKET` or KWin's `connectToEIS` D-Bus call |
//! | [`dry_run::DryRunConnector`] | in-memory [`dry_run::EventLog`], nothing reaches the desktop |

pub mod dry_run;
#[cfg(target_os = "linux")]
pub mod eis;
#[cfg(target_os = "linux")]
pub mod kwin;
pub mod wire;

use std::fmt;

use crate::config::{Backend, Config};
use crate::errors::{ConnectError, InjectionError};
use crate::keymap::KeyEvent;

/// Lifecycle of a connection as seen by the injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An established event stream.
///
/// Not `Sync`: callers serialize access (the injector holds it behind a
/// mutex).
pub trait Connection: Send {
    /// Emit one key event and flush it to the compositor as its own frame.
    fn emit(&mut self, event: KeyEvent) -> Result<(), InjectionError>;

    fn state(&self) -> ConnectionState;

    /// Release the session resource.  Idempotent.
    fn close(&mut self);
}

pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, ConnectError>;
}

/// Connector selected by `config.backend`.
pub fn connector_for(config: &Config) -> Box<dyn Connector> {
    match config.backend {
        Backend::DryRun => Box::new(dry_run::DryRunConnector::with_log(
            dry_run::EventLog::global().clone(),
        )),
        #[cfg(target_os = "linux")]
        Backend::Eis => Box::new(eis::EisConnector::new(config.clone())),
        #[cfg(not(target_os = "linux"))]
        Backend::Eis => Box::new(UnsupportedConnector),
    }
}

#[cfg(not(target_os = "linux"))]
struct UnsupportedConnector;

#[cfg(not(target_os = "linux"))]
impl Connector for UnsupportedConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, ConnectError> {
        Err(ConnectError::Unavailable(
            "the EIS backend is only available on Linux".into(),
        ))
    }
}
