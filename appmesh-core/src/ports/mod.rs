//! Built-in ports.
//!
//! | Port | Commands | Backend |
//! |------|----------|---------|
//! | `input` | `type_text`, `send_key` | [`InputHandle`](crate::injector::InputHandle) |
//! | `notify` | `send` | `org.freedesktop.Notifications` |
//! | `clipboard` | `get`, `set` | Klipper |
//! | `screenshot` | `take` | Spectacle |
//! | `windows` | `list`, `activate` | KWin scripting |

#[cfg(target_os = "linux")]
mod bus;
#[cfg(target_os = "linux")]
pub mod clipboard;
pub mod input;
#[cfg(target_os = "linux")]
pub mod notify;
#[cfg(target_os = "linux")]
pub mod screenshot;
#[cfg(target_os = "linux")]
pub mod windows;

use std::sync::Arc;

use crate::config::Config;
#[cfg(target_os = "linux")]
use crate::errors::CommandError;
use crate::errors::PortError;
use crate::port::{CommandTable, PortRegistry};
use crate::session::connector_for;

/// Register every built-in port that is not registered yet.
///
/// Ports the application registered first are left alone.  Returns the
/// names that were installed.
pub fn install_default_ports(
    registry: &PortRegistry,
    config: &Config,
) -> Result<Vec<String>, PortError> {
    let mut tables: Vec<CommandTable> = vec![input::input_port(
        Arc::from(connector_for(config)),
        config.default_delay_us,
    )?];
    #[cfg(target_os = "linux")]
    {
        tables.push(notify::notify_port()?);
        tables.push(clipboard::clipboard_port()?);
        tables.push(screenshot::screenshot_port()?);
        tables.push(windows::windows_port()?);
    }

    let mut installed = Vec::new();
    for table in tables {
        let name = table.name().to_owned();
        match registry.register(table) {
            Ok(()) => installed.push(name),
            Err(PortError::AlreadyRegistered(_)) => {
                log::debug!("port '{name}' already registered, keeping it");
            }
            Err(e) => return Err(e),
        }
    }
    log::info!("installed built-in ports: {}", installed.join(", "));
    Ok(installed)
}

/// `$XDG_RUNTIME_DIR/appmesh`, created on demand.
#[cfg(target_os = "linux")]
fn scratch_dir() -> Result<std::path::PathBuf, CommandError> {
    let base = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => std::path::PathBuf::from(dir),
        // SAFETY: getuid has no preconditions and cannot fail.
        None => format!("/run/user/{}", unsafe { libc::getuid() }).into(),
    };
    let dir = base.join("appmesh");
    std::fs::create_dir_all(&dir)
        .map_err(|e| CommandError::failed(format!("creating {}: {e}", dir.display())))?;
    Ok(dir)
}
