//! Obtaining an EIS socket.
//!
//! Either `LIBEI_SOCKET` names a socket directly, or KWin hands one out over
//! the session bus.  KWin revokes the socket as soon as the requesting D-Bus
//! peer disconnects, so the bus connection travels with the socket.

use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::errors::ConnectError;

const KWIN_SERVICE: &str = "org.kde.KWin";
const KWIN_EIS_PATH: &str = "/org/kde/KWin/EIS/RemoteDesktop";
const KWIN_EIS_INTERFACE: &str = "org.kde.KWin.EIS.RemoteDesktop";

/// KWin rejects requests that do not ask for every capability.
const KWIN_CAP_ALL: i32 = 63;

pub struct EisSocket {
    pub stream: UnixStream,
    /// Held only to keep KWin from revoking the socket.
    pub keepalive: Option<zbus::blocking::Connection>,
}

pub fn connect_socket(path: &Path) -> Result<EisSocket, ConnectError> {
    log::debug!("connecting to EIS socket {}", path.display());
    let stream = UnixStream::connect(path).map_err(|e| {
        ConnectError::Unavailable(format!("EIS socket {}: {e}", path.display()))
    })?;
    Ok(EisSocket {
        stream,
        keepalive: None,
    })
}

/// Ask KWin for an EIS socket via `connectToEIS`.
pub fn request_from_kwin() -> Result<EisSocket, ConnectError> {
    let connection = zbus::blocking::Connection::session().map_err(map_bus_error)?;

    let proxy = zbus::blocking::Proxy::new(
        &connection,
        KWIN_SERVICE,
        KWIN_EIS_PATH,
        KWIN_EIS_INTERFACE,
    )
    .map_err(map_bus_error)?;

    let reply = proxy
        .call_method("connectToEIS", &(KWIN_CAP_ALL,))
        .map_err(map_bus_error)?;
    let body = reply.body();
    let (fd, cookie): (zbus::zvariant::OwnedFd, i32) = body
        .deserialize()
        .map_err(|e| ConnectError::Protocol(format!("connectToEIS reply: {e}")))?;
    log::debug!("KWin granted EIS socket (cookie {cookie})");

    let owned_fd: std::os::fd::OwnedFd = fd.into();
    let stream = UnixStream::from(owned_fd);
    stream.set_nonblocking(false)?;
    Ok(EisSocket {
        stream,
        keepalive: Some(connection),
    })
}

fn map_bus_error(err: zbus::Error) -> ConnectError {
    match err {
        zbus::Error::MethodError(name, detail, _) => {
            let detail = detail.unwrap_or_default();
            if name.as_str().ends_with("AccessDenied") {
                ConnectError::AccessDenied(detail)
            } else {
                ConnectError::Unavailable(format!("{}: {detail}", name.as_str()))
            }
        }
        zbus::Error::FDO(fdo) => match *fdo {
            zbus::fdo::Error::AccessDenied(detail) => ConnectError::AccessDenied(detail),
            other => ConnectError::Unavailable(other.to_string()),
        },
        other => ConnectError::Unavailable(other.to_string()),
    }
}
