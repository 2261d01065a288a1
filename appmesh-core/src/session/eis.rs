//! EIS sender client.
//!
//! Negotiates a sender context with an EIS server (KWin, or any libeis
//! implementation), binds the keyboard capability of the first seat that
//! offers it and starts emulating on the first keyboard device the server
//! resumes.
//!
//! A reader thread owns the receiving half of the socket for the whole life
//! of the connection.  It answers `ping`, follows `paused`/`resumed`, and
//! moves the connection to `Failed` on disconnect or EOF.  Requests are
//! written under the same lock that guards the protocol state, so a key
//! event and its frame are never split by a pong.
//!
//! # Protocol subset
//!
//! Requests sent, then events handled, per interface:
//!
//! - `ei_handshake`: handshake_version, context_type, name,
//!   interface_version, finish / handshake_version, connection
//! - `ei_connection`: disconnect / disconnected, seat, ping, invalid_object
//! - `ei_pingpong`: done
//! - `ei_seat`: bind / capability, done, device
//! - `ei_device`: start_emulating, stop_emulating, frame / interface,
//!   resumed, paused, destroyed
//! - `ei_keyboard`: key

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::kwin::{self, EisSocket};
use super::wire::{self, Message, MessageBuilder, WireError};
use super::{Connection, ConnectionState, Connector};
use crate::config::Config;
use crate::errors::{ConnectError, InjectionError};
use crate::keymap::KeyEvent;

const CLIENT_NAME: &str = "appmesh";

const HANDSHAKE_ID: u64 = 0;
const CONTEXT_TYPE_SENDER: u32 = 2;

/// Interfaces announced during the handshake, all at version 1.
const INTERFACES: &[&str] = &[
    "ei_connection",
    "ei_callback",
    "ei_pingpong",
    "ei_seat",
    "ei_device",
    "ei_keyboard",
];

mod op {
    // ei_handshake requests
    pub const HANDSHAKE_VERSION: u32 = 0;
    pub const HANDSHAKE_FINISH: u32 = 1;
    pub const HANDSHAKE_CONTEXT_TYPE: u32 = 2;
    pub const HANDSHAKE_NAME: u32 = 3;
    pub const HANDSHAKE_INTERFACE_VERSION: u32 = 4;
    // ei_handshake events
    pub const EV_HANDSHAKE_VERSION: u32 = 0;
    pub const EV_HANDSHAKE_INTERFACE_VERSION: u32 = 1;
    pub const EV_HANDSHAKE_CONNECTION: u32 = 2;

    pub const CONNECTION_DISCONNECT: u32 = 1;
    pub const EV_CONNECTION_DISCONNECTED: u32 = 0;
    pub const EV_CONNECTION_SEAT: u32 = 1;
    pub const EV_CONNECTION_INVALID_OBJECT: u32 = 2;
    pub const EV_CONNECTION_PING: u32 = 3;

    pub const PINGPONG_DONE: u32 = 0;

    pub const SEAT_BIND: u32 = 1;
    pub const EV_SEAT_DESTROYED: u32 = 0;
    pub const EV_SEAT_CAPABILITY: u32 = 2;
    pub const EV_SEAT_DONE: u32 = 3;
    pub const EV_SEAT_DEVICE: u32 = 4;

    pub const DEVICE_START_EMULATING: u32 = 1;
    pub const DEVICE_STOP_EMULATING: u32 = 2;
    pub const DEVICE_FRAME: u32 = 3;
    pub const EV_DEVICE_DESTROYED: u32 = 0;
    pub const EV_DEVICE_INTERFACE: u32 = 5;
    pub const EV_DEVICE_RESUMED: u32 = 7;
    pub const EV_DEVICE_PAUSED: u32 = 8;

    pub const KEYBOARD_KEY: u32 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Iface {
    Connection,
    Seat,
    Device,
    Keyboard,
}

/// Protocol state shared between the caller and the reader thread.
struct Session {
    writer: UnixStream,
    state: ConnectionState,
    failure: Option<String>,
    objects: HashMap<u64, Iface>,
    /// Keyboard capability mask advertised per seat.
    keyboard_caps: HashMap<u64, u64>,
    bound_seat: Option<u64>,
    /// Keyboard interface object announced per device.
    device_keyboards: HashMap<u64, u64>,
    /// (device, keyboard) in use once a device has been resumed.
    active: Option<(u64, u64)>,
    emulating: bool,
    last_serial: u32,
    sequence: u32,
}

impl Session {
    fn send(&mut self, msg: MessageBuilder) -> io::Result<()> {
        self.writer.write_all(&msg.finish())
    }

    fn fail(&mut self, reason: String) {
        if matches!(self.state, ConnectionState::Closed | ConnectionState::Failed) {
            return;
        }
        log::warn!("EIS connection failed: {reason}");
        self.state = ConnectionState::Failed;
        self.failure = Some(reason);
        self.emulating = false;
    }

    fn handle(&mut self, msg: &Message) -> Result<(), String> {
        if msg.object_id == HANDSHAKE_ID {
            return self.on_handshake(msg).map_err(|e| e.to_string());
        }
        match self.objects.get(&msg.object_id).copied() {
            Some(Iface::Connection) => self.on_connection(msg).map_err(|e| e.to_string()),
            Some(Iface::Seat) => self.on_seat(msg).map_err(|e| e.to_string()),
            Some(Iface::Device) => self.on_device(msg).map_err(|e| e.to_string()),
            Some(Iface::Keyboard) => Ok(()),
            // Callbacks, pingpongs and interfaces we never bound
            None => {
                log::trace!("EIS event {} for untracked object {:#x}", msg.opcode, msg.object_id);
                Ok(())
            }
        }
    }

    fn on_handshake(&mut self, msg: &Message) -> Result<(), HandlerError> {
        let mut args = msg.args();
        match msg.opcode {
            op::EV_HANDSHAKE_VERSION => {
                let server_version = args.u32()?;
                log::debug!("EIS handshake, server version {server_version}");
                self.send(MessageBuilder::new(HANDSHAKE_ID, op::HANDSHAKE_VERSION).u32(1))?;
                self.send(
                    MessageBuilder::new(HANDSHAKE_ID, op::HANDSHAKE_CONTEXT_TYPE)
                        .u32(CONTEXT_TYPE_SENDER),
                )?;
                self.send(
                    MessageBuilder::new(HANDSHAKE_ID, op::HANDSHAKE_NAME).string(CLIENT_NAME),
                )?;
                for name in INTERFACES {
                    self.send(
                        MessageBuilder::new(HANDSHAKE_ID, op::HANDSHAKE_INTERFACE_VERSION)
                            .string(name)
                            .u32(1),
                    )?;
                }
                self.send(MessageBuilder::new(HANDSHAKE_ID, op::HANDSHAKE_FINISH))?;
            }
            op::EV_HANDSHAKE_INTERFACE_VERSION => {
                let name = args.string()?.unwrap_or_default();
                let version = args.u32()?;
                log::trace!("EIS server supports {name} v{version}");
            }
            op::EV_HANDSHAKE_CONNECTION => {
                self.last_serial = args.u32()?;
                let id = args.u64()?;
                self.objects.insert(id, Iface::Connection);
                log::debug!("EIS connection object {id:#x}");
            }
            other => log::trace!("ignoring handshake event {other}"),
        }
        Ok(())
    }

    fn on_connection(&mut self, msg: &Message) -> Result<(), HandlerError> {
        let mut args = msg.args();
        match msg.opcode {
            op::EV_CONNECTION_DISCONNECTED => {
                self.last_serial = args.u32()?;
                let reason = args.u32()?;
                let explanation = args.string()?.unwrap_or_default();
                return Err(HandlerError::Fatal(format!(
                    "server disconnected (reason {reason}): {explanation}"
                )));
            }
            op::EV_CONNECTION_SEAT => {
                let id = args.u64()?;
                self.objects.insert(id, Iface::Seat);
            }
            op::EV_CONNECTION_INVALID_OBJECT => {
                self.last_serial = args.u32()?;
                let id = args.u64()?;
                log::warn!("EIS server reports invalid object {id:#x}");
            }
            op::EV_CONNECTION_PING => {
                let id = args.u64()?;
                self.send(MessageBuilder::new(id, op::PINGPONG_DONE).u64(0))?;
            }
            other => log::trace!("ignoring connection event {other}"),
        }
        Ok(())
    }

    fn on_seat(&mut self, msg: &Message) -> Result<(), HandlerError> {
        let seat = msg.object_id;
        let mut args = msg.args();
        match msg.opcode {
            op::EV_SEAT_CAPABILITY => {
                let mask = args.u64()?;
                let interface = args.string()?.unwrap_or_default();
                if interface == "ei_keyboard" {
                    self.keyboard_caps.insert(seat, mask);
                }
            }
            op::EV_SEAT_DONE => {
                // Only one seat is bound; further seats are ignored
                match self.keyboard_caps.get(&seat).copied() {
                    Some(mask) if self.bound_seat.is_none() => {
                        log::debug!("binding keyboard on seat {seat:#x}");
                        self.send(MessageBuilder::new(seat, op::SEAT_BIND).u64(mask))?;
                        self.bound_seat = Some(seat);
                    }
                    Some(_) => {}
                    None => log::debug!("seat {seat:#x} has no keyboard capability"),
                }
            }
            op::EV_SEAT_DEVICE => {
                let id = args.u64()?;
                self.objects.insert(id, Iface::Device);
            }
            op::EV_SEAT_DESTROYED => {
                self.last_serial = args.u32()?;
                self.objects.remove(&seat);
            }
            _ => {}
        }
        Ok(())
    }

    fn on_device(&mut self, msg: &Message) -> Result<(), HandlerError> {
        let device = msg.object_id;
        let mut args = msg.args();
        match msg.opcode {
            op::EV_DEVICE_INTERFACE => {
                let id = args.u64()?;
                let interface = args.string()?.unwrap_or_default();
                if interface == "ei_keyboard" {
                    self.objects.insert(id, Iface::Keyboard);
                    self.device_keyboards.insert(device, id);
                }
            }
            op::EV_DEVICE_RESUMED => {
                self.last_serial = args.u32()?;
                if self.active.is_none() {
                    if let Some(&keyboard) = self.device_keyboards.get(&device) {
                        self.active = Some((device, keyboard));
                    }
                }
                if self.active.map(|(d, _)| d) == Some(device) {
                    self.sequence = self.sequence.wrapping_add(1);
                    self.send(
                        MessageBuilder::new(device, op::DEVICE_START_EMULATING)
                            .u32(self.last_serial)
                            .u32(self.sequence),
                    )?;
                    self.emulating = true;
                    if self.state == ConnectionState::Connecting {
                        log::info!("EIS keyboard ready (device {device:#x})");
                        self.state = ConnectionState::Ready;
                    }
                }
            }
            op::EV_DEVICE_PAUSED => {
                self.last_serial = args.u32()?;
                if self.active.map(|(d, _)| d) == Some(device) {
                    log::info!("EIS keyboard paused by server");
                    self.emulating = false;
                }
            }
            op::EV_DEVICE_DESTROYED => {
                self.last_serial = args.u32()?;
                self.objects.remove(&device);
                if let Some(keyboard) = self.device_keyboards.remove(&device) {
                    self.objects.remove(&keyboard);
                }
                if self.active.map(|(d, _)| d) == Some(device) {
                    return Err(HandlerError::Fatal("keyboard device removed".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug)]
enum HandlerError {
    Wire(WireError),
    Io(io::Error),
    Fatal(String),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Wire(e) => write!(f, "malformed event: {e}"),
            HandlerError::Io(e) => write!(f, "write failed: {e}"),
            HandlerError::Fatal(msg) => f.write_str(msg),
        }
    }
}

impl From<WireError> for HandlerError {
    fn from(err: WireError) -> Self {
        HandlerError::Wire(err)
    }
}

impl From<io::Error> for HandlerError {
    fn from(err: io::Error) -> Self {
        HandlerError::Io(err)
    }
}

struct Shared {
    session: Mutex<Session>,
    changed: Condvar,
}

fn reader_loop(mut stream: UnixStream, shared: Arc<Shared>) {
    loop {
        let result = wire::read_message(&mut stream);
        let mut session = shared.session.lock();
        match result {
            Ok(msg) => {
                if let Err(reason) = session.handle(&msg) {
                    session.fail(reason);
                    shared.changed.notify_all();
                    break;
                }
                if session.state != ConnectionState::Connecting {
                    shared.changed.notify_all();
                }
            }
            Err(e) => {
                if session.state != ConnectionState::Closed {
                    session.fail(format!("read failed: {e}"));
                }
                shared.changed.notify_all();
                break;
            }
        }
    }
    log::debug!("EIS reader thread exiting");
}

/// CLOCK_MONOTONIC in microseconds, the timestamp domain of `ei_device.frame`.
fn monotonic_us() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return 0;
    }
    (ts.tv_sec as u64) * 1_000_000 + (ts.tv_nsec as u64) / 1_000
}

pub struct EisConnection {
    shared: Arc<Shared>,
    stream: UnixStream,
    reader: Option<JoinHandle<()>>,
    _keepalive: Option<zbus::blocking::Connection>,
}

impl EisConnection {
    /// Run the handshake on `socket` and wait until a keyboard is usable.
    pub fn establish(socket: EisSocket, config: &Config) -> Result<Self, ConnectError> {
        let EisSocket { stream, keepalive } = socket;
        let writer = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;

        let shared = Arc::new(Shared {
            session: Mutex::new(Session {
                writer,
                state: ConnectionState::Connecting,
                failure: None,
                objects: HashMap::new(),
                keyboard_caps: HashMap::new(),
                bound_seat: None,
                device_keyboards: HashMap::new(),
                active: None,
                emulating: false,
                last_serial: 0,
                sequence: 0,
            }),
            changed: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let reader = std::thread::Builder::new()
            .name("appmesh-eis".into())
            .spawn(move || reader_loop(reader_stream, thread_shared))?;

        let mut conn = EisConnection {
            shared,
            stream,
            reader: Some(reader),
            _keepalive: keepalive,
        };

        let deadline = Instant::now() + config.eis_timeout;
        let outcome = {
            let mut session = conn.shared.session.lock();
            while session.state == ConnectionState::Connecting {
                if conn.shared.changed.wait_until(&mut session, deadline).timed_out() {
                    break;
                }
            }
            match session.state {
                ConnectionState::Ready => Ok(()),
                ConnectionState::Connecting => Err(ConnectError::Timeout(
                    config.eis_timeout.as_millis() as u64,
                )),
                _ => Err(ConnectError::Protocol(
                    session
                        .failure
                        .clone()
                        .unwrap_or_else(|| "negotiation failed".into()),
                )),
            }
        };

        match outcome {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }
}

impl Connection for EisConnection {
    fn emit(&mut self, event: KeyEvent) -> Result<(), InjectionError> {
        let mut session = self.shared.session.lock();
        if session.state != ConnectionState::Ready {
            return Err(InjectionError::NotConnected);
        }
        let Some((device, keyboard)) = session.active else {
            return Err(InjectionError::NotConnected);
        };
        if !session.emulating {
            return Err(InjectionError::Transport(
                "keyboard paused by compositor".into(),
            ));
        }

        let serial = session.last_serial;
        let result = session
            .send(
                MessageBuilder::new(keyboard, op::KEYBOARD_KEY)
                    .u32(event.code)
                    .u32(event.state.wire()),
            )
            .and_then(|()| {
                session.send(
                    MessageBuilder::new(device, op::DEVICE_FRAME)
                        .u32(serial)
                        .u64(monotonic_us()),
                )
            });

        result.map_err(|e| {
            session.fail(format!("write failed: {e}"));
            InjectionError::Transport(e.to_string())
        })
    }

    fn state(&self) -> ConnectionState {
        self.shared.session.lock().state
    }

    fn close(&mut self) {
        {
            let mut session = self.shared.session.lock();
            if session.state == ConnectionState::Closed {
                return;
            }
            if session.state == ConnectionState::Ready {
                if let Some((device, _)) = session.active {
                    if session.emulating {
                        let serial = session.last_serial;
                        let _ = session.send(
                            MessageBuilder::new(device, op::DEVICE_STOP_EMULATING).u32(serial),
                        );
                    }
                }
                let connection = session
                    .objects
                    .iter()
                    .find(|(_, iface)| **iface == Iface::Connection)
                    .map(|(id, _)| *id);
                if let Some(id) = connection {
                    let _ = session.send(MessageBuilder::new(id, op::CONNECTION_DISCONNECT));
                }
            }
            session.state = ConnectionState::Closed;
            session.emulating = false;
        }
        self.shared.changed.notify_all();

        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        log::debug!("EIS connection closed");
    }
}

impl Drop for EisConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector for the real compositor.
pub struct EisConnector {
    config: Config,
}

impl EisConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for EisConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, ConnectError> {
        let socket = match &self.config.eis_socket {
            Some(path) => kwin::connect_socket(path)?,
            None => kwin::request_from_kwin()?,
        };
        let conn = EisConnection::establish(socket, &self.config)?;
        Ok(Box::new(conn))
    }
}
