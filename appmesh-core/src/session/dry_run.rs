//! Connector that records events instead of injecting them.
//!
//! Selected with `APPMESH_BACKEND=dry-run`; every test that needs a live
//! handle uses it too.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use super::{Connection, ConnectionState, Connector};
use crate::errors::{ConnectError, InjectionError};
use crate::keymap::KeyEvent;

/// Events kept by a log before the oldest are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: KeyEvent,
    pub at: Instant,
}

#[derive(Debug)]
struct Ring {
    events: VecDeque<RecordedEvent>,
    capacity: usize,
    dropped: u64,
}

/// Shared record of emitted events, bounded to the most recent
/// `capacity` entries.
#[derive(Debug, Clone)]
pub struct EventLog(Arc<Mutex<Ring>>);

static GLOBAL_LOG: OnceLock<EventLog> = OnceLock::new();

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self(Arc::new(Mutex::new(Ring {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            dropped: 0,
        })))
    }

    /// Log shared by every connector built from configuration.
    pub fn global() -> &'static EventLog {
        GLOBAL_LOG.get_or_init(EventLog::new)
    }

    fn push(&self, event: KeyEvent) {
        let mut ring = self.0.lock();
        if ring.events.len() == ring.capacity {
            ring.events.pop_front();
            ring.dropped += 1;
        }
        ring.events.push_back(RecordedEvent {
            event,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        self.0.lock().events.iter().map(|r| r.event).collect()
    }

    pub fn records(&self) -> Vec<RecordedEvent> {
        self.0.lock().events.iter().copied().collect()
    }

    /// Drain the log, returning what it held.
    pub fn take(&self) -> Vec<KeyEvent> {
        self.0.lock().events.drain(..).map(|r| r.event).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.0.lock().capacity
    }

    /// Events pushed out by newer ones since the last `clear`.
    pub fn dropped(&self) -> u64 {
        self.0.lock().dropped
    }

    pub fn clear(&self) {
        let mut ring = self.0.lock();
        ring.events.clear();
        ring.dropped = 0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct DryRunConnector {
    log: EventLog,
    reject_after: Option<usize>,
    refuse: bool,
}

impl DryRunConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Each connection accepts `count` events, then rejects the rest as a
    /// transport failure.
    pub fn reject_after(mut self, count: usize) -> Self {
        self.reject_after = Some(count);
        self
    }

    /// Fail every `connect` as if the compositor were unreachable.
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl Connector for DryRunConnector {
    fn connect(&self) -> Result<Box<dyn Connection>, ConnectError> {
        if self.refuse {
            return Err(ConnectError::Unavailable("dry-run connector refusing".into()));
        }
        log::debug!("dry-run connection opened");
        Ok(Box::new(DryRunConnection {
            log: self.log.clone(),
            remaining: self.reject_after,
            state: ConnectionState::Ready,
        }))
    }
}

pub struct DryRunConnection {
    log: EventLog,
    remaining: Option<usize>,
    state: ConnectionState,
}

impl Connection for DryRunConnection {
    fn emit(&mut self, event: KeyEvent) -> Result<(), InjectionError> {
        if self.state != ConnectionState::Ready {
            return Err(InjectionError::NotConnected);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                self.state = ConnectionState::Failed;
                return Err(InjectionError::Transport(
                    "dry-run transport rejected event".into(),
                ));
            }
            *remaining -= 1;
        }
        log::debug!("dry-run key {} {:?}", event.code, event.state);
        self.log.push(event);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
