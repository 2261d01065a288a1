//! Text and key-combo injection on top of a session [`Connection`].
//!
//! An [`InputHandle`] owns exactly one connection behind a mutex, so two
//! threads sharing a handle never interleave primitive events; each call's
//! sequence is atomic with respect to other calls on the same handle.
//!
//! Calls block for the cumulative delay.  A transport failure stops the
//! current call immediately; keys already pressed are not rolled back.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::errors::{ConnectError, InjectionError};
use crate::keymap::{char_keystroke, KeyCombo, KeyEvent, Keystroke};
use crate::session::{connector_for, Connection, ConnectionState, Connector};

/// Longest text a single `type_text` call accepts, in characters.
pub const MAX_TEXT_LENGTH: usize = 10_000;

/// Pause between successive event groups.  Zero means "as fast as the
/// transport allows", never "skip the event".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EventTiming(Duration);

impl EventTiming {
    pub const IMMEDIATE: EventTiming = EventTiming(Duration::ZERO);

    pub fn from_micros(us: u64) -> Self {
        EventTiming(Duration::from_micros(us))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    fn pause(&self) {
        if !self.0.is_zero() {
            thread::sleep(self.0);
        }
    }
}

struct Inner {
    conn: Box<dyn Connection>,
    closed: bool,
}

impl Inner {
    fn ready(&mut self) -> Result<&mut Box<dyn Connection>, InjectionError> {
        if self.closed || self.conn.state() != ConnectionState::Ready {
            return Err(InjectionError::NotConnected);
        }
        Ok(&mut self.conn)
    }
}

/// One live connection to the compositor's injection facility.
///
/// Only ever handed out fully connected; after [`close`](Self::close) (or
/// a transport failure) every call reports `NotConnected`.
pub struct InputHandle {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for InputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputHandle")
            .field("state", &self.state())
            .finish()
    }
}

impl InputHandle {
    /// Connect with the backend selected by `config`.
    pub fn open(config: &Config) -> Result<Self, ConnectError> {
        Self::open_with(connector_for(config).as_ref())
    }

    pub fn open_with(connector: &dyn Connector) -> Result<Self, ConnectError> {
        let conn = connector.connect()?;
        log::info!("input handle opened ({})", conn.state());
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                closed: false,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        let inner = self.inner.lock();
        if inner.closed {
            ConnectionState::Closed
        } else {
            inner.conn.state()
        }
    }

    /// Type `text` into the focused window.
    ///
    /// Every character is resolved before the first event is sent, so an
    /// untypeable character or text over [`MAX_TEXT_LENGTH`] fails the call
    /// without side effects.  Returns the number of characters typed.
    pub fn type_text(&self, text: &str, timing: EventTiming) -> Result<usize, InjectionError> {
        let len = text.chars().count();
        if len > MAX_TEXT_LENGTH {
            return Err(InjectionError::TextTooLong {
                len,
                max: MAX_TEXT_LENGTH,
            });
        }
        let strokes = resolve_text(text)?;
        if strokes.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.lock();
        let conn = inner.ready()?;
        log::debug!("typing {} characters", strokes.len());

        for (i, stroke) in strokes.iter().enumerate() {
            if i > 0 {
                timing.pause();
            }
            emit_all(conn, &stroke.events())?;
        }
        Ok(strokes.len())
    }

    /// Send a key combo such as `ctrl+v` or `enter`.
    ///
    /// Modifiers go down in canonical order, then the base key; `timing`
    /// separates the press group from the release group, which lets go of
    /// the base key first and the modifiers in reverse.
    pub fn send_key(&self, combo: &str, timing: EventTiming) -> Result<(), InjectionError> {
        let parsed: KeyCombo = combo.parse().map_err(|source| InjectionError::Parse {
            combo: combo.to_owned(),
            source,
        })?;

        let mut inner = self.inner.lock();
        let conn = inner.ready()?;
        log::debug!("sending combo {combo}");

        emit_all(conn, &parsed.press_events())?;
        timing.pause();
        emit_all(conn, &parsed.release_events())
    }

    /// Release the connection.  Safe to call more than once.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.conn.close();
            inner.closed = true;
            log::info!("input handle closed");
        }
    }
}

impl Drop for InputHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn emit_all(conn: &mut Box<dyn Connection>, events: &[KeyEvent]) -> Result<(), InjectionError> {
    for &event in events {
        conn.emit(event)?;
    }
    Ok(())
}

fn resolve_text(text: &str) -> Result<Vec<Keystroke>, InjectionError> {
    let mut strokes = Vec::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        // CRLF types a single Enter
        if ch == '\r' {
            if chars.peek() != Some(&'\n') {
                strokes.push(char_keystroke('\n').ok_or(InjectionError::Unmappable(ch))?);
            }
            continue;
        }
        strokes.push(char_keystroke(ch).ok_or(InjectionError::Unmappable(ch))?);
    }
    Ok(strokes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{KEY_ENTER, KEY_LEFTCTRL, KEY_LEFTSHIFT};
    use crate::session::dry_run::DryRunConnector;
    use std::sync::Arc;

    fn open(connector: &DryRunConnector) -> InputHandle {
        InputHandle::open_with(connector).unwrap()
    }

    #[test]
    fn test_empty_text_is_noop() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        assert_eq!(handle.type_text("", EventTiming::from_micros(50_000)).unwrap(), 0);
        assert!(connector.log().is_empty());
    }

    #[test]
    fn test_type_text_event_sequence() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        assert_eq!(handle.type_text("hI", EventTiming::IMMEDIATE).unwrap(), 2);
        assert_eq!(
            connector.log().events(),
            vec![
                KeyEvent::press(35),
                KeyEvent::release(35),
                KeyEvent::press(KEY_LEFTSHIFT),
                KeyEvent::press(23),
                KeyEvent::release(23),
                KeyEvent::release(KEY_LEFTSHIFT),
            ]
        );
    }

    #[test]
    fn test_type_text_delay_between_characters() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        handle.type_text("ab", EventTiming::from_micros(20_000)).unwrap();
        let records = connector.log().records();
        // a-release -> b-press straddles the pause
        assert!(records[2].at.duration_since(records[1].at) >= Duration::from_millis(20));
    }

    #[test]
    fn test_crlf_types_single_enter() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        handle.type_text("\r\n", EventTiming::IMMEDIATE).unwrap();
        assert_eq!(
            connector.log().events(),
            vec![KeyEvent::press(KEY_ENTER), KeyEvent::release(KEY_ENTER)]
        );
    }

    #[test]
    fn test_unmappable_character_sends_nothing() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        let err = handle.type_text("abc\u{00e9}", EventTiming::IMMEDIATE).unwrap_err();
        assert!(matches!(err, InjectionError::Unmappable('\u{00e9}')));
        assert!(connector.log().is_empty());
    }

    #[test]
    fn test_send_key_order_and_timing() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        handle
            .send_key("ctrl+v", EventTiming::from_micros(30_000))
            .unwrap();
        let records = connector.log().records();
        let events: Vec<KeyEvent> = records.iter().map(|r| r.event).collect();
        assert_eq!(
            events,
            vec![
                KeyEvent::press(KEY_LEFTCTRL),
                KeyEvent::press(47),
                KeyEvent::release(47),
                KeyEvent::release(KEY_LEFTCTRL),
            ]
        );
        assert!(records[2].at.duration_since(records[1].at) >= Duration::from_millis(30));
    }

    #[test]
    fn test_send_key_parse_error_is_distinct() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);
        let err = handle.send_key("ctrl+nope", EventTiming::IMMEDIATE).unwrap_err();
        assert!(matches!(err, InjectionError::Parse { ref combo, .. } if combo == "ctrl+nope"));
        assert!(connector.log().is_empty());
    }

    #[test]
    fn test_transport_failure_stops_sequence() {
        let connector = DryRunConnector::new().reject_after(3);
        let handle = open(&connector);
        let err = handle.type_text("abc", EventTiming::IMMEDIATE).unwrap_err();
        assert!(matches!(err, InjectionError::Transport(_)));
        assert_eq!(connector.log().len(), 3);
        assert_eq!(handle.state(), ConnectionState::Failed);

        let err = handle.send_key("enter", EventTiming::IMMEDIATE).unwrap_err();
        assert!(matches!(err, InjectionError::NotConnected));
    }

    #[test]
    fn test_closed_handle_not_connected() {
        let handle = open(&DryRunConnector::new());
        handle.close();
        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(matches!(
            handle.type_text("a", EventTiming::IMMEDIATE),
            Err(InjectionError::NotConnected)
        ));
    }

    #[test]
    fn test_open_failure_yields_no_handle() {
        let err = InputHandle::open_with(&DryRunConnector::new().refusing()).unwrap_err();
        assert!(matches!(err, ConnectError::Unavailable(_)));
    }

    #[test]
    fn test_concurrent_calls_do_not_interleave() {
        use rayon::prelude::*;

        let connector = DryRunConnector::new();
        let handle = Arc::new(open(&connector));
        (0..16).into_par_iter().for_each(|i| {
            let text = if i % 2 == 0 { "aaaa" } else { "BBBB" };
            handle.type_text(text, EventTiming::IMMEDIATE).unwrap();
        });

        // Every call is a contiguous block of 8 (lowercase) or 16 (shifted) events
        let events = connector.log().events();
        let mut pos = 0;
        while pos < events.len() {
            let len = if events[pos].code == KEY_LEFTSHIFT { 16 } else { 8 };
            let block = &events[pos..pos + len];
            let first = block[0];
            assert!(block.chunks(len / 4).all(|group| group[0] == first));
            pos += len;
        }
        assert_eq!(pos, events.len());
        assert_eq!(pos, 8 * 8 + 8 * 16);
    }

    #[test]
    fn test_text_length_cap() {
        let connector = DryRunConnector::new();
        let handle = open(&connector);

        let too_long = "a".repeat(MAX_TEXT_LENGTH + 1);
        let err = handle
            .type_text(&too_long, EventTiming::IMMEDIATE)
            .unwrap_err();
        assert!(matches!(
            err,
            InjectionError::TextTooLong { len, max } if len == max + 1 && max == MAX_TEXT_LENGTH
        ));
        assert!(connector.log().is_empty());
        assert_eq!(handle.state(), ConnectionState::Ready);

        // Counted in characters, not bytes
        let wide = "é".repeat(MAX_TEXT_LENGTH);
        assert!(!matches!(
            handle.type_text(&wide, EventTiming::IMMEDIATE),
            Err(InjectionError::TextTooLong { .. })
        ));
    }
}
