//! `input` port: text and key combos through a port-owned [`InputHandle`].
//!
//! The handle is opened on first use and reopened when the previous one
//! has failed.  Commands on the port are serialized by its lock.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::{CommandError, PortError};
use crate::injector::{EventTiming, InputHandle};
use crate::port::{args, Command, CommandContext, CommandTable, ParamDef};
use crate::session::{ConnectionState, Connector};

pub const PORT_NAME: &str = "input";

struct InputPort {
    connector: Arc<dyn Connector>,
    default_delay_us: u64,
    handle: Mutex<Option<InputHandle>>,
}

impl InputPort {
    fn with_handle<T>(
        &self,
        f: impl FnOnce(&InputHandle) -> Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        let mut slot = self.handle.lock();
        let usable = matches!(slot.as_ref(), Some(h) if h.state() == ConnectionState::Ready);
        if !usable {
            if slot.is_some() {
                log::info!("input port reconnecting");
            }
            let handle = InputHandle::open_with(self.connector.as_ref())
                .map_err(|e| CommandError::failed(e.to_string()))?;
            *slot = Some(handle);
        }
        match slot.as_ref() {
            Some(handle) => f(handle),
            None => Err(CommandError::failed("input handle unavailable")),
        }
    }

    fn timing(&self, delay_us: Option<u64>) -> EventTiming {
        EventTiming::from_micros(delay_us.unwrap_or(self.default_delay_us))
    }
}

#[derive(Debug, Deserialize)]
struct TypeTextArgs {
    text: String,
    #[serde(default, deserialize_with = "args::opt_number")]
    delay_us: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TypeTextResult {
    typed: usize,
}

#[derive(Debug, Deserialize)]
struct SendKeyArgs {
    combo: String,
    #[serde(default, deserialize_with = "args::opt_number")]
    delay_us: Option<u64>,
}

#[derive(Debug, Serialize)]
struct SendKeyResult {
    sent: String,
}

/// Build the `input` port on top of `connector`.
pub fn input_port(
    connector: Arc<dyn Connector>,
    default_delay_us: u64,
) -> Result<CommandTable, PortError> {
    let port = Arc::new(InputPort {
        connector,
        default_delay_us,
        handle: Mutex::new(None),
    });

    let typing = Arc::clone(&port);
    let keys = port;

    CommandTable::builder(PORT_NAME)
        .description("Keyboard input into the focused window")
        .command(
            Command::new(
                "type_text",
                "Type text into the focused window",
                move |_ctx: &CommandContext<'_>, args: TypeTextArgs| {
                    let timing = typing.timing(args.delay_us);
                    let typed = typing.with_handle(|h| Ok(h.type_text(&args.text, timing)?))?;
                    Ok(TypeTextResult { typed })
                },
            )
            .param(ParamDef::required("text", "Text to type"))
            .param(ParamDef::optional("delay_us", "Microseconds between characters")),
        )
        .command(
            Command::new(
                "send_key",
                "Send a key combo such as ctrl+v",
                move |_ctx: &CommandContext<'_>, args: SendKeyArgs| {
                    let timing = keys.timing(args.delay_us);
                    keys.with_handle(|h| Ok(h.send_key(&args.combo, timing)?))?;
                    Ok(SendKeyResult { sent: args.combo })
                },
            )
            .param(ParamDef::required("combo", "Key combo, e.g. ctrl+shift+t"))
            .param(ParamDef::optional("delay_us", "Microseconds between press and release")),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::{KeyEvent, KEY_LEFTCTRL};
    use crate::port::{DispatchResult, PortRegistry};
    use crate::session::dry_run::DryRunConnector;
    use serde_json::json;

    fn registry(connector: DryRunConnector) -> PortRegistry {
        let registry = PortRegistry::new();
        registry
            .register(input_port(Arc::new(connector), 0).unwrap())
            .unwrap();
        registry
    }

    #[test]
    fn test_type_text_command() {
        let connector = DryRunConnector::new();
        let log = connector.log().clone();
        let port = registry(connector).open(PORT_NAME).unwrap();

        let out = port.execute("type_text", Some(r#"{"text": "ab", "delay_us": "0"}"#));
        assert_eq!(out.into_value(), json!({ "typed": 2 }));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_send_key_command() {
        let connector = DryRunConnector::new();
        let log = connector.log().clone();
        let port = registry(connector).open(PORT_NAME).unwrap();

        let out = port.execute("send_key", Some(r#"{"combo": "ctrl+v"}"#));
        assert_eq!(out.into_value(), json!({ "sent": "ctrl+v" }));
        assert_eq!(log.events()[0], KeyEvent::press(KEY_LEFTCTRL));
    }

    #[test]
    fn test_bad_combo_is_error_payload() {
        let port = registry(DryRunConnector::new()).open(PORT_NAME).unwrap();
        match port.execute("send_key", Some(r#"{"combo": "ctrl+nope"}"#)) {
            DispatchResult::Failure(msg) => assert!(msg.contains("ctrl+nope"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_text_is_error_payload() {
        let port = registry(DryRunConnector::new()).open(PORT_NAME).unwrap();
        assert!(!port.execute("type_text", Some("{}")).is_success());
    }

    #[test]
    fn test_reconnects_after_transport_failure() {
        let connector = DryRunConnector::new().reject_after(2);
        let log = connector.log().clone();
        let port = registry(connector).open(PORT_NAME).unwrap();

        assert!(!port.execute("type_text", Some(r#"{"text": "ab"}"#)).is_success());
        assert_eq!(log.len(), 2);

        // Fresh connection, fresh budget of two events
        let out = port.execute("type_text", Some(r#"{"text": "c"}"#));
        assert_eq!(out.into_value(), json!({ "typed": 1 }));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_connect_failure_is_error_payload() {
        let port = registry(DryRunConnector::new().refusing()).open(PORT_NAME).unwrap();
        match port.execute("type_text", Some(r#"{"text": "a"}"#)) {
            DispatchResult::Failure(msg) => assert!(msg.contains("unavailable"), "{msg}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
