//! JSON boundary of the port system.
//!
//! Success is an arbitrary JSON object, failure is `{"error": "<message>"}`.
//! A result is never both: a handler object that itself carries an `error`
//! key is reported as a failure.

use std::panic::{self, AssertUnwindSafe};

use serde_json::{Map, Value};

use super::{CommandContext, PortHandle};
use crate::errors::{CommandError, PortError};

const ERROR_KEY: &str = "error";
const RESULT_KEY: &str = "result";

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Success(Map<String, Value>),
    Failure(String),
}

impl DispatchResult {
    pub fn failure(msg: impl Into<String>) -> Self {
        DispatchResult::Failure(msg.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Success(_))
    }

    pub fn into_value(self) -> Value {
        match self {
            DispatchResult::Success(map) => Value::Object(map),
            DispatchResult::Failure(msg) => error_value(&msg),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            DispatchResult::Success(map) => serde_json::to_string(map),
            DispatchResult::Failure(msg) => serde_json::to_string(&error_value(msg)),
        }
    }
}

impl From<PortError> for DispatchResult {
    fn from(err: PortError) -> Self {
        DispatchResult::Failure(err.to_string())
    }
}

impl From<CommandError> for DispatchResult {
    fn from(err: CommandError) -> Self {
        DispatchResult::Failure(err.to_string())
    }
}

/// `{"error": msg}`
pub fn error_value(msg: &str) -> Value {
    let mut map = Map::new();
    map.insert(ERROR_KEY.to_owned(), Value::String(msg.to_owned()));
    Value::Object(map)
}

/// Parse the argument string of a call.  Absent, blank, and `null`
/// arguments are an empty object; anything else must be an object.
pub fn parse_args(args_json: Option<&str>) -> Result<Value, PortError> {
    let text = match args_json.map(str::trim) {
        None | Some("") => return Ok(Value::Object(Map::new())),
        Some(text) => text,
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => Ok(Value::Object(Map::new())),
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(PortError::MalformedArguments(
            "expected a JSON object".to_owned(),
        )),
        Err(e) => Err(PortError::MalformedArguments(e.to_string())),
    }
}

pub fn execute(handle: &PortHandle, command: &str, args_json: Option<&str>) -> DispatchResult {
    match parse_args(args_json) {
        Ok(args) => execute_value(handle, command, args),
        Err(err) => {
            log::warn!("{}.{command}: {err}", handle.name());
            err.into()
        }
    }
}

/// Execute with already-parsed arguments.
pub fn execute_value(handle: &PortHandle, command: &str, args: Value) -> DispatchResult {
    let port = handle.name();
    let Some(cmd) = handle.table().get(command) else {
        log::warn!("unknown command '{command}' on port '{port}'");
        return PortError::UnknownCommand {
            port: port.to_owned(),
            command: command.to_owned(),
        }
        .into();
    };

    let call = handle.session().record_call();
    log::debug!("{port}.{command} (session {}, call {call})", handle.session().id());

    let ctx = CommandContext {
        port,
        command,
        session: handle.session(),
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| cmd.invoke(&ctx, args)));

    match outcome {
        Ok(Ok(Value::Object(map))) if map.contains_key(ERROR_KEY) => {
            let msg = match map.get(ERROR_KEY) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            DispatchResult::Failure(msg)
        }
        Ok(Ok(Value::Object(map))) => DispatchResult::Success(map),
        Ok(Ok(other)) => {
            let mut map = Map::new();
            map.insert(RESULT_KEY.to_owned(), other);
            DispatchResult::Success(map)
        }
        Ok(Err(err)) => {
            log::warn!("{port}.{command} failed: {err}");
            err.into()
        }
        Err(_) => {
            log::error!("{port}.{command} panicked");
            DispatchResult::failure(format!("command '{command}' panicked"))
        }
    }
}
