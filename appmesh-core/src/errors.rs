//! Error types for `appmesh`.
//!
//! Each boundary of the core has its own `thiserror` enum so callers can tell
//! "your request was malformed" apart from "the transport failed".
//! [`AppMeshError`] unifies them for front-ends that only need a message.

use thiserror::Error;

/// Failure to establish a session with the remote-input facility.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No compositor endpoint could be reached (no session bus, no socket).
    #[error("remote input unavailable: {0}")]
    Unavailable(String),

    /// The compositor refused the request.
    #[error("remote input access denied: {0}")]
    AccessDenied(String),

    /// Negotiation did not reach the ready state in time.
    #[error("remote input negotiation timed out after {0} ms")]
    Timeout(u64),

    /// The peer violated the protocol or disconnected during negotiation.
    #[error("remote input protocol error: {0}")]
    Protocol(String),

    #[error("remote input I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A key name inside a combo string could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("empty key combo")]
    Empty,

    #[error("unknown key name '{0}'")]
    UnknownKey(String),

    #[error("combo has more than one base key: '{0}' and '{1}'")]
    MultipleBaseKeys(String, String),

    #[error("combo names {count} keys, at most {max} allowed")]
    TooManyKeys { count: usize, max: usize },
}

/// Failure of a text or key-combo injection call.
#[derive(Debug, Error)]
pub enum InjectionError {
    /// The underlying connection has failed or was closed.
    #[error("input handle is not connected")]
    NotConnected,

    #[error("invalid key combo '{combo}': {source}")]
    Parse {
        combo: String,
        #[source]
        source: KeyParseError,
    },

    #[error("text is {len} characters, at most {max} allowed")]
    TextTooLong { len: usize, max: usize },

    /// A code point has no key sequence in the active layout.
    #[error("character {0:?} cannot be typed with the active keymap")]
    Unmappable(char),

    /// The transport rejected an event mid-sequence.
    #[error("injection failed: {0}")]
    Transport(String),
}

/// Misuse of an opaque handle at the ABI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("null handle")]
    Null,

    /// The slot was freed (or reused) since the handle was issued.
    #[error("stale handle (already freed)")]
    Stale,

    /// The value was never issued by this table.
    #[error("invalid handle")]
    Invalid,
}

/// Port registry and dispatch failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("unknown port: {0}")]
    UnknownPort(String),

    #[error("port already registered: {0}")]
    AlreadyRegistered(String),

    #[error("duplicate command '{command}' on port '{port}'")]
    DuplicateCommand { port: String, command: String },

    #[error("unknown command '{command}' on port '{port}'")]
    UnknownCommand { port: String, command: String },

    #[error("invalid arguments JSON: {0}")]
    MalformedArguments(String),
}

/// Error raised by a command handler, reported to the caller as
/// `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("invalid arguments for '{command}': {detail}")]
    InvalidArguments { command: String, detail: String },

    #[error("{0}")]
    Failed(String),
}

impl CommandError {
    pub fn failed(msg: impl Into<String>) -> Self {
        CommandError::Failed(msg.into())
    }
}

impl From<InjectionError> for CommandError {
    fn from(err: InjectionError) -> Self {
        CommandError::Failed(err.to_string())
    }
}

/// Invalid configuration value in the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}' ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level error type for front-ends that only need one error channel.
#[derive(Debug, Error)]
pub enum AppMeshError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_keeps_combo_and_cause() {
        let err = InjectionError::Parse {
            combo: "ctrl+bogus".into(),
            source: KeyParseError::UnknownKey("bogus".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("ctrl+bogus"));
        assert!(msg.contains("bogus"));
    }

    #[test]
    fn test_injection_error_becomes_command_failure() {
        let err: CommandError = InjectionError::NotConnected.into();
        assert_eq!(err, CommandError::Failed("input handle is not connected".into()));
    }

    #[test]
    fn test_app_error_is_transparent() {
        let err: AppMeshError = PortError::UnknownPort("mail".into()).into();
        assert_eq!(err.to_string(), "unknown port: mail");
    }
}
