//! `notify` port: desktop notifications via `org.freedesktop.Notifications`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zbus::zvariant::Value;

use super::bus::{bus_error, SessionBus};
use crate::errors::{CommandError, PortError};
use crate::port::{args, Command, CommandContext, CommandTable, ParamDef};

pub const PORT_NAME: &str = "notify";

const SERVICE: &str = "org.freedesktop.Notifications";
const PATH: &str = "/org/freedesktop/Notifications";
const INTERFACE: &str = "org.freedesktop.Notifications";
const APP_NAME: &str = "AppMesh";

fn default_icon() -> String {
    "dialog-information".to_owned()
}

fn default_timeout() -> i32 {
    5000
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default = "default_icon")]
    icon: String,
    /// Milliseconds; -1 lets the server decide, 0 never expires.
    #[serde(default = "default_timeout", deserialize_with = "args::number")]
    timeout: i32,
}

#[derive(Debug, Serialize)]
struct SendResult {
    id: u32,
}

fn send(bus: &SessionBus, args: SendArgs) -> Result<SendResult, CommandError> {
    let proxy = bus.proxy(SERVICE, PATH, INTERFACE)?;
    let actions: Vec<&str> = Vec::new();
    let hints: HashMap<&str, Value<'_>> = HashMap::new();

    let reply = proxy
        .call_method(
            "Notify",
            &(
                APP_NAME,
                0u32,
                args.icon.as_str(),
                args.title.as_str(),
                args.body.as_str(),
                actions,
                hints,
                args.timeout,
            ),
        )
        .map_err(|e| {
            bus.reset();
            bus_error(e)
        })?;
    let id: u32 = reply.body().deserialize().map_err(bus_error)?;
    log::debug!("notification {id} sent: {}", args.title);
    Ok(SendResult { id })
}

pub fn notify_port() -> Result<CommandTable, PortError> {
    let bus = Arc::new(SessionBus::new());
    CommandTable::builder(PORT_NAME)
        .description("Desktop notifications")
        .command(
            Command::new(
                "send",
                "Show a desktop notification",
                move |_ctx: &CommandContext<'_>, args: SendArgs| send(&bus, args),
            )
            .param(ParamDef::required("title", "Summary line"))
            .param(ParamDef::optional("body", "Body text"))
            .param(ParamDef::optional("icon", "Icon name"))
            .param(ParamDef::optional("timeout", "Expiry in milliseconds")),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_args_defaults() {
        let args: SendArgs = serde_json::from_value(json!({ "title": "Hi" })).unwrap();
        assert_eq!(args.body, "");
        assert_eq!(args.icon, "dialog-information");
        assert_eq!(args.timeout, 5000);
    }

    #[test]
    fn test_string_timeout_accepted() {
        let args: SendArgs =
            serde_json::from_value(json!({ "title": "Hi", "timeout": "-1" })).unwrap();
        assert_eq!(args.timeout, -1);
    }

    #[test]
    fn test_describe() {
        let desc = notify_port().unwrap().describe();
        assert_eq!(desc.port, "notify");
        assert_eq!(desc.commands[0].name, "send");
        assert_eq!(desc.commands[0].params.len(), 4);
    }
}
