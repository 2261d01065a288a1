//! `clipboard` port backed by Klipper.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::bus::{bus_error, SessionBus};
use crate::errors::{CommandError, PortError};
use crate::port::{Command, CommandContext, CommandTable, ParamDef};

pub const PORT_NAME: &str = "clipboard";

const SERVICE: &str = "org.kde.klipper";
const PATH: &str = "/klipper";
const INTERFACE: &str = "org.kde.klipper.klipper";

#[derive(Debug, Deserialize)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
struct SetArgs {
    text: String,
}

#[derive(Debug, Serialize)]
pub(super) struct Contents {
    pub(super) text: String,
}

#[derive(Debug, Serialize)]
pub(super) struct SetResult {
    length: usize,
}

pub(super) fn get(bus: &SessionBus) -> Result<Contents, CommandError> {
    let proxy = bus.proxy(SERVICE, PATH, INTERFACE)?;
    let reply = proxy
        .call_method("getClipboardContents", &())
        .map_err(|e| {
            bus.reset();
            bus_error(e)
        })?;
    let text: String = reply.body().deserialize().map_err(bus_error)?;
    Ok(Contents { text })
}

pub(super) fn set(bus: &SessionBus, text: &str) -> Result<SetResult, CommandError> {
    let proxy = bus.proxy(SERVICE, PATH, INTERFACE)?;
    proxy
        .call_method("setClipboardContents", &(text,))
        .map_err(|e| {
            bus.reset();
            bus_error(e)
        })?;
    log::debug!("clipboard set ({} chars)", text.chars().count());
    Ok(SetResult {
        length: text.chars().count(),
    })
}

pub fn clipboard_port() -> Result<CommandTable, PortError> {
    let bus = Arc::new(SessionBus::new());
    let bus_get = Arc::clone(&bus);
    let bus_set = bus;

    CommandTable::builder(PORT_NAME)
        .description("Clipboard contents")
        .command(Command::new(
            "get",
            "Read the clipboard",
            move |_ctx: &CommandContext<'_>, _args: NoArgs| get(&bus_get),
        ))
        .command(
            Command::new(
                "set",
                "Replace the clipboard",
                move |_ctx: &CommandContext<'_>, args: SetArgs| set(&bus_set, &args.text),
            )
            .param(ParamDef::required("text", "New clipboard text")),
        )
        .build()
}
