//! `windows` port: window listing and activation through KWin scripts.
//!
//! KWin only runs scripts from files, and a script cannot return a value
//! over `/Scripting`. `list` therefore has the script push its result into
//! Klipper, reads it back and restores the previous clipboard contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::bus::{bus_error, SessionBus};
use super::{clipboard, scratch_dir};
use crate::errors::{CommandError, PortError};
use crate::port::{Command, CommandContext, CommandTable, ParamDef};

pub const PORT_NAME: &str = "windows";

const KWIN: &str = "org.kde.KWin";
const SCRIPTING_PATH: &str = "/Scripting";
const SCRIPTING_INTERFACE: &str = "org.kde.kwin.Scripting";
const SCRIPT_INTERFACE: &str = "org.kde.kwin.Script";

/// How long a loaded script gets before it is stopped.
const SCRIPT_RUN: Duration = Duration::from_millis(150);

/// First line of the listing, so a script that never ran is not read as
/// "no windows".
const LIST_MARKER: &str = "appmesh-windows";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowInfo {
    pub id: String,
    pub app: String,
    pub title: String,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
struct ActivateArgs {
    id: String,
}

#[derive(Debug, Serialize)]
struct ListResult {
    windows: Vec<WindowInfo>,
}

#[derive(Debug, Serialize)]
struct ActivateResult {
    activated: String,
}

/// Script file removed when the run is over, whatever the outcome.
struct ScriptFile(PathBuf);

impl ScriptFile {
    fn write(dir: &Path, source: &str) -> Result<Self, CommandError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let path = dir.join(format!("kwin_{}_{nanos}.js", std::process::id()));
        std::fs::write(&path, source)
            .map_err(|e| CommandError::failed(format!("writing {}: {e}", path.display())))?;
        Ok(ScriptFile(path))
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            log::debug!("could not remove {}: {e}", self.0.display());
        }
    }
}

fn call_failed(bus: &SessionBus) -> impl FnOnce(zbus::Error) -> CommandError + '_ {
    move |e| {
        bus.reset();
        bus_error(e)
    }
}

/// Load `source` into KWin, let it run briefly, then stop it.
fn run_script(bus: &SessionBus, source: &str) -> Result<(), CommandError> {
    let file = ScriptFile::write(&scratch_dir()?, source)?;
    let path = file.0.display().to_string();

    let scripting = bus.proxy(KWIN, SCRIPTING_PATH, SCRIPTING_INTERFACE)?;
    let reply = scripting
        .call_method("loadScript", &(path.as_str(),))
        .map_err(call_failed(bus))?;
    let id: i32 = reply.body().deserialize().map_err(bus_error)?;
    if id < 0 {
        return Err(CommandError::failed(format!("KWin refused script {path}")));
    }

    let script = bus.proxy_at(KWIN, format!("{SCRIPTING_PATH}/Script{id}"), SCRIPT_INTERFACE)?;
    script.call_method("run", &()).map_err(call_failed(bus))?;
    std::thread::sleep(SCRIPT_RUN);
    if let Err(e) = script.call_method("stop", &()) {
        log::debug!("stopping KWin script {id}: {e}");
    }
    log::debug!("ran KWin script {id}");
    Ok(())
}

fn list_script() -> String {
    format!(
        r#"const lines = ["{LIST_MARKER}"];
for (const w of workspace.windowList()) {{
    if (!w.caption) continue;
    lines.push([
        w.internalId.toString(),
        w.resourceClass,
        w.active ? "*" : " ",
        w.caption.replace(/[\t\n]/g, " "),
    ].join("\t"));
}}
callDBus("org.kde.klipper", "/klipper", "org.kde.klipper.klipper",
    "setClipboardContents", lines.join("\n"));
"#
    )
}

fn activate_script(id: &str) -> Result<String, CommandError> {
    let literal = serde_json::to_string(id).map_err(|e| CommandError::failed(e.to_string()))?;
    Ok(format!(
        r#"const target = workspace.windowList().find(w => w.internalId.toString() === {literal});
if (target) workspace.activeWindow = target;
"#
    ))
}

/// Parse the tab-separated listing written by [`list_script`].
fn parse_window_list(text: &str) -> Result<Vec<WindowInfo>, CommandError> {
    let mut lines = text.lines();
    if lines.next() != Some(LIST_MARKER) {
        return Err(CommandError::failed("KWin did not report the window list"));
    }
    let windows = lines
        .filter_map(|line| {
            let mut fields = line.splitn(4, '\t');
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(id), Some(app), Some(flag), Some(title)) if !id.is_empty() => {
                    Some(WindowInfo {
                        id: id.to_owned(),
                        app: app.to_owned(),
                        title: title.to_owned(),
                        active: flag == "*",
                    })
                }
                _ => {
                    log::debug!("skipping window line {line:?}");
                    None
                }
            }
        })
        .collect();
    Ok(windows)
}

fn list(bus: &SessionBus) -> Result<ListResult, CommandError> {
    let saved = clipboard::get(bus)?;
    let ran = run_script(bus, &list_script());
    let listing = ran.and_then(|()| clipboard::get(bus));
    if let Err(e) = clipboard::set(bus, &saved.text) {
        log::warn!("could not restore the clipboard: {e}");
    }
    let windows = parse_window_list(&listing?.text)?;
    Ok(ListResult { windows })
}

fn activate(bus: &SessionBus, args: ActivateArgs) -> Result<ActivateResult, CommandError> {
    let id = args.id.trim();
    if id.is_empty() {
        return Err(CommandError::InvalidArguments {
            command: "activate".into(),
            detail: "id is empty".into(),
        });
    }
    run_script(bus, &activate_script(id)?)?;
    Ok(ActivateResult {
        activated: id.to_owned(),
    })
}

pub fn windows_port() -> Result<CommandTable, PortError> {
    let bus = Arc::new(SessionBus::new());
    let bus_list = Arc::clone(&bus);
    let bus_activate = bus;

    CommandTable::builder(PORT_NAME)
        .description("Window management through KWin")
        .command(Command::new(
            "list",
            "List windows with a caption",
            move |_ctx: &CommandContext<'_>, _args: NoArgs| list(&bus_list),
        ))
        .command(
            Command::new(
                "activate",
                "Raise and focus a window",
                move |_ctx: &CommandContext<'_>, args: ActivateArgs| activate(&bus_activate, args),
            )
            .param(ParamDef::required("id", "Window id from list")),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_list() {
        let text = "appmesh-windows\n\
                    {a1}\torg.kde.konsole\t*\tShell\n\
                    {b2}\tfirefox\t \tNews\twith tab\n\
                    garbage";
        let windows = parse_window_list(text).unwrap();
        assert_eq!(
            windows,
            vec![
                WindowInfo {
                    id: "{a1}".into(),
                    app: "org.kde.konsole".into(),
                    title: "Shell".into(),
                    active: true,
                },
                WindowInfo {
                    id: "{b2}".into(),
                    app: "firefox".into(),
                    title: "News\twith tab".into(),
                    active: false,
                },
            ]
        );
    }

    #[test]
    fn test_empty_listing_is_not_an_error() {
        assert!(parse_window_list("appmesh-windows").unwrap().is_empty());
    }

    #[test]
    fn test_missing_marker_is_an_error() {
        assert!(parse_window_list("old clipboard text").is_err());
        assert!(parse_window_list("").is_err());
    }

    #[test]
    fn test_activate_script_quotes_id() {
        let script = activate_script(r#"x" || true || ""#).unwrap();
        assert!(script.contains(r#"=== "x\" || true || \"""#));
    }

    #[test]
    fn test_list_script_writes_marker_first() {
        let script = list_script();
        assert!(script.starts_with(r#"const lines = ["appmesh-windows"];"#));
        assert!(script.contains("setClipboardContents"));
    }

    #[test]
    fn test_commands_declared() {
        let table = windows_port().unwrap();
        assert!(table.get("list").is_some());
        let activate = table.get("activate").unwrap().def();
        assert_eq!(activate.params[0].name, "id");
        assert!(activate.params[0].required);
    }
}
