//! `screenshot` port: captures through Spectacle in background mode.

use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::scratch_dir;
use crate::errors::{CommandError, PortError};
use crate::port::{Command, CommandContext, CommandTable, ParamDef};

pub const PORT_NAME: &str = "screenshot";

const SPECTACLE: &str = "spectacle";

/// Spectacle returns before the file is flushed.
const SETTLE: Duration = Duration::from_millis(300);

/// What to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Fullscreen,
    ActiveWindow,
    Region,
}

impl CaptureMode {
    fn flag(self) -> &'static str {
        match self {
            CaptureMode::Fullscreen => "-f",
            CaptureMode::ActiveWindow => "-a",
            CaptureMode::Region => "-r",
        }
    }
}

impl FromStr for CaptureMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "fullscreen" | "full" => Ok(CaptureMode::Fullscreen),
            "active" | "window" => Ok(CaptureMode::ActiveWindow),
            "region" => Ok(CaptureMode::Region),
            other => Err(CommandError::InvalidArguments {
                command: "take".into(),
                detail: format!("unknown mode '{other}' (fullscreen, active, region)"),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TakeArgs {
    #[serde(default)]
    mode: String,
}

#[derive(Debug, Serialize)]
struct TakeResult {
    path: String,
}

/// Background, no notification, write to `output`.
fn spectacle_args(mode: CaptureMode, output: &Path) -> Vec<String> {
    vec![
        mode.flag().to_owned(),
        "-b".to_owned(),
        "-n".to_owned(),
        "-o".to_owned(),
        output.display().to_string(),
    ]
}

fn output_path(dir: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    dir.join(format!("screenshot_{millis}.png"))
}

fn take(args: TakeArgs) -> Result<TakeResult, CommandError> {
    let mode: CaptureMode = args.mode.parse()?;
    let path = output_path(&scratch_dir()?);

    let status = Process::new(SPECTACLE)
        .args(spectacle_args(mode, &path))
        .status()
        .map_err(|e| CommandError::failed(format!("running {SPECTACLE}: {e}")))?;
    if !status.success() {
        return Err(CommandError::failed(format!("{SPECTACLE} exited with {status}")));
    }

    std::thread::sleep(SETTLE);
    if !path.exists() {
        return Err(CommandError::failed(format!(
            "{SPECTACLE} wrote no file at {}",
            path.display()
        )));
    }
    log::debug!("screenshot ({mode:?}) saved to {}", path.display());
    Ok(TakeResult {
        path: path.display().to_string(),
    })
}

pub fn screenshot_port() -> Result<CommandTable, PortError> {
    CommandTable::builder(PORT_NAME)
        .description("Screen capture")
        .command(
            Command::new(
                "take",
                "Capture the screen and return the PNG path",
                |_ctx: &CommandContext<'_>, args: TakeArgs| take(args),
            )
            .param(ParamDef::optional("mode", "fullscreen (default), active or region")),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", CaptureMode::Fullscreen)]
    #[case("fullscreen", CaptureMode::Fullscreen)]
    #[case("Active", CaptureMode::ActiveWindow)]
    #[case("window", CaptureMode::ActiveWindow)]
    #[case(" region ", CaptureMode::Region)]
    fn test_mode_names(#[case] name: &str, #[case] mode: CaptureMode) {
        assert_eq!(name.parse::<CaptureMode>().unwrap(), mode);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let err = "monitor".parse::<CaptureMode>().unwrap_err();
        assert!(err.to_string().contains("monitor"));
    }

    #[test]
    fn test_spectacle_arguments() {
        let args = spectacle_args(CaptureMode::Region, Path::new("/run/user/1000/appmesh/s.png"));
        assert_eq!(args, vec!["-r", "-b", "-n", "-o", "/run/user/1000/appmesh/s.png"]);
        assert_eq!(spectacle_args(CaptureMode::default(), Path::new("x"))[0], "-f");
    }

    #[test]
    fn test_output_path_is_png_in_dir() {
        let path = output_path(Path::new("/tmp/shots"));
        assert_eq!(path.parent(), Some(Path::new("/tmp/shots")));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("screenshot_") && name.ends_with(".png"));
    }

    #[test]
    fn test_take_declared() {
        let table = screenshot_port().unwrap();
        let take = table.get("take").unwrap().def();
        assert_eq!(take.params[0].name, "mode");
        assert!(!take.params[0].required);
    }
}
