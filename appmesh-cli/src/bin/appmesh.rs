//! Standalone CLI for typing text, sending key combos and calling ports.

use std::io::Read;
use std::process::ExitCode;

use appmesh::config::{Backend, Config, ENV_LOG};
use appmesh::port::CommandDef;
use appmesh::ports::install_default_ports;
use appmesh::{AppMeshError, EventTiming, InputHandle, PortRegistry};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(
    name = "appmesh",
    version,
    about = "Desktop automation through the compositor's remote-input facility"
)]
struct Args {
    /// Record events in memory instead of injecting them
    #[arg(long, global = true)]
    dry_run: bool,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Type text read from stdin
    Type {
        /// Milliseconds between characters
        #[arg(short, long)]
        delay: Option<u64>,
    },
    /// Send a key combo, e.g. ctrl+v
    Key {
        combo: String,
        /// Milliseconds between press and release
        #[arg(short, long)]
        delay: Option<u64>,
    },
    /// Execute a port command
    Port {
        name: String,
        command: String,
        /// key=value pairs; a bare value fills the first parameter as text
        args: Vec<String>,
    },
    /// List ports and their commands
    Ports,
}

fn timing(delay_ms: Option<u64>, config: &Config) -> EventTiming {
    match delay_ms {
        Some(ms) => EventTiming::from_micros(ms.saturating_mul(1000)),
        None => EventTiming::from_micros(config.default_delay_us),
    }
}

/// JSON value for a command-line argument: numbers and booleans are typed,
/// everything else stays a string.
fn typed_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                Value::from(n)
            } else if let Some(n) = raw.parse::<f64>().ok().filter(|n| n.is_finite()) {
                Value::from(n)
            } else {
                Value::String(raw.to_owned())
            }
        }
    }
}

fn build_args(def: Option<&CommandDef>, raw: &[String]) -> Result<Map<String, Value>, String> {
    let mut args = Map::new();
    for item in raw {
        match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_owned(), typed_value(value));
            }
            _ => {
                let first = def.and_then(|d| d.params.first()).ok_or_else(|| {
                    format!("'{item}' is not key=value and the command takes no parameters")
                })?;
                if args.contains_key(&first.name) {
                    return Err(format!("'{}' given more than once", first.name));
                }
                args.insert(first.name.clone(), Value::String(item.clone()));
            }
        }
    }
    Ok(args)
}

fn registry(config: &Config) -> Result<PortRegistry, AppMeshError> {
    let registry = PortRegistry::new();
    install_default_ports(&registry, config)?;
    Ok(registry)
}

fn run(args: Args) -> Result<(), String> {
    let mut config = Config::from_env().map_err(|e| e.to_string())?;
    if args.dry_run {
        config.backend = Backend::DryRun;
    }

    match args.command {
        Command::Type { delay } => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("reading stdin: {e}"))?;
            let handle = InputHandle::open(&config).map_err(|e| e.to_string())?;
            let count = handle
                .type_text(&text, timing(delay, &config))
                .map_err(|e| e.to_string())?;
            log::info!("typed {count} characters");
        }
        Command::Key { combo, delay } => {
            let handle = InputHandle::open(&config).map_err(|e| e.to_string())?;
            handle
                .send_key(&combo, timing(delay, &config))
                .map_err(|e| e.to_string())?;
            log::info!("sent {combo}");
        }
        Command::Port {
            name,
            command,
            args,
        } => {
            let registry = registry(&config).map_err(|e| e.to_string())?;
            let port = registry.open(&name).map_err(|e| e.to_string())?;
            let def = port.table().get(&command).map(|c| c.def());
            let call_args = build_args(def, &args)?;
            let result = port.execute(&command, Some(&Value::Object(call_args).to_string()));
            let failed = !result.is_success();
            let json = serde_json::to_string_pretty(&result.into_value())
                .map_err(|e| e.to_string())?;
            println!("{json}");
            if failed {
                return Err(format!("{name}.{command} failed"));
            }
        }
        Command::Ports => {
            let registry = registry(&config).map_err(|e| e.to_string())?;
            for name in registry.names() {
                let port = registry.open(&name).map_err(|e| e.to_string())?;
                let desc = port.describe();
                println!("{name}: {}", desc.description);
                for cmd in &desc.commands {
                    let params: Vec<String> = cmd
                        .params
                        .iter()
                        .map(|p| if p.required { p.name.clone() } else { format!("[{}]", p.name) })
                        .collect();
                    println!("  {} {}  -- {}", cmd.name, params.join(" "), cmd.description);
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(ENV_LOG, default_level))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("appmesh: {msg}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appmesh::port::ParamDef;
    use serde_json::json;

    fn def() -> CommandDef {
        CommandDef {
            name: "type_text".into(),
            description: String::new(),
            params: vec![
                ParamDef::required("text", "Text"),
                ParamDef::optional("delay_us", "Delay"),
            ],
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_bare_value_fills_first_param() {
        let args = build_args(Some(&def()), &strings(&["hello", "delay_us=250"])).unwrap();
        assert_eq!(Value::Object(args), json!({ "text": "hello", "delay_us": 250 }));

        let args = build_args(Some(&def()), &strings(&["42"])).unwrap();
        assert_eq!(Value::Object(args), json!({ "text": "42" }));
    }

    #[test]
    fn test_values_are_typed() {
        let args = build_args(None, &strings(&["a=1", "b=true", "c=1.5", "d=x=y", "e="])).unwrap();
        assert_eq!(
            Value::Object(args),
            json!({ "a": 1, "b": true, "c": 1.5, "d": "x=y", "e": "" })
        );
    }

    #[test]
    fn test_bare_value_without_params_fails() {
        assert!(build_args(None, &strings(&["hello"])).is_err());
        assert!(build_args(Some(&def()), &strings(&["a", "b"])).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let args =
            Args::try_parse_from(["appmesh", "--dry-run", "key", "ctrl+v", "-d", "20"]).unwrap();
        assert!(args.dry_run);
        assert!(matches!(
            args.command,
            Command::Key { ref combo, delay: Some(20) } if combo == "ctrl+v"
        ));
    }
}
