//! Runtime configuration read from the process environment.
//!
//! There is no config file: the core is loaded into foreign processes, so
//! the environment is the only channel every host shares.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;

pub const ENV_BACKEND: &str = "APPMESH_BACKEND";
pub const ENV_EIS_TIMEOUT_MS: &str = "APPMESH_EIS_TIMEOUT_MS";
pub const ENV_DEFAULT_DELAY_US: &str = "APPMESH_DEFAULT_DELAY_US";
pub const ENV_LIBEI_SOCKET: &str = "LIBEI_SOCKET";
pub const ENV_LOG: &str = "APPMESH_LOG";

const DEFAULT_EIS_TIMEOUT_MS: u64 = 3000;
const DEFAULT_DELAY_US: u64 = 5000;

/// Which connector `InputHandle::open` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Real compositor via the EIS protocol.
    #[default]
    Eis,
    /// Record and log events without touching the desktop.
    DryRun,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eis" => Ok(Backend::Eis),
            "dry-run" | "dryrun" | "dry_run" => Ok(Backend::DryRun),
            other => Err(format!("expected 'eis' or 'dry-run', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    pub eis_timeout: Duration,
    /// Delay applied by the `input` port when a command omits `delay_us`.
    pub default_delay_us: u64,
    /// Direct EIS socket, bypassing the KWin D-Bus request.
    pub eis_socket: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Eis,
            eis_timeout: Duration::from_millis(DEFAULT_EIS_TIMEOUT_MS),
            default_delay_us: DEFAULT_DELAY_US,
            eis_socket: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(raw) = non_empty(lookup(ENV_BACKEND)) {
            config.backend = raw.parse().map_err(|reason| ConfigError::InvalidValue {
                var: ENV_BACKEND,
                value: raw.clone(),
                reason,
            })?;
        }
        if let Some(raw) = non_empty(lookup(ENV_EIS_TIMEOUT_MS)) {
            let ms = parse_u64(ENV_EIS_TIMEOUT_MS, &raw)?;
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    var: ENV_EIS_TIMEOUT_MS,
                    value: raw,
                    reason: "must be greater than zero".into(),
                });
            }
            config.eis_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = non_empty(lookup(ENV_DEFAULT_DELAY_US)) {
            config.default_delay_us = parse_u64(ENV_DEFAULT_DELAY_US, &raw)?;
        }
        if let Some(raw) = non_empty(lookup(ENV_LIBEI_SOCKET)) {
            let path = PathBuf::from(&raw);
            config.eis_socket = Some(if path.is_absolute() {
                path
            } else {
                // libei resolves relative names against the runtime dir
                match non_empty(lookup("XDG_RUNTIME_DIR")) {
                    Some(dir) => PathBuf::from(dir).join(path),
                    None => path,
                }
            });
        }

        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        var,
        value: raw.to_owned(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.backend, Backend::Eis);
        assert_eq!(config.default_delay_us, 5000);
    }

    #[test]
    fn test_dry_run_backend() {
        let config = Config::from_lookup(lookup(&[(ENV_BACKEND, "Dry-Run")])).unwrap();
        assert_eq!(config.backend, Backend::DryRun);
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let err = Config::from_lookup(lookup(&[(ENV_BACKEND, "x11")])).unwrap_err();
        assert!(err.to_string().contains(ENV_BACKEND));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Config::from_lookup(lookup(&[(ENV_EIS_TIMEOUT_MS, "0")])).is_err());
    }

    #[test]
    fn test_relative_socket_joins_runtime_dir() {
        let config = Config::from_lookup(lookup(&[
            (ENV_LIBEI_SOCKET, "eis-0"),
            ("XDG_RUNTIME_DIR", "/run/user/1000"),
        ]))
        .unwrap();
        assert_eq!(
            config.eis_socket,
            Some(PathBuf::from("/run/user/1000/eis-0"))
        );
    }

    #[test]
    fn test_bad_delay_rejected() {
        let err = Config::from_lookup(lookup(&[(ENV_DEFAULT_DELAY_US, "-5")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var, .. } if var == ENV_DEFAULT_DELAY_US
        ));
    }
}
