use std::env;
use std::path::PathBuf;
use std::time::Duration;

use runner::sandbox::{DEFAULT_MAX_OUTPUT_CHARS, DEFAULT_TIMEOUT};
use runner::{Runtime, SandboxConfig};
use thiserror::Error;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PYTHON: &str = "python3";
const DEFAULT_DOCKER_IMAGE: &str = "python:3.12-slim";
const DEFAULT_MAX_SESSIONS: usize = 256;
const DEFAULT_MAX_INFLIGHT: usize = 128;
const DEFAULT_INGRESS_CAPACITY: usize = 2048;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub api_base: String,
    pub bind_addr: String,
    pub sandbox: SandboxConfig,
    pub max_sessions: usize,
    pub max_inflight: usize,
    pub ingress_capacity: usize,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bot_token = lookup("BOT_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let runtime = match lookup("PYRELAY_RUNTIME").as_deref().map(str::trim) {
            None | Some("") | Some("local") => Runtime::Local {
                python: lookup("PYRELAY_PYTHON").unwrap_or_else(|| DEFAULT_PYTHON.to_owned()),
            },
            Some("docker") => Runtime::Docker {
                image: lookup("PYRELAY_DOCKER_IMAGE")
                    .unwrap_or_else(|| DEFAULT_DOCKER_IMAGE.to_owned()),
                runtime: lookup("PYRELAY_DOCKER_RUNTIME").filter(|value| !value.is_empty()),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "PYRELAY_RUNTIME",
                    value: other.to_owned(),
                });
            }
        };
        let timeout = match parse_number::<u64>(&lookup, "PYRELAY_TIMEOUT_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            bot_token,
            api_base: lookup("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_owned()),
            bind_addr: lookup("PYRELAY_BIND").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            sandbox: SandboxConfig {
                runtime,
                timeout,
                max_output_chars: parse_number(&lookup, "PYRELAY_MAX_OUTPUT_CHARS")?
                    .unwrap_or(DEFAULT_MAX_OUTPUT_CHARS),
                scratch_root: lookup("PYRELAY_SCRATCH_DIR")
                    .filter(|value| !value.trim().is_empty())
                    .map(PathBuf::from),
            },
            max_sessions: parse_number(&lookup, "PYRELAY_MAX_SESSIONS")?
                .unwrap_or(DEFAULT_MAX_SESSIONS),
            max_inflight: parse_number(&lookup, "PYRELAY_MAX_INFLIGHT")?
                .unwrap_or(DEFAULT_MAX_INFLIGHT),
            ingress_capacity: parse_number(&lookup, "PYRELAY_INGRESS_CAPACITY")?
                .unwrap_or(DEFAULT_INGRESS_CAPACITY),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { name, value: raw })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = config_from(&[("BOT_TOKEN", "abc")]).unwrap();
        assert_eq!(config.bot_token, "abc");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.sandbox.timeout, Duration::from_secs(5));
        assert_eq!(config.sandbox.max_output_chars, 4000);
        assert_eq!(
            config.sandbox.runtime,
            Runtime::Local {
                python: "python3".to_owned()
            }
        );
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.sandbox.scratch_root, None);
    }

    #[test]
    fn scratch_dir_is_optional() {
        let config =
            config_from(&[("BOT_TOKEN", "abc"), ("PYRELAY_SCRATCH_DIR", "/var/tmp/pyrelay")])
                .unwrap();
        assert_eq!(
            config.sandbox.scratch_root,
            Some(PathBuf::from("/var/tmp/pyrelay"))
        );
    }

    #[test]
    fn token_is_required() {
        assert_eq!(
            config_from(&[]).err(),
            Some(ConfigError::Missing("BOT_TOKEN"))
        );
        assert_eq!(
            config_from(&[("BOT_TOKEN", "  ")]).err(),
            Some(ConfigError::Missing("BOT_TOKEN"))
        );
    }

    #[test]
    fn docker_runtime_is_configurable() {
        let config = config_from(&[
            ("BOT_TOKEN", "abc"),
            ("PYRELAY_RUNTIME", "docker"),
            ("PYRELAY_DOCKER_RUNTIME", "runsc"),
            ("PYRELAY_TIMEOUT_SECS", "2"),
        ])
        .unwrap();
        assert_eq!(
            config.sandbox.runtime,
            Runtime::Docker {
                image: DEFAULT_DOCKER_IMAGE.to_owned(),
                runtime: Some("runsc".to_owned()),
            }
        );
        assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
    }

    #[test]
    fn malformed_numbers_are_reported() {
        let err = config_from(&[("BOT_TOKEN", "abc"), ("PYRELAY_MAX_SESSIONS", "many")])
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::Invalid {
                name: "PYRELAY_MAX_SESSIONS",
                value: "many".to_owned(),
            }
        );
        assert!(config_from(&[("BOT_TOKEN", "abc"), ("PYRELAY_RUNTIME", "vm")]).is_err());
    }
}
