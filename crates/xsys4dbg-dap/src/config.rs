//! Debugger configuration loading.
//!
//! `xsys4dbg.toml` layout:
//!
//! ```toml
//! [interpreter]
//! path = "xsystem4"
//! debug_flag = "--debug-api"
//! args = []
//! adapter_id = "xsystem4"
//!
//! [protocol]
//! shutdown_timeout_ms = 3000
//! log = "/tmp/xsys4dbg-dap.log"
//! ```
//!
//! Every key is optional. `XSYS4DBG_INTERPRETER` and `XSYS4DBG_DAP_LOG`
//! override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_INTERPRETER: &str = "xsystem4";
pub const DEFAULT_DEBUG_FLAG: &str = "--debug-api";
pub const DEFAULT_ADAPTER_ID: &str = "xsystem4";
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 3000;

pub const ENV_INTERPRETER: &str = "XSYS4DBG_INTERPRETER";
pub const ENV_DAP_LOG: &str = "XSYS4DBG_DAP_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Interpreter executable, resolved through `PATH` when relative.
    pub interpreter: PathBuf,
    /// Flag that enables the interpreter's debug API on stdio.
    pub debug_flag: String,
    pub extra_args: Vec<String>,
    pub adapter_id: String,
    /// Grace period between `disconnect` and a forced kill.
    pub shutdown_timeout: Duration,
    /// Raw protocol transcript destination.
    pub protocol_log: Option<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from(DEFAULT_INTERPRETER),
            debug_flag: DEFAULT_DEBUG_FLAG.to_string(),
            extra_args: Vec::new(),
            adapter_id: DEFAULT_ADAPTER_ID.to_string(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            protocol_log: None,
        }
    }
}

impl DebuggerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: ConfigToml = toml::from_str(text)
            .map_err(|err| ConfigError::Parse(format!("xsys4dbg.toml: {err}")))?;
        raw.into_config()
    }

    /// Arguments passed to the interpreter, debug flag first.
    #[must_use]
    pub fn interpreter_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 1);
        args.push(self.debug_flag.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_INTERPRETER).filter(|value| !value.trim().is_empty()) {
            self.interpreter = PathBuf::from(path.trim());
        }
        if let Some(path) = lookup(ENV_DAP_LOG).filter(|value| !value.trim().is_empty()) {
            self.protocol_log = Some(PathBuf::from(path.trim()));
        }
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    interpreter: InterpreterSection,
    #[serde(default)]
    protocol: ProtocolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InterpreterSection {
    path: Option<String>,
    debug_flag: Option<String>,
    args: Option<Vec<String>>,
    adapter_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolSection {
    shutdown_timeout_ms: Option<u64>,
    log: Option<PathBuf>,
}

impl ConfigToml {
    fn into_config(self) -> Result<DebuggerConfig, ConfigError> {
        let defaults = DebuggerConfig::default();
        let interpreter = match self.interpreter.path {
            Some(path) if path.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "interpreter.path must not be empty".to_string(),
                ))
            }
            Some(path) => PathBuf::from(path),
            None => defaults.interpreter,
        };
        let adapter_id = match self.interpreter.adapter_id {
            Some(id) if id.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "interpreter.adapter_id must not be empty".to_string(),
                ))
            }
            Some(id) => id,
            None => defaults.adapter_id,
        };
        let shutdown_timeout = match self.protocol.shutdown_timeout_ms {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "protocol.shutdown_timeout_ms must be greater than zero".to_string(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.shutdown_timeout,
        };
        Ok(DebuggerConfig {
            interpreter,
            debug_flag: self.interpreter.debug_flag.unwrap_or(defaults.debug_flag),
            extra_args: self.interpreter.args.unwrap_or_default(),
            adapter_id,
            shutdown_timeout,
            protocol_log: self.protocol.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = DebuggerConfig::from_toml_str("").unwrap();
        assert_eq!(config, DebuggerConfig::default());
        assert_eq!(config.interpreter_args(), vec!["--debug-api".to_string()]);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn sections_override_defaults() {
        let config = DebuggerConfig::from_toml_str(
            r#"
[interpreter]
path = "/opt/xsystem4/bin/xsystem4"
args = ["--nosound"]

[protocol]
shutdown_timeout_ms = 500
log = "dap.log"
"#,
        )
        .unwrap();
        assert_eq!(config.interpreter, PathBuf::from("/opt/xsystem4/bin/xsystem4"));
        assert_eq!(
            config.interpreter_args(),
            vec!["--debug-api".to_string(), "--nosound".to_string()]
        );
        assert_eq!(config.shutdown_timeout, Duration::from_millis(500));
        assert_eq!(config.protocol_log, Some(PathBuf::from("dap.log")));
        assert_eq!(config.adapter_id, "xsystem4");
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let err = DebuggerConfig::from_toml_str("[interpreter]\nbinary = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
        let err =
            DebuggerConfig::from_toml_str("[protocol]\nshutdown_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let config = DebuggerConfig::default().with_overrides_from(|key| match key {
            ENV_INTERPRETER => Some("/usr/local/bin/xsystem4".to_string()),
            ENV_DAP_LOG => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.interpreter, PathBuf::from("/usr/local/bin/xsystem4"));
        assert_eq!(config.protocol_log, None);
    }
}
