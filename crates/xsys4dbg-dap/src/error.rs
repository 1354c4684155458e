//! Error taxonomy for the protocol client and session.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

/// Malformed wire data. Fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("missing value for Content-Length")]
    MissingContentLength,

    #[error("invalid value for Content-Length: '{0}'")]
    InvalidContentLength(String),

    #[error("header line exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("message payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Structurally invalid or failed protocol traffic. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{command} request failed: {message}")]
    RequestFailed { command: String, message: String },

    #[error("invalid {command} response body: {reason}")]
    InvalidBody { command: String, reason: String },

    #[error("invalid texture: {0}")]
    InvalidTexture(String),
}

/// Child process failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("adapter process is not running")]
    NotRunning,

    #[error("adapter I/O error: {0}")]
    Io(String),
}

/// Action attempted in a session state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("breakpoints cannot be changed while {state}")]
    NotConfigurable { state: SessionState },

    #[error("no game directory selected")]
    NoGameDirectory,

    #[error("game directory not found: {}", .0.display())]
    GameDirectoryNotFound(PathBuf),

    #[error("not connected to an adapter")]
    NotConnected,

    #[error("variables reference 0 has no children")]
    NoChildren,
}

/// Debugger configuration file errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    Parse(String),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Any error surfaced by the debugger core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type DebugResult<T> = std::result::Result<T, DebugError>;
