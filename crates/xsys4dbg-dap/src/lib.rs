//! Debug Adapter Protocol client for the xsystem4 interpreter.
//!
//! Drives an interpreter started with `--debug-api` and rebuilds paused
//! program state (stack frames, scopes, variables, breakpoints, scene) from
//! independently answered requests.

mod breakpoints;
mod client;
mod config;
mod driver;
mod error;
pub mod framer;
mod process;
pub mod protocol;
pub mod scene;
mod session;
mod stack;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use breakpoints::{BreakpointRegistry, BreakpointUpdate};
pub use client::{decode_message, DapClient, DapEvent, Incoming, Reply, ReplyBody};
pub use config::{DebuggerConfig, ENV_DAP_LOG, ENV_INTERPRETER};
pub use driver::{Command, SessionDriver};
pub use error::{
    ConfigError, ConfigurationError, DebugError, DebugResult, FramingError, ProcessError,
    ProtocolError,
};
pub use framer::{encode_message, write_message, MessageFramer};
pub use process::{
    AdapterConnection, AdapterLauncher, AdapterProcess, ExitKind, ProcessLauncher, ProcessNotice,
};
pub use scene::{RenderTarget, SceneEntity, Texture};
pub use session::{DebugSession, SessionEvent, SessionState};
pub use stack::{format_stack_trace, Scope, StackFrame, Variable};
