//! Session event loop.
//! - Command: front-end requests, parsed from console lines
//! - SessionDriver: owns the session and serializes process input and commands

use std::path::PathBuf;

use crossbeam_channel::{never, select, Receiver};
use tracing::{debug, warn};

use crate::error::{DebugError, DebugResult};
use crate::process::ProcessNotice;
use crate::protocol::parse_address;
use crate::session::{DebugSession, SessionEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetGameDir(PathBuf),
    Initialize,
    Launch,
    Pause,
    Stop,
    Next,
    StepIn,
    StepOut,
    SetBreakpoint(u32),
    ClearBreakpoint(u32),
    ToggleBreakpoint(u32),
    RequestChildren(u32),
    RequestScene,
    RenderEntity(i32),
    RenderParts(i32),
    SpriteTexture(i32),
    Kill,
}

impl Command {
    /// Parses a console line such as `break 1a4` or `next`.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let operand = words.next();
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument '{extra}'"));
        }
        let command = match verb {
            "run" | "continue" | "c" => Self::Launch,
            "pause" => Self::Pause,
            "next" | "n" => Self::Next,
            "step" | "s" => Self::StepIn,
            "out" | "finish" => Self::StepOut,
            "stop" => Self::Stop,
            "restart" => Self::Initialize,
            "scene" => Self::RequestScene,
            "quit" | "q" => Self::Kill,
            "open" => Self::SetGameDir(PathBuf::from(required(verb, operand)?)),
            "break" | "b" => Self::SetBreakpoint(address(verb, operand)?),
            "clear" => Self::ClearBreakpoint(address(verb, operand)?),
            "toggle" => Self::ToggleBreakpoint(address(verb, operand)?),
            "expand" => Self::RequestChildren(number(verb, operand)?),
            "render" => Self::RenderEntity(number(verb, operand)?),
            "parts" => Self::RenderParts(number(verb, operand)?),
            "sprite" => Self::SpriteTexture(number(verb, operand)?),
            other => return Err(format!("unknown command '{other}'")),
        };
        Ok(command)
    }
}

fn required<'a>(verb: &str, operand: Option<&'a str>) -> Result<&'a str, String> {
    operand.ok_or_else(|| format!("'{verb}' needs an argument"))
}

fn address(verb: &str, operand: Option<&str>) -> Result<u32, String> {
    let text = required(verb, operand)?;
    parse_address(text).ok_or_else(|| format!("invalid address '{text}'"))
}

fn number<T: std::str::FromStr>(verb: &str, operand: Option<&str>) -> Result<T, String> {
    let text = required(verb, operand)?;
    text.parse()
        .map_err(|_| format!("invalid number '{text}'"))
}

/// Runs a session on the current thread. Process notices and front-end
/// commands are handled one at a time, so session state never needs a lock.
pub struct SessionDriver {
    session: DebugSession,
    notices: Receiver<ProcessNotice>,
    commands: Receiver<Command>,
}

impl SessionDriver {
    #[must_use]
    pub fn new(
        session: DebugSession,
        notices: Receiver<ProcessNotice>,
        commands: Receiver<Command>,
    ) -> Self {
        Self {
            session,
            notices,
            commands,
        }
    }

    #[must_use]
    pub fn session(&self) -> &DebugSession {
        &self.session
    }

    /// Loops until `Kill` arrives or every command sender is dropped, then
    /// stops the interpreter and hands the session back.
    pub fn run(mut self) -> DebugSession {
        let mut running = true;
        while running {
            let mut notices_closed = false;
            select! {
                recv(self.notices) -> notice => match notice {
                    Ok(notice) => self.session.handle_notice(notice),
                    Err(_) => notices_closed = true,
                },
                recv(self.commands) -> command => match command {
                    Ok(Command::Kill) | Err(_) => running = false,
                    Ok(command) => self.apply(command),
                },
            }
            if notices_closed {
                debug!("process notice channel closed");
                self.notices = never();
            }
        }
        self.session.kill();
        self.session
    }

    /// Applies one command. Refusals are reported as
    /// [`SessionEvent::CommandRejected`].
    pub fn apply(&mut self, command: Command) {
        let result = self.execute(&command);
        match result {
            Ok(()) => {}
            Err(DebugError::Configuration(err)) => {
                warn!(?command, "rejected: {err}");
                self.session
                    .emit(SessionEvent::CommandRejected(err.to_string()));
            }
            Err(err) => {
                warn!(?command, "failed: {err}");
                self.session.emit(SessionEvent::Error(err.to_string()));
            }
        }
    }

    fn execute(&mut self, command: &Command) -> DebugResult<()> {
        let session = &mut self.session;
        match command {
            Command::SetGameDir(dir) => session.set_game_dir(dir.clone())?,
            Command::Initialize => {
                session.initialize()?;
            }
            Command::Launch => {
                session.launch()?;
            }
            Command::Pause => {
                session.pause()?;
            }
            Command::Stop => {
                session.stop()?;
            }
            Command::Next => {
                session.next()?;
            }
            Command::StepIn => {
                session.step_in()?;
            }
            Command::StepOut => {
                session.step_out()?;
            }
            Command::SetBreakpoint(address) => {
                session.set_breakpoint(*address)?;
            }
            Command::ClearBreakpoint(address) => {
                session.clear_breakpoint(*address)?;
            }
            Command::ToggleBreakpoint(address) => {
                session.toggle_breakpoint(*address)?;
            }
            Command::RequestChildren(reference) => {
                session.request_children(*reference)?;
            }
            Command::RequestScene => {
                session.request_scene()?;
            }
            Command::RenderEntity(id) => {
                session.render_entity(*id)?;
            }
            Command::RenderParts(no) => {
                session.render_parts(*no)?;
            }
            Command::SpriteTexture(no) => {
                session.sprite_texture(*no)?;
            }
            Command::Kill => session.kill(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_commands() {
        assert_eq!(Command::parse("next"), Ok(Command::Next));
        assert_eq!(Command::parse("  b 0x1a4 "), Ok(Command::SetBreakpoint(0x1a4)));
        assert_eq!(Command::parse("toggle ff"), Ok(Command::ToggleBreakpoint(0xff)));
        assert_eq!(Command::parse("expand 12"), Ok(Command::RequestChildren(12)));
        assert_eq!(Command::parse("render -1"), Ok(Command::RenderEntity(-1)));
        assert_eq!(
            Command::parse("open /games/rance"),
            Ok(Command::SetGameDir(PathBuf::from("/games/rance")))
        );
    }

    #[test]
    fn rejects_bad_console_input() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("break").is_err());
        assert!(Command::parse("break xyz").is_err());
        assert!(Command::parse("next 3").is_err());
        assert!(Command::parse("fly").is_err());
    }
}
