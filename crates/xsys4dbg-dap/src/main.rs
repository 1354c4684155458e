use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};
use xsys4dbg_dap::protocol::parse_address;
use xsys4dbg_dap::{
    format_stack_trace, Command, DebugSession, DebuggerConfig, ProcessLauncher, SessionDriver,
    SessionEvent,
};

#[derive(Debug, Parser)]
#[command(name = "xsys4dbg", version, about = "Console debugger for xsystem4 games")]
struct Args {
    /// Game directory passed to the interpreter as its working directory.
    game_dir: PathBuf,

    /// Debugger configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interpreter executable; overrides the config file and environment.
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Instruction breakpoint (hex address); may be repeated.
    #[arg(long = "break", value_name = "ADDR", value_parser = parse_hex)]
    breakpoints: Vec<u32>,
}

fn parse_hex(text: &str) -> Result<u32, String> {
    parse_address(text).ok_or_else(|| format!("invalid address '{text}'"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match args.config.as_deref() {
        Some(path) => DebuggerConfig::load(path)?,
        None => DebuggerConfig::default(),
    }
    .with_env_overrides();
    if let Some(interpreter) = args.interpreter {
        config.interpreter = interpreter;
    }

    let (notice_tx, notice_rx) = unbounded();
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();

    let launcher = Box::new(ProcessLauncher::new(notice_tx));
    let mut session = DebugSession::new(config, launcher, event_tx);
    info!(dir = %args.game_dir.display(), "starting xsys4dbg");
    session
        .set_game_dir(&args.game_dir)
        .with_context(|| format!("failed to open {}", args.game_dir.display()))?;
    for address in args.breakpoints {
        session
            .set_breakpoint(address)
            .with_context(|| format!("failed to set breakpoint at 0x{address:x}"))?;
    }

    let printer = thread::Builder::new()
        .name("xsys4dbg-events".to_string())
        .spawn(move || print_events(event_rx))
        .context("failed to start event printer")?;
    thread::Builder::new()
        .name("xsys4dbg-stdin".to_string())
        .spawn(move || read_commands(command_tx))
        .context("failed to start command reader")?;

    let session = SessionDriver::new(session, notice_rx, command_rx).run();
    drop(session);
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    Ok(())
}

fn read_commands(commands: Sender<Command>) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Ok(command) => {
                let quit = command == Command::Kill;
                if commands.send(command).is_err() || quit {
                    break;
                }
            }
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn print_events(events: Receiver<SessionEvent>) {
    for event in events {
        match event {
            SessionEvent::Initialized => println!("initialized"),
            SessionEvent::Launched => println!("launched"),
            SessionEvent::Paused { reason } => println!("paused ({reason})"),
            SessionEvent::Continued => println!("continued"),
            SessionEvent::Terminated => println!("terminated"),
            SessionEvent::Output { output, .. } => print!("{output}"),
            SessionEvent::StackTraceReady(frames) => print!("{}", format_stack_trace(&frames)),
            SessionEvent::BreakpointsChanged(addresses) => {
                let list: Vec<String> =
                    addresses.iter().map(|addr| format!("0x{addr:x}")).collect();
                println!("breakpoints: [{}]", list.join(", "));
            }
            SessionEvent::SceneReady(entities) => {
                for entity in entities {
                    println!("entity {} z={} {}", entity.id, entity.z, entity.name());
                }
            }
            SessionEvent::ChildrenReady {
                reference,
                variables,
            } => {
                println!("[{reference}]");
                for variable in variables {
                    println!(
                        "  {}: {} = {}",
                        variable.name, variable.type_name, variable.value
                    );
                }
            }
            SessionEvent::TextureReady { target, texture } => {
                println!("{target:?}: {}x{} texture", texture.width, texture.height);
            }
            SessionEvent::CommandRejected(message) => eprintln!("rejected: {message}"),
            SessionEvent::Error(message) => eprintln!("error: {message}"),
        }
    }
}
