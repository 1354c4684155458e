//! Interpreter child process.
//! - AdapterLauncher/AdapterConnection: seam between the client and the OS process
//! - ProcessLauncher/AdapterProcess: real `std::process` implementation
//! - ProcessNotice: stdout chunks and exit status, delivered over a channel

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::config::DebuggerConfig;
use crate::error::ProcessError;

const READ_CHUNK: usize = 4096;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the interpreter process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited on its own with a status code.
    Clean(i32),
    /// Terminated by a signal.
    Crashed,
}

impl ExitKind {
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Clean(code),
            None => Self::Crashed,
        }
    }
}

/// Input from a running interpreter, tagged with the process generation that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessNotice {
    Output { generation: u64, bytes: Vec<u8> },
    Exited { generation: u64, kind: ExitKind },
    ReadError { generation: u64, message: String },
}

impl ProcessNotice {
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::Output { generation, .. }
            | Self::Exited { generation, .. }
            | Self::ReadError { generation, .. } => *generation,
        }
    }
}

/// Write half of a running adapter plus its lifecycle controls.
pub trait AdapterConnection: Write + Send {
    fn is_running(&mut self) -> bool;

    /// Wait up to `timeout` for the process to exit, then kill it.
    fn shutdown(&mut self, timeout: Duration);

    fn kill(&mut self);
}

/// Starts adapter processes.
pub trait AdapterLauncher: Send {
    fn spawn(
        &mut self,
        config: &DebuggerConfig,
        working_dir: &Path,
        generation: u64,
    ) -> Result<Box<dyn AdapterConnection>, ProcessError>;
}

/// Launches the interpreter as an OS process and pumps its stdout into a
/// notice channel.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    notices: Sender<ProcessNotice>,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(notices: Sender<ProcessNotice>) -> Self {
        Self { notices }
    }
}

impl AdapterLauncher for ProcessLauncher {
    fn spawn(
        &mut self,
        config: &DebuggerConfig,
        working_dir: &Path,
        generation: u64,
    ) -> Result<Box<dyn AdapterConnection>, ProcessError> {
        let process = AdapterProcess::spawn(config, working_dir, generation, self.notices.clone())?;
        Ok(Box::new(process))
    }
}

#[derive(Debug)]
pub struct AdapterProcess {
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    pid: u32,
}

impl AdapterProcess {
    pub fn spawn(
        config: &DebuggerConfig,
        working_dir: &Path,
        generation: u64,
        notices: Sender<ProcessNotice>,
    ) -> Result<Self, ProcessError> {
        let program = config.interpreter.display().to_string();
        let spawn_error = |reason: String| ProcessError::Spawn {
            program: program.clone(),
            reason,
        };
        let mut child = Command::new(&config.interpreter)
            .args(config.interpreter_args())
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| spawn_error(err.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;
        let pid = child.id();
        info!(pid, generation, dir = %working_dir.display(), "started {program}");

        let child = Arc::new(Mutex::new(child));
        let reader_child = Arc::clone(&child);
        thread::Builder::new()
            .name(format!("xsys4dbg-reader-{generation}"))
            .spawn(move || pump_stdout(stdout, reader_child, generation, notices))
            .map_err(|err| spawn_error(err.to_string()))?;

        Ok(Self { child, stdin, pid })
    }

    fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| io::Error::other("child lock poisoned"))?;
        child.try_wait()
    }

    fn kill_now(&self) -> io::Result<()> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| io::Error::other("child lock poisoned"))?;
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill()?;
        child.wait().map(|_| ())
    }
}

impl Write for AdapterProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin.flush()
    }
}

impl AdapterConnection for AdapterProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    fn shutdown(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.pid, %status, "adapter exited");
                    return;
                }
                Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                Err(err) => {
                    warn!(pid = self.pid, "failed to poll adapter: {err}");
                    break;
                }
            }
        }
        warn!(pid = self.pid, "adapter did not exit in {timeout:?}; killing");
        self.kill();
    }

    fn kill(&mut self) {
        if let Err(err) = self.kill_now() {
            error!(pid = self.pid, "failed to kill adapter: {err}");
        }
    }
}

impl Drop for AdapterProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.try_wait() {
            self.kill();
        }
    }
}

fn pump_stdout(
    mut stdout: ChildStdout,
    child: Arc<Mutex<Child>>,
    generation: u64,
    notices: Sender<ProcessNotice>,
) {
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let notice = ProcessNotice::Output {
                    generation,
                    bytes: buffer[..read].to_vec(),
                };
                if notices.send(notice).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let _ = notices.send(ProcessNotice::ReadError {
                    generation,
                    message: err.to_string(),
                });
                return;
            }
        }
    }
    let kind = match wait_for_exit(&child) {
        Ok(status) => ExitKind::from_status(status),
        Err(err) => {
            error!(generation, "failed to reap adapter: {err}");
            ExitKind::Crashed
        }
    };
    let _ = notices.send(ProcessNotice::Exited { generation, kind });
}

/// Polls so the child lock is never held across a blocking wait.
fn wait_for_exit(child: &Mutex<Child>) -> io::Result<ExitStatus> {
    loop {
        {
            let mut child = child
                .lock()
                .map_err(|_| io::Error::other("child lock poisoned"))?;
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell_config(script: &str) -> DebuggerConfig {
        DebuggerConfig {
            interpreter: "/bin/sh".into(),
            debug_flag: "-c".to_string(),
            extra_args: vec![script.to_string()],
            ..DebuggerConfig::default()
        }
    }

    #[test]
    fn forwards_stdout_then_reports_clean_exit() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut process =
            AdapterProcess::spawn(&shell_config("printf hello; exit 3"), Path::new("."), 7, tx)
                .unwrap();
        let mut output = Vec::new();
        let exit = loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                ProcessNotice::Output { generation, bytes } => {
                    assert_eq!(generation, 7);
                    output.extend(bytes);
                }
                ProcessNotice::Exited { kind, .. } => break kind,
                other => panic!("unexpected notice {other:?}"),
            }
        };
        assert_eq!(output, b"hello");
        assert_eq!(exit, ExitKind::Clean(3));
        assert!(!process.is_running());
    }

    #[test]
    fn shutdown_kills_after_timeout() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut process =
            AdapterProcess::spawn(&shell_config("exec sleep 30"), Path::new("."), 1, tx).unwrap();
        assert!(process.is_running());
        process.shutdown(Duration::from_millis(50));
        assert!(!process.is_running());
        let notice = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            notice,
            ProcessNotice::Exited {
                generation: 1,
                kind: ExitKind::Crashed
            }
        );
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let config = DebuggerConfig {
            interpreter: "/nonexistent/xsystem4".into(),
            ..DebuggerConfig::default()
        };
        let err = AdapterProcess::spawn(&config, Path::new("."), 1, tx).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
