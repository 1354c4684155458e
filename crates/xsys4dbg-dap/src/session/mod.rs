//! Debug session orchestration.
//! - SessionState: connection/run state machine
//! - DebugSession: operations issued by the front-end, reply/event correlation
//! - SessionEvent: consolidated notifications for the front-end

mod stack;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use crossbeam_channel::Sender;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::breakpoints::{BreakpointRegistry, BreakpointUpdate};
use crate::client::{DapClient, DapEvent, Incoming, Reply, ReplyBody};
use crate::config::DebuggerConfig;
use crate::error::{ConfigurationError, DebugResult, ProtocolError};
use crate::framer::ProtocolLog;
use crate::process::{AdapterLauncher, ExitKind, ProcessNotice};
use crate::protocol::{
    ScopesArguments, SetInstructionBreakpointsArguments, StackTraceArguments, ThreadArguments,
    VariablesArguments, MAIN_THREAD,
};
use crate::scene::{RenderTarget, SceneEntity, Texture, SCENE_COMMAND};
use crate::stack::{StackFrame, Variable};

use self::stack::StackTraceChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NotStarted,
    Initializing,
    Configuring,
    Running,
    Paused,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotStarted => "not started",
            Self::Initializing => "initializing",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        f.write_str(text)
    }
}

/// Notification for the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Initialized,
    Launched,
    Paused {
        reason: String,
    },
    Continued,
    Terminated,
    Output {
        category: Option<String>,
        output: String,
    },
    StackTraceReady(Vec<StackFrame>),
    BreakpointsChanged(BTreeSet<u32>),
    SceneReady(Vec<SceneEntity>),
    ChildrenReady {
        reference: u32,
        variables: Vec<Variable>,
    },
    TextureReady {
        target: RenderTarget,
        texture: Texture,
    },
    /// A front-end command was refused without reaching the adapter.
    CommandRejected(String),
    Error(String),
}

/// One debug session against one interpreter at a time.
///
/// All state lives here and is mutated only through `&mut self`, so the
/// owner decides which thread the session runs on.
pub struct DebugSession {
    config: DebuggerConfig,
    client: DapClient,
    events: Sender<SessionEvent>,
    state: SessionState,
    game_dir: Option<PathBuf>,
    breakpoints: BreakpointRegistry,
    stack: StackTraceChain,
    last_trace: Vec<StackFrame>,
    pending_scene: Option<u32>,
    pending_children: HashMap<u32, u32>,
    pending_textures: HashMap<u32, RenderTarget>,
    /// Run-control requests in flight, with the state to restore on failure.
    pending_run: HashMap<u32, SessionState>,
}

impl DebugSession {
    #[must_use]
    pub fn new(
        config: DebuggerConfig,
        launcher: Box<dyn AdapterLauncher>,
        events: Sender<SessionEvent>,
    ) -> Self {
        let mut client = DapClient::new(launcher);
        if let Some(path) = config.protocol_log.as_deref() {
            match ProtocolLog::open(path) {
                Ok(log) => client.set_transcript(Some(log)),
                Err(err) => warn!("failed to open protocol log {}: {err}", path.display()),
            }
        }
        Self {
            config,
            client,
            events,
            state: SessionState::NotStarted,
            game_dir: None,
            breakpoints: BreakpointRegistry::new(),
            stack: StackTraceChain::default(),
            last_trace: Vec::new(),
            pending_scene: None,
            pending_children: HashMap::new(),
            pending_textures: HashMap::new(),
            pending_run: HashMap::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Breakpoints may only change before launch or while paused.
    #[must_use]
    pub fn can_configure(&self) -> bool {
        matches!(self.state, SessionState::Initializing | SessionState::Paused)
    }

    #[must_use]
    pub fn is_breakpoint(&self, address: u32) -> bool {
        self.breakpoints.is_breakpoint(address)
    }

    #[must_use]
    pub fn is_requested(&self, address: u32) -> bool {
        self.breakpoints.is_requested(address)
    }

    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    /// Most recently completed stack tree.
    #[must_use]
    pub fn stack_trace(&self) -> &[StackFrame] {
        &self.last_trace
    }

    #[must_use]
    pub fn game_dir(&self) -> Option<&std::path::Path> {
        self.game_dir.as_deref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.client.generation()
    }

    /// Selects the game to debug. A running interpreter is asked to exit and
    /// is restarted in the new directory once it does.
    pub fn set_game_dir(&mut self, dir: impl Into<PathBuf>) -> DebugResult<()> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(ConfigurationError::GameDirectoryNotFound(dir).into());
        }
        self.game_dir = Some(dir);
        if self.client.connected() {
            self.client.terminate()?;
        } else {
            self.initialize()?;
        }
        Ok(())
    }

    /// Spawns the interpreter and sends `initialize`. A spawn failure leaves
    /// the session in `NotStarted` and is returned to the caller.
    pub fn initialize(&mut self) -> DebugResult<u32> {
        let Some(dir) = self.game_dir.clone() else {
            return Err(ConfigurationError::NoGameDirectory.into());
        };
        if self.state != SessionState::NotStarted {
            info!(state = %self.state, "re-initializing session");
            self.reset();
        }
        match self.client.start(&self.config, &dir) {
            Ok(seq) => {
                self.state = SessionState::Initializing;
                Ok(seq)
            }
            Err(err) => {
                error!("failed to start interpreter: {err}");
                self.client.teardown();
                self.reset();
                Err(err)
            }
        }
    }

    /// Starts execution after configuration, or continues from a pause.
    /// Returns `None` when the current state has nothing to launch.
    pub fn launch(&mut self) -> DebugResult<Option<u32>> {
        match self.state {
            SessionState::Configuring => {
                self.client.send::<Value>("configurationDone", None)?;
                let seq = self.client.send::<Value>("launch", None)?;
                self.begin_run(seq, SessionState::Configuring);
                Ok(Some(seq))
            }
            SessionState::Paused => self.run_command("continue").map(Some),
            state => {
                debug!(%state, "launch ignored");
                Ok(None)
            }
        }
    }

    pub fn pause(&mut self) -> DebugResult<Option<u32>> {
        if self.state != SessionState::Running {
            debug!(state = %self.state, "pause ignored");
            return Ok(None);
        }
        self.client
            .send("pause", Some(ThreadArguments::default()))
            .map(Some)
    }

    /// Asks the interpreter to exit. The orderly exit restarts it.
    pub fn stop(&mut self) -> DebugResult<Option<u32>> {
        if !self.client.connected() {
            return Ok(None);
        }
        self.client.terminate().map(Some)
    }

    pub fn next(&mut self) -> DebugResult<Option<u32>> {
        self.step("next")
    }

    pub fn step_in(&mut self) -> DebugResult<Option<u32>> {
        self.step("stepIn")
    }

    pub fn step_out(&mut self) -> DebugResult<Option<u32>> {
        self.step("stepOut")
    }

    /// Disconnects and stops the interpreter for good; no restart follows.
    pub fn kill(&mut self) {
        if self.client.connected() {
            if let Err(err) = self.client.terminate() {
                debug!("disconnect before kill failed: {err}");
            }
            self.client.shutdown(self.config.shutdown_timeout);
            info!("interpreter stopped");
        }
        self.reset();
    }

    pub fn set_breakpoint(&mut self, address: u32) -> DebugResult<Option<u32>> {
        self.ensure_configurable()?;
        match self.breakpoints.set(address) {
            Some(addresses) => self.send_breakpoints(addresses).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear_breakpoint(&mut self, address: u32) -> DebugResult<Option<u32>> {
        self.ensure_configurable()?;
        match self.breakpoints.clear(address) {
            Some(addresses) => self.send_breakpoints(addresses).map(Some),
            None => Ok(None),
        }
    }

    pub fn toggle_breakpoint(&mut self, address: u32) -> DebugResult<u32> {
        self.ensure_configurable()?;
        let addresses = self.breakpoints.toggle(address);
        self.send_breakpoints(addresses)
    }

    /// Fetches the children of a structured variable.
    pub fn request_children(&mut self, reference: u32) -> DebugResult<u32> {
        if reference == 0 {
            return Err(ConfigurationError::NoChildren.into());
        }
        if !self.client.connected() {
            return Err(ConfigurationError::NotConnected.into());
        }
        let seq = self.client.send(
            "variables",
            Some(VariablesArguments {
                variables_reference: reference,
            }),
        )?;
        self.pending_children.insert(seq, reference);
        Ok(seq)
    }

    pub fn request_scene(&mut self) -> DebugResult<u32> {
        if !self.client.connected() {
            return Err(ConfigurationError::NotConnected.into());
        }
        let seq = self.client.send::<Value>(SCENE_COMMAND, None)?;
        self.pending_scene = Some(seq);
        Ok(seq)
    }

    pub fn render_entity(&mut self, id: i32) -> DebugResult<u32> {
        self.request_texture(RenderTarget::Entity(id))
    }

    pub fn render_parts(&mut self, no: i32) -> DebugResult<u32> {
        self.request_texture(RenderTarget::Parts(no))
    }

    pub fn sprite_texture(&mut self, no: i32) -> DebugResult<u32> {
        self.request_texture(RenderTarget::Sprite(no))
    }

    /// Consumes input from the interpreter process. Notices from a process
    /// that was already replaced are dropped.
    pub fn handle_notice(&mut self, notice: ProcessNotice) {
        if notice.generation() != self.client.generation() || !self.client.connected() {
            debug!(
                generation = notice.generation(),
                current = self.client.generation(),
                "dropping notice from a previous process"
            );
            return;
        }
        match notice {
            ProcessNotice::Output { bytes, .. } => self.handle_bytes(&bytes),
            ProcessNotice::ReadError { message, .. } => {
                self.fail_connection(format!("failed to read from interpreter: {message}"));
            }
            ProcessNotice::Exited { kind, .. } => self.on_process_exit(kind),
        }
    }

    /// Consumes raw adapter output.
    pub fn handle_bytes(&mut self, bytes: &[u8]) {
        match self.client.on_bytes(bytes) {
            Ok(messages) => {
                for message in messages {
                    self.dispatch(message);
                }
            }
            Err(err) => self.fail_connection(format!("DAP framing error: {err}")),
        }
    }

    fn fail_connection(&mut self, message: String) {
        error!("{message}");
        self.client.teardown();
        self.reset();
        self.emit(SessionEvent::Error(message));
    }

    fn on_process_exit(&mut self, kind: ExitKind) {
        let previous = self.state;
        self.client.detach();
        self.reset();
        match kind {
            ExitKind::Crashed => {
                error!("interpreter crashed");
                self.emit(SessionEvent::Error("xsystem4 process crashed".to_string()));
            }
            ExitKind::Clean(code) => {
                info!(code, "interpreter exited");
                if previous != SessionState::NotStarted {
                    self.emit(SessionEvent::Terminated);
                }
                if let Err(err) = self.initialize() {
                    warn!("restart after exit failed: {err}");
                    self.emit(SessionEvent::Error(err.to_string()));
                }
            }
        }
    }

    fn dispatch(&mut self, message: Incoming) {
        match message {
            Incoming::Event(event) => self.on_event(event),
            Incoming::Response(reply) => self.on_reply(reply),
        }
    }

    fn on_event(&mut self, event: DapEvent) {
        match event {
            DapEvent::Output { category, output } => {
                self.emit(SessionEvent::Output { category, output });
            }
            DapEvent::Initialized => {
                self.state = SessionState::Configuring;
                self.emit(SessionEvent::Initialized);
                let addresses = self.breakpoints.snapshot();
                if !addresses.is_empty() {
                    if let Err(err) = self.send_breakpoints(addresses) {
                        warn!("failed to restore breakpoints: {err}");
                    }
                }
            }
            DapEvent::Stopped { reason } => {
                self.state = SessionState::Paused;
                self.emit(SessionEvent::Paused { reason });
                self.begin_stack_trace();
            }
            DapEvent::Terminated => {
                self.reset();
                self.emit(SessionEvent::Terminated);
            }
        }
    }

    fn begin_stack_trace(&mut self) {
        self.stack.reset();
        self.last_trace.clear();
        self.pending_children.clear();
        match self.client.send(
            "stackTrace",
            Some(StackTraceArguments {
                thread_id: MAIN_THREAD,
            }),
        ) {
            Ok(seq) => self.stack.arm(seq),
            Err(err) => warn!("failed to request stack trace: {err}"),
        }
        if let Err(err) = self.request_scene() {
            debug!("failed to request scene: {err}");
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        let seq = reply.request_seq;
        if let Some(previous) = self.pending_run.remove(&seq) {
            self.on_run_reply(previous, reply);
        } else if self.stack.owns(seq) {
            self.on_stack_reply(reply);
        } else if self.breakpoints.is_tracking(seq) {
            let update = match reply.outcome {
                Ok(ReplyBody::Breakpoints(verified)) => {
                    self.breakpoints.acknowledge(seq, &verified)
                }
                Ok(other) => {
                    warn!(seq, "unexpected breakpoint reply {other:?}");
                    self.breakpoints.reject(seq)
                }
                Err(err) => {
                    warn!(seq, "breakpoints not updated: {err}");
                    self.breakpoints.reject(seq)
                }
            };
            if let BreakpointUpdate::Applied(confirmed) = update {
                self.emit(SessionEvent::BreakpointsChanged(confirmed));
            }
        } else if self.pending_scene == Some(seq) {
            self.pending_scene = None;
            match reply.outcome {
                Ok(ReplyBody::Scene(entities)) => self.emit(SessionEvent::SceneReady(entities)),
                Ok(other) => debug!(seq, "unexpected scene reply {other:?}"),
                Err(err) => debug!(seq, "scene unavailable: {err}"),
            }
        } else if let Some(reference) = self.pending_children.remove(&seq) {
            match reply.outcome {
                Ok(ReplyBody::Variables(variables)) => self.emit(SessionEvent::ChildrenReady {
                    reference,
                    variables: variables.into_iter().map(Variable::from).collect(),
                }),
                Ok(other) => warn!(seq, "unexpected variables reply {other:?}"),
                Err(err) => warn!(seq, reference, "variables unavailable: {err}"),
            }
        } else if let Some(target) = self.pending_textures.remove(&seq) {
            match reply.outcome {
                Ok(ReplyBody::Texture(texture)) => {
                    self.emit(SessionEvent::TextureReady { target, texture });
                }
                Ok(other) => warn!(seq, "unexpected texture reply {other:?}"),
                Err(err) => warn!(seq, ?target, "render failed: {err}"),
            }
        } else {
            debug!(seq, command = reply.command.as_str(), "dropping unmatched response");
        }
    }

    /// A reply that arrives after the interpreter stopped again is stale
    /// and is not reported.
    fn on_run_reply(&mut self, previous: SessionState, reply: Reply) {
        let running = self.state == SessionState::Running;
        match reply.outcome {
            Ok(ReplyBody::Launched) if running => self.emit(SessionEvent::Launched),
            Ok(ReplyBody::Continued) if running => self.emit(SessionEvent::Continued),
            Ok(_) => {}
            Err(err) => {
                warn!(command = reply.command.as_str(), "run request failed: {err}");
                if self.state == SessionState::Running {
                    self.state = previous;
                }
            }
        }
    }

    fn on_stack_reply(&mut self, reply: Reply) {
        let Reply {
            request_seq: seq,
            command,
            outcome,
        } = reply;
        if self.stack.is_trace(seq) {
            let outcome = outcome.and_then(|body| match body {
                ReplyBody::StackTrace(frames) => Ok(frames),
                other => Err(unexpected_body(&command, &other)),
            });
            for request in self.stack.accept_trace(seq, outcome) {
                match self.client.send(
                    "scopes",
                    Some(ScopesArguments {
                        frame_id: request.frame_id,
                    }),
                ) {
                    Ok(scopes_seq) => self.stack.expect_scopes(scopes_seq, request.index),
                    Err(err) => warn!(frame = request.frame_id, "failed to request scopes: {err}"),
                }
            }
        } else if self.stack.is_scopes(seq) {
            let outcome = outcome.and_then(|body| match body {
                ReplyBody::Scopes(scopes) => Ok(scopes),
                other => Err(unexpected_body(&command, &other)),
            });
            for request in self.stack.accept_scopes(seq, outcome) {
                match self.client.send(
                    "variables",
                    Some(VariablesArguments {
                        variables_reference: request.reference,
                    }),
                ) {
                    Ok(variables_seq) => {
                        self.stack
                            .expect_variables(variables_seq, request.frame, request.scope);
                    }
                    Err(err) => warn!(
                        reference = request.reference,
                        "failed to request variables: {err}"
                    ),
                }
            }
        } else {
            let outcome = outcome.and_then(|body| match body {
                ReplyBody::Variables(variables) => Ok(variables),
                other => Err(unexpected_body(&command, &other)),
            });
            self.stack.accept_variables(seq, outcome);
        }
        if let Some(frames) = self.stack.take_ready() {
            self.last_trace.clone_from(&frames);
            self.emit(SessionEvent::StackTraceReady(frames));
        }
    }

    fn ensure_configurable(&self) -> DebugResult<()> {
        if self.can_configure() {
            return Ok(());
        }
        Err(ConfigurationError::NotConfigurable { state: self.state }.into())
    }

    fn send_breakpoints(&mut self, addresses: Vec<u32>) -> DebugResult<u32> {
        let seq = self.client.send(
            "setInstructionBreakpoints",
            Some(SetInstructionBreakpointsArguments::from_addresses(addresses)),
        )?;
        self.breakpoints.track(seq);
        Ok(seq)
    }

    fn run_command(&mut self, command: &str) -> DebugResult<u32> {
        let previous = self.state;
        let seq = self
            .client
            .send(command, Some(ThreadArguments::default()))?;
        self.begin_run(seq, previous);
        Ok(seq)
    }

    fn begin_run(&mut self, seq: u32, previous: SessionState) {
        self.pending_run.insert(seq, previous);
        self.state = SessionState::Running;
    }

    fn step(&mut self, command: &str) -> DebugResult<Option<u32>> {
        if self.state != SessionState::Paused {
            debug!(state = %self.state, command, "step ignored");
            return Ok(None);
        }
        self.run_command(command).map(Some)
    }

    fn request_texture(&mut self, target: RenderTarget) -> DebugResult<u32> {
        if !self.client.connected() {
            return Err(ConfigurationError::NotConnected.into());
        }
        let seq = self
            .client
            .send(target.command(), Some(target.arguments()))?;
        self.pending_textures.insert(seq, target);
        Ok(seq)
    }

    /// Back to `NotStarted`; every pending entry becomes stale.
    fn reset(&mut self) {
        self.state = SessionState::NotStarted;
        self.stack.reset();
        self.last_trace.clear();
        self.pending_scene = None;
        self.pending_children.clear();
        self.pending_textures.clear();
        self.pending_run.clear();
        self.breakpoints.abandon_in_flight();
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }
}

fn unexpected_body(command: &str, body: &ReplyBody) -> ProtocolError {
    ProtocolError::InvalidBody {
        command: command.to_string(),
        reason: format!("unexpected reply {body:?}"),
    }
}
